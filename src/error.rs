//! Engine-level error types shared across the resolver, executor, runner, and bridge.

// self
use crate::_prelude::*;

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical engine error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Redirect storage failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::bridge::StorageError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// A parameter, reference, or projection could not be resolved.
	#[error(transparent)]
	Resolution(#[from] ResolutionError),
	/// A request failed and was not retried (or refused to retry).
	#[error(transparent)]
	Request(#[from] RequestError),
	/// Ledger or state could not cross the redirect boundary.
	#[error(transparent)]
	Bridge(#[from] BridgeError),

	/// Provider answered the redirect without the data the flow needs.
	#[error("Provider `{provider}` did not complete the flow: {reason}.")]
	Provider {
		/// Provider name from the configuration.
		provider: String,
		/// Human-readable reason string.
		reason: String,
	},
}
impl Error {
	/// Returns the HTTP status attached to a request failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Request(err) => err.status(),
			_ => None,
		}
	}
}

/// Configuration and validation failures raised by the engine.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// A configured or resolved URL cannot be parsed.
	#[error("URL `{url}` is invalid.")]
	InvalidUrl {
		/// Offending URL text.
		url: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Native provider descriptor failed validation.
	#[error(transparent)]
	InvalidProvider(#[from] crate::provider::ProviderDescriptorError),

	/// Provider name is not configured.
	#[error("Provider `{provider}` is not configured.")]
	UnknownProvider {
		/// Requested provider name.
		provider: String,
	},
	/// Two steps of one provider share a name.
	#[error("Step name `{step}` is used more than once by provider `{provider}`.")]
	DuplicateStep {
		/// Provider name.
		provider: String,
		/// Duplicated step name.
		step: String,
	},
	/// A ledger entry with the same step name was already appended.
	#[error("Ledger already holds a record for step `{step}`.")]
	LedgerEntryExists {
		/// Step name.
		step: String,
	},
	/// Two steps of one stage share a key.
	#[error("Stage already contains a step keyed `{key}`.")]
	DuplicateStepKey {
		/// Duplicated key.
		key: String,
	},
	/// `BodyFormat::Raw` was paired with a structured body.
	#[error("Step `{step}` uses the raw body format without a raw string body.")]
	RawBodyNotString {
		/// Step name.
		step: String,
	},
	/// The `test` flag was set on a step that never redirects.
	#[error("Step `{step}` of provider `{provider}` sets `test` but is not the terminal before-redirect step.")]
	TestFlagNotTerminal {
		/// Provider name.
		provider: String,
		/// Step name.
		step: String,
	},
	/// A stage that must redirect has no steps.
	#[error("Provider `{provider}` has an empty {stage} stage.")]
	EmptyStage {
		/// Provider name.
		provider: String,
		/// Stage label.
		stage: &'static str,
	},
	/// Library function name is not part of the registry.
	#[error("Library function `{name}` does not exist.")]
	UnknownLibraryFunction {
		/// Requested name.
		name: String,
	},
	/// Generator called a library function it did not declare.
	#[error("Library function `{function}` was not declared as required.")]
	LibraryFunctionNotRequired {
		/// Wire name of the function.
		function: &'static str,
	},
	/// A value the flow needs is missing from the params list.
	#[error("Params list is missing `{name}`.")]
	MissingParam {
		/// Param name.
		name: &'static str,
	},
	/// An HTTP server link was requested but no server URL is configured.
	#[error("Configuration does not define a server URL.")]
	MissingServerUrl,
}
impl ConfigError {
	/// Wraps a URL parsing failure with the text that failed.
	pub fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
		Self::InvalidUrl { url: url.into(), source }
	}
}

/// Failures produced while resolving parameters, references, and projections.
#[derive(Debug, ThisError)]
pub enum ResolutionError {
	/// Reference path has fewer than the required segments.
	#[error("Reference for `{key}` needs at least {required} segments but has {len}.")]
	ReferenceTooShort {
		/// Parameter key being resolved.
		key: String,
		/// Segment count supplied.
		len: usize,
		/// Minimum segment count.
		required: usize,
	},
	/// Reference names a ledger entry that does not exist (yet).
	#[error("Reference for `{key}` names unknown step `{step}`.")]
	UnknownLedgerEntry {
		/// Parameter key being resolved.
		key: String,
		/// Step name from segment 0.
		step: String,
	},
	/// Reference segment 1 is neither `request` nor `response`.
	#[error("Reference for `{key}` must select `request` or `response`, not `{segment}`.")]
	InvalidRecordHalf {
		/// Parameter key being resolved.
		key: String,
		/// Offending segment.
		segment: String,
	},
	/// A nested property along the reference path is absent.
	#[error("Reference for `{key}` found nothing at `{path}`.")]
	MissingProperty {
		/// Parameter key being resolved.
		key: String,
		/// Dotted path that was walked.
		path: String,
	},
	/// Function or library generator returned no usable value.
	#[error("Resolver for `{key}` returned an empty value.")]
	EmptyValue {
		/// Parameter key being resolved.
		key: String,
	},
	/// Extraction path is absent from the response.
	#[error("Response has nothing at `{path}` for result key `{key}`.")]
	Projection {
		/// Result accumulator key.
		key: String,
		/// Dotted path that was walked.
		path: String,
	},
	/// A library function rejected its arguments.
	#[error("Library function `{function}` failed: {reason}.")]
	Library {
		/// Wire name of the function.
		function: &'static str,
		/// Human-readable reason string.
		reason: String,
	},
}

/// Failures raised while sending one request; retryable subject to the retry predicate.
#[derive(Debug, ThisError)]
pub enum RequestError {
	/// Upstream answered with a non-2xx status.
	#[error("Request returned HTTP {status}.")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Leading part of the response body.
		body: String,
	},
	/// The attempt exceeded its timeout and was aborted.
	#[error("Request timed out after {after}.")]
	Timeout {
		/// Timeout that elapsed.
		after: Duration,
	},
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Transport {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while sending the request.")]
	Io(#[from] std::io::Error),
	/// Response declared as JSON could not be parsed.
	#[error("Response body is not valid JSON.")]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// A validator rejected the response.
	#[error("Response validator #{index} rejected the response.")]
	Validation {
		/// Zero-based validator position.
		index: usize,
	},
	/// Proxy endpoint did not report success.
	#[error("Proxy rejected the request: {message}.")]
	Proxy {
		/// Proxy-supplied or engine-supplied message.
		message: String,
	},
}
impl RequestError {
	/// Wraps a transport-specific network error.
	pub fn transport(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Transport { source: Box::new(src) }
	}

	/// HTTP status code associated with the failure, when one was observed.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Status { status, .. } => Some(*status),
			Self::Parse { status, .. } => *status,
			_ => None,
		}
	}

	/// Returns true when the attempt was aborted by its timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for RequestError {
	fn from(e: ReqwestError) -> Self {
		Self::transport(e)
	}
}

/// Failures while moving the ledger, result accumulator, or state across the redirect.
#[derive(Debug, ThisError)]
pub enum BridgeError {
	/// Value could not be serialized for storage.
	#[error("Failed to encode `{key}` for the redirect.")]
	Encode {
		/// Storage key or parameter name.
		key: &'static str,
		/// Serialization failure.
		#[source]
		source: serde_json::Error,
	},
	/// Stored value is not valid base64.
	#[error("Stored `{key}` is not valid base64.")]
	Base64 {
		/// Storage key.
		key: &'static str,
		/// Decoding failure.
		#[source]
		source: base64::DecodeError,
	},
	/// Stored or echoed JSON does not match the expected shape.
	#[error("Stored `{key}` could not be decoded.")]
	Decode {
		/// Storage key or parameter name.
		key: &'static str,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// The `state` parameter is not valid percent-encoded UTF-8.
	#[error("Redirect `state` parameter is not valid UTF-8.")]
	StateEncoding {
		/// Decoding failure.
		#[source]
		source: std::str::Utf8Error,
	},
	/// No state envelope was found after the redirect.
	#[error("Redirect carried no state and none was stored.")]
	MissingState,
}
