//! Single-step request execution: timeout, proxy routing, parsing, validation, retries.
//!
//! [`RequestExecutor::execute`] drives the retry state machine
//! `attempting -> {succeeded | retryable -> waiting -> attempting | fatal}`. A fatal
//! failure is returned as `Err`; running out of attempts is not an error and yields
//! [`Outcome::Exhausted`], whose payload is `{"error":"Max Retries Reached"}`.

mod retry;

pub use retry::*;

// crates.io
use oauth2::{HttpClientError, HttpRequest, HttpResponse};
// self
use crate::{
	_prelude::*,
	error::RequestError,
	flows::{Envelope, EnvelopeStatus},
	http::{PipelineHttpClient, ResponseMetadataSlot},
	ledger::Ledger,
	obs,
	step::{HttpMethod, ParseType, StepDescriptor, ValidationContext},
};

/// Message carried by the exhausted-retries payload.
pub const EXHAUSTED_MESSAGE: &str = "Max Retries Reached";
/// Per-attempt timeout used when neither the step nor the configuration sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::seconds(10);

const ERROR_BODY_LIMIT: usize = 512;

/// Fully resolved request, ready to send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
	/// Final URL including query parameters.
	pub url: String,
	/// HTTP method.
	pub method: HttpMethod,
	/// Headers, content type included.
	#[serde(default)]
	pub headers: IndexMap<String, String>,
	/// Encoded body, if any.
	#[serde(default)]
	pub body: Option<String>,
	/// How the reply is parsed.
	#[serde(default)]
	pub parse_response_type: ParseType,
}
impl ProxyRequest {
	/// JSON `POST` of `body` to `url`, expecting a JSON reply.
	pub fn post_json<T>(url: &Url, body: &T) -> Result<Self, RequestError>
	where
		T: ?Sized + Serialize,
	{
		let body =
			serde_json::to_string(body).map_err(|e| RequestError::Proxy { message: e.to_string() })?;

		Ok(Self {
			url: url.to_string(),
			method: HttpMethod::Post,
			headers: IndexMap::from([("Content-Type".to_owned(), "application/json".to_owned())]),
			body: Some(body),
			parse_response_type: ParseType::Json,
		})
	}
}

/// Result of executing one step.
#[derive(Debug)]
pub enum Outcome {
	/// Parsed, validated payload.
	Completed(Value),
	/// Every allowed attempt failed with a retryable error.
	Exhausted {
		/// Attempts made.
		attempts: u32,
		/// Failure of the final attempt.
		last_error: RequestError,
	},
}
impl Outcome {
	/// `{"error":"Max Retries Reached"}`.
	pub fn exhausted_payload() -> Value {
		serde_json::json!({ "error": EXHAUSTED_MESSAGE })
	}

	/// Returns true when retries ran out.
	pub fn is_exhausted(&self) -> bool {
		matches!(self, Self::Exhausted { .. })
	}

	/// Payload recorded as the step's response.
	pub fn into_payload(self) -> Value {
		match self {
			Self::Completed(value) => value,
			Self::Exhausted { .. } => Self::exhausted_payload(),
		}
	}
}

/// Sends step requests through a [`PipelineHttpClient`].
pub struct RequestExecutor<'a, C>
where
	C: ?Sized + PipelineHttpClient,
{
	http: &'a C,
	default_timeout: Duration,
}
impl<'a, C> RequestExecutor<'a, C>
where
	C: ?Sized + PipelineHttpClient,
{
	/// Creates an executor using `default_timeout` for steps without an override.
	pub fn new(http: &'a C, default_timeout: Duration) -> Self {
		Self { http, default_timeout }
	}

	/// Runs `request` under `step`'s timeout, proxy, validators, and retry policy.
	pub async fn execute(
		&self,
		request: &ProxyRequest,
		step: &StepDescriptor,
		ledger: &Ledger,
	) -> Result<Outcome, RequestError> {
		let policy = &step.request.retry;
		let max_retries = policy.max_retries();
		let timeout = step.request.timeout.unwrap_or(self.default_timeout);
		let started = OffsetDateTime::now_utc();
		let mut attempt = 0;
		let mut last_delay = None;

		loop {
			attempt += 1;

			let attempt_at = OffsetDateTime::now_utc();
			let slot = ResponseMetadataSlot::default();
			let error = match self.attempt(request, step, ledger, timeout, &slot).await {
				Ok(value) => return Ok(Outcome::Completed(value)),
				Err(error) => error,
			};
			let meta = slot.take().unwrap_or_default();
			let status = error.status().or(meta.status);

			if !policy.should_retry(&error, status) {
				return Err(error);
			}
			if attempt >= max_retries {
				return Ok(Outcome::Exhausted { attempts: attempt, last_error: error });
			}

			let ctx = RetryContext {
				attempt,
				last_error: &error,
				last_status: status,
				retry_after: meta.retry_after,
				elapsed: OffsetDateTime::now_utc() - started,
				last_attempt_at: attempt_at,
				last_delay,
				max_retries,
				timeout,
				ledger,
			};
			let delay = policy.delay(attempt, &ctx);

			if let Some(hook) = &policy.on_retry {
				hook(&ctx);
			}

			obs::retry_scheduled(attempt, max_retries, delay, &error);
			tokio::time::sleep(delay.try_into().unwrap_or_default()).await;

			last_delay = Some(delay);
		}
	}

	async fn attempt(
		&self,
		request: &ProxyRequest,
		step: &StepDescriptor,
		ledger: &Ledger,
		timeout: Duration,
		slot: &ResponseMetadataSlot,
	) -> Result<Value, RequestError> {
		let send = async {
			match &step.proxy {
				Some(proxy) => self.send_via_proxy(proxy, request, slot).await,
				None => self.send_direct(request, slot).await,
			}
		};
		let value = tokio::time::timeout(timeout.try_into().unwrap_or_default(), send)
			.await
			.map_err(|_| RequestError::Timeout { after: timeout })??;

		validate(step, ledger, &value)?;

		Ok(value)
	}

	/// Sends `request` once under the default timeout, without validators or retries.
	///
	/// Used where the caller already resolved everything: proxied requests and server round
	/// trips.
	pub async fn forward(&self, request: &ProxyRequest) -> Result<Value, RequestError> {
		let slot = ResponseMetadataSlot::default();

		tokio::time::timeout(
			self.default_timeout.try_into().unwrap_or_default(),
			self.send_direct(request, &slot),
		)
		.await
		.map_err(|_| RequestError::Timeout { after: self.default_timeout })?
	}

	async fn send_direct(
		&self,
		request: &ProxyRequest,
		slot: &ResponseMetadataSlot,
	) -> Result<Value, RequestError> {
		let response = self.send(build_request(request)?, slot).await?;

		parse_body(request.parse_response_type, response.status().as_u16(), response.body())
	}

	async fn send_via_proxy(
		&self,
		proxy: &Url,
		request: &ProxyRequest,
		slot: &ResponseMetadataSlot,
	) -> Result<Value, RequestError> {
		let envelope = ProxyRequest::post_json(proxy, request)?;
		let response = self.send(build_request(&envelope)?, slot).await?;
		let status = response.status().as_u16();
		let mut de = serde_json::Deserializer::from_slice(response.body());
		let reply: Envelope = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| RequestError::Parse { source, status: Some(status) })?;

		match reply.status {
			EnvelopeStatus::Success => Ok(reply.data),
			EnvelopeStatus::Error => Err(RequestError::Proxy {
				message: reply.data.as_str().map_or_else(|| reply.data.to_string(), str::to_owned),
			}),
		}
	}

	async fn send(
		&self,
		request: HttpRequest,
		slot: &ResponseMetadataSlot,
	) -> Result<HttpResponse, RequestError> {
		let handle = self.http.with_metadata(slot.clone());
		let response =
			oauth2::AsyncHttpClient::call(&handle, request).await.map_err(map_transport_error)?;
		let status = response.status();

		if !status.is_success() {
			let body = String::from_utf8_lossy(response.body());

			return Err(RequestError::Status {
				status: status.as_u16(),
				body: body.chars().take(ERROR_BODY_LIMIT).collect(),
			});
		}

		Ok(response)
	}
}
impl<C> Debug for RequestExecutor<'_, C>
where
	C: ?Sized + PipelineHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestExecutor").field("default_timeout", &self.default_timeout).finish()
	}
}

/// Parses a successful body per `parse`.
pub fn parse_body(parse: ParseType, status: u16, body: &[u8]) -> Result<Value, RequestError> {
	match parse {
		ParseType::Json => {
			let mut de = serde_json::Deserializer::from_slice(body);

			serde_path_to_error::deserialize(&mut de)
				.map_err(|source| RequestError::Parse { source, status: Some(status) })
		},
		ParseType::Text => Ok(Value::String(String::from_utf8_lossy(body).into_owned())),
		ParseType::Form => Ok(Value::Object(
			url::form_urlencoded::parse(body)
				.map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
				.collect(),
		)),
	}
}

fn validate(step: &StepDescriptor, ledger: &Ledger, response: &Value) -> Result<(), RequestError> {
	let ctx = ValidationContext { ledger, response };

	match step.response.validators.iter().position(|validator| !validator(&ctx)) {
		Some(index) => Err(RequestError::Validation { index }),
		None => Ok(()),
	}
}

fn build_request(request: &ProxyRequest) -> Result<HttpRequest, RequestError> {
	let mut builder =
		oauth2::http::Request::builder().method(request.method.as_str()).uri(request.url.as_str());

	for (name, value) in &request.headers {
		builder = builder.header(name.as_str(), value.as_str());
	}

	builder
		.body(request.body.as_deref().map(|body| body.as_bytes().to_vec()).unwrap_or_default())
		.map_err(RequestError::transport)
}

fn map_transport_error<E>(err: HttpClientError<E>) -> RequestError
where
	E: 'static + Send + Sync + StdError,
{
	match err {
		HttpClientError::Reqwest(inner) => RequestError::Transport { source: inner },
		HttpClientError::Http(inner) => RequestError::transport(inner),
		HttpClientError::Io(inner) => RequestError::Io(inner),
		HttpClientError::Other(message) => RequestError::Transport { source: message.into() },
		_ => RequestError::Transport { source: "unknown transport failure".into() },
	}
}
