//! Declarative step descriptors and the ordered stages that hold them.
//!
//! A [`StepDescriptor`] describes one HTTP call: how to build the request from
//! [`ValueSpec`]s, how to parse and validate the reply, and which values to project
//! into the result accumulator. A [`Stage`] is an insertion-ordered collection of
//! steps; order is execution order and defines which ledger entries a step may see.
//! Descriptors are immutable once a run starts.

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	executor::RetryPolicy,
	ledger::{FetchRecord, Ledger},
	resolve::ValueSpec,
};

/// Parameter specifications keyed by parameter name, in declaration order.
pub type ParamSpecMap = IndexMap<String, ValueSpec>;

/// Hook invoked after a step completes, before its record joins the ledger.
pub type BeforeNextHook = Arc<dyn Fn(&Ledger, &FetchRecord) + Send + Sync>;

/// Response validator; returning `false` rejects the response.
pub type Validator = Arc<dyn Fn(&ValidationContext) -> bool + Send + Sync>;

/// Error handler deciding whether a failure aborts the run.
pub type ErrorHandler = Arc<dyn Fn(&Error, &ErrorSite) -> ErrorDisposition + Send + Sync>;

/// Which half of a provider flow a stage belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
	/// Steps executed before the browser leaves for the provider.
	BeforeRedirect,
	/// Steps executed once the provider redirects back.
	AfterRedirect,
}
impl StageKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			StageKind::BeforeRedirect => "before_redirect",
			StageKind::AfterRedirect => "after_redirect",
		}
	}
}
impl Display for StageKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// HTTP methods a step may use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
	/// `GET`
	#[default]
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl HttpMethod {
	/// Returns the method token as sent on the wire.
	pub const fn as_str(self) -> &'static str {
		match self {
			HttpMethod::Get => "GET",
			HttpMethod::Post => "POST",
			HttpMethod::Put => "PUT",
			HttpMethod::Patch => "PATCH",
			HttpMethod::Delete => "DELETE",
		}
	}
}
impl Display for HttpMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// How a resolved body is serialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
	/// JSON object of string values.
	#[default]
	Json,
	/// `application/x-www-form-urlencoded`.
	FormUrlEncoded,
	/// Raw string passthrough; requires [`BodySpec::Raw`].
	Raw,
}
impl BodyFormat {
	/// Content type implied by the format, if any.
	pub const fn content_type(self) -> Option<&'static str> {
		match self {
			BodyFormat::Json => Some("application/json"),
			BodyFormat::FormUrlEncoded => Some("application/x-www-form-urlencoded"),
			BodyFormat::Raw => None,
		}
	}
}

/// How a response body is parsed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseType {
	/// JSON document.
	#[default]
	Json,
	/// Raw text, kept as a string value.
	Text,
	/// `application/x-www-form-urlencoded` pairs, parsed into an object.
	Form,
}

/// Body specification for a step.
#[derive(Clone, Debug, Default)]
pub enum BodySpec {
	/// No body.
	#[default]
	Empty,
	/// Parameters resolved like url params and headers.
	Params(ParamSpecMap),
	/// Literal body sent as-is; bypasses resolution.
	Raw(String),
}

/// A projection from a response into the result accumulator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProjectionRepr", into = "ProjectionRepr")]
pub enum Projection {
	/// The entire response verbatim (`"all"`).
	All,
	/// Nested property path.
	Path(Vec<String>),
}
impl Projection {
	/// Builds a path projection.
	pub fn path<I, S>(segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::Path(segments.into_iter().map(Into::into).collect())
	}
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ProjectionRepr {
	Keyword(String),
	Path(Vec<String>),
}
impl TryFrom<ProjectionRepr> for Projection {
	type Error = String;

	fn try_from(repr: ProjectionRepr) -> Result<Self, Self::Error> {
		match repr {
			ProjectionRepr::Keyword(keyword) if keyword == "all" => Ok(Projection::All),
			ProjectionRepr::Keyword(other) =>
				Err(format!("Projection keyword must be `all`, got `{other}`.")),
			ProjectionRepr::Path(path) => Ok(Projection::Path(path)),
		}
	}
}
impl From<Projection> for ProjectionRepr {
	fn from(projection: Projection) -> Self {
		match projection {
			Projection::All => ProjectionRepr::Keyword("all".into()),
			Projection::Path(path) => ProjectionRepr::Path(path),
		}
	}
}

/// Inputs handed to every [`Validator`].
///
/// Validators see both the ledger so far and the parsed response of the current
/// attempt, so checks written against either signature fit the same type.
#[derive(Clone, Copy, Debug)]
pub struct ValidationContext<'a> {
	/// Ledger entries appended before this step.
	pub ledger: &'a Ledger,
	/// Parsed response of the current attempt.
	pub response: &'a Value,
}

/// Where a failure happened, handed to [`ErrorHandler`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorSite {
	/// Stage being executed.
	pub stage: StageKind,
	/// Step name.
	pub step: String,
	/// Parameter or result key involved, when the failure is scoped to one key.
	pub key: Option<String>,
}

/// Decision returned by an [`ErrorHandler`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorDisposition {
	/// Abort the run and return the error.
	#[default]
	Raise,
	/// Log and keep going (drop the key, or record the error marker for the step).
	Continue,
}

/// Request half of a step descriptor.
#[derive(Clone, Debug, Default)]
pub struct RequestSpec {
	/// HTTP method.
	pub method: HttpMethod,
	/// Query parameters appended to the URL.
	pub url_params: ParamSpecMap,
	/// Request headers.
	pub headers: ParamSpecMap,
	/// Request body.
	pub body: BodySpec,
	/// Body serialization.
	pub format: BodyFormat,
	/// Use the strict RFC 3986 set when encoding url params.
	pub percent_encode: bool,
	/// Per-attempt timeout override.
	pub timeout: Option<Duration>,
	/// Retry policy.
	pub retry: RetryPolicy,
}

/// Response half of a step descriptor.
#[derive(Clone, Default)]
pub struct ResponseSpec {
	/// Parse type.
	pub parse: ParseType,
	/// Validators run in order against every parsed response.
	pub validators: Vec<Validator>,
	/// Result accumulator projections, in declaration order.
	pub to_return: IndexMap<String, Projection>,
}
impl Debug for ResponseSpec {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResponseSpec")
			.field("parse", &self.parse)
			.field("validators", &self.validators.len())
			.field("to_return", &self.to_return)
			.finish()
	}
}

/// One URL's full request/response specification.
#[derive(Clone)]
pub struct StepDescriptor {
	/// Target URL (existing query parameters are kept).
	pub url: Url,
	/// Identifying name; defaults to the URL string.
	pub name: Option<String>,
	/// Request specification.
	pub request: RequestSpec,
	/// Response specification.
	pub response: ResponseSpec,
	/// Proxy endpoint that performs the request on the engine's behalf.
	pub proxy: Option<Url>,
	/// Hook invoked after the step, before its record joins the ledger.
	pub before_next: Option<BeforeNextHook>,
	/// Step-local error handler.
	pub on_error: Option<ErrorHandler>,
	/// Suppresses the actual browser redirect on a terminal before-redirect step.
	pub test: bool,
}
impl StepDescriptor {
	/// Parses `url` and creates a `GET` step with JSON parsing.
	pub fn new(url: &str) -> Result<Self, ConfigError> {
		let parsed = Url::parse(url).map_err(|source| ConfigError::invalid_url(url, source))?;

		Ok(Self::from_url(parsed))
	}

	/// Creates a `GET` step for an already parsed URL.
	pub fn from_url(url: Url) -> Self {
		Self {
			url,
			name: None,
			request: RequestSpec::default(),
			response: ResponseSpec::default(),
			proxy: None,
			before_next: None,
			on_error: None,
			test: false,
		}
	}

	/// Ledger name of the step.
	pub fn step_name(&self) -> &str {
		self.name.as_deref().unwrap_or_else(|| self.url.as_str())
	}

	/// Overrides the step name.
	pub fn named(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());

		self
	}

	/// Sets the HTTP method.
	pub fn method(mut self, method: HttpMethod) -> Self {
		self.request.method = method;

		self
	}

	/// Adds a url parameter.
	pub fn url_param(mut self, key: impl Into<String>, spec: impl Into<ValueSpec>) -> Self {
		self.request.url_params.insert(key.into(), spec.into());

		self
	}

	/// Adds a header.
	pub fn header(mut self, key: impl Into<String>, spec: impl Into<ValueSpec>) -> Self {
		self.request.headers.insert(key.into(), spec.into());

		self
	}

	/// Adds a body parameter, replacing a raw body if one was set.
	pub fn body_param(mut self, key: impl Into<String>, spec: impl Into<ValueSpec>) -> Self {
		let mut params = match std::mem::take(&mut self.request.body) {
			BodySpec::Params(params) => params,
			BodySpec::Empty | BodySpec::Raw(_) => ParamSpecMap::new(),
		};

		params.insert(key.into(), spec.into());

		self.request.body = BodySpec::Params(params);

		self
	}

	/// Sets a raw string body that bypasses resolution.
	pub fn raw_body(mut self, body: impl Into<String>) -> Self {
		self.request.body = BodySpec::Raw(body.into());

		self
	}

	/// Sets the body format.
	pub fn body_format(mut self, format: BodyFormat) -> Self {
		self.request.format = format;

		self
	}

	/// Toggles strict percent-encoding of url params.
	pub fn percent_encode(mut self, strict: bool) -> Self {
		self.request.percent_encode = strict;

		self
	}

	/// Overrides the per-attempt timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.request.timeout = Some(timeout);

		self
	}

	/// Sets the retry policy.
	pub fn retry(mut self, retry: RetryPolicy) -> Self {
		self.request.retry = retry;

		self
	}

	/// Sets the response parse type.
	pub fn parse(mut self, parse: ParseType) -> Self {
		self.response.parse = parse;

		self
	}

	/// Appends a response validator.
	pub fn validator<F>(mut self, validator: F) -> Self
	where
		F: 'static + Fn(&ValidationContext) -> bool + Send + Sync,
	{
		self.response.validators.push(Arc::new(validator));

		self
	}

	/// Projects a response path into the result accumulator under `key`.
	pub fn to_return(mut self, key: impl Into<String>, projection: Projection) -> Self {
		self.response.to_return.insert(key.into(), projection);

		self
	}

	/// Routes the request through a proxy endpoint.
	pub fn proxy(mut self, proxy: Url) -> Self {
		self.proxy = Some(proxy);

		self
	}

	/// Sets the before-next-step hook.
	pub fn before_next<F>(mut self, hook: F) -> Self
	where
		F: 'static + Fn(&Ledger, &FetchRecord) + Send + Sync,
	{
		self.before_next = Some(Arc::new(hook));

		self
	}

	/// Sets the step-local error handler.
	pub fn on_error<F>(mut self, handler: F) -> Self
	where
		F: 'static + Fn(&Error, &ErrorSite) -> ErrorDisposition + Send + Sync,
	{
		self.on_error = Some(Arc::new(handler));

		self
	}

	/// Suppresses the browser redirect on a terminal before-redirect step.
	pub fn test(mut self, test: bool) -> Self {
		self.test = test;

		self
	}

	/// Checks invariants that do not depend on the surrounding stage.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.request.format == BodyFormat::Raw
			&& !matches!(self.request.body, BodySpec::Raw(_))
		{
			return Err(ConfigError::RawBodyNotString { step: self.step_name().to_owned() });
		}

		Ok(())
	}
}
impl Debug for StepDescriptor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StepDescriptor")
			.field("url", &self.url.as_str())
			.field("name", &self.step_name())
			.field("request", &self.request)
			.field("response", &self.response)
			.field("proxy", &self.proxy.as_ref().map(Url::as_str))
			.field("before_next", &self.before_next.is_some())
			.field("on_error", &self.on_error.is_some())
			.field("test", &self.test)
			.finish()
	}
}

/// Insertion-ordered steps keyed by step name.
#[derive(Clone, Debug, Default)]
pub struct Stage(IndexMap<String, StepDescriptor>);
impl Stage {
	/// Creates an empty stage.
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a stage from steps in execution order.
	pub fn try_from_steps<I>(steps: I) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = StepDescriptor>,
	{
		steps.into_iter().try_fold(Self::new(), Self::with_step)
	}

	/// Appends a step, rejecting duplicate keys.
	pub fn with_step(mut self, step: StepDescriptor) -> Result<Self, ConfigError> {
		self.push(step)?;

		Ok(self)
	}

	/// Appends a step in place, rejecting duplicate keys.
	pub fn push(&mut self, step: StepDescriptor) -> Result<(), ConfigError> {
		step.validate()?;

		let key = step.step_name().to_owned();

		if self.0.contains_key(&key) {
			return Err(ConfigError::DuplicateStepKey { key });
		}

		self.0.insert(key, step);

		Ok(())
	}

	/// Steps in execution order.
	pub fn steps(&self) -> impl Iterator<Item = &StepDescriptor> {
		self.0.values()
	}

	/// Step names in execution order.
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	/// Looks up a step by name.
	pub fn get(&self, name: &str) -> Option<&StepDescriptor> {
		self.0.get(name)
	}

	/// Last step of the stage.
	pub fn terminal(&self) -> Option<&StepDescriptor> {
		self.0.last().map(|(_, step)| step)
	}

	/// Number of steps.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true when the stage has no steps.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
