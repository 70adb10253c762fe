//! Stage execution.
//!
//! [`PipelineRunner::run`] drives one [`Stage`] from its first step to its last. For
//! every step it resolves url params, headers and body, builds the URL and encodes the
//! body, fires `on_request_start`, executes, fires `on_request_end`, projects
//! `to_return` paths into the result accumulator, calls the before-next hook, and
//! appends the fetch record. Steps run strictly in order; a step only sees records
//! appended before it.
//!
//! In [`RunMode::Client`] the last step of the before-redirect stage is not sent.
//! It becomes a [`RedirectForm`] for the browser, and its record joins the ledger with a
//! `null` response.

// crates.io
use percent_encoding::utf8_percent_encode;
// self
use crate::{
	_prelude::*,
	error::ResolutionError,
	executor::{DEFAULT_TIMEOUT, Outcome, ProxyRequest, RequestExecutor},
	http::PipelineHttpClient,
	ledger::{CapturedRequest, FetchRecord, Ledger, ResultAccumulator},
	library::LibraryRegistry,
	oauth1::{RFC3986, URI_COMPONENT},
	obs::{self, StepOutcome, StepSpan},
	params::ParamsList,
	resolve::{ReferenceSource, Resolver},
	step::{
		BodyFormat, BodySpec, ErrorDisposition, ErrorHandler, ErrorSite, HttpMethod, Projection,
		Stage, StageKind, StepDescriptor,
	},
	value,
};

/// Hook fired with the step name and captured request before sending.
pub type RequestStartHook = Arc<dyn Fn(&str, &CapturedRequest) + Send + Sync>;
/// Hook fired with the step name and recorded payload after sending.
pub type RequestEndHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Where a stage runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunMode {
	/// Every step is sent.
	#[default]
	Server,
	/// The terminal before-redirect step becomes a [`RedirectForm`].
	Client,
}

/// Observability hooks for one provider's stages.
#[derive(Clone, Default)]
pub struct StageHooks {
	/// Fired before each request.
	pub on_request_start: Option<RequestStartHook>,
	/// Fired after each request.
	pub on_request_end: Option<RequestEndHook>,
	/// Stage-level error handler, consulted when a step has none.
	pub on_error: Option<ErrorHandler>,
}
impl StageHooks {
	/// Sets the request-start hook.
	pub fn on_request_start<F>(mut self, hook: F) -> Self
	where
		F: 'static + Fn(&str, &CapturedRequest) + Send + Sync,
	{
		self.on_request_start = Some(Arc::new(hook));

		self
	}

	/// Sets the request-end hook.
	pub fn on_request_end<F>(mut self, hook: F) -> Self
	where
		F: 'static + Fn(&str, &Value) + Send + Sync,
	{
		self.on_request_end = Some(Arc::new(hook));

		self
	}

	/// Sets the stage-level error handler.
	pub fn on_error<F>(mut self, handler: F) -> Self
	where
		F: 'static + Fn(&Error, &ErrorSite) -> ErrorDisposition + Send + Sync,
	{
		self.on_error = Some(Arc::new(handler));

		self
	}
}
impl Debug for StageHooks {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StageHooks")
			.field("on_request_start", &self.on_request_start.is_some())
			.field("on_request_end", &self.on_request_end.is_some())
			.field("on_error", &self.on_error.is_some())
			.finish()
	}
}

/// Browser navigation produced by a terminal before-redirect step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectForm {
	/// Form action.
	pub action: Url,
	/// Form method.
	pub method: HttpMethod,
	/// Hidden inputs.
	pub fields: IndexMap<String, String>,
}
impl RedirectForm {
	/// URL the browser lands on; `GET` forms carry their fields in the query.
	pub fn location(&self) -> Url {
		let mut url = self.action.clone();

		if self.method == HttpMethod::Get && !self.fields.is_empty() {
			url.query_pairs_mut().extend_pairs(&self.fields);
		}

		url
	}
}

/// Ledger, accumulator, and optional redirect left behind by a stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageRun {
	/// Ledger including every step of the stage.
	pub ledger: Ledger,
	/// Result accumulator after the last step.
	pub results: ResultAccumulator,
	/// Redirect built by the terminal step in client mode.
	pub redirect: Option<RedirectForm>,
}

/// Drives stages for one provider.
pub struct PipelineRunner<'a, C>
where
	C: ?Sized + PipelineHttpClient,
{
	provider: &'a str,
	http: &'a C,
	timeout: Duration,
	registry: &'a LibraryRegistry,
	params: &'a ParamsList,
	hooks: Option<&'a StageHooks>,
	global: Option<&'a ErrorHandler>,
	references: ReferenceSource<'a>,
	redirect: Option<&'a JsonMap<String, Value>>,
	mode: RunMode,
}
impl<'a, C> PipelineRunner<'a, C>
where
	C: ?Sized + PipelineHttpClient,
{
	/// Creates a server-mode runner with the default timeout and no handlers.
	pub fn new(
		provider: &'a str,
		http: &'a C,
		registry: &'a LibraryRegistry,
		params: &'a ParamsList,
	) -> Self {
		Self {
			provider,
			http,
			timeout: DEFAULT_TIMEOUT,
			registry,
			params,
			hooks: None,
			global: None,
			references: ReferenceSource::Ledger,
			redirect: None,
			mode: RunMode::Server,
		}
	}

	/// Sets the global per-attempt timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Attaches stage hooks.
	pub fn with_hooks(mut self, hooks: &'a StageHooks) -> Self {
		self.hooks = Some(hooks);

		self
	}

	/// Attaches the global error handler.
	pub fn with_error_handler(mut self, handler: Option<&'a ErrorHandler>) -> Self {
		self.global = handler;

		self
	}

	/// Walks references against `source`.
	pub fn with_references(mut self, source: ReferenceSource<'a>) -> Self {
		self.references = source;

		self
	}

	/// Exposes redirect parameters to resolver functions.
	pub fn with_redirect(mut self, redirect: Option<&'a JsonMap<String, Value>>) -> Self {
		self.redirect = redirect;

		self
	}

	/// Selects client or server mode.
	pub fn with_mode(mut self, mode: RunMode) -> Self {
		self.mode = mode;

		self
	}

	/// Runs `stage`, continuing from `ledger` and `results`.
	pub async fn run(
		&self,
		kind: StageKind,
		stage: &Stage,
		mut ledger: Ledger,
		mut results: ResultAccumulator,
	) -> Result<StageRun> {
		let terminal = stage.len().checked_sub(1);
		let mut redirect = None;

		for (index, step) in stage.steps().enumerate() {
			let redirects =
				self.mode == RunMode::Client && kind == StageKind::BeforeRedirect && Some(index) == terminal;
			let span = StepSpan::new(self.provider, kind, step.step_name());

			obs::record_step_outcome(kind, StepOutcome::Attempt);

			match span.instrument(self.run_step(kind, step, redirects, &mut ledger, &mut results)).await {
				Ok(outcome) => {
					obs::record_step_outcome(kind, outcome);
				},
				Err(e) => {
					obs::record_step_outcome(kind, StepOutcome::Failure);

					return Err(e);
				},
			}

			if redirects {
				redirect = ledger.get(step.step_name()).map(|record| redirect_form(step, record));
			}
		}

		Ok(StageRun { ledger, results, redirect })
	}

	async fn run_step(
		&self,
		kind: StageKind,
		step: &StepDescriptor,
		redirects: bool,
		ledger: &mut Ledger,
		results: &mut ResultAccumulator,
	) -> Result<StepOutcome> {
		let name = step.step_name();
		let mut current = FetchRecord::pending(CapturedRequest {
			method: step.request.method,
			url: step.url.to_string(),
			..Default::default()
		});
		let body = {
			let resolver = Resolver::new(self.params, ledger, self.registry)
				.with_references(self.references)
				.with_redirect(self.redirect);
			let mut sink = |err: Error, key: &str| self.route(kind, step, err, Some(key));

			current.request.url_params =
				resolver.resolve_map(&step.request.url_params, &current, &mut sink).await?;
			current.request.headers =
				resolver.resolve_map(&step.request.headers, &current, &mut sink).await?;

			match &step.request.body {
				BodySpec::Empty => None,
				BodySpec::Raw(raw) => Some(EncodedBody::raw(raw)),
				BodySpec::Params(specs) => {
					let fields = resolver.resolve_map(specs, &current, &mut sink).await?;

					Some(EncodedBody::encode(step.request.format, fields))
				},
			}
		};

		current.request.url =
			build_url(&step.url, &current.request.url_params, step.request.percent_encode).to_string();
		current.request.body = body.as_ref().map_or(Value::Null, |body| body.captured.clone());

		if let Some(hook) = self.hooks.and_then(|hooks| hooks.on_request_start.as_ref()) {
			hook(name, &current.request);
		}

		let outcome = if redirects {
			StepOutcome::Success
		} else {
			let request = prepare(step, &current.request, body);
			let executor = RequestExecutor::new(self.http, self.timeout);
			let outcome = match executor.execute(&request, step, ledger).await {
				Ok(outcome) => Some(outcome),
				Err(err) => {
					self.route(kind, step, err.into(), None)?;

					None
				},
			};

			match outcome {
				Some(Outcome::Completed(payload)) => {
					self.project(kind, step, &payload, results)?;

					current.response = payload;

					StepOutcome::Success
				},
				Some(exhausted @ Outcome::Exhausted { .. }) => {
					current.response = exhausted.into_payload();

					StepOutcome::Exhausted
				},
				None => {
					current = FetchRecord::failed(current.request);

					StepOutcome::Handled
				},
			}
		};

		if let Some(hook) =
			self.hooks.and_then(|hooks| hooks.on_request_end.as_ref()).filter(|_| !redirects)
		{
			hook(name, &current.response);
		}
		if let Some(hook) = &step.before_next {
			hook(ledger, &current);
		}

		if let Err(e) = ledger.append(name, current) {
			self.route(kind, step, e.into(), None)?;
		}

		Ok(outcome)
	}

	fn project(
		&self,
		kind: StageKind,
		step: &StepDescriptor,
		payload: &Value,
		results: &mut ResultAccumulator,
	) -> Result<()> {
		for (key, projection) in &step.response.to_return {
			let found = match projection {
				Projection::All => Some(payload.clone()),
				Projection::Path(path) => value::walk(payload, path).cloned(),
			};

			match (found, projection) {
				(Some(value), _) => results.insert(key.clone(), value),
				(None, Projection::Path(path)) => {
					let err = ResolutionError::Projection { key: key.clone(), path: value::dotted(path) };

					self.route(kind, step, err.into(), Some(key))?;
				},
				(None, Projection::All) => {},
			}
		}

		Ok(())
	}

	/// Routes a failure to the nearest handler: step, then stage hooks, then global.
	fn route(&self, kind: StageKind, step: &StepDescriptor, err: Error, key: Option<&str>) -> Result<()> {
		let handler = step
			.on_error
			.as_ref()
			.or_else(|| self.hooks.and_then(|hooks| hooks.on_error.as_ref()))
			.or(self.global);
		let site = ErrorSite { stage: kind, step: step.step_name().to_owned(), key: key.map(str::to_owned) };

		match handler.map_or(ErrorDisposition::Raise, |handler| handler(&err, &site)) {
			ErrorDisposition::Continue => {
				obs::error_handled(&site.step, site.key.as_deref(), &err);

				Ok(())
			},
			ErrorDisposition::Raise => Err(err),
		}
	}
}
impl<C> Debug for PipelineRunner<'_, C>
where
	C: ?Sized + PipelineHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PipelineRunner")
			.field("provider", &self.provider)
			.field("mode", &self.mode)
			.field("timeout", &self.timeout)
			.finish()
	}
}

struct EncodedBody {
	text: String,
	captured: Value,
	content_type: Option<&'static str>,
}
impl EncodedBody {
	fn raw(raw: &str) -> Self {
		Self { text: raw.to_owned(), captured: Value::String(raw.to_owned()), content_type: None }
	}

	fn encode(format: BodyFormat, fields: IndexMap<String, String>) -> Self {
		let form = match format {
			BodyFormat::FormUrlEncoded => Some(
				url::form_urlencoded::Serializer::new(String::new()).extend_pairs(&fields).finish(),
			),
			BodyFormat::Json | BodyFormat::Raw => None,
		};
		let captured =
			Value::Object(fields.into_iter().map(|(k, v)| (k, Value::String(v))).collect());
		let text = form.unwrap_or_else(|| captured.to_string());

		Self { text, captured, content_type: format.content_type() }
	}
}

/// Appends `params` to `url`'s query, keeping any query already present.
pub fn build_url(url: &Url, params: &IndexMap<String, String>, strict: bool) -> Url {
	let mut url = url.clone();

	if params.is_empty() {
		return url;
	}

	let set = if strict { RFC3986 } else { URI_COMPONENT };
	let appended = params
		.iter()
		.map(|(k, v)| format!("{}={}", utf8_percent_encode(k, set), utf8_percent_encode(v, set)))
		.collect::<Vec<_>>()
		.join("&");
	let query = match url.query() {
		Some(existing) if !existing.is_empty() => format!("{existing}&{appended}"),
		_ => appended,
	};

	url.set_query(Some(&query));

	url
}

fn prepare(step: &StepDescriptor, captured: &CapturedRequest, body: Option<EncodedBody>) -> ProxyRequest {
	let mut headers = captured.headers.clone();

	let has_content_type = headers.keys().any(|name| name.eq_ignore_ascii_case("content-type"));

	if let Some(content_type) = body.as_ref().and_then(|body| body.content_type).filter(|_| !has_content_type) {
		headers.insert("Content-Type".into(), content_type.into());
	}

	ProxyRequest {
		url: captured.url.clone(),
		method: step.request.method,
		headers,
		body: body.map(|body| body.text),
		parse_response_type: step.response.parse,
	}
}

fn redirect_form(step: &StepDescriptor, record: &FetchRecord) -> RedirectForm {
	match step.request.method {
		HttpMethod::Get => RedirectForm {
			action: step.url.clone(),
			method: HttpMethod::Get,
			fields: record.request.url_params.clone(),
		},
		method => RedirectForm {
			action: build_url(&step.url, &record.request.url_params, step.request.percent_encode),
			method,
			fields: record
				.request
				.body
				.as_object()
				.map(|body| {
					body.iter().filter_map(|(k, v)| value::flatten(v).map(|v| (k.clone(), v))).collect()
				})
				.unwrap_or_default(),
		},
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn strict_encoding_escapes_sub_delims_in_urls() {
		let base = Url::parse("https://api.example.com/search?fixed=1").expect("URL fixture should parse.");
		let params = IndexMap::from([("q".to_owned(), "it's (ok)!".to_owned())]);

		assert_eq!(
			build_url(&base, &params, true).as_str(),
			"https://api.example.com/search?fixed=1&q=it%27s%20%28ok%29%21"
		);
		assert!(build_url(&base, &params, false).as_str().contains("q=it%27s%20(ok)!"));
		assert_eq!(build_url(&base, &IndexMap::new(), true), base);
	}

	#[test]
	fn get_redirect_form_carries_fields_in_location() {
		let form = RedirectForm {
			action: Url::parse("https://provider.example.com/authorize")
				.expect("URL fixture should parse."),
			method: HttpMethod::Get,
			fields: IndexMap::from([
				("client_id".to_owned(), "id".to_owned()),
				("scope".to_owned(), "a b".to_owned()),
			]),
		};

		assert_eq!(
			form.location().as_str(),
			"https://provider.example.com/authorize?client_id=id&scope=a+b"
		);
	}

	#[test]
	fn form_body_encoding_and_capture() {
		let fields = IndexMap::from([("grant_type".to_owned(), "authorization_code".to_owned())]);
		let body = EncodedBody::encode(BodyFormat::FormUrlEncoded, fields);

		assert_eq!(body.text, "grant_type=authorization_code");
		assert_eq!(body.captured, serde_json::json!({ "grant_type": "authorization_code" }));
		assert_eq!(body.content_type, Some("application/x-www-form-urlencoded"));
	}
}
