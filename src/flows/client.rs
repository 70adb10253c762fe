//! Browser-side orchestration: the login click and the return from the provider.

// self
use crate::{
	_prelude::*,
	bridge::{self, RedirectBridge, RedirectStorage, StateEnvelope},
	config::EngineConfig,
	error::{BridgeError, ConfigError},
	flows::{Envelope, GetUserRequest, ServerLink},
	http::PipelineHttpClient,
	ledger::{Ledger, ResultAccumulator},
	library::LibraryRegistry,
	obs,
	pipeline::{PipelineRunner, RedirectForm, RunMode},
	step::StageKind,
};

/// The page the client runs in.
pub trait BrowserEnv
where
	Self: Send + Sync,
{
	/// Current page URL, including query and fragment.
	fn current_location(&self) -> Url;

	/// Navigates by submitting `form`.
	fn submit(&self, form: &RedirectForm) -> Result<()>;
}

/// Runs the before-redirect half of every flow and hands the rest to the server.
pub struct Client<C>
where
	C: ?Sized + PipelineHttpClient,
{
	config: Arc<EngineConfig>,
	http: Arc<C>,
	link: Arc<dyn ServerLink>,
	registry: LibraryRegistry,
	storage: Arc<dyn RedirectStorage>,
	env: Arc<dyn BrowserEnv>,
}
impl<C> Client<C>
where
	C: ?Sized + PipelineHttpClient,
{
	/// Creates a client; server-only library functions are forwarded through `link`.
	pub fn new(
		config: Arc<EngineConfig>,
		http: impl Into<Arc<C>>,
		link: Arc<dyn ServerLink>,
		storage: Arc<dyn RedirectStorage>,
		env: Arc<dyn BrowserEnv>,
	) -> Self {
		let registry = LibraryRegistry::browser(Arc::clone(&link));

		Self { config, http: http.into(), link, registry, storage, env }
	}

	/// Runs `provider`'s before-redirect stage and sends the browser to the provider.
	///
	/// Providers that echo `state` receive the encoded [`StateEnvelope`] through the
	/// `state` extra of their params list (custom steps read it with
	/// `ctx.params.get("state")`); for the others the envelope is stored with the ledger.
	/// A terminal step with the `test` flag returns the form without submitting it.
	pub async fn handle_login_click(&self, provider: &str, state: Value) -> Result<RedirectForm> {
		let entry = self.config.provider(provider)?;
		let envelope = StateEnvelope::new(provider, state);
		let echoes = entry.echoes_state();
		let mut params = entry.params.clone();

		if echoes {
			params.extra.insert("state".into(), bridge::encode_state(&envelope)?.into());
		}

		let stage = entry.before_stage(&params)?;
		let run = PipelineRunner::new(provider, &*self.http, &self.registry, &params)
			.with_timeout(self.config.timeout())
			.with_hooks(&entry.hooks)
			.with_error_handler(Some(self.config.error_handler()))
			.with_mode(RunMode::Client)
			.run(StageKind::BeforeRedirect, &stage, Ledger::new(), ResultAccumulator::new())
			.await?;
		let form = run.redirect.ok_or_else(|| ConfigError::EmptyStage {
			provider: provider.to_owned(),
			stage: StageKind::BeforeRedirect.as_str(),
		})?;

		RedirectBridge::new(&*self.storage)
			.persist(&run.ledger, &run.results, (!echoes).then_some(&envelope))
			.await?;

		let submit = !stage.terminal().is_some_and(|step| step.test);

		obs::redirecting(&form.action, submit);

		if submit {
			self.env.submit(&form)?;
		}

		Ok(form)
	}

	/// Completes the flow the provider just redirected back to.
	///
	/// Returns `{status, data: {state, response}}`, where `state` is what the login click
	/// was given and `response` is the server's reply data.
	pub async fn handle_redirect(&self) -> Result<Envelope> {
		let redirect = redirect_params(&self.env.current_location());
		let resumed = RedirectBridge::new(&*self.storage).resume().await?;
		let envelope = match redirect.get("state").and_then(Value::as_str) {
			Some(param) => bridge::decode_state(param)?,
			None => resumed.state.ok_or(BridgeError::MissingState)?,
		};

		if let Some(error) = redirect.get("error").and_then(Value::as_str) {
			let reason = redirect
				.get("error_description")
				.and_then(Value::as_str)
				.map_or_else(|| error.to_owned(), str::to_owned);

			return Err(Error::Provider { provider: envelope.provider, reason });
		}

		self.config.provider(&envelope.provider)?;

		let reply = self
			.link
			.get_user(GetUserRequest {
				provider: envelope.provider,
				ledger: resumed.ledger,
				results: resumed.results,
				redirect,
			})
			.await?;

		Ok(Envelope {
			status: reply.status,
			data: serde_json::json!({ "state": envelope.state, "response": reply.data }),
		})
	}
}
impl<C> Debug for Client<C>
where
	C: ?Sized + PipelineHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("config", &self.config)
			.field("registry", &self.registry)
			.finish()
	}
}

/// Collects query and fragment parameters (`code`, `access_token`, `oauth_token`,
/// `oauth_verifier`, `state`, and anything else the provider sent); fragment values win.
pub fn redirect_params(location: &Url) -> JsonMap<String, Value> {
	let fragment = location.fragment().unwrap_or_default();

	location
		.query_pairs()
		.chain(url::form_urlencoded::parse(fragment.as_bytes()))
		.map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
		.collect()
}
