//! Server surface: finishes flows, runs server-only helpers, and proxies requests.

// self
use crate::{
	_prelude::*,
	config::EngineConfig,
	executor::{ProxyRequest, RequestExecutor},
	flows::{Envelope, GetUserRequest, LinkFuture, ServerLink},
	http::PipelineHttpClient,
	ledger::ResultAccumulator,
	library::{self, LibraryFunctionId, LibraryRegistry},
	pipeline::PipelineRunner,
	resolve::ReferenceSource,
	step::StageKind,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Server specialized for the crate's default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestServer = Server<ReqwestHttpClient>;

/// Holds the configuration (secrets included) and the transport.
pub struct Server<C>
where
	C: ?Sized + PipelineHttpClient,
{
	config: Arc<EngineConfig>,
	http: Arc<C>,
	registry: LibraryRegistry,
}
impl<C> Server<C>
where
	C: ?Sized + PipelineHttpClient,
{
	/// Creates a server over `config` and `http`.
	pub fn new(config: Arc<EngineConfig>, http: impl Into<Arc<C>>) -> Self {
		Self { config, http: http.into(), registry: LibraryRegistry::server() }
	}

	/// Shared configuration.
	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	/// Runs the provider's after-redirect stage and wraps the result accumulator.
	pub async fn get_user(&self, request: GetUserRequest) -> Envelope {
		self.complete(request).await.map(ResultAccumulator::into_value).into()
	}

	/// Runs the provider's after-redirect stage.
	///
	/// References walk the ledger. When nothing came across the redirect, a reference whose
	/// first segment is not a step of this stage walks the redirect parameters instead.
	pub async fn complete(&self, request: GetUserRequest) -> Result<ResultAccumulator> {
		let GetUserRequest { provider, ledger, results, redirect } = request;
		let entry = self.config.provider(&provider)?;
		let stage = entry.after_stage()?;
		let references = if ledger.is_empty() {
			ReferenceSource::Override(&redirect)
		} else {
			ReferenceSource::Ledger
		};
		let run = PipelineRunner::new(&provider, &*self.http, &self.registry, &entry.params)
			.with_timeout(self.config.timeout())
			.with_hooks(&entry.hooks)
			.with_error_handler(Some(self.config.error_handler()))
			.with_references(references)
			.with_redirect(Some(&redirect))
			.run(StageKind::AfterRedirect, &stage, ledger, results)
			.await?;

		Ok(run.results)
	}

	/// Runs one library function by wire name.
	pub fn helper_function(&self, name: &str, args: &[Value]) -> Envelope {
		name.parse::<LibraryFunctionId>()
			.map_err(Error::from)
			.and_then(|id| Ok(library::invoke(id, args)?))
			.into()
	}

	/// Performs `request` on the caller's behalf and wraps the parsed reply.
	pub async fn use_proxy(&self, request: ProxyRequest) -> Envelope {
		RequestExecutor::new(&*self.http, self.config.timeout()).forward(&request).await.into()
	}
}
impl<C> ServerLink for Server<C>
where
	C: ?Sized + PipelineHttpClient,
{
	fn helper<'a>(&'a self, function: LibraryFunctionId, args: Vec<Value>) -> LinkFuture<'a, Value> {
		Box::pin(async move { Ok(library::invoke(function, &args)?) })
	}

	fn get_user<'a>(&'a self, request: GetUserRequest) -> LinkFuture<'a, Envelope> {
		Box::pin(async move { Ok(Server::get_user(self, request).await) })
	}
}
impl<C> Debug for Server<C>
where
	C: ?Sized + PipelineHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Server").field("config", &self.config).finish()
	}
}
