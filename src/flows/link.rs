//! [`ServerLink`] over HTTP: JSON `POST`s to `{server_url}/get-user` and `{server_url}/helper`.

// self
use crate::{
	_prelude::*,
	config::EngineConfig,
	error::{ConfigError, RequestError, ResolutionError},
	executor::{DEFAULT_TIMEOUT, ProxyRequest, RequestExecutor},
	flows::{Envelope, GetUserRequest, HelperRequest, LinkFuture, ServerLink},
	http::PipelineHttpClient,
	library::LibraryFunctionId,
};

/// Path of the flow completion endpoint.
pub const GET_USER_PATH: &str = "get-user";
/// Path of the helper endpoint.
pub const HELPER_PATH: &str = "helper";

/// Talks to a remote [`Server`](crate::flows::Server) through a [`PipelineHttpClient`].
pub struct HttpServerLink<C>
where
	C: ?Sized + PipelineHttpClient,
{
	base: Url,
	http: Arc<C>,
	timeout: Duration,
}
impl<C> HttpServerLink<C>
where
	C: ?Sized + PipelineHttpClient,
{
	/// Creates a link to the server mounted at `base`.
	pub fn new(base: Url, http: impl Into<Arc<C>>) -> Self {
		Self { base, http: http.into(), timeout: DEFAULT_TIMEOUT }
	}

	/// Creates a link to the configured server URL, using the configured timeout.
	pub fn from_config(config: &EngineConfig, http: impl Into<Arc<C>>) -> Result<Self, ConfigError> {
		let base = config.server_url().ok_or(ConfigError::MissingServerUrl)?;

		Ok(Self::new(base.clone(), http).with_timeout(config.timeout()))
	}

	/// Overrides the per-call timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// URL of the endpoint at `path` below the base.
	pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
		let mut url = self.base.clone();

		url.path_segments_mut()
			.map_err(|_| {
				ConfigError::invalid_url(
					self.base.as_str(),
					url::ParseError::RelativeUrlWithCannotBeABaseBase,
				)
			})?
			.pop_if_empty()
			.push(path);

		Ok(url)
	}

	async fn post<T>(&self, path: &str, body: &T) -> Result<Envelope>
	where
		T: ?Sized + Serialize,
	{
		let request = ProxyRequest::post_json(&self.endpoint(path)?, body)?;
		let reply = RequestExecutor::new(&*self.http, self.timeout).forward(&request).await?;
		let envelope = serde_path_to_error::deserialize(reply)
			.map_err(|source| RequestError::Parse { source, status: None })?;

		Ok(envelope)
	}
}
impl<C> ServerLink for HttpServerLink<C>
where
	C: ?Sized + PipelineHttpClient,
{
	fn helper<'a>(&'a self, function: LibraryFunctionId, args: Vec<Value>) -> LinkFuture<'a, Value> {
		Box::pin(async move {
			let envelope = self.post(HELPER_PATH, &HelperRequest { name: function, args }).await?;

			envelope.into_data().map_err(|reason| {
				Error::from(ResolutionError::Library { function: function.as_str(), reason })
			})
		})
	}

	fn get_user<'a>(&'a self, request: GetUserRequest) -> LinkFuture<'a, Envelope> {
		Box::pin(async move { self.post(GET_USER_PATH, &request).await })
	}
}
impl<C> Debug for HttpServerLink<C>
where
	C: ?Sized + PipelineHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpServerLink")
			.field("base", &self.base.as_str())
			.field("timeout", &self.timeout)
			.finish()
	}
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;
	use crate::http::ReqwestHttpClient;

	#[test]
	fn endpoints_join_below_the_base() {
		for base in ["https://app.example.com/auth", "https://app.example.com/auth/"] {
			let link: HttpServerLink<ReqwestHttpClient> = HttpServerLink::new(
				Url::parse(base).expect("Base URL fixture should parse."),
				ReqwestHttpClient::default(),
			);

			assert_eq!(
				link.endpoint(GET_USER_PATH).expect("Endpoint should join.").as_str(),
				"https://app.example.com/auth/get-user"
			);
		}
	}

	#[test]
	fn config_supplies_the_base_and_timeout() {
		let config = EngineConfig::builder()
			.server_url(Url::parse("https://app.example.com/auth").expect("Server URL should parse."))
			.timeout(Duration::seconds(3))
			.build()
			.expect("Config should build.");
		let link: HttpServerLink<ReqwestHttpClient> =
			HttpServerLink::from_config(&config, ReqwestHttpClient::default())
				.expect("Configured server URL should yield a link.");

		assert_eq!(link.timeout, Duration::seconds(3));
		assert_eq!(
			link.endpoint(HELPER_PATH).expect("Endpoint should join.").as_str(),
			"https://app.example.com/auth/helper"
		);

		let bare = EngineConfig::builder().build().expect("Empty config should build.");

		assert!(matches!(
			HttpServerLink::<ReqwestHttpClient>::from_config(&bare, ReqwestHttpClient::default()),
			Err(ConfigError::MissingServerUrl)
		));
	}
}
