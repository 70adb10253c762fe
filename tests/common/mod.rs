//! Helpers shared by the integration tests.

#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use httpmock::MockServer;
use parking_lot::Mutex;
// self
use oauth_pipeline::{
	bridge::MemoryStorage,
	config::EngineConfig,
	error::Result,
	flows::{BrowserEnv, Client, Envelope, GetUserRequest, LinkFuture, Server, ServerLink},
	http::ReqwestHttpClient,
	library::LibraryFunctionId,
	pipeline::RedirectForm,
	reqwest::Client as ReqwestClient,
	url::Url,
};

/// Client wired to an in-process [`Server`].
pub type TestClient = Client<ReqwestHttpClient>;

/// Reqwest transport that accepts the self-signed certificates `httpmock` serves.
pub fn test_reqwest_http_client() -> ReqwestHttpClient {
	let client = ReqwestClient::builder()
		.danger_accept_invalid_certs(true)
		.danger_accept_invalid_hostnames(true)
		.build()
		.expect("Failed to build insecure Reqwest client for tests.");

	ReqwestHttpClient::with_client(client)
}

/// Parses a URL served by `server`.
pub fn mock_url(server: &MockServer, path: &str) -> Url {
	Url::parse(&server.url(path)).expect("Mock server URL should parse.")
}

/// Browser stand-in with a settable location and a log of submitted forms.
#[derive(Debug)]
pub struct TestBrowser {
	location: Mutex<Url>,
	submitted: Mutex<Vec<RedirectForm>>,
}
impl TestBrowser {
	pub fn new(location: Url) -> Self {
		Self { location: Mutex::new(location), submitted: Mutex::new(Vec::new()) }
	}

	/// Simulates the provider sending the browser back.
	pub fn navigate(&self, location: Url) {
		*self.location.lock() = location;
	}

	pub fn submitted(&self) -> Vec<RedirectForm> {
		self.submitted.lock().clone()
	}
}
impl BrowserEnv for TestBrowser {
	fn current_location(&self) -> Url {
		self.location.lock().clone()
	}

	fn submit(&self, form: &RedirectForm) -> Result<()> {
		self.submitted.lock().push(form.clone());

		Ok(())
	}
}

/// In-process server link that logs which helpers the browser forwarded.
#[derive(Debug)]
pub struct RecordingLink {
	server: Server<ReqwestHttpClient>,
	helpers: Mutex<Vec<LibraryFunctionId>>,
}
impl RecordingLink {
	pub fn helpers(&self) -> Vec<LibraryFunctionId> {
		self.helpers.lock().clone()
	}
}
impl ServerLink for RecordingLink {
	fn helper<'a>(
		&'a self,
		function: LibraryFunctionId,
		args: Vec<serde_json::Value>,
	) -> LinkFuture<'a, serde_json::Value> {
		self.helpers.lock().push(function);

		self.server.helper(function, args)
	}

	fn get_user<'a>(&'a self, request: GetUserRequest) -> LinkFuture<'a, Envelope> {
		ServerLink::get_user(&self.server, request)
	}
}

/// Client, browser, and storage around a server that shares `config`.
pub fn build_test_client(
	config: Arc<EngineConfig>,
) -> (TestClient, Arc<TestBrowser>, Arc<MemoryStorage>) {
	let (client, browser, storage, _link) = build_recording_client(config);

	(client, browser, storage)
}

/// Like [`build_test_client`], also returning the link the client talks through.
pub fn build_recording_client(
	config: Arc<EngineConfig>,
) -> (TestClient, Arc<TestBrowser>, Arc<MemoryStorage>, Arc<RecordingLink>) {
	let link = Arc::new(RecordingLink {
		server: Server::new(Arc::clone(&config), test_reqwest_http_client()),
		helpers: Mutex::new(Vec::new()),
	});
	let browser = Arc::new(TestBrowser::new(
		Url::parse("https://app.example.com/").expect("Browser start location should parse."),
	));
	let storage = Arc::new(MemoryStorage::default());
	let client = Client::new(
		config,
		test_reqwest_http_client(),
		link.clone(),
		storage.clone(),
		browser.clone(),
	);

	(client, browser, storage, link)
}
