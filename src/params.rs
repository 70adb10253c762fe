//! Static, caller-supplied values visible to every step of one provider flow.

// self
use crate::{_prelude::*, error::ConfigError};

/// Reusable values (client credentials, redirect URI, scope, extras) for one provider.
///
/// The list is read-only while a stage runs. It serializes with camelCase keys and
/// flattens `extra` into the same object, which is the shape the server receives
/// for custom-provider completions.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsList {
	/// OAuth client identifier (or OAuth 1.0a consumer key).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	/// OAuth client secret (or OAuth 1.0a consumer secret).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_secret: Option<String>,
	/// Redirect URI registered with the provider.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub redirect_uri: Option<String>,
	/// Scope string, already joined with the provider's delimiter.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
	/// Free-form extras.
	#[serde(flatten)]
	pub extra: BTreeMap<String, Value>,
}
impl ParamsList {
	/// Creates an empty list.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the client identifier.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Sets the client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Sets the redirect URI.
	pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
		self.redirect_uri = Some(redirect_uri.into());

		self
	}

	/// Sets the scope string.
	pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Adds or replaces an extra value.
	pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.extra.insert(key.into(), value.into());

		self
	}

	/// Looks up a value by its wire name (`clientId`, `clientSecret`, `redirectUri`,
	/// `scope`) or an extra key.
	pub fn get(&self, key: &str) -> Option<Value> {
		let known = match key {
			"clientId" => self.client_id.as_ref(),
			"clientSecret" => self.client_secret.as_ref(),
			"redirectUri" => self.redirect_uri.as_ref(),
			"scope" => self.scope.as_ref(),
			_ => return self.extra.get(key).cloned(),
		};

		known.map(|value| Value::String(value.clone()))
	}

	/// Returns the client identifier or a configuration error.
	pub fn require_client_id(&self) -> Result<&str, ConfigError> {
		self.client_id.as_deref().ok_or(ConfigError::MissingParam { name: "clientId" })
	}

	/// Returns the client secret or a configuration error.
	pub fn require_client_secret(&self) -> Result<&str, ConfigError> {
		self.client_secret.as_deref().ok_or(ConfigError::MissingParam { name: "clientSecret" })
	}

	/// Returns the redirect URI or a configuration error.
	pub fn require_redirect_uri(&self) -> Result<&str, ConfigError> {
		self.redirect_uri.as_deref().ok_or(ConfigError::MissingParam { name: "redirectUri" })
	}
}
impl Debug for ParamsList {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ParamsList")
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("redirect_uri", &self.redirect_uri)
			.field("scope", &self.scope)
			.field("extra", &self.extra.keys().collect::<Vec<_>>())
			.finish()
	}
}
