//! Validating builder for [`NativeProvider`] descriptors.

// self
use crate::{
	_prelude::*,
	provider::{NativeProvider, ProfileParam, ProtocolVersion, ProviderEndpoints, ProviderQuirks},
	step::BodyFormat,
};

/// Errors raised while constructing or validating native providers.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Every provider redirects to an authorization endpoint.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// OAuth 2.0 code flows exchange the code at a token endpoint.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// OAuth 1.0a needs both credential endpoints.
	#[error("Missing {endpoint} endpoint.")]
	MissingOAuth1Endpoint {
		/// Which endpoint is absent.
		endpoint: &'static str,
	},
	/// Every native flow ends with a profile request.
	#[error("Missing profile endpoint.")]
	MissingProfileEndpoint,
	/// OAuth 1.0a has no implicit variant.
	#[error("The implicit flow is only available for OAuth 2.0 providers.")]
	ImplicitOAuth1,
	/// OAuth 1.0a signs the profile URL up front, so extras must be literals.
	#[error("OAuth 1.0a profile parameter `{key}` must be a literal.")]
	UnsignedProfileParam {
		/// Parameter name.
		key: String,
	},
	/// Raw bodies cannot carry a token exchange.
	#[error("Token requests must be encoded as JSON or a form.")]
	InvalidTokenFormat,
	/// Endpoint text is not a URL.
	#[error("Endpoint `{url}` is not a valid URL: {reason}.")]
	InvalidEndpoint {
		/// Endpoint text that failed to parse.
		url: String,
		/// Parser message.
		reason: String,
	},
	/// Endpoints must use HTTPS.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Reject scope delimiters that are control characters.
	#[error("Scope delimiter must be a printable character.")]
	InvalidScopeDelimiter {
		/// Invalid delimiter that was supplied.
		delimiter: char,
	},
}

/// Builder for [`NativeProvider`] values.
#[derive(Debug)]
pub struct NativeProviderBuilder {
	/// Provider name.
	pub name: String,
	/// Protocol family.
	pub version: ProtocolVersion,
	/// Authorization endpoint.
	pub authorization_endpoint: Option<Url>,
	/// OAuth 2.0 token endpoint.
	pub token_endpoint: Option<Url>,
	/// OAuth 1.0a temporary credentials endpoint.
	pub request_token_endpoint: Option<Url>,
	/// OAuth 1.0a token credentials endpoint.
	pub access_token_endpoint: Option<Url>,
	/// Profile endpoint.
	pub profile_endpoint: Option<Url>,
	/// Extra profile query parameters.
	pub profile_params: IndexMap<String, ProfileParam>,
	/// Extra headers sent to the provider.
	pub headers: IndexMap<String, String>,
	/// Scopes used when the params list has none.
	pub default_scopes: Vec<String>,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl NativeProviderBuilder {
	/// Creates a builder for `version`.
	pub fn new(name: impl Into<String>, version: ProtocolVersion) -> Self {
		Self {
			name: name.into(),
			version,
			authorization_endpoint: None,
			token_endpoint: None,
			request_token_endpoint: None,
			access_token_endpoint: None,
			profile_endpoint: None,
			profile_params: IndexMap::new(),
			headers: IndexMap::new(),
			default_scopes: Vec::new(),
			quirks: ProviderQuirks::default(),
		}
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the OAuth 2.0 token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the OAuth 1.0a temporary credentials endpoint.
	pub fn request_token_endpoint(mut self, url: Url) -> Self {
		self.request_token_endpoint = Some(url);

		self
	}

	/// Sets the OAuth 1.0a token credentials endpoint.
	pub fn access_token_endpoint(mut self, url: Url) -> Self {
		self.access_token_endpoint = Some(url);

		self
	}

	/// Sets the profile endpoint.
	pub fn profile_endpoint(mut self, url: Url) -> Self {
		self.profile_endpoint = Some(url);

		self
	}

	/// Adds an extra profile query parameter.
	pub fn profile_param(mut self, key: impl Into<String>, param: ProfileParam) -> Self {
		self.profile_params.insert(key.into(), param);

		self
	}

	/// Adds a header sent with every provider request.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Sets the default scopes.
	pub fn default_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.default_scopes = scopes.into_iter().map(Into::into).collect();

		self
	}

	/// Sets the scope delimiter.
	pub fn scope_delimiter(mut self, delimiter: char) -> Self {
		self.quirks.scope_delimiter = delimiter;

		self
	}

	/// Marks whether the provider echoes `state`.
	pub fn echoes_state(mut self, echoes: bool) -> Self {
		self.quirks.echoes_state = echoes;

		self
	}

	/// Switches to the implicit flow.
	pub fn implicit(mut self, implicit: bool) -> Self {
		self.quirks.implicit = implicit;

		self
	}

	/// Sets the token exchange encoding.
	pub fn token_format(mut self, format: BodyFormat) -> Self {
		self.quirks.token_format = format;

		self
	}

	/// Overrides every quirk at once.
	pub fn quirks(mut self, quirks: ProviderQuirks) -> Self {
		self.quirks = quirks;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<NativeProvider, ProviderDescriptorError> {
		let authorization =
			self.authorization_endpoint.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let endpoints = match self.version {
			ProtocolVersion::OAuth2 => {
				if !self.quirks.implicit && self.token_endpoint.is_none() {
					return Err(ProviderDescriptorError::MissingTokenEndpoint);
				}

				ProviderEndpoints::OAuth2 { authorization, token: self.token_endpoint }
			},
			ProtocolVersion::OAuth1 => ProviderEndpoints::OAuth1 {
				request_token: self.request_token_endpoint.ok_or(
					ProviderDescriptorError::MissingOAuth1Endpoint { endpoint: "request token" },
				)?,
				authorization,
				access_token: self.access_token_endpoint.ok_or(
					ProviderDescriptorError::MissingOAuth1Endpoint { endpoint: "access token" },
				)?,
			},
		};
		let profile = self.profile_endpoint.ok_or(ProviderDescriptorError::MissingProfileEndpoint)?;
		let provider = NativeProvider {
			name: self.name,
			endpoints,
			profile,
			profile_params: self.profile_params,
			headers: self.headers,
			default_scopes: self.default_scopes,
			quirks: self.quirks,
		};

		provider.validate()?;

		Ok(provider)
	}
}

impl NativeProvider {
	/// Validates invariants for the descriptor.
	pub fn validate(&self) -> Result<(), ProviderDescriptorError> {
		if self.quirks.token_format == BodyFormat::Raw {
			return Err(ProviderDescriptorError::InvalidTokenFormat);
		}

		match &self.endpoints {
			ProviderEndpoints::OAuth2 { authorization, token } => {
				validate_endpoint("authorization", authorization)?;

				if let Some(token) = token {
					validate_endpoint("token", token)?;
				}
			},
			ProviderEndpoints::OAuth1 { request_token, authorization, access_token } => {
				if self.quirks.implicit {
					return Err(ProviderDescriptorError::ImplicitOAuth1);
				}
				if let Some(key) = self
					.profile_params
					.iter()
					.find_map(|(key, param)| matches!(param, ProfileParam::TokenField(_)).then_some(key))
				{
					return Err(ProviderDescriptorError::UnsignedProfileParam { key: key.clone() });
				}

				validate_endpoint("request token", request_token)?;
				validate_endpoint("authorization", authorization)?;
				validate_endpoint("access token", access_token)?;
			},
		}

		validate_endpoint("profile", &self.profile)?;
		validate_scope_delimiter(self.quirks.scope_delimiter)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() != "https" {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	} else {
		Ok(())
	}
}

fn validate_scope_delimiter(delimiter: char) -> Result<(), ProviderDescriptorError> {
	if delimiter.is_control() {
		Err(ProviderDescriptorError::InvalidScopeDelimiter { delimiter })
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(text: &str) -> Url {
		Url::parse(text).expect("URL fixture should parse.")
	}

	#[test]
	fn implicit_providers_need_no_token_endpoint() {
		let provider = NativeProvider::oauth2("implicit")
			.authorization_endpoint(url("https://id.example.com/authorize"))
			.profile_endpoint(url("https://api.example.com/me"))
			.implicit(true)
			.build()
			.expect("Implicit provider should build.");

		assert!(matches!(provider.endpoints, ProviderEndpoints::OAuth2 { token: None, .. }));
		assert_eq!(
			NativeProvider::oauth2("code")
				.authorization_endpoint(url("https://id.example.com/authorize"))
				.profile_endpoint(url("https://api.example.com/me"))
				.build(),
			Err(ProviderDescriptorError::MissingTokenEndpoint)
		);
	}

	#[test]
	fn endpoints_must_use_https() {
		let err = NativeProvider::oauth2("plain")
			.authorization_endpoint(url("https://id.example.com/authorize"))
			.token_endpoint(url("http://id.example.com/token"))
			.profile_endpoint(url("https://api.example.com/me"))
			.build()
			.expect_err("Plain HTTP token endpoint should be rejected.");

		assert!(matches!(err, ProviderDescriptorError::InsecureEndpoint { endpoint: "token", .. }));
	}

	#[test]
	fn oauth1_rejects_implicit_and_missing_endpoints() {
		let base = NativeProvider::oauth1("one")
			.authorization_endpoint(url("https://id.example.com/authorize"))
			.access_token_endpoint(url("https://id.example.com/access"))
			.profile_endpoint(url("https://api.example.com/me"));

		assert_eq!(
			base.build(),
			Err(ProviderDescriptorError::MissingOAuth1Endpoint { endpoint: "request token" })
		);

		let err = NativeProvider::oauth1("one")
			.authorization_endpoint(url("https://id.example.com/authorize"))
			.request_token_endpoint(url("https://id.example.com/request"))
			.access_token_endpoint(url("https://id.example.com/access"))
			.profile_endpoint(url("https://api.example.com/me"))
			.implicit(true)
			.build()
			.expect_err("OAuth 1.0a cannot be implicit.");

		assert_eq!(err, ProviderDescriptorError::ImplicitOAuth1);
	}

	#[test]
	fn control_delimiters_are_rejected() {
		let err = NativeProvider::oauth2("delim")
			.authorization_endpoint(url("https://id.example.com/authorize"))
			.token_endpoint(url("https://id.example.com/token"))
			.profile_endpoint(url("https://api.example.com/me"))
			.scope_delimiter('\n')
			.build()
			.expect_err("Control delimiter should be rejected.");

		assert_eq!(err, ProviderDescriptorError::InvalidScopeDelimiter { delimiter: '\n' });
	}
}
