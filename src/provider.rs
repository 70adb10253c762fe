//! Native providers: validated descriptors that synthesize their own stages.
//!
//! A [`NativeProvider`] names its endpoints and quirks; [`NativeProvider::before_stage`] and
//! [`NativeProvider::after_stage`] turn that data into ordinary [`Stage`]s that the pipeline
//! runner executes exactly like a custom provider's. `known` carries the built-in table.

pub mod builder;
pub mod known;

mod stages;

pub use builder::*;

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	params::ParamsList,
	step::{BodyFormat, Stage},
};

/// Step names used by synthesized stages.
pub mod step_names {
	/// OAuth 2.0 authorization redirect.
	pub const AUTHORIZE: &str = "authorize";
	/// OAuth 2.0 code exchange.
	pub const TOKEN: &str = "token";
	/// OAuth 1.0a temporary credentials request.
	pub const REQUEST_TOKEN: &str = "request_token";
	/// OAuth 1.0a token credentials request.
	pub const ACCESS_TOKEN: &str = "access_token";
	/// Profile request closing every native flow.
	pub const PROFILE: &str = "profile";
}

/// Protocol family of a native provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
	/// OAuth 1.0a (RFC 5849).
	OAuth1,
	/// OAuth 2.0 (RFC 6749).
	OAuth2,
}
impl ProtocolVersion {
	/// Stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::OAuth1 => "oauth1",
			Self::OAuth2 => "oauth2",
		}
	}
}
impl Display for ProtocolVersion {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Endpoint set declared by a native provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "lowercase")]
pub enum ProviderEndpoints {
	/// OAuth 1.0a endpoints.
	OAuth1 {
		/// Temporary credentials endpoint.
		request_token: Url,
		/// Resource owner authorization endpoint.
		authorization: Url,
		/// Token credentials endpoint.
		access_token: Url,
	},
	/// OAuth 2.0 endpoints.
	OAuth2 {
		/// Authorization endpoint.
		authorization: Url,
		/// Token endpoint; absent for implicit-only providers.
		token: Option<Url>,
	},
}
impl ProviderEndpoints {
	/// Protocol family the endpoints belong to.
	pub fn version(&self) -> ProtocolVersion {
		match self {
			Self::OAuth1 { .. } => ProtocolVersion::OAuth1,
			Self::OAuth2 { .. } => ProtocolVersion::OAuth2,
		}
	}

	/// Authorization endpoint the browser is sent to.
	pub fn authorization(&self) -> &Url {
		match self {
			Self::OAuth1 { authorization, .. } | Self::OAuth2 { authorization, .. } => authorization,
		}
	}
}

/// Value of an extra profile-request parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileParam {
	/// Sent as-is.
	Literal(String),
	/// Walked out of the token response (or the implicit redirect parameters).
	TokenField(Vec<String>),
}
impl ProfileParam {
	/// Builds a token-field reference from its segments.
	pub fn token_field<I, S>(segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::TokenField(segments.into_iter().map(Into::into).collect())
	}
}

/// Provider-specific quirks that influence the synthesized stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Character used to join scopes.
	pub scope_delimiter: char,
	/// Whether the provider returns `state` unchanged on the redirect.
	pub echoes_state: bool,
	/// Whether the flow is implicit (`response_type=token`, no code exchange).
	pub implicit: bool,
	/// Encoding of the token exchange body.
	pub token_format: BodyFormat,
}
impl Default for ProviderQuirks {
	fn default() -> Self {
		Self {
			scope_delimiter: ' ',
			echoes_state: true,
			implicit: false,
			token_format: BodyFormat::FormUrlEncoded,
		}
	}
}

/// Immutable native provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeProvider {
	/// Provider name, also used in the redirect state envelope.
	pub name: String,
	/// Endpoint definitions.
	pub endpoints: ProviderEndpoints,
	/// Profile endpoint queried once the flow has a token.
	pub profile: Url,
	/// Extra query parameters for the profile request.
	#[serde(default)]
	pub profile_params: IndexMap<String, ProfileParam>,
	/// Extra headers for every request the provider receives.
	#[serde(default)]
	pub headers: IndexMap<String, String>,
	/// Scopes requested when the params list does not carry a scope.
	#[serde(default)]
	pub default_scopes: Vec<String>,
	/// Provider-specific quirks.
	#[serde(default)]
	pub quirks: ProviderQuirks,
}
impl NativeProvider {
	/// Starts an OAuth 2.0 descriptor.
	pub fn oauth2(name: impl Into<String>) -> NativeProviderBuilder {
		NativeProviderBuilder::new(name, ProtocolVersion::OAuth2)
	}

	/// Starts an OAuth 1.0a descriptor.
	pub fn oauth1(name: impl Into<String>) -> NativeProviderBuilder {
		NativeProviderBuilder::new(name, ProtocolVersion::OAuth1)
	}

	/// Protocol family.
	pub fn version(&self) -> ProtocolVersion {
		self.endpoints.version()
	}

	/// Whether caller state travels in the `state` URL parameter.
	pub fn echoes_state(&self) -> bool {
		self.quirks.echoes_state && self.version() == ProtocolVersion::OAuth2
	}

	/// Default scopes joined with the provider's delimiter.
	pub fn default_scope(&self) -> Option<String> {
		if self.default_scopes.is_empty() {
			return None;
		}

		Some(self.default_scopes.join(&self.quirks.scope_delimiter.to_string()))
	}

	/// Steps run before the redirect; the last one is the redirect itself.
	///
	/// Static values (client id, redirect URI, scope, and the encoded `state` extra) are
	/// read from `params` now; everything else resolves while the stage runs.
	pub fn before_stage(&self, params: &ParamsList) -> Result<Stage, ConfigError> {
		match &self.endpoints {
			ProviderEndpoints::OAuth2 { authorization, .. } =>
				stages::oauth2_before(self, params, authorization),
			ProviderEndpoints::OAuth1 { request_token, authorization, .. } =>
				stages::oauth1_before(self, request_token, authorization),
		}
	}

	/// Steps run after the redirect, ending with the profile request.
	pub fn after_stage(&self, params: &ParamsList) -> Result<Stage, ConfigError> {
		match &self.endpoints {
			ProviderEndpoints::OAuth2 { token, .. } =>
				stages::oauth2_after(self, params, token.as_ref().filter(|_| !self.quirks.implicit)),
			ProviderEndpoints::OAuth1 { access_token, .. } =>
				stages::oauth1_after(self, access_token),
		}
	}
}
