//! Built-in native providers.

// self
use crate::{
	_prelude::*,
	provider::{NativeProvider, ProfileParam, ProviderDescriptorError},
};

/// Names of every built-in provider.
pub const NAMES: [&str; 6] = ["google", "github", "facebook", "slack", "discord", "twitter"];

/// Looks up a built-in provider by name.
pub fn lookup(name: &str) -> Option<Result<NativeProvider, ProviderDescriptorError>> {
	Some(match name {
		"google" => google(),
		"github" => github(),
		"facebook" => facebook(),
		"slack" => slack(),
		"discord" => discord(),
		"twitter" => twitter(),
		_ => return None,
	})
}

/// Google (OpenID Connect userinfo).
pub fn google() -> Result<NativeProvider, ProviderDescriptorError> {
	NativeProvider::oauth2("google")
		.authorization_endpoint(endpoint("https://accounts.google.com/o/oauth2/v2/auth")?)
		.token_endpoint(endpoint("https://oauth2.googleapis.com/token")?)
		.profile_endpoint(endpoint("https://openidconnect.googleapis.com/v1/userinfo")?)
		.default_scopes(["openid", "email", "profile"])
		.build()
}

/// GitHub; the API rejects requests without a user agent.
pub fn github() -> Result<NativeProvider, ProviderDescriptorError> {
	NativeProvider::oauth2("github")
		.authorization_endpoint(endpoint("https://github.com/login/oauth/authorize")?)
		.token_endpoint(endpoint("https://github.com/login/oauth/access_token")?)
		.profile_endpoint(endpoint("https://api.github.com/user")?)
		.header("User-Agent", concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
		.default_scopes(["read:user", "user:email"])
		.build()
}

/// Facebook Graph API.
pub fn facebook() -> Result<NativeProvider, ProviderDescriptorError> {
	NativeProvider::oauth2("facebook")
		.authorization_endpoint(endpoint("https://www.facebook.com/v19.0/dialog/oauth")?)
		.token_endpoint(endpoint("https://graph.facebook.com/v19.0/oauth/access_token")?)
		.profile_endpoint(endpoint("https://graph.facebook.com/v19.0/me")?)
		.profile_param("fields", ProfileParam::Literal("id,name,email,picture".into()))
		.profile_param("access_token", ProfileParam::token_field(["access_token"]))
		.default_scopes(["public_profile", "email"])
		.scope_delimiter(',')
		.build()
}

/// Slack OAuth v2; the profile is looked up by the installing user's id.
pub fn slack() -> Result<NativeProvider, ProviderDescriptorError> {
	NativeProvider::oauth2("slack")
		.authorization_endpoint(endpoint("https://slack.com/oauth/v2/authorize")?)
		.token_endpoint(endpoint("https://slack.com/api/oauth.v2.access")?)
		.profile_endpoint(endpoint("https://slack.com/api/users.info")?)
		.profile_param("user", ProfileParam::token_field(["authed_user", "id"]))
		.default_scopes(["users:read", "users:read.email"])
		.scope_delimiter(',')
		.build()
}

/// Discord.
pub fn discord() -> Result<NativeProvider, ProviderDescriptorError> {
	NativeProvider::oauth2("discord")
		.authorization_endpoint(endpoint("https://discord.com/oauth2/authorize")?)
		.token_endpoint(endpoint("https://discord.com/api/oauth2/token")?)
		.profile_endpoint(endpoint("https://discord.com/api/users/@me")?)
		.default_scopes(["identify", "email"])
		.build()
}

/// Twitter (OAuth 1.0a).
pub fn twitter() -> Result<NativeProvider, ProviderDescriptorError> {
	NativeProvider::oauth1("twitter")
		.request_token_endpoint(endpoint("https://api.twitter.com/oauth/request_token")?)
		.authorization_endpoint(endpoint("https://api.twitter.com/oauth/authenticate")?)
		.access_token_endpoint(endpoint("https://api.twitter.com/oauth/access_token")?)
		.profile_endpoint(endpoint("https://api.twitter.com/1.1/account/verify_credentials.json")?)
		.profile_param("include_email", ProfileParam::Literal("true".into()))
		.echoes_state(false)
		.build()
}

fn endpoint(url: &'static str) -> Result<Url, ProviderDescriptorError> {
	Url::parse(url).map_err(|e| ProviderDescriptorError::InvalidEndpoint {
		url: url.to_owned(),
		reason: e.to_string(),
	})
}
