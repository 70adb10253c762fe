//! Stage synthesis for native providers.

// self
use crate::{
	_prelude::*,
	error::{ConfigError, ResolutionError},
	library::{LibraryFunctionId, LibraryFunctions},
	oauth1::{self, OAuth1Request},
	params::ParamsList,
	provider::{NativeProvider, ProfileParam, step_names::*},
	resolve::{LibraryCall, ResolveContext, ValueSpec},
	step::{HttpMethod, ParseType, Projection, Stage, StepDescriptor},
	value,
};

/// Which oauth token and secret sign a request.
#[derive(Clone, Copy, Debug)]
enum Credentials {
	/// Temporary credentials request: callback, no token.
	Temporary,
	/// Token credentials request: redirect token and verifier, temporary secret.
	Access,
	/// Protected resource request: token credentials.
	Resource,
}

pub(super) fn oauth2_before(
	provider: &NativeProvider,
	params: &ParamsList,
	authorization: &Url,
) -> Result<Stage, ConfigError> {
	let response_type = if provider.quirks.implicit { "token" } else { "code" };
	let mut step = StepDescriptor::from_url(authorization.clone())
		.named(AUTHORIZE)
		.url_param("client_id", params.require_client_id()?)
		.url_param("redirect_uri", params.require_redirect_uri()?)
		.url_param("response_type", response_type);

	if let Some(scope) = params.scope.clone().or_else(|| provider.default_scope()) {
		step = step.url_param("scope", scope);
	}
	if let Some(state) = params.get("state").filter(|_| provider.echoes_state()) {
		step = step.url_param("state", value::flatten(&state).unwrap_or_default());
	}

	Stage::try_from_steps([step])
}

pub(super) fn oauth2_after(
	provider: &NativeProvider,
	params: &ParamsList,
	token: Option<&Url>,
) -> Result<Stage, ConfigError> {
	let mut stage = Stage::new();

	if let Some(token) = token {
		let mut step = with_headers(provider, StepDescriptor::from_url(token.clone()))
			.named(TOKEN)
			.method(HttpMethod::Post)
			.body_format(provider.quirks.token_format)
			.header("Accept", "application/json")
			.body_param("grant_type", "authorization_code")
			.body_param("code", redirect_param("code"))
			.body_param("client_id", params.require_client_id()?)
			.body_param("redirect_uri", params.require_redirect_uri()?);

		if let Some(secret) = &params.client_secret {
			step = step.body_param("client_secret", secret.as_str());
		}

		stage.push(
			step.validator(|ctx| ctx.response.get("access_token").is_some())
				.to_return("access_token", Projection::path(["access_token"])),
		)?;
	}

	let mut profile = with_headers(provider, StepDescriptor::from_url(provider.profile.clone()))
		.named(PROFILE)
		.header(
			"Authorization",
			ValueSpec::function(|ctx| {
				let token = token_field(ctx, &["access_token"])?;

				Some(format!("Bearer {}", value::flatten(&token)?).into())
			}),
		);

	for (key, param) in &provider.profile_params {
		profile = match param {
			ProfileParam::Literal(text) => profile.url_param(key.as_str(), text.as_str()),
			ProfileParam::TokenField(path) => {
				let path = path.clone();

				profile.url_param(key.as_str(), ValueSpec::function(move |ctx| token_field(ctx, &path)))
			},
		};
	}

	stage.push(profile.to_return("user", Projection::All))?;

	Ok(stage)
}

pub(super) fn oauth1_before(
	provider: &NativeProvider,
	request_token: &Url,
	authorization: &Url,
) -> Result<Stage, ConfigError> {
	Stage::try_from_steps([
		with_headers(provider, StepDescriptor::from_url(request_token.clone()))
			.named(REQUEST_TOKEN)
			.method(HttpMethod::Post)
			.header(
				"Authorization",
				signed_header(HttpMethod::Post, request_token.clone(), Credentials::Temporary),
			)
			.parse(ParseType::Form)
			.validator(|ctx| ctx.response.get("oauth_token").is_some()),
		StepDescriptor::from_url(authorization.clone())
			.named(AUTHORIZE)
			.url_param("oauth_token", ValueSpec::reference([REQUEST_TOKEN, "response", "oauth_token"])),
	])
}

pub(super) fn oauth1_after(provider: &NativeProvider, access_token: &Url) -> Result<Stage, ConfigError> {
	let mut profile_url = provider.profile.clone();

	for (key, param) in &provider.profile_params {
		if let ProfileParam::Literal(text) = param {
			profile_url.query_pairs_mut().append_pair(key, text);
		}
	}

	Stage::try_from_steps([
		with_headers(provider, StepDescriptor::from_url(access_token.clone()))
			.named(ACCESS_TOKEN)
			.method(HttpMethod::Post)
			.header(
				"Authorization",
				signed_header(HttpMethod::Post, access_token.clone(), Credentials::Access),
			)
			.parse(ParseType::Form)
			.validator(|ctx| ctx.response.get("oauth_token").is_some())
			.to_return("access_token", Projection::path(["oauth_token"])),
		with_headers(provider, StepDescriptor::from_url(profile_url.clone()))
			.named(PROFILE)
			.header("Authorization", signed_header(HttpMethod::Get, profile_url, Credentials::Resource))
			.to_return("user", Projection::All),
	])
}

fn with_headers(provider: &NativeProvider, mut step: StepDescriptor) -> StepDescriptor {
	for (name, value) in &provider.headers {
		step = step.header(name.as_str(), value.as_str());
	}

	step
}

fn redirect_param(name: &'static str) -> ValueSpec {
	ValueSpec::function(move |ctx| ctx.redirect.and_then(|redirect| redirect.get(name)).cloned())
}

/// Reads `path` from the token response, or from the redirect parameters for implicit flows.
fn token_field<S>(ctx: &ResolveContext, path: &[S]) -> Option<Value>
where
	S: AsRef<str>,
{
	if let Some(record) = ctx.ledger.get(TOKEN) {
		return value::walk(&record.response, path).cloned();
	}

	let (head, rest) = path.split_first()?;

	ctx.redirect?.get(head.as_ref()).and_then(|root| value::walk(root, rest)).cloned()
}

fn signed_header(method: HttpMethod, url: Url, credentials: Credentials) -> ValueSpec {
	LibraryCall::new([LibraryFunctionId::HmacSha1], move |ctx, functions| {
		Box::pin(sign(ctx, functions, method, url.clone(), credentials))
	})
	.into()
}

async fn sign(
	ctx: &ResolveContext<'_>,
	functions: &LibraryFunctions<'_>,
	method: HttpMethod,
	url: Url,
	credentials: Credentials,
) -> Result<Option<Value>> {
	let mut request = OAuth1Request::new(method, url, ctx.params.require_client_id()?);
	let token_secret = match credentials {
		Credentials::Temporary => {
			request = request.with_callback(ctx.params.require_redirect_uri()?);

			None
		},
		Credentials::Access => {
			request = request
				.with_token(redirect_text(ctx, "oauth_token")?)
				.with_verifier(redirect_text(ctx, "oauth_verifier")?);

			ledger_text(ctx, REQUEST_TOKEN, "oauth_token_secret")
		},
		Credentials::Resource => {
			request = request.with_token(
				ledger_text(ctx, ACCESS_TOKEN, "oauth_token").ok_or_else(|| missing("oauth_token"))?,
			);

			ledger_text(ctx, ACCESS_TOKEN, "oauth_token_secret")
		},
	};
	let key = oauth1::signing_key(ctx.params.require_client_secret()?, token_secret.as_deref());
	let signature = oauth1::sign_remote(functions, &request.base_string(), &key, false).await?;

	Ok(Some(request.header_with_signature(&signature).into()))
}

fn redirect_text(ctx: &ResolveContext, name: &str) -> Result<String, ResolutionError> {
	ctx.redirect
		.and_then(|redirect| redirect.get(name))
		.and_then(value::flatten)
		.ok_or_else(|| missing(name))
}

fn ledger_text(ctx: &ResolveContext, step: &str, field: &str) -> Option<String> {
	ctx.ledger.get(step).and_then(|record| record.response.get(field)).and_then(value::flatten)
}

fn missing(name: &str) -> ResolutionError {
	ResolutionError::MissingProperty { key: "Authorization".into(), path: name.into() }
}
