//! Engine configuration, built once and shared read-only.
//!
//! [`EngineConfig::builder`] collects the server URL, the global timeout and error
//! handler, and every provider. [`EngineConfigBuilder::build`] checks the invariants a
//! run relies on (unique step names per provider, a non-empty before-redirect stage, the
//! `test` flag only on the step that redirects) so runs never meet a malformed stage.

// std
use std::{borrow::Cow, collections::HashSet};
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	executor::DEFAULT_TIMEOUT,
	obs,
	params::ParamsList,
	pipeline::StageHooks,
	provider::NativeProvider,
	step::{ErrorDisposition, ErrorHandler, ErrorSite, Stage, StageKind},
};

/// Steps a custom provider runs on each side of the redirect.
#[derive(Clone, Debug, Default)]
pub struct CustomProvider {
	/// Steps run before the redirect; the last one redirects.
	pub before: Stage,
	/// Steps run after the redirect.
	pub after: Stage,
	/// Whether the provider returns `state` unchanged, so it can travel in the URL.
	pub echoes_state: bool,
}
impl CustomProvider {
	/// Creates a provider from its two stages; state is kept in redirect storage.
	pub fn new(before: Stage, after: Stage) -> Self {
		Self { before, after, echoes_state: false }
	}

	/// Marks whether the provider echoes `state`.
	pub fn echoes_state(mut self, echoes: bool) -> Self {
		self.echoes_state = echoes;

		self
	}
}

/// Native or custom steps.
#[derive(Clone, Debug)]
pub enum ProviderKind {
	/// Stages synthesized from a descriptor.
	Native(NativeProvider),
	/// Stages written out step by step.
	Custom(CustomProvider),
}

/// One configured provider.
#[derive(Clone, Debug)]
pub struct ProviderEntry {
	/// Native or custom steps.
	pub kind: ProviderKind,
	/// Static values visible to every step.
	pub params: ParamsList,
	/// Stage hooks.
	pub hooks: StageHooks,
}
impl ProviderEntry {
	/// Wraps a native descriptor.
	pub fn native(provider: NativeProvider, params: ParamsList) -> Self {
		Self { kind: ProviderKind::Native(provider), params, hooks: StageHooks::default() }
	}

	/// Wraps custom stages.
	pub fn custom(provider: CustomProvider, params: ParamsList) -> Self {
		Self { kind: ProviderKind::Custom(provider), params, hooks: StageHooks::default() }
	}

	/// Attaches stage hooks.
	pub fn with_hooks(mut self, hooks: StageHooks) -> Self {
		self.hooks = hooks;

		self
	}

	/// Whether caller state travels in the `state` URL parameter.
	pub fn echoes_state(&self) -> bool {
		match &self.kind {
			ProviderKind::Native(provider) => provider.echoes_state(),
			ProviderKind::Custom(provider) => provider.echoes_state,
		}
	}

	/// Before-redirect stage, with `params` (which may carry the encoded state) applied.
	pub fn before_stage(&self, params: &ParamsList) -> Result<Cow<'_, Stage>, ConfigError> {
		match &self.kind {
			ProviderKind::Native(provider) => Ok(Cow::Owned(provider.before_stage(params)?)),
			ProviderKind::Custom(provider) => Ok(Cow::Borrowed(&provider.before)),
		}
	}

	/// After-redirect stage.
	pub fn after_stage(&self) -> Result<Cow<'_, Stage>, ConfigError> {
		match &self.kind {
			ProviderKind::Native(provider) => Ok(Cow::Owned(provider.after_stage(&self.params)?)),
			ProviderKind::Custom(provider) => Ok(Cow::Borrowed(&provider.after)),
		}
	}

	fn validate(&self, name: &str) -> Result<(), ConfigError> {
		let custom = match &self.kind {
			ProviderKind::Native(provider) => return Ok(provider.validate()?),
			ProviderKind::Custom(custom) => custom,
		};

		if custom.before.is_empty() {
			return Err(ConfigError::EmptyStage {
				provider: name.to_owned(),
				stage: StageKind::BeforeRedirect.as_str(),
			});
		}

		let terminal = custom.before.terminal().map(|step| step.step_name());
		let mut seen = HashSet::new();

		for (kind, step) in custom
			.before
			.steps()
			.map(|step| (StageKind::BeforeRedirect, step))
			.chain(custom.after.steps().map(|step| (StageKind::AfterRedirect, step)))
		{
			step.validate()?;

			if !seen.insert(step.step_name()) {
				return Err(ConfigError::DuplicateStep {
					provider: name.to_owned(),
					step: step.step_name().to_owned(),
				});
			}
			if step.test
				&& (kind == StageKind::AfterRedirect || Some(step.step_name()) != terminal)
			{
				return Err(ConfigError::TestFlagNotTerminal {
					provider: name.to_owned(),
					step: step.step_name().to_owned(),
				});
			}
		}

		Ok(())
	}
}

/// Immutable engine configuration.
#[derive(Clone)]
pub struct EngineConfig {
	server_url: Option<Url>,
	timeout: Duration,
	on_error: ErrorHandler,
	providers: IndexMap<String, ProviderEntry>,
}
impl EngineConfig {
	/// Starts a builder.
	pub fn builder() -> EngineConfigBuilder {
		EngineConfigBuilder::default()
	}

	/// Base URL of the server surface, if clients talk to one.
	pub fn server_url(&self) -> Option<&Url> {
		self.server_url.as_ref()
	}

	/// Per-attempt timeout for steps without an override.
	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Global error handler, consulted after step and stage handlers.
	pub fn error_handler(&self) -> &ErrorHandler {
		&self.on_error
	}

	/// Looks up a provider.
	pub fn provider(&self, name: &str) -> Result<&ProviderEntry, ConfigError> {
		self.providers
			.get(name)
			.ok_or_else(|| ConfigError::UnknownProvider { provider: name.to_owned() })
	}

	/// Configured provider names, in registration order.
	pub fn provider_names(&self) -> impl Iterator<Item = &str> {
		self.providers.keys().map(String::as_str)
	}
}
impl Debug for EngineConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EngineConfig")
			.field("server_url", &self.server_url.as_ref().map(Url::as_str))
			.field("timeout", &self.timeout)
			.field("providers", &self.providers)
			.finish()
	}
}

/// Builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
	server_url: Option<Url>,
	timeout: Option<Duration>,
	on_error: Option<ErrorHandler>,
	providers: IndexMap<String, ProviderEntry>,
}
impl EngineConfigBuilder {
	/// Sets the server base URL.
	pub fn server_url(mut self, url: Url) -> Self {
		self.server_url = Some(url);

		self
	}

	/// Sets the global per-attempt timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Replaces the default global error handler (log, then raise).
	pub fn on_error<F>(mut self, handler: F) -> Self
	where
		F: 'static + Fn(&Error, &ErrorSite) -> ErrorDisposition + Send + Sync,
	{
		self.on_error = Some(Arc::new(handler));

		self
	}

	/// Registers a native provider under its own name.
	pub fn native(self, provider: NativeProvider, params: ParamsList) -> Self {
		let name = provider.name.clone();

		self.provider(name, ProviderEntry::native(provider, params))
	}

	/// Registers a custom provider.
	pub fn custom(self, name: impl Into<String>, provider: CustomProvider, params: ParamsList) -> Self {
		self.provider(name, ProviderEntry::custom(provider, params))
	}

	/// Registers any provider entry; a later entry with the same name replaces an earlier one.
	pub fn provider(mut self, name: impl Into<String>, entry: ProviderEntry) -> Self {
		self.providers.insert(name.into(), entry);

		self
	}

	/// Validates every provider and freezes the configuration.
	pub fn build(self) -> Result<Arc<EngineConfig>, ConfigError> {
		for (name, entry) in &self.providers {
			entry.validate(name)?;
		}

		Ok(Arc::new(EngineConfig {
			server_url: self.server_url,
			timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
			on_error: self.on_error.unwrap_or_else(|| Arc::new(log_and_raise)),
			providers: self.providers,
		}))
	}
}
impl Debug for EngineConfigBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EngineConfigBuilder")
			.field("server_url", &self.server_url.as_ref().map(Url::as_str))
			.field("timeout", &self.timeout)
			.field("providers", &self.providers.keys().collect::<Vec<_>>())
			.finish()
	}
}

fn log_and_raise(err: &Error, site: &ErrorSite) -> ErrorDisposition {
	obs::error_raised(&site.step, site.key.as_deref(), err);

	ErrorDisposition::Raise
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{provider::known, step::StepDescriptor};

	fn step(url: &str) -> StepDescriptor {
		StepDescriptor::new(url).expect("Step URL fixture should parse.")
	}

	fn stage<const N: usize>(steps: [StepDescriptor; N]) -> Stage {
		Stage::try_from_steps(steps).expect("Stage fixture should build.")
	}

	#[test]
	fn step_names_are_unique_across_stages() {
		let provider = CustomProvider::new(
			stage([step("https://id.example.com/a").named("shared")]),
			stage([step("https://id.example.com/b").named("shared")]),
		);
		let err = EngineConfig::builder()
			.custom("dup", provider, ParamsList::new())
			.build()
			.expect_err("Shared step names should be rejected.");

		assert!(matches!(err, ConfigError::DuplicateStep { step, .. } if step == "shared"));
	}

	#[test]
	fn test_flag_only_on_the_redirect_step() {
		let misplaced = CustomProvider::new(
			stage([step("https://id.example.com/a").test(true), step("https://id.example.com/b")]),
			Stage::new(),
		);
		let placed = CustomProvider::new(
			stage([step("https://id.example.com/a"), step("https://id.example.com/b").test(true)]),
			Stage::new(),
		);

		assert!(matches!(
			EngineConfig::builder().custom("x", misplaced, ParamsList::new()).build(),
			Err(ConfigError::TestFlagNotTerminal { .. })
		));
		assert!(EngineConfig::builder().custom("x", placed, ParamsList::new()).build().is_ok());
	}

	#[test]
	fn empty_before_stage_is_rejected() {
		let err = EngineConfig::builder()
			.custom("empty", CustomProvider::default(), ParamsList::new())
			.build()
			.expect_err("Empty before stage should be rejected.");

		assert!(matches!(err, ConfigError::EmptyStage { stage: "before_redirect", .. }));
	}

	#[test]
	fn defaults_and_lookup() {
		let config = EngineConfig::builder()
			.native(known::github().expect("GitHub descriptor should build."), ParamsList::new())
			.build()
			.expect("Config should build.");

		assert_eq!(config.timeout(), Duration::seconds(10));
		assert_eq!(config.provider_names().collect::<Vec<_>>(), ["github"]);
		assert!(config.provider("github").is_ok());
		assert!(matches!(config.provider("gitlab"), Err(ConfigError::UnknownProvider { .. })));

		let site = ErrorSite { stage: StageKind::AfterRedirect, step: "token".into(), key: None };
		let err = Error::Config(ConfigError::MissingServerUrl);

		assert_eq!((config.error_handler())(&err, &site), ErrorDisposition::Raise);
	}
}
