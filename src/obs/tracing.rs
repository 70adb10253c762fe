// self
use crate::{_prelude::*, step::StageKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedStep<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedStep<F> = F;

/// Span wrapping one step of a stage.
#[derive(Clone, Debug)]
pub struct StepSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl StepSpan {
	/// Creates a span tagged with the provider, stage, and step name.
	pub fn new(provider: &str, stage: StageKind, step: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span =
				tracing::info_span!("oauth_pipeline.step", provider, stage = stage.as_str(), step);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (provider, stage, step);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedStep<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits an event for a retry about to sleep.
pub fn retry_scheduled(attempt: u32, max_retries: u32, delay: Duration, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(attempt, max_retries, delay = %delay, error = %error, "Retrying request.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (attempt, max_retries, delay, error);
	}
}

/// Emits an event for an error an error handler chose to continue past.
pub fn error_handled(step: &str, key: Option<&str>, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(step, key, error = %error, "Continuing past a failed step.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (step, key, error);
	}
}

/// Emits an event for an error about to abort a run.
pub fn error_raised(step: &str, key: Option<&str>, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	{
		tracing::error!(step, key, error = %error, "Aborting the run.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (step, key, error);
	}
}

/// Emits an event for a redirect form about to be submitted.
pub fn redirecting(action: &Url, submitted: bool) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(action = %action, submitted, "Redirecting to provider.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (action, submitted);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn events_noop_without_subscriber() {
		let err = std::io::Error::other("boom");

		retry_scheduled(1, 2, Duration::ZERO, &err);
		error_handled("token", Some("code"), &err);
		error_raised("token", None, &err);

		let action = Url::parse("https://id.example.com/authorize").expect("URL fixture should parse.");

		redirecting(&action, false);
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = StepSpan::new("github", StageKind::AfterRedirect, "token");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
