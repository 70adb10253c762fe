//! Optional observability helpers for pipeline runs.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit spans named `oauth_pipeline.step` with `provider`, `stage`, and
//!   `step` fields, plus events for scheduled retries, handled errors, and redirects.
//! - Enable `metrics` to increment the `oauth_pipeline_step_total` counter for every
//!   attempt/success/failure/exhaustion, labeled by `stage` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Outcome labels recorded for each step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepOutcome {
	/// Step started.
	Attempt,
	/// Step completed and joined the ledger.
	Success,
	/// Retries ran out; the exhausted payload was recorded.
	Exhausted,
	/// Step failed and the error handler let the run continue.
	Handled,
	/// Failure propagated back to the caller.
	Failure,
}
impl StepOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			StepOutcome::Attempt => "attempt",
			StepOutcome::Success => "success",
			StepOutcome::Exhausted => "exhausted",
			StepOutcome::Handled => "handled",
			StepOutcome::Failure => "failure",
		}
	}
}
impl Display for StepOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
