// self
use crate::{obs::StepOutcome, step::StageKind};

/// Records a step outcome via the global metrics recorder (when enabled).
pub fn record_step_outcome(stage: StageKind, outcome: StepOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"oauth_pipeline_step_total",
			"stage" => stage.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (stage, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn record_step_outcome_noop_without_metrics() {
		record_step_outcome(StageKind::AfterRedirect, StepOutcome::Exhausted);
	}
}
