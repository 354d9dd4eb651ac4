// self
use crate::obs::{InterceptStage, RenewalOutcome};

/// Records a gateway stage transition via the global metrics recorder (when enabled).
pub fn record_stage(stage: InterceptStage) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("oauth2_relay_stage_total", "stage" => stage.as_str()).increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = stage;
	}
}

/// Records a renewal outcome via the global metrics recorder (when enabled).
pub fn record_renewal_outcome(outcome: RenewalOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("oauth2_relay_renewal_total", "outcome" => outcome.as_str())
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = outcome;
	}
}
