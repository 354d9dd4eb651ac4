// self
use crate::{
	_prelude::*,
	obs::{InterceptStage, RenewalOutcome},
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// A span builder used by the gateway and the renewal coordinator.
#[derive(Clone, Debug)]
pub struct RelaySpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl RelaySpan {
	/// Creates the span covering one intercepted request.
	pub fn intercept(method: &str, resource_server: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("oauth2_relay.intercept", method, resource_server);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (method, resource_server);

			Self {}
		}
	}

	/// Creates the span covering one caller's renewal wait.
	pub fn renewal(resource_server: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("oauth2_relay.renewal", resource_server);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = resource_server;

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
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

/// Emits a debug event for a gateway stage transition.
pub fn emit_stage(stage: InterceptStage) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(stage = stage.as_str(), "interception stage");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = stage;
	}
}

/// Emits an event for a renewal transition; failures are logged at `warn`.
pub fn emit_renewal(resource_server: &str, outcome: RenewalOutcome) {
	#[cfg(feature = "tracing")]
	{
		match outcome {
			RenewalOutcome::Rejected | RenewalOutcome::TimedOut => tracing::warn!(
				resource_server,
				outcome = outcome.as_str(),
				"credential renewal failed"
			),
			_ => tracing::debug!(resource_server, outcome = outcome.as_str(), "credential renewal"),
		}
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (resource_server, outcome);
	}
}

/// Emits a debug event for an authority message that was dropped.
pub fn emit_ignored_message(reason: &str) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(reason, "ignored credential authority message");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = reason;
	}
}
