//! Optional observability helpers for the interception lifecycle.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to wrap every interception in an `oauth2_relay.intercept` span and every
//!   renewal wait in an `oauth2_relay.renewal` span, and to emit debug/warn events for renewal
//!   transitions and ignored authority messages.
//! - Enable `metrics` to increment `oauth2_relay_stage_total` (labeled by `stage`) for every
//!   gateway state transition and `oauth2_relay_renewal_total` (labeled by `outcome`).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Gateway lifecycle stages observed for a single intercepted request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterceptStage {
	/// No registered prefix matched; the request went out untouched.
	PassThrough,
	/// A resource server matched the request URL.
	Matched,
	/// The bearer credential was attached.
	Injected,
	/// The transport returned a response.
	Dispatched,
	/// The response was classified.
	Classified,
	/// The request is waiting on a credential renewal.
	Renewing,
	/// The request is being replayed with the renewed credential.
	Retried,
	/// A response was handed back to the caller.
	Delivered,
	/// The request ended with an error instead of a response.
	Failed,
}
impl InterceptStage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			InterceptStage::PassThrough => "pass_through",
			InterceptStage::Matched => "matched",
			InterceptStage::Injected => "injected",
			InterceptStage::Dispatched => "dispatched",
			InterceptStage::Classified => "classified",
			InterceptStage::Renewing => "renewing",
			InterceptStage::Retried => "retried",
			InterceptStage::Delivered => "delivered",
			InterceptStage::Failed => "failed",
		}
	}
}
impl Display for InterceptStage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded by the renewal coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenewalOutcome {
	/// A renewal request was posted to the credential authority.
	Started,
	/// A caller joined a renewal that was already in flight.
	Coalesced,
	/// The authority delivered a fresh credential.
	Completed,
	/// The authority reported failure or the request could not be posted.
	Rejected,
	/// The authority did not answer before the deadline.
	TimedOut,
}
impl RenewalOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RenewalOutcome::Started => "started",
			RenewalOutcome::Coalesced => "coalesced",
			RenewalOutcome::Completed => "completed",
			RenewalOutcome::Rejected => "rejected",
			RenewalOutcome::TimedOut => "timed_out",
		}
	}
}
impl Display for RenewalOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
