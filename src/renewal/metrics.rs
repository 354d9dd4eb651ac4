// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for renewal coordination.
#[derive(Debug, Default)]
pub struct RenewalMetrics {
	triggers: AtomicU64,
	started: AtomicU64,
	coalesced: AtomicU64,
	completed: AtomicU64,
	rejected: AtomicU64,
	timed_out: AtomicU64,
}
impl RenewalMetrics {
	/// Returns the number of [`renew`](super::RenewalCoordinator::renew) calls.
	pub fn triggers(&self) -> u64 {
		self.triggers.load(Ordering::Relaxed)
	}

	/// Returns the number of renewal requests posted to the credential authority.
	pub fn started(&self) -> u64 {
		self.started.load(Ordering::Relaxed)
	}

	/// Returns the number of callers that joined an in-flight renewal.
	pub fn coalesced(&self) -> u64 {
		self.coalesced.load(Ordering::Relaxed)
	}

	/// Returns the number of renewals completed with a fresh credential.
	pub fn completed(&self) -> u64 {
		self.completed.load(Ordering::Relaxed)
	}

	/// Returns the number of renewals rejected by the authority or the channel.
	pub fn rejected(&self) -> u64 {
		self.rejected.load(Ordering::Relaxed)
	}

	/// Returns the number of renewals abandoned at their deadline.
	pub fn timed_out(&self) -> u64 {
		self.timed_out.load(Ordering::Relaxed)
	}

	pub(crate) fn record_trigger(&self) {
		self.triggers.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_started(&self) {
		self.started.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_coalesced(&self) {
		self.coalesced.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_completed(&self) {
		self.completed.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_rejected(&self) {
		self.rejected.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_timed_out(&self) {
		self.timed_out.fetch_add(1, Ordering::Relaxed);
	}
}
