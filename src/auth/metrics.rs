//! Counters describing credential renewal activity.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for credential renewals.
#[derive(Debug, Default)]
pub struct RenewalMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	stale_reuses: AtomicU64,
}
impl RenewalMetrics {
	/// Returns the total number of renewal calls started.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of renewals that installed a new credential.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of renewals that invalidated the session.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns how often a rejected request was re-dispatched with an already-renewed
	/// credential instead of starting a renewal.
	pub fn stale_reuses(&self) -> u64 {
		self.stale_reuses.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_stale_reuse(&self) {
		self.stale_reuses.fetch_add(1, Ordering::Relaxed);
	}
}
