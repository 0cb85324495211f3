//! Sliding-window admission control partitioned by endpoint class.
//!
//! [`RateLimiter::admit`] is a pure check: it evicts aged timestamps and compares the
//! remaining count to the class quota without recording anything. The returned
//! [`AdmissionPermit`] is committed when the request is actually dispatched, which re-checks
//! the window and appends the timestamp in one critical section. Denials carry a
//! `retry_after` equal to the time until the oldest counted request leaves the window.

// std
use std::collections::VecDeque;
// self
use crate::{_prelude::*, obs, request::EndpointClass};

/// Quota for one endpoint class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuota {
	/// Maximum requests admitted per window.
	pub max_requests: u32,
	/// Sliding window length.
	#[serde(with = "crate::config::duration_ms")]
	pub window: StdDuration,
}
impl RateQuota {
	/// Creates a quota of `max_requests` per `window`.
	pub const fn new(max_requests: u32, window: StdDuration) -> Self {
		Self { max_requests, window }
	}
}

/// Recent request instants for one endpoint class.
#[derive(Debug)]
pub struct RateWindow {
	/// Class owning the window.
	pub class: EndpointClass,
	/// Quota enforced on the window.
	pub quota: RateQuota,
	/// Admitted request instants, oldest first.
	pub timestamps: VecDeque<Instant>,
}
impl RateWindow {
	fn new(class: EndpointClass, quota: RateQuota) -> Self {
		Self { class, quota, timestamps: VecDeque::with_capacity(quota.max_requests as usize) }
	}

	fn evict(&mut self, now: Instant) {
		while let Some(oldest) = self.timestamps.front() {
			if now.saturating_duration_since(*oldest) >= self.quota.window {
				self.timestamps.pop_front();
			} else {
				break;
			}
		}
	}

	/// Returns the denial hint, or `None` when another request fits.
	fn check(&self, now: Instant) -> Option<StdDuration> {
		if self.timestamps.len() < self.quota.max_requests as usize {
			return None;
		}

		let oldest = self.timestamps.front().copied().unwrap_or(now);

		Some((oldest + self.quota.window).saturating_duration_since(now))
	}

	/// Instants are appended in non-decreasing order so eviction stays oldest-first.
	fn record(&mut self, now: Instant) {
		let at = self.timestamps.back().map_or(now, |last| now.max(*last));

		self.timestamps.push_back(at);
	}
}

/// Outcome of [`RateLimiter::admit`].
#[derive(Debug)]
pub enum RateLimitDecision {
	/// The request may proceed; commit the permit when dispatching.
	Allow(AdmissionPermit),
	/// The request must not be dispatched yet.
	Deny {
		/// Time until the oldest counted request ages out.
		retry_after: StdDuration,
	},
}
impl RateLimitDecision {
	/// Converts the decision into a permit or a [`Error::RateLimited`].
	pub fn into_result(self) -> Result<AdmissionPermit> {
		match self {
			Self::Allow(permit) => Ok(permit),
			Self::Deny { retry_after } => Err(Error::RateLimited { retry_after }),
		}
	}

	/// Returns `true` for [`RateLimitDecision::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow(_))
	}
}

/// Admission granted by [`RateLimiter::admit`], consumed at dispatch.
#[derive(Debug)]
#[must_use = "an unused permit records nothing"]
pub struct AdmissionPermit {
	class: EndpointClass,
	window: Arc<Mutex<RateWindow>>,
}
impl AdmissionPermit {
	/// Class the permit was issued for.
	pub fn class(&self) -> EndpointClass {
		self.class
	}

	/// Records the dispatch using the current instant.
	pub fn commit(self) -> Result<()> {
		self.commit_at(Instant::now())
	}

	/// Records the dispatch at `now`, re-checking the quota first.
	pub fn commit_at(self, now: Instant) -> Result<()> {
		let mut window = self.window.lock();

		window.evict(now);

		if let Some(retry_after) = window.check(now) {
			obs::record_outcome(obs::Component::RateLimit, self.class, obs::Outcome::Denied);

			return Err(Error::RateLimited { retry_after });
		}

		window.record(now);

		Ok(())
	}
}

/// Snapshot exposed to the UI for throttling feedback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitStatus {
	/// Requests still admissible in the current window.
	pub remaining: u32,
	/// Instant at which the oldest counted request leaves the window, if any is counted.
	pub reset_at: Option<Instant>,
}

/// Per-class sliding-window limiter. Classes without their own quota share the global window.
#[derive(Debug)]
pub struct RateLimiter {
	windows: BTreeMap<EndpointClass, Arc<Mutex<RateWindow>>>,
	global: Arc<Mutex<RateWindow>>,
}
impl RateLimiter {
	/// Builds a limiter from per-class quotas plus the mandatory global fallback quota.
	pub fn new(quotas: &BTreeMap<EndpointClass, RateQuota>, global: RateQuota) -> Self {
		let windows = quotas
			.iter()
			.filter(|(class, _)| **class != EndpointClass::Global)
			.map(|(class, quota)| (*class, Arc::new(Mutex::new(RateWindow::new(*class, *quota)))))
			.collect();
		let global = Arc::new(Mutex::new(RateWindow::new(EndpointClass::Global, global)));

		Self { windows, global }
	}

	/// Checks whether a request of `class` may be dispatched now.
	pub fn admit(&self, class: EndpointClass) -> RateLimitDecision {
		self.admit_at(class, Instant::now())
	}

	/// Checks whether a request of `class` may be dispatched at `now`.
	pub fn admit_at(&self, class: EndpointClass, now: Instant) -> RateLimitDecision {
		let window = self.window(class);
		let denial = {
			let mut guard = window.lock();

			guard.evict(now);
			guard.check(now)
		};

		match denial {
			None => RateLimitDecision::Allow(AdmissionPermit { class, window: window.clone() }),
			Some(retry_after) => {
				obs::record_outcome(obs::Component::RateLimit, class, obs::Outcome::Denied);

				RateLimitDecision::Deny { retry_after }
			},
		}
	}

	/// Returns the remaining budget for `class`.
	pub fn status(&self, class: EndpointClass) -> RateLimitStatus {
		self.status_at(class, Instant::now())
	}

	/// Returns the remaining budget for `class` at `now`.
	pub fn status_at(&self, class: EndpointClass, now: Instant) -> RateLimitStatus {
		let window = self.window(class);
		let mut guard = window.lock();

		guard.evict(now);

		let used = u32::try_from(guard.timestamps.len()).unwrap_or(u32::MAX);

		RateLimitStatus {
			remaining: guard.quota.max_requests.saturating_sub(used),
			reset_at: guard.timestamps.front().map(|oldest| *oldest + guard.quota.window),
		}
	}

	fn window(&self, class: EndpointClass) -> &Arc<Mutex<RateWindow>> {
		self.windows.get(&class).unwrap_or(&self.global)
	}
}
