//! Failure classification and exponential backoff with jitter.
//!
//! [`RetryPolicy::with_retry`] drives an attempt closure until it succeeds, hits a failure the
//! classifier refuses to retry, or exhausts the attempt budget. Delays follow
//! `min(base × multiplier^(n−1), max)` with symmetric jitter, clamped to `max`; a backend
//! `Retry-After` hint replaces the computed delay.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, Failure, TransportError},
	obs,
	request::EndpointClass,
};

/// Decision returned by a retry classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryVerdict {
	/// Re-issue the request, optionally after a backend-provided delay.
	Retry {
		/// `Retry-After` hint that overrides the computed backoff.
		after: Option<StdDuration>,
	},
	/// Surface the failure.
	Stop,
}

/// Per-request retry bookkeeping, alive from the first failure until the request terminates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
	/// Attempts performed so far (1-indexed).
	pub attempt: u32,
	/// Label of the most recent failure.
	pub last_error: &'static str,
	/// Delay applied before the next attempt.
	pub next_delay: StdDuration,
}

/// Retry budget and backoff shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Total attempts including the initial one.
	pub max_attempts: u32,
	/// Delay before the first retry.
	#[serde(with = "crate::config::duration_ms")]
	pub base_delay: StdDuration,
	/// Growth factor applied per attempt.
	pub multiplier: f64,
	/// Upper bound for any computed delay.
	#[serde(with = "crate::config::duration_ms")]
	pub max_delay: StdDuration,
	/// Symmetric jitter ratio (`0.3` spreads delays across ±30 %).
	pub jitter: f64,
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: StdDuration::from_secs(1),
			multiplier: 2.0,
			max_delay: StdDuration::from_secs(10),
			jitter: 0.3,
		}
	}
}
impl RetryPolicy {
	/// Policy that never retries.
	pub fn disabled() -> Self {
		Self { max_attempts: 1, ..Self::default() }
	}

	/// Overrides the attempt budget.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}

	/// Overrides the base delay and cap.
	pub fn with_delays(mut self, base_delay: StdDuration, max_delay: StdDuration) -> Self {
		self.base_delay = base_delay;
		self.max_delay = max_delay;

		self
	}

	/// Overrides the jitter ratio.
	pub fn with_jitter(mut self, jitter: f64) -> Self {
		self.jitter = jitter;

		self
	}

	/// Checks that every field is in range.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_attempts == 0 {
			return Err(ConfigError::InvalidRetryPolicy { reason: "max_attempts must be at least 1" });
		}
		if !self.multiplier.is_finite() || self.multiplier < 1.0 {
			return Err(ConfigError::InvalidRetryPolicy { reason: "multiplier must be at least 1" });
		}
		if !(0.0..1.0).contains(&self.jitter) {
			return Err(ConfigError::InvalidRetryPolicy { reason: "jitter must be within [0, 1)" });
		}
		if self.max_delay < self.base_delay {
			return Err(ConfigError::InvalidRetryPolicy {
				reason: "max_delay must not be smaller than base_delay",
			});
		}

		Ok(())
	}

	/// Un-jittered delay after failed attempt `attempt` (1-indexed).
	pub fn nominal_delay(&self, attempt: u32) -> StdDuration {
		let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
		let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

		if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
			return self.max_delay;
		}

		StdDuration::from_secs_f64(scaled)
	}

	/// Jittered delay after failed attempt `attempt` (1-indexed).
	pub fn backoff_for(&self, attempt: u32) -> StdDuration {
		self.backoff_with(attempt, &mut rand::rng())
	}

	/// Jittered delay drawn from `rng`.
	pub fn backoff_with<R>(&self, attempt: u32, rng: &mut R) -> StdDuration
	where
		R: ?Sized + Rng,
	{
		let nominal = self.nominal_delay(attempt);

		if self.jitter <= 0.0 || nominal.is_zero() {
			return nominal;
		}

		let factor = rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter));

		nominal.mul_f64(factor).min(self.max_delay)
	}

	/// Default classification.
	///
	/// Network failures, transport timeouts, and the transient statuses 408, 429, 502, 503,
	/// 504 are retryable, as is a 500 that carries a `Retry-After` hint. Credential-invalid
	/// responses are never retryable here; they belong to the renewal path.
	pub fn classify(failure: &Failure) -> RetryVerdict {
		match failure {
			Failure::Status { status: 408 | 429 | 502 | 503 | 504, retry_after, .. } =>
				RetryVerdict::Retry { after: *retry_after },
			Failure::Status { status: 500, retry_after: Some(hint), .. } =>
				RetryVerdict::Retry { after: Some(*hint) },
			Failure::Transport(_) | Failure::Timeout => RetryVerdict::Retry { after: None },
			Failure::Status { .. } | Failure::CredentialInvalid | Failure::Local(_) =>
				RetryVerdict::Stop,
		}
	}

	/// Runs `attempt_fn` until success, a non-retryable failure, or budget exhaustion.
	pub async fn with_retry<T, F, Fut, C>(&self, attempt_fn: F, classify: C) -> Result<T, Failure>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<T, Failure>>,
		C: Fn(&Failure) -> RetryVerdict,
	{
		self.with_retry_observed(attempt_fn, classify, |_| {}).await
	}

	/// Same as [`RetryPolicy::with_retry`], reporting each scheduled retry to `on_retry`.
	pub async fn with_retry_observed<T, F, Fut, C, O>(
		&self,
		mut attempt_fn: F,
		classify: C,
		mut on_retry: O,
	) -> Result<T, Failure>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<T, Failure>>,
		C: Fn(&Failure) -> RetryVerdict,
		O: FnMut(&RetryState),
	{
		let mut attempt = 1;

		loop {
			let failure = match attempt_fn(attempt).await {
				Ok(value) => return Ok(value),
				Err(failure) => failure,
			};
			let RetryVerdict::Retry { after } = classify(&failure) else {
				return Err(failure);
			};

			if attempt >= self.max_attempts {
				return Err(failure);
			}

			let state = RetryState {
				attempt,
				last_error: failure_label(&failure),
				next_delay: after.unwrap_or_else(|| self.backoff_for(attempt)),
			};

			on_retry(&state);
			tokio::time::sleep(state.next_delay).await;

			attempt += 1;
		}
	}
}

/// Logs and counts a scheduled retry for `class`.
pub(crate) fn report_retry(class: EndpointClass, state: &RetryState) {
	obs::record_outcome(obs::Component::Retry, class, obs::Outcome::Attempt);
	obs::log_event!(
		warn,
		class = class.as_str(),
		attempt = state.attempt,
		error = state.last_error,
		delay_ms = u64::try_from(state.next_delay.as_millis()).unwrap_or(u64::MAX),
		"Retrying request after transient failure."
	);
}

fn failure_label(failure: &Failure) -> &'static str {
	match failure {
		Failure::Status { status: 408, .. } => "request_timeout",
		Failure::Status { status: 429, .. } => "too_many_requests",
		Failure::Status { status: 500, .. } => "internal_error",
		Failure::Status { status: 502, .. } => "bad_gateway",
		Failure::Status { status: 503, .. } => "service_unavailable",
		Failure::Status { status: 504, .. } => "gateway_timeout",
		Failure::Status { .. } => "status",
		Failure::CredentialInvalid => "credential_invalid",
		Failure::Transport(TransportError::Timeout) | Failure::Timeout => "timeout",
		Failure::Transport(_) => "network",
		Failure::Local(_) => "local",
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;

	fn status(status: u16, retry_after: Option<StdDuration>) -> Failure {
		Failure::Status { status, retry_after, body: Value::Null }
	}

	#[test]
	fn classification_matches_transient_statuses() {
		for code in [408, 429, 502, 503, 504] {
			assert_eq!(
				RetryPolicy::classify(&status(code, None)),
				RetryVerdict::Retry { after: None },
				"Status {code} should be retryable."
			);
		}
		for code in [400, 403, 404, 409, 422, 500] {
			assert_eq!(
				RetryPolicy::classify(&status(code, None)),
				RetryVerdict::Stop,
				"Status {code} should not be retryable."
			);
		}

		let hint = StdDuration::from_secs(2);

		assert_eq!(
			RetryPolicy::classify(&status(500, Some(hint))),
			RetryVerdict::Retry { after: Some(hint) }
		);
		assert_eq!(RetryPolicy::classify(&Failure::CredentialInvalid), RetryVerdict::Stop);
		assert_eq!(RetryPolicy::classify(&Failure::Timeout), RetryVerdict::Retry { after: None });
		assert_eq!(
			RetryPolicy::classify(&Failure::Transport(TransportError::network(
				std::io::Error::other("reset")
			))),
			RetryVerdict::Retry { after: None }
		);
	}

	#[test]
	fn backoff_stays_within_jitter_band_and_cap() {
		let policy = RetryPolicy::default();
		let mut rng = rand::rng();

		for attempt in 1..=6 {
			let nominal = policy.nominal_delay(attempt);
			let low = nominal.mul_f64(0.7);
			let high = nominal.mul_f64(1.3).min(policy.max_delay);

			for _ in 0..200 {
				let delay = policy.backoff_with(attempt, &mut rng);

				assert!(delay >= low && delay <= high, "Delay {delay:?} escaped [{low:?}, {high:?}].");
			}
		}

		assert_eq!(policy.nominal_delay(1), StdDuration::from_secs(1));
		assert_eq!(policy.nominal_delay(2), StdDuration::from_secs(2));
		assert_eq!(policy.nominal_delay(3), StdDuration::from_secs(4));
		assert_eq!(policy.nominal_delay(10), StdDuration::from_secs(10));
	}

	#[test]
	fn validation_rejects_out_of_range_values() {
		assert!(RetryPolicy::default().validate().is_ok());
		assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
		assert!(RetryPolicy::default().with_jitter(1.5).validate().is_err());
		assert!(
			RetryPolicy::default()
				.with_delays(StdDuration::from_secs(5), StdDuration::from_secs(1))
				.validate()
				.is_err()
		);
	}

	#[tokio::test(start_paused = true)]
	async fn service_unavailable_then_success_uses_two_attempts() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::default();
		let out = policy
			.with_retry(
				|_| {
					let call = calls.fetch_add(1, Ordering::SeqCst);

					async move { if call == 0 { Err(status(503, None)) } else { Ok("done") } }
				},
				RetryPolicy::classify,
			)
			.await;

		assert_eq!(out.expect("Second attempt should succeed."), "done");
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn budget_exhaustion_returns_last_failure() {
		let calls = AtomicU32::new(0);
		let mut observed = Vec::new();
		let out: Result<(), Failure> = RetryPolicy::default()
			.with_retry_observed(
				|_| {
					calls.fetch_add(1, Ordering::SeqCst);

					async { Err(Failure::Timeout) }
				},
				RetryPolicy::classify,
				|state| observed.push(state.clone()),
			)
			.await;

		assert!(matches!(out, Err(Failure::Timeout)));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
		assert_eq!(observed.iter().map(|state| state.attempt).collect::<Vec<_>>(), vec![1, 2]);
		assert!(observed.iter().all(|state| state.last_error == "timeout"));
	}

	#[tokio::test(start_paused = true)]
	async fn retry_after_hint_overrides_backoff() {
		let mut observed = Vec::new();
		let calls = AtomicU32::new(0);
		let hint = StdDuration::from_secs(7);
		let _ = RetryPolicy::default()
			.with_retry_observed(
				|_| {
					let call = calls.fetch_add(1, Ordering::SeqCst);

					async move { if call == 0 { Err(status(429, Some(hint))) } else { Ok(()) } }
				},
				RetryPolicy::classify,
				|state| observed.push(state.next_delay),
			)
			.await;

		assert_eq!(observed, vec![hint]);
	}

	#[tokio::test]
	async fn non_retryable_failures_stop_immediately() {
		let calls = AtomicU32::new(0);
		let out: Result<(), Failure> = RetryPolicy::default()
			.with_retry(
				|_| {
					calls.fetch_add(1, Ordering::SeqCst);

					async { Err(Failure::CredentialInvalid) }
				},
				RetryPolicy::classify,
			)
			.await;

		assert!(matches!(out, Err(Failure::CredentialInvalid)));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
