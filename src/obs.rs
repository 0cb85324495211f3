//! Optional observability helpers for the request pipeline.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `gateway_client.request` with the `class`,
//!   `method`, and `correlation_id` fields, plus events at retries, renewals, coalesced joins,
//!   and admission denials.
//! - Enable `metrics` to increment one counter per [`Component`], labeled by `class` +
//!   `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Emits a `tracing` event when the feature is enabled; compiles to nothing otherwise.
macro_rules! log_event {
	($level:ident, $($arg:tt)+) => {
		#[cfg(feature = "tracing")]
		{
			::tracing::$level!($($arg)+);
		}
	};
}
pub(crate) use log_event;

/// Pipeline components that report outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
	/// A logical request as seen by the caller.
	Request,
	/// Sliding-window admission control.
	RateLimit,
	/// In-flight request coalescing.
	Dedup,
	/// Credential renewal.
	Renewal,
	/// Retry controller.
	Retry,
}
impl Component {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Component::Request => "request",
			Component::RateLimit => "rate_limit",
			Component::Dedup => "dedup",
			Component::Renewal => "renewal",
			Component::Retry => "retry",
		}
	}

	/// Counter name recorded for this component.
	pub const fn metric_name(self) -> &'static str {
		match self {
			Component::Request => "gateway_client_request_total",
			Component::RateLimit => "gateway_client_rate_limited_total",
			Component::Dedup => "gateway_client_coalesced_total",
			Component::Renewal => "gateway_client_renewal_total",
			Component::Retry => "gateway_client_retry_total",
		}
	}
}
impl Display for Component {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Work started (request dispatch, renewal call, scheduled retry).
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Admission refused before any network call.
	Denied,
	/// Request joined an identical in-flight call.
	Coalesced,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
			Outcome::Denied => "denied",
			Outcome::Coalesced => "coalesced",
		}
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
