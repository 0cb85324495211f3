//! Per-request cancellation signals.

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Cloneable cancellation signal attached to an [`ApiRequest`](crate::request::ApiRequest).
///
/// Cancelling aborts whatever the request is currently waiting on: a solitary transport call
/// is dropped, a coalesced subscriber stops listening (the shared call keeps running for the
/// others), and a caller queued behind a credential renewal leaves the queue.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal(CancellationToken);
impl CancelSignal {
	/// Creates an untriggered signal.
	pub fn new() -> Self {
		Self::default()
	}

	/// Triggers the signal.
	pub fn cancel(&self) {
		self.0.cancel();
	}

	/// Returns `true` once the signal has been triggered.
	pub fn is_cancelled(&self) -> bool {
		self.0.is_cancelled()
	}

	/// Resolves once the signal is triggered.
	pub async fn cancelled(&self) {
		self.0.cancelled().await
	}

	/// Runs `fut` until it completes or the signal fires, whichever comes first.
	pub async fn guard<F, T>(&self, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		if self.is_cancelled() {
			return Err(Error::Cancelled);
		}

		tokio::select! {
			biased;
			_ = self.0.cancelled() => Err(Error::Cancelled),
			out = fut => out,
		}
	}
}

/// Runs `fut` under an optional signal.
pub(crate) async fn guarded<F, T>(signal: Option<&CancelSignal>, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	match signal {
		Some(signal) => signal.guard(fut).await,
		None => fut.await,
	}
}
