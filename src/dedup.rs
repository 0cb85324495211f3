//! In-flight coalescing of identical idempotent reads.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use futures_util::{
	FutureExt,
	future::{BoxFuture, Shared},
};
use tokio::task::AbortHandle;
// self
use crate::{_prelude::*, fingerprint::Fingerprint, obs, request::{ApiResponse, EndpointClass}};

type SharedCall = Shared<BoxFuture<'static, Result<ApiResponse>>>;

struct InFlightEntry {
	id: u64,
	call: SharedCall,
	abort: AbortHandle,
	subscribers: usize,
}

/// Map from fingerprint to the single call currently serving it.
///
/// The first request for a fingerprint spawns the call; identical requests arriving before
/// it settles subscribe to the same shared future. The spawned call removes its entry (by
/// entry id, so a successor is never evicted) before any subscriber observes the outcome.
/// When every subscriber has dropped its future the entry is removed and the call aborted.
#[derive(Clone, Default)]
pub struct InFlightCache {
	entries: Arc<Mutex<HashMap<Fingerprint, InFlightEntry>>>,
	next_id: Arc<AtomicU64>,
}
impl InFlightCache {
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Runs `perform` once per fingerprint and shares its outcome with every identical caller.
	///
	/// `perform` is only invoked for the first caller. Dropping the returned future detaches
	/// this caller; the shared call is aborted only once no caller is left waiting on it.
	pub async fn coalesce<F, Fut>(
		&self,
		fingerprint: Fingerprint,
		class: EndpointClass,
		perform: F,
	) -> Result<ApiResponse>
	where
		F: FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = Result<ApiResponse>>,
	{
		let (call, _subscription) = {
			let mut entries = self.entries.lock();

			if let Some(entry) = entries.get_mut(&fingerprint) {
				entry.subscribers += 1;

				obs::record_outcome(obs::Component::Dedup, class, obs::Outcome::Coalesced);
				obs::log_event!(
					debug,
					fingerprint = %fingerprint,
					subscribers = entry.subscribers,
					"Joined in-flight request."
				);

				let subscription =
					Subscription { cache: self, fingerprint: fingerprint.clone(), id: entry.id };

				(entry.call.clone(), subscription)
			} else {
				let id = self.next_id.fetch_add(1, Ordering::Relaxed);
				let (call, abort) = self.spawn(fingerprint.clone(), id, perform());
				let subscription = Subscription { cache: self, fingerprint: fingerprint.clone(), id };

				entries.insert(
					fingerprint,
					InFlightEntry { id, call: call.clone(), abort, subscribers: 1 },
				);

				(call, subscription)
			}
		};

		call.await
	}

	/// Number of distinct calls currently in flight.
	pub fn in_flight(&self) -> usize {
		self.entries.lock().len()
	}

	/// Callers currently sharing the call for `fingerprint`.
	pub fn subscribers(&self, fingerprint: &Fingerprint) -> Option<usize> {
		self.entries.lock().get(fingerprint).map(|entry| entry.subscribers)
	}

	fn spawn<Fut>(&self, fingerprint: Fingerprint, id: u64, call: Fut) -> (SharedCall, AbortHandle)
	where
		Fut: 'static + Send + Future<Output = Result<ApiResponse>>,
	{
		let entries = self.entries.clone();
		let handle = tokio::spawn(async move {
			let outcome = call.await;
			let mut entries = entries.lock();

			if entries.get(&fingerprint).is_some_and(|entry| entry.id == id) {
				entries.remove(&fingerprint);
			}

			outcome
		});
		let abort = handle.abort_handle();
		let call = async move {
			match handle.await {
				Ok(outcome) => outcome,
				Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
				Err(_) => Err(Error::Cancelled),
			}
		}
		.boxed()
		.shared();

		(call, abort)
	}

	fn unsubscribe(&self, fingerprint: &Fingerprint, id: u64) {
		let mut entries = self.entries.lock();
		let Some(entry) = entries.get_mut(fingerprint) else { return };

		// A settled call already removed its entry; a successor must not be touched.
		if entry.id != id {
			return;
		}

		entry.subscribers = entry.subscribers.saturating_sub(1);

		if entry.subscribers > 0 {
			return;
		}
		if let Some(entry) = entries.remove(fingerprint) {
			entry.abort.abort();

			obs::log_event!(
				debug,
				fingerprint = %fingerprint,
				"Aborted in-flight request without subscribers."
			);
		}
	}
}
impl Debug for InFlightCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("InFlightCache").field("in_flight", &self.in_flight()).finish()
	}
}

/// Releases one subscriber slot when the caller's future completes or is dropped.
struct Subscription<'a> {
	cache: &'a InFlightCache,
	fingerprint: Fingerprint,
	id: u64,
}
impl Drop for Subscription<'_> {
	fn drop(&mut self) {
		self.cache.unsubscribe(&self.fingerprint, self.id);
	}
}
