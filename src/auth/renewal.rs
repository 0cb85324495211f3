//! Single-flight credential renewal with an ordered wait queue.
//!
//! [`TokenManager`] owns the session credential. Requests read an `Arc<Credential>` snapshot
//! together with the credential *generation* it belongs to. When the backend rejects a
//! credential, [`TokenManager::handle_unauthorized`] either hands back a newer credential
//! (the generation moved on while the request was in flight) or queues the caller behind the
//! one renewal allowed at a time. The check of the renewal flag and its update happen in the
//! same synchronous lock section, so concurrent rejections can never start two renewals.
//!
//! The renewal itself runs on a spawned task. On success the queue is drained in enqueue
//! order, and each waiter receives a [`DispatchTurn`] that it releases once its re-dispatched
//! call has been issued; the next waiter is only resolved after that, which keeps re-dispatch
//! order equal to enqueue order. On failure every waiter receives
//! [`Error::Unauthenticated`] and the session-invalidated listeners fire once.

// std
use std::{collections::VecDeque, panic::AssertUnwindSafe};
// crates.io
use futures_util::FutureExt;
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{Credential, RenewalMetrics, TenantId, TokenSecret},
	config::{ClientConfig, HeaderNames},
	error::{ConfigError, TransportError},
	fingerprint::Fingerprint,
	obs,
	request::{self, EndpointClass, Method},
	sanitize::AntiForgerySource,
	transport::{Transport, TransportRequest},
};

/// Upper bound a queued waiter may hold its dispatch turn before the next one is resolved.
pub const DISPATCH_TURN_GRACE: StdDuration = StdDuration::from_secs(5);

/// Boxed future returned by [`Renewer::renew`].
pub type RenewalFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Credential, RenewalError>> + 'a + Send>>;

/// Callback invoked when a renewal fails and the session is gone.
pub type SessionListener = Arc<dyn Fn() + Send + Sync>;

/// Exchanges the current renewal token for a new credential.
pub trait Renewer
where
	Self: 'static + Send + Sync,
{
	/// Performs one renewal attempt. Renewals are never retried.
	fn renew<'a>(&'a self, current: &'a Credential) -> RenewalFuture<'a>;
}

/// Failures reported by a [`Renewer`].
#[derive(Debug, ThisError)]
pub enum RenewalError {
	/// Renewal endpoint rejected the renewal token.
	#[error("Renewal endpoint rejected the request with status {status}.")]
	Rejected {
		/// HTTP status code.
		status: u16,
	},
	/// Renewal response did not contain a usable credential.
	#[error("Renewal response is malformed at `{path}`.")]
	Malformed {
		/// JSON path of the failing field.
		path: String,
	},
	/// Renewal call produced no response.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Renewal call exceeded the auth-class timeout.
	#[error("Renewal timed out.")]
	Timeout,
	/// Renewer panicked.
	#[error("Renewal was aborted.")]
	Aborted,
}

/// Credential handed to a request about to be dispatched.
#[derive(Debug)]
pub struct DispatchCredential {
	/// Credential to attach, if a session exists.
	pub credential: Option<Arc<Credential>>,
	/// Generation of `credential`, passed back to [`TokenManager::handle_unauthorized`].
	pub generation: u64,
	/// Ordering turn held by waiters released from the renewal queue.
	pub turn: Option<DispatchTurn>,
}

/// Ordering token for a request re-dispatched after a renewal.
///
/// The next queued waiter is resolved once this value is released or dropped.
#[derive(Debug)]
pub struct DispatchTurn {
	_release: oneshot::Sender<()>,
}
impl DispatchTurn {
	/// Lets the next queued waiter proceed.
	pub fn release(self) {}
}

/// Caller parked until the in-flight renewal resolves.
#[derive(Debug)]
pub struct PendingRequest {
	/// Position ticket, unique per manager.
	pub ticket: u64,
	/// Fingerprint of the parked request, for diagnostics.
	pub fingerprint: Option<Fingerprint>,
	/// Instant the caller joined the queue.
	pub enqueued_at: Instant,
	sender: oneshot::Sender<Result<DispatchCredential>>,
}

#[derive(Debug, Default)]
struct SessionState {
	credential: Option<Arc<Credential>>,
	generation: u64,
	renewing: bool,
	queue: VecDeque<PendingRequest>,
	next_ticket: u64,
}
impl SessionState {
	fn enqueue(&mut self, fingerprint: Option<&Fingerprint>) -> Admission {
		let (sender, receiver) = oneshot::channel();
		let ticket = self.next_ticket;

		self.next_ticket += 1;
		self.queue.push_back(PendingRequest {
			ticket,
			fingerprint: fingerprint.cloned(),
			enqueued_at: Instant::now(),
			sender,
		});

		Admission::Queued { ticket, receiver }
	}

	fn ready(&self) -> Admission {
		Admission::Ready(DispatchCredential {
			credential: self.credential.clone(),
			generation: self.generation,
			turn: None,
		})
	}

	fn replace(&mut self, credential: Option<Arc<Credential>>) -> VecDeque<PendingRequest> {
		self.credential = credential;
		self.generation += 1;
		self.renewing = false;

		std::mem::take(&mut self.queue)
	}
}

enum Admission {
	Ready(DispatchCredential),
	Queued { ticket: u64, receiver: oneshot::Receiver<Result<DispatchCredential>> },
	Denied(Error),
}

/// Owner of the session credential and the renewal queue.
pub struct TokenManager {
	state: Mutex<SessionState>,
	renewer: Arc<dyn Renewer>,
	listeners: RwLock<Vec<SessionListener>>,
	metrics: RenewalMetrics,
	expiry_skew: StdDuration,
}
impl TokenManager {
	/// Creates a manager without a session.
	pub fn new(renewer: Arc<dyn Renewer>, expiry_skew: StdDuration) -> Self {
		Self {
			state: Mutex::new(SessionState::default()),
			renewer,
			listeners: RwLock::new(Vec::new()),
			metrics: RenewalMetrics::default(),
			expiry_skew,
		}
	}

	/// Renewal counters.
	pub fn metrics(&self) -> &RenewalMetrics {
		&self.metrics
	}

	/// Installs a credential obtained outside the renewal path (for example a login).
	pub fn set_credential(&self, credential: Credential) {
		let mut state = self.state.lock();

		state.credential = Some(Arc::new(credential));
		state.generation += 1;
	}

	/// Drops the session credential; queued waiters still follow the in-flight renewal.
	pub fn clear(&self) {
		let mut state = self.state.lock();

		state.credential = None;
		state.generation += 1;
	}

	/// Current credential snapshot.
	pub fn current(&self) -> Option<Arc<Credential>> {
		self.state.lock().credential.clone()
	}

	/// Current credential generation.
	pub fn generation(&self) -> u64 {
		self.state.lock().generation
	}

	/// Returns `true` while a renewal is in flight.
	pub fn is_renewing(&self) -> bool {
		self.state.lock().renewing
	}

	/// Number of callers parked behind the in-flight renewal.
	pub fn queued(&self) -> usize {
		self.state.lock().queue.len()
	}

	/// Registers a callback fired once per failed renewal.
	pub fn on_session_invalidated<F>(&self, listener: F)
	where
		F: 'static + Fn() + Send + Sync,
	{
		self.listeners.write().push(Arc::new(listener));
	}

	/// Returns the credential to dispatch with.
	///
	/// Callers arriving while a renewal is in flight, or while the credential is about to
	/// expire, wait for the renewed credential instead of sending a doomed request.
	pub async fn credential_for_dispatch(
		self: &Arc<Self>,
		fingerprint: Option<&Fingerprint>,
	) -> Result<DispatchCredential> {
		let admission = {
			let mut state = self.state.lock();

			if state.renewing {
				state.enqueue(fingerprint)
			} else {
				match state.credential.clone() {
					Some(current)
						if current.expires_within(self.expiry_skew, OffsetDateTime::now_utc()) =>
					{
						let queued = state.enqueue(fingerprint);

						state.renewing = true;
						self.spawn_renewal(current);

						queued
					},
					_ => state.ready(),
				}
			}
		};

		self.settle(admission).await
	}

	/// Handles a credential-invalid response for a request dispatched with `used_generation`.
	pub async fn handle_unauthorized(
		self: &Arc<Self>,
		used_generation: u64,
		fingerprint: Option<&Fingerprint>,
	) -> Result<DispatchCredential> {
		let admission = {
			let mut state = self.state.lock();

			if state.renewing {
				state.enqueue(fingerprint)
			} else {
				match state.credential.clone() {
					None => Admission::Denied(Error::Unauthenticated),
					Some(_) if state.generation != used_generation => {
						self.metrics.record_stale_reuse();

						state.ready()
					},
					Some(current) => {
						let queued = state.enqueue(fingerprint);

						state.renewing = true;
						self.spawn_renewal(current);

						queued
					},
				}
			}
		};

		self.settle(admission).await
	}

	async fn settle(&self, admission: Admission) -> Result<DispatchCredential> {
		match admission {
			Admission::Ready(grant) => Ok(grant),
			Admission::Denied(error) => Err(error),
			Admission::Queued { ticket, receiver } => {
				let _slot = QueueSlot { manager: self, ticket };

				receiver.await.unwrap_or(Err(Error::Unauthenticated))
			},
		}
	}

	fn spawn_renewal(self: &Arc<Self>, current: Arc<Credential>) {
		tokio::spawn(Arc::clone(self).renew(current));
	}

	async fn renew(self: Arc<Self>, current: Arc<Credential>) {
		self.metrics.record_attempt();
		obs::record_outcome(obs::Component::Renewal, EndpointClass::Auth, obs::Outcome::Attempt);
		obs::log_event!(debug, queued = self.queued(), "Renewing session credential.");

		let outcome = AssertUnwindSafe(self.renewer.renew(&current))
			.catch_unwind()
			.await
			.unwrap_or(Err(RenewalError::Aborted));

		match outcome {
			Ok(credential) => self.complete(Arc::new(credential)).await,
			Err(error) => self.invalidate(&error),
		}
	}

	async fn complete(&self, credential: Arc<Credential>) {
		let (waiters, generation) = {
			let mut state = self.state.lock();
			let waiters = state.replace(Some(credential.clone()));

			(waiters, state.generation)
		};

		self.metrics.record_success();
		obs::record_outcome(obs::Component::Renewal, EndpointClass::Auth, obs::Outcome::Success);
		obs::log_event!(debug, waiters = waiters.len(), generation, "Session credential renewed.");

		for waiter in waiters {
			let (release, released) = oneshot::channel();
			let grant = DispatchCredential {
				credential: Some(credential.clone()),
				generation,
				turn: Some(DispatchTurn { _release: release }),
			};

			// A closed receiver hands the grant back; dropping it releases the turn.
			if waiter.sender.send(Ok(grant)).is_err() {
				continue;
			}

			let _ = tokio::time::timeout(DISPATCH_TURN_GRACE, released).await;
		}
	}

	fn invalidate(&self, error: &RenewalError) {
		let waiters = self.state.lock().replace(None);

		self.metrics.record_failure();
		obs::record_outcome(obs::Component::Renewal, EndpointClass::Auth, obs::Outcome::Failure);
		obs::log_event!(
			warn,
			error = %error,
			waiters = waiters.len(),
			"Session renewal failed; invalidating session."
		);

		let listeners = self.listeners.read().clone();

		for listener in listeners {
			listener();
		}
		for waiter in waiters {
			let _ = waiter.sender.send(Err(Error::Unauthenticated));
		}
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("TokenManager")
			.field("has_credential", &state.credential.is_some())
			.field("generation", &state.generation)
			.field("renewing", &state.renewing)
			.field("queued", &state.queue.len())
			.field("expiry_skew", &self.expiry_skew)
			.finish()
	}
}

/// Removes a cancelled waiter from the queue; a no-op once the queue was drained.
struct QueueSlot<'a> {
	manager: &'a TokenManager,
	ticket: u64,
}
impl Drop for QueueSlot<'_> {
	fn drop(&mut self) {
		self.manager.state.lock().queue.retain(|pending| pending.ticket != self.ticket);
	}
}

#[derive(Deserialize)]
struct RenewalResponse {
	#[serde(alias = "accessToken")]
	access_token: String,
	#[serde(default, alias = "refreshToken")]
	refresh_token: Option<String>,
	#[serde(alias = "expiresIn")]
	expires_in: u64,
}

/// Default [`Renewer`] that POSTs the renewal token to the configured renewal endpoint.
pub struct TransportRenewer<T> {
	transport: Arc<T>,
	url: Url,
	timeout: StdDuration,
	headers: HeaderNames,
	tenant: Option<TenantId>,
	anti_forgery: Option<Arc<dyn AntiForgerySource>>,
}
impl<T> TransportRenewer<T>
where
	T: Transport,
{
	/// Builds a renewer for `config.renewal_path` using the auth-class timeout.
	pub fn new(transport: Arc<T>, config: &ClientConfig) -> Result<Self, ConfigError> {
		Ok(Self {
			transport,
			url: config.resolve(&config.renewal_path, &[])?,
			timeout: config.timeout_for(EndpointClass::Auth),
			headers: config.headers.clone(),
			tenant: config.default_tenant.clone(),
			anti_forgery: None,
		})
	}

	/// Attaches an anti-forgery token to renewal calls.
	pub fn with_anti_forgery(mut self, source: Arc<dyn AntiForgerySource>) -> Self {
		self.anti_forgery = Some(source);

		self
	}

	async fn exchange(&self, current: &Credential) -> Result<Credential, RenewalError> {
		let mut headers = vec![(
			self.headers.correlation_id.clone(),
			crate::auth::CorrelationId::generate().into(),
		)];

		if let Some(tenant) = &self.tenant {
			headers.push((self.headers.tenant.clone(), tenant.to_string()));
		}
		if let Some(source) = &self.anti_forgery {
			headers.push((self.headers.anti_forgery.clone(), source.token()));
		}

		let request = TransportRequest {
			method: Method::Post,
			url: self.url.clone(),
			headers,
			body: Some(serde_json::json!({ "refresh_token": current.renewal.expose() })),
		};
		let response = tokio::time::timeout(self.timeout, self.transport.send(request))
			.await
			.map_err(|_| RenewalError::Timeout)??;

		if !response.is_success() {
			return Err(RenewalError::Rejected { status: response.status });
		}

		let body = request::decode_body(&response.body);
		let parsed: RenewalResponse = serde_path_to_error::deserialize(&body)
			.map_err(|err| RenewalError::Malformed { path: err.path().to_string() })?;
		let renewal = parsed.refresh_token.map_or_else(|| current.renewal.clone(), TokenSecret::new);
		let expires_in = Duration::seconds(i64::try_from(parsed.expires_in).unwrap_or(i64::MAX));

		Ok(Credential::new(TokenSecret::new(parsed.access_token), renewal, expires_in))
	}
}
impl<T> Renewer for TransportRenewer<T>
where
	T: Transport,
{
	fn renew<'a>(&'a self, current: &'a Credential) -> RenewalFuture<'a> {
		Box::pin(self.exchange(current))
	}
}
impl<T> Debug for TransportRenewer<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TransportRenewer")
			.field("url", &self.url.as_str())
			.field("timeout", &self.timeout)
			.finish()
	}
}
