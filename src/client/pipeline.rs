//! Ordered request pipeline: admission → prepare → deduplicate → attach credential →
//! dispatch → recover.
//!
//! Each logical request is admitted against its class window, sanitized, and either joined to
//! an identical in-flight read or dispatched. A dispatch commits the admission permit once,
//! then runs under the retry controller; inside one attempt a credential-invalid response is
//! routed to the token manager (at most one renewal per logical request) and re-dispatched
//! with the renewed credential, so it never reaches retry classification.

// std
use std::{
	pin::pin,
	sync::atomic::{AtomicBool, Ordering},
	task::Poll,
};
// self
use crate::{
	_prelude::*,
	auth::{self, DispatchCredential, DispatchTurn},
	cancel,
	client::{ClientInner, GatewayClient},
	error::Failure,
	obs::{self, RequestSpan},
	rate_limit::AdmissionPermit,
	request::{self, ApiRequest, ApiResponse},
	retry::{self, RetryPolicy},
	sanitize::PreparedRequest,
	transport::{Transport, TransportRequest, TransportResponse},
};

/// Pipeline stages in execution order.
pub const STAGES: [Stage; 6] = [
	Stage::Admission,
	Stage::Prepare,
	Stage::Deduplicate,
	Stage::AttachCredential,
	Stage::Dispatch,
	Stage::Recover,
];

/// One pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
	/// Rate-limit admission.
	Admission,
	/// Sanitization and anti-forgery attachment.
	Prepare,
	/// In-flight coalescing lookup.
	Deduplicate,
	/// Credential attachment (may wait on a renewal).
	AttachCredential,
	/// Transport call under the class timeout.
	Dispatch,
	/// Renewal or retry after a failed dispatch.
	Recover,
}
impl Stage {
	/// Returns a stable label suitable for span or log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Admission => "admission",
			Self::Prepare => "prepare",
			Self::Deduplicate => "deduplicate",
			Self::AttachCredential => "attach_credential",
			Self::Dispatch => "dispatch",
			Self::Recover => "recover",
		}
	}

	/// Zero-based position in [`STAGES`].
	pub fn position(self) -> usize {
		STAGES.iter().position(|stage| *stage == self).unwrap_or(STAGES.len())
	}
}

/// Lifecycle of one logical request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
	/// Submitted, not yet admitted.
	Received,
	/// Passed admission control.
	Admitted,
	/// Sanitized and fingerprinted.
	Prepared,
	/// Joined an identical in-flight call.
	Deduplicated,
	/// Transport call issued.
	Dispatched,
	/// Waiting out a backoff delay.
	Retrying,
	/// Waiting on a credential renewal.
	Renewing,
	/// Resolved with a response.
	Succeeded,
	/// Resolved with an error.
	Failed,
}
impl Phase {
	/// Returns `true` when moving from `self` to `next` is legal.
	pub const fn can_transition_to(self, next: Phase) -> bool {
		use Phase::*;

		matches!(
			(self, next),
			(Received, Admitted | Failed)
				| (Admitted, Prepared | Failed)
				| (Prepared, Deduplicated | Dispatched | Failed)
				| (Deduplicated, Succeeded | Failed)
				| (Dispatched, Succeeded | Retrying | Renewing | Failed)
				| (Retrying | Renewing, Dispatched | Failed)
		)
	}

	/// Returns `true` for [`Phase::Succeeded`] and [`Phase::Failed`].
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Succeeded | Self::Failed)
	}
}

/// Per-request phase machine; illegal transitions are refused and logged.
#[derive(Debug)]
struct PhaseTracker {
	phase: Mutex<Phase>,
	renewed: AtomicBool,
}
impl PhaseTracker {
	fn at(phase: Phase) -> Self {
		Self { phase: Mutex::new(phase), renewed: AtomicBool::new(false) }
	}

	fn advance(&self, next: Phase) -> bool {
		let mut phase = self.phase.lock();

		if !phase.can_transition_to(next) {
			obs::log_event!(warn, from = ?*phase, to = ?next, "Refused illegal phase transition.");

			return false;
		}

		*phase = next;

		true
	}

	fn settle<T>(&self, outcome: &Result<T>) {
		self.advance(if outcome.is_ok() { Phase::Succeeded } else { Phase::Failed });
	}

	#[cfg(test)]
	fn current(&self) -> Phase {
		*self.phase.lock()
	}

	/// Claims the single renewal allowed per logical request.
	fn claim_renewal(&self) -> bool {
		!self.renewed.swap(true, Ordering::SeqCst)
	}
}

fn enter(stage: Stage) {
	obs::log_event!(trace, stage = stage.as_str(), position = stage.position(), "Entering stage.");

	#[cfg(not(feature = "tracing"))]
	let _ = stage;
}

impl<T> GatewayClient<T>
where
	T: Transport,
{
	/// Sends `request` through the pipeline.
	///
	/// Every outcome is exactly one [`Error`] variant. When the request carries a
	/// [`CancelSignal`](crate::cancel::CancelSignal), firing it resolves this call with
	/// [`Error::Cancelled`] without affecting other callers sharing the same in-flight read.
	pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
		let class = request.class;
		let signal = request.cancel.clone();
		let outcome = cancel::guarded(signal.as_ref(), self.run(request)).await;

		obs::record_outcome(
			obs::Component::Request,
			class,
			if outcome.is_ok() { obs::Outcome::Success } else { obs::Outcome::Failure },
		);

		outcome
	}

	async fn run(&self, request: ApiRequest) -> Result<ApiResponse> {
		let tracker = Arc::new(PhaseTracker::at(Phase::Received));

		enter(Stage::Admission);

		let permit = match self.inner.limiter.admit(request.class).into_result() {
			Ok(permit) => permit,
			Err(e) => {
				obs::log_event!(debug, class = request.class.as_str(), "Request denied by admission control.");
				tracker.advance(Phase::Failed);

				return Err(e);
			},
		};

		tracker.advance(Phase::Admitted);
		enter(Stage::Prepare);

		let prepared = match self.inner.preparer.prepare(request) {
			Ok(prepared) => prepared,
			Err(e) => {
				tracker.advance(Phase::Failed);

				return Err(e);
			},
		};

		tracker.advance(Phase::Prepared);

		let span = RequestSpan::new(prepared.class, prepared.method, &prepared.correlation_id);

		span.instrument(async move {
			enter(Stage::Deduplicate);

			if !prepared.coalesce {
				return dispatch(self.inner.clone(), prepared, permit, tracker).await;
			}

			let mut led = false;
			let fingerprint = prepared.fingerprint.clone();
			let class = prepared.class;
			let inner = self.inner.clone();
			let leader = tracker.clone();
			let outcome = self
				.inner
				.dedup
				.coalesce(fingerprint, class, || {
					led = true;

					dispatch(inner, prepared, permit, leader)
				})
				.await;

			// The leader's tracker is settled by `dispatch`.
			if !led {
				tracker.advance(Phase::Deduplicated);
				tracker.settle(&outcome);
			}

			outcome
		})
		.await
	}
}

/// Leader or solitary path: commits the permit and drives retries.
async fn dispatch<T>(
	inner: Arc<ClientInner<T>>,
	prepared: PreparedRequest,
	permit: AdmissionPermit,
	tracker: Arc<PhaseTracker>,
) -> Result<ApiResponse>
where
	T: Transport,
{
	if let Err(e) = permit.commit() {
		tracker.advance(Phase::Failed);

		return Err(e);
	}

	let inner = &*inner;
	let class = prepared.class;
	let outcome = inner
		.config
		.retry
		.with_retry_observed(
			|attempt| attempt_once(inner, &prepared, &tracker, attempt),
			RetryPolicy::classify,
			|state| {
				enter(Stage::Recover);
				tracker.advance(Phase::Retrying);
				retry::report_retry(class, state);
			},
		)
		.await
		.map_err(Failure::into_error);

	tracker.settle(&outcome);

	if let Err(e) = &outcome {
		obs::log_event!(debug, class = class.as_str(), error = %e, "Request failed.");
	}

	outcome
}

/// One attempt: credential → dispatch → (renew → re-dispatch).
async fn attempt_once<T>(
	inner: &ClientInner<T>,
	prepared: &PreparedRequest,
	tracker: &PhaseTracker,
	attempt: u32,
) -> Result<ApiResponse, Failure>
where
	T: Transport,
{
	enter(Stage::AttachCredential);

	let mut grant = inner.tokens.credential_for_dispatch(Some(&prepared.fingerprint)).await?;

	loop {
		enter(Stage::Dispatch);
		tracker.advance(Phase::Dispatched);

		let request = build_request(inner, prepared, &grant, attempt);
		let timeout = inner.config.timeout_for(prepared.class);
		let response = send_in_turn(inner.transport.as_ref(), request, timeout, grant.turn.take())
			.await?;
		let body = request::decode_body(&response.body);

		if response.is_success() {
			return Ok(ApiResponse {
				status: response.status,
				body,
				correlation_id: prepared.correlation_id.to_string(),
			});
		}
		if grant.credential.is_none()
			|| !inner.config.credential_policy.is_credential_invalid(response.status, &body)
		{
			return Err(Failure::Status {
				status: response.status,
				retry_after: response.retry_after,
				body,
			});
		}
		if !tracker.claim_renewal() {
			return Err(Failure::CredentialInvalid);
		}

		enter(Stage::Recover);
		tracker.advance(Phase::Renewing);

		grant = inner.tokens.handle_unauthorized(grant.generation, Some(&prepared.fingerprint)).await?;
	}
}

fn build_request<T>(
	inner: &ClientInner<T>,
	prepared: &PreparedRequest,
	grant: &DispatchCredential,
	attempt: u32,
) -> TransportRequest {
	let names = &inner.config.headers;
	let mut request = prepared.to_transport();

	if let Some(credential) = &grant.credential {
		auth::attach_credential(&mut request.headers, &names.authorization, credential);
	}
	if prepared.method.is_state_changing() {
		let token = inner.preparer.anti_forgery().token();

		request.headers.retain(|(name, _)| !name.eq_ignore_ascii_case(&names.anti_forgery));
		request.headers.push((names.anti_forgery.clone(), token));
	}
	if attempt > 1 {
		request.headers.push((names.retry_attempt.clone(), (attempt - 1).to_string()));
	}

	request
}

/// Issues the call, releasing the dispatch turn once the transport future has been polled.
async fn send_in_turn<T>(
	transport: &T,
	request: TransportRequest,
	timeout: StdDuration,
	turn: Option<DispatchTurn>,
) -> Result<TransportResponse, Failure>
where
	T: Transport,
{
	let mut call = pin!(tokio::time::timeout(timeout, transport.send(request)));
	let first = futures_util::poll!(call.as_mut());

	if let Some(turn) = turn {
		turn.release();
	}

	let outcome = match first {
		Poll::Ready(outcome) => outcome,
		Poll::Pending => call.await,
	};

	match outcome {
		Ok(Ok(response)) => Ok(response),
		Ok(Err(e)) => Err(Failure::Transport(e)),
		Err(_) => Err(Failure::Timeout),
	}
}
