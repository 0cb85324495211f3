//! Resilient API gateway client: every outbound backend request passes through one ordered
//! pipeline that enforces admission control, sanitizes payloads, coalesces identical reads,
//! renews credentials single-flight, and retries transient failures with jittered backoff.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cancel;
pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod obs;
pub mod rate_limit;
pub mod request;
pub mod retry;
pub mod sanitize;
pub mod transport;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and a scripted transport for tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// self
	use crate::{
		client::GatewayClient,
		config::ClientConfig,
		request::Method,
		transport::{Transport, TransportError, TransportFuture, TransportRequest, TransportResponse},
	};

	/// Base URL used by scripted clients.
	pub const TEST_BASE_URL: &str = "https://api.test.local";

	/// Scripted reply returned by [`ScriptedTransport`].
	#[derive(Clone, Debug)]
	pub enum Reply {
		/// Responds with the provided status, JSON body, and optional `Retry-After` hint.
		Status {
			/// HTTP status code.
			status: u16,
			/// JSON body.
			body: Value,
			/// Parsed `Retry-After` hint.
			retry_after: Option<StdDuration>,
		},
		/// Fails with a network error.
		Network,
	}
	impl Reply {
		/// `200 OK` carrying `body`.
		pub fn ok(body: Value) -> Self {
			Self::Status { status: 200, body, retry_after: None }
		}

		/// Status-only reply with an empty JSON object body.
		pub fn status(status: u16) -> Self {
			Self::Status { status, body: Value::Object(Default::default()), retry_after: None }
		}

		/// Status reply with a JSON body.
		pub fn json(status: u16, body: Value) -> Self {
			Self::Status { status, body, retry_after: None }
		}

		/// Attaches a `Retry-After` hint.
		pub fn with_retry_after(self, hint: StdDuration) -> Self {
			match self {
				Self::Status { status, body, .. } =>
					Self::Status { status, body, retry_after: Some(hint) },
				other => other,
			}
		}
	}

	type Responder = Box<dyn Fn(&TransportRequest) -> Option<Reply> + Send + Sync>;

	/// In-process [`Transport`] that records every call and answers from per-route scripts.
	///
	/// Routes are matched on method + path. Queued replies are consumed in order; once a
	/// route's queue is empty the optional responder closure decides, falling back to `404`.
	#[derive(Default)]
	pub struct ScriptedTransport {
		routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
		responder: RwLock<Option<Responder>>,
		calls: Mutex<Vec<TransportRequest>>,
		latency: RwLock<Option<StdDuration>>,
		sent: AtomicUsize,
		completed: Arc<AtomicUsize>,
	}
	impl ScriptedTransport {
		/// Queues `reply` for the next call to `method path`.
		pub fn push(&self, method: Method, path: &str, reply: Reply) -> &Self {
			self.routes.lock().entry((method, path.to_owned())).or_default().push_back(reply);

			self
		}

		/// Installs a fallback responder consulted when no queued reply exists.
		pub fn respond_with<F>(&self, responder: F) -> &Self
		where
			F: 'static + Fn(&TransportRequest) -> Option<Reply> + Send + Sync,
		{
			*self.responder.write() = Some(Box::new(responder));

			self
		}

		/// Delays every reply by `latency` (use with a paused tokio clock).
		pub fn with_latency(&self, latency: StdDuration) -> &Self {
			*self.latency.write() = Some(latency);

			self
		}

		/// Returns every recorded call in dispatch order.
		pub fn calls(&self) -> Vec<TransportRequest> {
			self.calls.lock().clone()
		}

		/// Returns the recorded calls whose path equals `path`.
		pub fn calls_to(&self, path: &str) -> Vec<TransportRequest> {
			self.calls.lock().iter().filter(|call| call.url.path() == path).cloned().collect()
		}

		/// Returns the total number of dispatched calls.
		pub fn sent(&self) -> usize {
			self.sent.load(Ordering::SeqCst)
		}

		/// Returns the number of calls whose reply was produced (not dropped mid-flight).
		pub fn completed(&self) -> usize {
			self.completed.load(Ordering::SeqCst)
		}

		fn reply_for(&self, request: &TransportRequest) -> Reply {
			let key = (request.method, request.url.path().to_owned());

			if let Some(reply) = self.routes.lock().get_mut(&key).and_then(VecDeque::pop_front) {
				return reply;
			}
			if let Some(responder) = self.responder.read().as_ref()
				&& let Some(reply) = responder(request)
			{
				return reply;
			}

			Reply::status(404)
		}
	}
	impl Transport for ScriptedTransport {
		fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
			self.sent.fetch_add(1, Ordering::SeqCst);
			self.calls.lock().push(request.clone());

			let reply = self.reply_for(&request);
			let latency = *self.latency.read();
			let completed = self.completed.clone();

			Box::pin(async move {
				if let Some(latency) = latency {
					tokio::time::sleep(latency).await;
				}

				completed.fetch_add(1, Ordering::SeqCst);

				match reply {
					Reply::Status { status, body, retry_after } => Ok(TransportResponse {
						status,
						retry_after,
						body: serde_json::to_vec(&body).unwrap_or_default(),
					}),
					Reply::Network => Err(TransportError::network(std::io::Error::new(
						std::io::ErrorKind::ConnectionRefused,
						"Scripted connection refused.",
					))),
				}
			})
		}
	}

	/// Returns the default test configuration pointing at [`TEST_BASE_URL`].
	pub fn test_config() -> ClientConfig {
		ClientConfig::builder(
			Url::parse(TEST_BASE_URL).expect("Test base URL should parse successfully."),
		)
		.build()
		.expect("Default test configuration should be valid.")
	}

	/// Builds a client over a fresh [`ScriptedTransport`] using `config`.
	pub fn scripted_client(
		config: ClientConfig,
	) -> (GatewayClient<ScriptedTransport>, Arc<ScriptedTransport>) {
		let transport = Arc::new(ScriptedTransport::default());
		let client = GatewayClient::with_transport(config, transport.clone())
			.expect("Scripted client should build from a valid configuration.");

		(client, transport)
	}

	/// Extracts a header value from a recorded call.
	pub fn header<'a>(call: &'a TransportRequest, name: &str) -> Option<&'a str> {
		call.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::Value;
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tokio::time::Instant;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
