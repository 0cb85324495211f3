//! Closed error taxonomy surfaced to callers, plus the raw failure and configuration errors that
//! feed it.

// self
use crate::_prelude::*;

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Validation messages keyed by JSON field path (`contact.email`, `items[2].url`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);
impl FieldErrors {
	/// Records a message for `field`.
	pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
		self.0.entry(field.into()).or_default().push(message.into());
	}

	/// Returns `true` when no field has an error.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns the messages recorded for `field`.
	pub fn get(&self, field: &str) -> Option<&[String]> {
		self.0.get(field).map(Vec::as_slice)
	}

	/// Reads a backend validation map (`{"errors": {"field": ["msg"]}}` or `fieldErrors`).
	pub fn from_body(body: &Value) -> Self {
		let mut errors = Self::default();
		let map = body
			.get("errors")
			.or_else(|| body.get("fieldErrors"))
			.or_else(|| body.get("field_errors"))
			.and_then(Value::as_object);

		if let Some(map) = map {
			for (field, messages) in map {
				match messages {
					Value::String(message) => errors.push(field, message.as_str()),
					Value::Array(items) =>
						for message in items.iter().filter_map(Value::as_str) {
							errors.push(field, message);
						},
					_ => errors.push(field, "Invalid value."),
				}
			}
		}

		errors
	}
}
impl Display for FieldErrors {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let fields = self.0.keys().map(String::as_str).collect::<Vec<_>>();

		f.write_str(&fields.join(", "))
	}
}

/// Canonical outcome surfaced by [`GatewayClient::execute`](crate::client::GatewayClient::execute).
///
/// The set is closed: every transport or backend failure is mapped to exactly one variant
/// before it reaches application code. Values are `Clone` so coalesced callers can observe the
/// same outcome, and `Display` never includes raw backend bodies.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
	/// Admission control (local or backend) rejected the request.
	#[error("Too many requests; retry in {} ms.", retry_after.as_millis())]
	RateLimited {
		/// Time until a retry may be admitted.
		retry_after: StdDuration,
	},
	/// Payload failed local sanitization or backend validation.
	#[error("Request validation failed for: {field_errors}.")]
	ValidationFailed {
		/// Field-level validation messages.
		field_errors: FieldErrors,
	},
	/// No valid credential is available; the session must be re-established.
	#[error("Authentication is required.")]
	Unauthenticated,
	/// Authenticated, but not allowed to perform the operation.
	#[error("Access to the requested resource is forbidden.")]
	Forbidden,
	/// Resource does not exist.
	#[error("Requested resource was not found.")]
	NotFound,
	/// Request conflicts with the current resource state.
	#[error("Request conflicts with the current resource state.")]
	Conflict,
	/// Backend returned a status without a dedicated variant.
	#[error("Server responded with status {status}.")]
	ServerError {
		/// HTTP status code.
		status: u16,
	},
	/// No response was received from the backend.
	#[error("Network is unavailable.")]
	NetworkUnavailable,
	/// Caller cancelled the request.
	#[error("Request was cancelled.")]
	Cancelled,
	/// Backend did not answer in time.
	#[error("Request timed out.")]
	Timeout,
}
impl Error {
	/// Returns a short message suitable for end users.
	pub fn user_message(&self) -> &'static str {
		match self {
			Self::RateLimited { .. } => "You are sending requests too quickly. Please wait a moment.",
			Self::ValidationFailed { .. } => "Some fields are invalid. Please review the form.",
			Self::Unauthenticated => "Your session has ended. Please sign in again.",
			Self::Forbidden => "You do not have permission to do that.",
			Self::NotFound => "The requested item could not be found.",
			Self::Conflict => "This item was changed elsewhere. Please reload and try again.",
			Self::ServerError { .. } => "The server could not complete the request.",
			Self::NetworkUnavailable => "Unable to reach the server. Check your connection.",
			Self::Cancelled => "The request was cancelled.",
			Self::Timeout => "The server took too long to respond.",
		}
	}

	/// Builds a single-field validation failure.
	pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
		let mut field_errors = FieldErrors::default();

		field_errors.push(field, message);

		Self::ValidationFailed { field_errors }
	}
}

/// Raw outcome of one dispatch, before it is mapped into [`Error`].
///
/// Retry classification and credential renewal operate on this type; only
/// [`Failure::into_error`] produces caller-visible errors.
#[derive(Debug)]
pub enum Failure {
	/// Backend answered with a non-success status.
	Status {
		/// HTTP status code.
		status: u16,
		/// `Retry-After` hint, if supplied.
		retry_after: Option<StdDuration>,
		/// Decoded response body (never surfaced verbatim).
		body: Value,
	},
	/// Backend reported that the attached credential is expired or invalid.
	CredentialInvalid,
	/// No response received.
	Transport(TransportError),
	/// Endpoint-class timeout elapsed.
	Timeout,
	/// Failure decided locally (renewal lost, quota exhausted at commit, cancellation).
	Local(Error),
}
impl Failure {
	/// Maps the raw failure into exactly one taxonomy outcome.
	pub fn into_error(self) -> Error {
		match self {
			Self::Status { status, retry_after, body } => match status {
				400 | 422 => Error::ValidationFailed { field_errors: FieldErrors::from_body(&body) },
				401 => Error::Unauthenticated,
				403 => Error::Forbidden,
				404 | 410 => Error::NotFound,
				409 => Error::Conflict,
				408 | 504 => Error::Timeout,
				429 => Error::RateLimited { retry_after: retry_after.unwrap_or_default() },
				_ => Error::ServerError { status },
			},
			Self::CredentialInvalid => Error::Unauthenticated,
			Self::Transport(TransportError::Timeout) | Self::Timeout => Error::Timeout,
			Self::Transport(_) => Error::NetworkUnavailable,
			Self::Local(error) => error,
		}
	}

	/// Returns the backend `Retry-After` hint, if any.
	pub fn retry_after(&self) -> Option<StdDuration> {
		match self {
			Self::Status { retry_after, .. } => *retry_after,
			_ => None,
		}
	}

	/// Returns the HTTP status, if the backend answered.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Status { status, .. } => Some(*status),
			_ => None,
		}
	}
}
impl From<Error> for Failure {
	fn from(e: Error) -> Self {
		Self::Local(e)
	}
}

/// Configuration and validation failures raised while building a client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration is invalid at `{path}`.")]
	Parse {
		/// JSON path of the failing field.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// Base URL cannot serve as a base for request paths.
	#[error("Base URL cannot be used as a base: {url}.")]
	InvalidBaseUrl {
		/// Offending URL.
		url: String,
	},
	/// Base URL must use HTTPS.
	#[error("Base URL must use HTTPS: {url}.")]
	InsecureBaseUrl {
		/// Offending URL.
		url: String,
	},
	/// A request path could not be joined to the base URL.
	#[error("Request path `{path}` is invalid.")]
	InvalidPath {
		/// Offending path.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A request path resolved to a host other than the configured backend.
	#[error("Request path `{path}` leaves the configured backend origin.")]
	ForeignOrigin {
		/// Offending path.
		path: String,
	},
	/// A rate quota admits no requests.
	#[error("Quota for the {class} class must admit at least one request per non-zero window.")]
	EmptyQuota {
		/// Endpoint class label.
		class: &'static str,
	},
	/// Retry policy values are out of range.
	#[error("Retry policy is invalid: {reason}.")]
	InvalidRetryPolicy {
		/// Human-readable reason.
		reason: &'static str,
	},
	/// A header name contains characters not allowed in HTTP header names.
	#[error("Header name `{name}` is invalid.")]
	InvalidHeaderName {
		/// Offending header name.
		name: String,
	},
	/// Tenant identifier failed validation.
	#[error(transparent)]
	InvalidTenant(#[from] crate::auth::IdentifierError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (no usable response received).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the backend.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying HTTP client gave up waiting for the backend.
	#[error("Transport timed out while calling the backend.")]
	Timeout,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the backend.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn status(status: u16) -> Failure {
		Failure::Status { status, retry_after: None, body: Value::Null }
	}

	#[test]
	fn statuses_map_to_exactly_one_outcome() {
		assert_eq!(status(401).into_error(), Error::Unauthenticated);
		assert_eq!(status(403).into_error(), Error::Forbidden);
		assert_eq!(status(404).into_error(), Error::NotFound);
		assert_eq!(status(409).into_error(), Error::Conflict);
		assert_eq!(status(504).into_error(), Error::Timeout);
		assert_eq!(status(500).into_error(), Error::ServerError { status: 500 });
		assert_eq!(status(418).into_error(), Error::ServerError { status: 418 });
		assert_eq!(
			Failure::Status {
				status: 429,
				retry_after: Some(StdDuration::from_secs(3)),
				body: Value::Null
			}
			.into_error(),
			Error::RateLimited { retry_after: StdDuration::from_secs(3) },
		);
	}

	#[test]
	fn transport_failures_never_leak_raw_errors() {
		let io = std::io::Error::other("socket closed");

		assert_eq!(Failure::Transport(TransportError::Io(io)).into_error(), Error::NetworkUnavailable);
		assert_eq!(Failure::Transport(TransportError::Timeout).into_error(), Error::Timeout);
		assert_eq!(Failure::Timeout.into_error(), Error::Timeout);
		assert_eq!(Failure::CredentialInvalid.into_error(), Error::Unauthenticated);
	}

	#[test]
	fn validation_body_is_read_into_field_errors() {
		let body = serde_json::json!({
			"message": "<internal stack trace>",
			"errors": { "email": ["Already taken."], "name": "Required." }
		});
		let Error::ValidationFailed { field_errors } =
			Failure::Status { status: 422, retry_after: None, body }.into_error()
		else {
			panic!("Status 422 should map to a validation failure.");
		};

		assert_eq!(field_errors.get("email"), Some(&["Already taken.".to_owned()][..]));
		assert_eq!(field_errors.get("name"), Some(&["Required.".to_owned()][..]));
	}

	#[test]
	fn display_never_includes_backend_bodies() {
		let error = Failure::Status {
			status: 500,
			retry_after: None,
			body: serde_json::json!({ "trace": "secret-internal-detail" }),
		}
		.into_error();

		assert!(!error.to_string().contains("secret-internal-detail"));
		assert!(!error.user_message().is_empty());
	}
}
