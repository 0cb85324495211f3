//! Request and response models exchanged with [`GatewayClient`](crate::client::GatewayClient).

// self
use crate::{_prelude::*, auth::TenantId, cancel::CancelSignal};

/// HTTP methods understood by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`
	Get,
	/// `HEAD`
	Head,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Returns the canonical uppercase token.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Head => "HEAD",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Patch => "PATCH",
			Self::Delete => "DELETE",
		}
	}

	/// Methods that mutate backend state and therefore carry an anti-forgery token.
	pub const fn is_state_changing(self) -> bool {
		matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
	}

	/// Idempotent reads, the only methods eligible for coalescing.
	pub const fn is_idempotent_read(self) -> bool {
		matches!(self, Self::Get | Self::Head)
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Endpoint classes used for admission quotas and transport timeouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
	/// Login, logout, and credential renewal.
	Auth,
	/// Read-heavy listing and detail endpoints.
	Read,
	/// Create/update/delete endpoints.
	Write,
	/// Bulk exports and reporting.
	Bulk,
	/// Fallback bucket for classes without their own quota.
	Global,
}
impl EndpointClass {
	/// Every class, in a stable order.
	pub const ALL: [Self; 5] = [Self::Auth, Self::Read, Self::Write, Self::Bulk, Self::Global];

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Auth => "auth",
			Self::Read => "read",
			Self::Write => "write",
			Self::Bulk => "bulk",
			Self::Global => "global",
		}
	}

	/// Default class for a method when the caller does not pick one.
	pub const fn for_method(method: Method) -> Self {
		if method.is_idempotent_read() { Self::Read } else { Self::Write }
	}
}
impl Display for EndpointClass {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Logical request submitted to the pipeline.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the client's base URL.
	pub path: String,
	/// Query parameters; order is irrelevant for fingerprinting.
	pub query: Vec<(String, String)>,
	/// Optional JSON body.
	pub body: Option<Value>,
	/// Endpoint class driving quota and timeout selection.
	pub class: EndpointClass,
	/// Tenant context; falls back to the client default when absent.
	pub tenant: Option<TenantId>,
	/// Extra headers supplied by the caller.
	pub headers: Vec<(String, String)>,
	/// Opt out of in-flight coalescing for this read.
	pub coalesce: bool,
	/// Cancellation signal observed by every suspension point.
	pub cancel: Option<CancelSignal>,
}
impl ApiRequest {
	/// Creates a request for `method path` using the method's default class.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			body: None,
			class: EndpointClass::for_method(method),
			tenant: None,
			headers: Vec::new(),
			coalesce: true,
			cancel: None,
		}
	}

	/// `GET path`.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::Get, path)
	}

	/// `POST path`.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::Post, path)
	}

	/// `PUT path`.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::Put, path)
	}

	/// `PATCH path`.
	pub fn patch(path: impl Into<String>) -> Self {
		Self::new(Method::Patch, path)
	}

	/// `DELETE path`.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::Delete, path)
	}

	/// Appends a query parameter.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Sets the JSON body.
	pub fn json(mut self, body: Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Overrides the endpoint class.
	pub fn class(mut self, class: EndpointClass) -> Self {
		self.class = class;

		self
	}

	/// Sets the tenant context.
	pub fn tenant(mut self, tenant: TenantId) -> Self {
		self.tenant = Some(tenant);

		self
	}

	/// Adds a caller-supplied header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Disables coalescing so the read always dispatches its own call.
	pub fn without_coalescing(mut self) -> Self {
		self.coalesce = false;

		self
	}

	/// Attaches a cancellation signal.
	pub fn cancel_on(mut self, signal: CancelSignal) -> Self {
		self.cancel = Some(signal);

		self
	}
}

/// Successful backend response.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
	/// HTTP status code (2xx).
	pub status: u16,
	/// Decoded JSON body; `null` for empty bodies, a string for non-JSON bodies.
	pub body: Value,
	/// Correlation identifier of the dispatch that produced the response.
	pub correlation_id: String,
}
impl ApiResponse {
	/// Decodes the body into `T`, reporting the failing JSON path on mismatch.
	pub fn decode<T>(&self) -> Result<T>
	where
		T: serde::de::DeserializeOwned,
	{
		serde_path_to_error::deserialize(&self.body).map_err(|err| {
			Error::validation(err.path().to_string(), "Response field has an unexpected shape.")
		})
	}
}

/// Decodes a raw response body into JSON without ever failing.
pub(crate) fn decode_body(bytes: &[u8]) -> Value {
	if bytes.iter().all(u8::is_ascii_whitespace) {
		return Value::Null;
	}

	serde_json::from_slice(bytes)
		.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn default_class_follows_method() {
		assert_eq!(ApiRequest::get("/bookings").class, EndpointClass::Read);
		assert_eq!(ApiRequest::post("/bookings").class, EndpointClass::Write);
		assert_eq!(
			ApiRequest::post("/auth/login").class(EndpointClass::Auth).class,
			EndpointClass::Auth
		);
	}

	#[test]
	fn only_mutations_are_state_changing() {
		assert!(!Method::Get.is_state_changing());
		assert!(!Method::Head.is_state_changing());
		assert!(Method::Post.is_state_changing());
		assert!(Method::Delete.is_state_changing());
		assert!(Method::Head.is_idempotent_read());
		assert!(!Method::Put.is_idempotent_read());
	}

	#[test]
	fn bodies_decode_leniently() {
		assert_eq!(decode_body(b""), Value::Null);
		assert_eq!(decode_body(b"{\"id\":1}"), serde_json::json!({ "id": 1 }));
		assert_eq!(decode_body(b"plain text"), Value::String("plain text".into()));
	}

	#[test]
	fn decode_reports_failing_path() {
		#[derive(Debug, Deserialize)]
		struct Booking {
			#[allow(dead_code)]
			id: u64,
		}

		let response = ApiResponse {
			status: 200,
			body: serde_json::json!({ "id": "not-a-number" }),
			correlation_id: "c".into(),
		};
		let err = response.decode::<Booking>().expect_err("Mismatched body should fail to decode.");

		assert!(matches!(err, Error::ValidationFailed { ref field_errors } if field_errors.get("id").is_some()));
	}
}
