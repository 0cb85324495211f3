//! Transport seam between the pipeline and an HTTP stack.
//!
//! [`Transport`] is the client's only dependency on an HTTP implementation. The pipeline
//! hands it fully prepared [`TransportRequest`]s (absolute URL, every header already
//! attached) and expects back the status, the parsed `Retry-After` hint, and the raw body.
//! Any failure that produced no status is a [`TransportError`].

// crates.io
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, request::Method};
#[cfg(feature = "reqwest")] use crate::error::ConfigError;

pub use crate::error::TransportError;

/// Boxed future returned by [`Transport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + 'a + Send>>;

/// Fully prepared outbound call.
#[derive(Clone)]
pub struct TransportRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL including query parameters.
	pub url: Url,
	/// Headers in insertion order.
	pub headers: Vec<(String, String)>,
	/// JSON body, if any.
	pub body: Option<Value>,
}
impl TransportRequest {
	/// Returns the first value of header `name` (case-insensitive).
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}
impl Debug for TransportRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let header_names = self.headers.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();

		f.debug_struct("TransportRequest")
			.field("method", &self.method)
			.field("url", &self.url.as_str())
			.field("headers", &header_names)
			.field("has_body", &self.body.is_some())
			.finish()
	}
}

/// Response returned by a [`Transport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
	/// HTTP status code.
	pub status: u16,
	/// Parsed `Retry-After` hint.
	pub retry_after: Option<StdDuration>,
	/// Raw body bytes.
	pub body: Vec<u8>,
}
impl TransportResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Abstraction over HTTP stacks able to execute gateway calls.
///
/// Implementations must be `Send + Sync + 'static` so one instance can back every clone of
/// a [`GatewayClient`](crate::client::GatewayClient), and the returned future must be `Send`
/// because coalesced calls and renewals run on spawned tasks.
pub trait Transport
where
	Self: 'static + Send + Sync,
{
	/// Executes `request`, returning the backend's answer or a transport failure.
	fn send(&self, request: TransportRequest) -> TransportFuture<'_>;
}

/// reqwest-backed [`Transport`].
///
/// Redirects are not followed; the backend is expected to answer API calls directly.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a transport with redirects disabled.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl Transport for ReqwestTransport {
	fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let method = match request.method {
				Method::Get => reqwest::Method::GET,
				Method::Head => reqwest::Method::HEAD,
				Method::Post => reqwest::Method::POST,
				Method::Put => reqwest::Method::PUT,
				Method::Patch => reqwest::Method::PATCH,
				Method::Delete => reqwest::Method::DELETE,
			};
			let mut builder = self.0.request(method, request.url);

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = &request.body {
				builder = builder.json(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let retry_after = parse_retry_after(response.headers());
			let body = response.bytes().await?.to_vec();

			Ok(TransportResponse { status, retry_after, body })
		})
	}
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<StdDuration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(StdDuration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return StdDuration::try_from(delta).ok();
		}
	}

	None
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	#[test]
	fn retry_after_accepts_seconds_and_http_dates() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));

		assert_eq!(parse_retry_after(&headers), Some(StdDuration::from_secs(12)));

		let future = (OffsetDateTime::now_utc() + Duration::minutes(5))
			.format(&Rfc2822)
			.expect("Future instant should format as an HTTP date.");

		headers.insert(
			RETRY_AFTER,
			HeaderValue::from_str(&future).expect("HTTP date should be a valid header value."),
		);

		let hint = parse_retry_after(&headers).expect("HTTP date in the future should parse.");

		assert!(hint > StdDuration::from_secs(240) && hint <= StdDuration::from_secs(300));

		headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 +0000"));

		assert_eq!(parse_retry_after(&headers), None);
	}

	#[test]
	fn debug_output_omits_header_values() {
		let request = TransportRequest {
			method: Method::Get,
			url: Url::parse("https://api.test.local/bookings").expect("URL should parse."),
			headers: vec![("Authorization".into(), "Bearer secret-token".into())],
			body: None,
		};
		let rendered = format!("{request:?}");

		assert!(rendered.contains("Authorization"));
		assert!(!rendered.contains("secret-token"));
		assert_eq!(request.header("authorization"), Some("Bearer secret-token"));
	}
}
