//! Payload sanitization and anti-forgery attachment.
//!
//! [`RequestPreparer::prepare`] turns a caller's [`ApiRequest`] into a [`PreparedRequest`]:
//! the JSON body is cleaned field by field, the URL is resolved, the anti-forgery token is
//! attached to state-changing methods, and the fingerprint is computed from the cleaned
//! request. Preparation is synchronous and happens before any network call, so a payload
//! with invalid required fields never leaves the process.

pub mod anti_forgery;
pub mod field;

pub use anti_forgery::*;
pub use field::*;

// std
use std::collections::BTreeSet;
// self
use crate::{
	_prelude::*,
	auth::{CorrelationId, TenantId},
	cancel::CancelSignal,
	config::{ClientConfig, HeaderNames},
	error::{ConfigError, FieldErrors},
	fingerprint::Fingerprint,
	request::{ApiRequest, EndpointClass, Method},
	transport::TransportRequest,
};

/// Recursive JSON cleaner driven by [`FieldRules`].
#[derive(Clone, Debug)]
pub struct Sanitizer {
	rules: FieldRules,
	url_schemes: BTreeSet<String>,
}
impl Sanitizer {
	/// Creates a sanitizer with explicit rules and a URL scheme allow-list.
	pub fn new(rules: FieldRules, url_schemes: BTreeSet<String>) -> Self {
		Self { rules, url_schemes }
	}

	/// Cleans every string in `body`.
	///
	/// Invalid optional values become `null`; invalid, empty, or `null` required values are
	/// reported as [`Error::ValidationFailed`] keyed by JSON path. Keys are never removed.
	pub fn sanitize(&self, body: Value) -> Result<Value> {
		let mut errors = FieldErrors::default();
		let cleaned = self.clean(body, "", None, &mut errors);

		if errors.is_empty() { Ok(cleaned) } else { Err(Error::ValidationFailed { field_errors: errors }) }
	}

	fn clean(&self, value: Value, path: &str, name: Option<&str>, errors: &mut FieldErrors) -> Value {
		match value {
			Value::Object(map) => Value::Object(
				map.into_iter()
					.map(|(key, child)| {
						let child_path =
							if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
						let cleaned = self.clean(child, &child_path, Some(&key), errors);

						(key, cleaned)
					})
					.collect(),
			),
			Value::Array(items) => Value::Array(
				items
					.into_iter()
					.enumerate()
					.map(|(idx, child)| self.clean(child, &format!("{path}[{idx}]"), name, errors))
					.collect(),
			),
			Value::String(raw) => self.clean_string(&raw, path, name, errors),
			Value::Null if self.rules.is_required(path, name) => {
				errors.push(path, "Field is required.");

				Value::Null
			},
			other => other,
		}
	}

	fn clean_string(
		&self,
		raw: &str,
		path: &str,
		name: Option<&str>,
		errors: &mut FieldErrors,
	) -> Value {
		let required = self.rules.is_required(path, name);

		match self.rules.kind_for(path, name).clean(raw, &self.url_schemes) {
			Ok(cleaned) if cleaned.is_empty() && required => {
				errors.push(path, "Field is required.");

				Value::Null
			},
			Ok(cleaned) => Value::String(cleaned),
			Err(reason) if required => {
				errors.push(path, reason);

				Value::Null
			},
			Err(_) => Value::Null,
		}
	}
}

/// Request after sanitization, URL resolution, and header preparation.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL.
	pub url: Url,
	/// Headers known before dispatch (caller, tenant, correlation, anti-forgery).
	pub headers: Vec<(String, String)>,
	/// Sanitized JSON body.
	pub body: Option<Value>,
	/// Endpoint class.
	pub class: EndpointClass,
	/// Effective tenant.
	pub tenant: Option<TenantId>,
	/// Correlation identifier of the logical request.
	pub correlation_id: CorrelationId,
	/// Fingerprint of the cleaned request.
	pub fingerprint: Fingerprint,
	/// Whether identical in-flight requests may share this call.
	pub coalesce: bool,
	/// Cancellation signal.
	pub cancel: Option<CancelSignal>,
}
impl PreparedRequest {
	/// Builds the transport request for one dispatch.
	pub fn to_transport(&self) -> TransportRequest {
		TransportRequest {
			method: self.method,
			url: self.url.clone(),
			headers: self.headers.clone(),
			body: self.body.clone(),
		}
	}
}

/// Preparation stage shared by every request of a client.
pub struct RequestPreparer {
	config: Arc<ClientConfig>,
	sanitizer: Sanitizer,
	anti_forgery: Arc<dyn AntiForgerySource>,
}
impl RequestPreparer {
	/// Creates a preparer using the configured field rules and URL schemes.
	pub fn new(config: Arc<ClientConfig>, anti_forgery: Arc<dyn AntiForgerySource>) -> Self {
		let sanitizer =
			Sanitizer::new(config.field_rules.clone(), config.allowed_url_schemes.clone());

		Self { config, sanitizer, anti_forgery }
	}

	/// Anti-forgery source used for state-changing requests.
	pub fn anti_forgery(&self) -> &Arc<dyn AntiForgerySource> {
		&self.anti_forgery
	}

	/// Sanitizes `request` and prepares it for dispatch.
	pub fn prepare(&self, request: ApiRequest) -> Result<PreparedRequest> {
		let ApiRequest { method, path, query, body, class, tenant, headers, coalesce, cancel } =
			request;
		let names = &self.config.headers;
		let body = body.map(|body| self.sanitizer.sanitize(body)).transpose()?;
		let url = self.config.resolve(&path, &query).map_err(|e| match e {
			ConfigError::ForeignOrigin { .. } =>
				Error::validation("path", "Request path must stay on the configured backend."),
			_ => Error::validation("path", "Request path is invalid."),
		})?;
		let tenant = tenant.or_else(|| self.config.default_tenant.clone());
		let correlation_id = CorrelationId::generate();
		let mut prepared_headers = headers
			.into_iter()
			.filter(|(name, _)| !is_managed(names, name))
			.collect::<Vec<_>>();

		prepared_headers.push((names.correlation_id.clone(), correlation_id.to_string()));

		if let Some(tenant) = &tenant {
			prepared_headers.push((names.tenant.clone(), tenant.to_string()));
		}
		if method.is_state_changing() {
			prepared_headers.push((names.anti_forgery.clone(), self.anti_forgery.token()));
		}

		let fingerprint = Fingerprint::compute(method, tenant.as_ref(), &url, body.as_ref());

		Ok(PreparedRequest {
			method,
			url,
			headers: prepared_headers,
			body,
			class,
			tenant,
			correlation_id,
			fingerprint,
			coalesce: coalesce && method.is_idempotent_read(),
			cancel,
		})
	}
}
impl Debug for RequestPreparer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestPreparer").field("sanitizer", &self.sanitizer).finish()
	}
}

/// Headers written by the pipeline cannot be supplied by callers.
fn is_managed(names: &HeaderNames, name: &str) -> bool {
	[
		&names.authorization,
		&names.anti_forgery,
		&names.correlation_id,
		&names.tenant,
		&names.retry_attempt,
	]
	.into_iter()
	.any(|managed| managed.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::_preludet::test_config;

	fn preparer(config: ClientConfig) -> RequestPreparer {
		RequestPreparer::new(Arc::new(config), Arc::new(IssuedAntiForgery::new("csrf-token")))
	}

	fn header<'a>(prepared: &'a PreparedRequest, name: &str) -> Option<&'a str> {
		prepared
			.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	#[test]
	fn state_changing_methods_carry_the_anti_forgery_token() {
		let preparer = preparer(test_config());
		let post = preparer
			.prepare(ApiRequest::post("/bookings").json(json!({ "note": "hi" })))
			.expect("POST should prepare.");
		let get = preparer.prepare(ApiRequest::get("/bookings")).expect("GET should prepare.");

		assert_eq!(header(&post, "X-CSRF-Token"), Some("csrf-token"));
		assert_eq!(header(&get, "X-CSRF-Token"), None);
		assert!(header(&get, "X-Request-ID").is_some());
		assert!(!post.coalesce);
		assert!(get.coalesce);
	}

	#[test]
	fn bodies_are_cleaned_recursively_without_dropping_keys() {
		let preparer = preparer(test_config());
		let prepared = preparer
			.prepare(ApiRequest::post("/guests").json(json!({
				"name": "<script>alert(1)</script>Ada <b>Lovelace</b>",
				"contact": { "email": " ADA@Example.com ", "phone": "call me", "website": "javascript:alert(1)" },
				"tags": ["<i>vip</i>", "  repeat   guest "],
				"nights": 3
			})))
			.expect("Optional invalid fields should not reject the request.");

		assert_eq!(
			prepared.body,
			Some(json!({
				"name": "Ada Lovelace",
				"contact": { "email": "ada@example.com", "phone": null, "website": null },
				"tags": ["vip", "repeat guest"],
				"nights": 3
			}))
		);
	}

	#[test]
	fn invalid_required_fields_reject_before_dispatch() {
		let config = ClientConfig::builder(test_config().base_url)
			.field_rules(FieldRules::default().require("contact.email").require("name"))
			.build()
			.expect("Configuration should build.");
		let preparer = preparer(config);
		let err = preparer
			.prepare(ApiRequest::post("/guests").json(json!({
				"name": "<script>x</script>",
				"contact": { "email": "nope" }
			})))
			.expect_err("Required fields should be enforced.");
		let Error::ValidationFailed { field_errors } = err else {
			panic!("Sanitization failures should surface as validation errors.");
		};

		assert_eq!(field_errors.get("contact.email"), Some(&["Invalid email address.".to_owned()][..]));
		assert_eq!(field_errors.get("name"), Some(&["Field is required.".to_owned()][..]));
	}

	#[test]
	fn callers_cannot_override_managed_headers() {
		let preparer = preparer(test_config());
		let prepared = preparer
			.prepare(
				ApiRequest::get("/bookings")
					.header("authorization", "Bearer forged")
					.header("X-Trace", "keep"),
			)
			.expect("GET should prepare.");

		assert_eq!(header(&prepared, "Authorization"), None);
		assert_eq!(header(&prepared, "X-Trace"), Some("keep"));
	}

	#[test]
	fn tenant_falls_back_to_client_default_and_changes_the_fingerprint() {
		let tenant = TenantId::new("tenant-a").expect("Tenant fixture should be valid.");
		let config = ClientConfig::builder(test_config().base_url)
			.default_tenant(tenant)
			.build()
			.expect("Configuration should build.");
		let with_default = preparer(config).prepare(ApiRequest::get("/rooms")).expect("GET should prepare.");
		let other = preparer(test_config())
			.prepare(
				ApiRequest::get("/rooms")
					.tenant(TenantId::new("tenant-b").expect("Tenant fixture should be valid.")),
			)
			.expect("GET should prepare.");

		assert_eq!(header(&with_default, "X-Tenant-ID"), Some("tenant-a"));
		assert_eq!(header(&other, "X-Tenant-ID"), Some("tenant-b"));
		assert_ne!(with_default.fingerprint, other.fingerprint);
	}
}
