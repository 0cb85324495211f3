//! Stable request identities used for coalescing and logging.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
use url::form_urlencoded;
// self
use crate::{_prelude::*, auth::TenantId, request::Method};

/// Base64 (no padding) SHA-256 digest of a normalized request.
///
/// Two requests share a fingerprint when they have the same method, tenant, resolved path
/// (byte for byte, as sent), query parameters (in any order), and JSON body (with object keys
/// in any order).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);
impl Fingerprint {
	/// Computes the fingerprint of a request resolved to `url`.
	pub fn compute(
		method: Method,
		tenant: Option<&TenantId>,
		url: &Url,
		body: Option<&Value>,
	) -> Self {
		let mut hasher = Sha256::new();

		hasher.update(method.as_str());
		hasher.update([0]);
		hasher.update(tenant.map(|tenant| &**tenant).unwrap_or_default());
		hasher.update([0]);
		hasher.update(url.path());
		hasher.update([0]);
		hasher.update(normalize_query(url));
		hasher.update([0]);

		if let Some(body) = body {
			hasher.update(canonical_json(body));
		}

		Self(STANDARD_NO_PAD.encode(hasher.finalize()))
	}

	/// Returns the encoded digest.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Debug for Fingerprint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Fingerprint({})", self.short())
	}
}
impl Display for Fingerprint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.short())
	}
}
impl Fingerprint {
	fn short(&self) -> &str {
		self.0.get(..12).unwrap_or(&self.0)
	}
}

/// Re-encodes the query pairs of `url` sorted by key, then value.
///
/// Every key and value is form-encoded on its own, so reserved characters inside a value can
/// never be mistaken for a pair separator.
pub fn normalize_query(url: &Url) -> String {
	let mut pairs = url
		.query_pairs()
		.map(|(key, value)| (key.into_owned(), value.into_owned()))
		.collect::<Vec<_>>();

	pairs.sort();

	form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish()
}

/// Serializes JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();

	write_canonical(value, &mut out);

	out
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			let mut entries = map.iter().collect::<Vec<_>>();

			entries.sort_by(|(a, _), (b, _)| a.cmp(b));
			out.push('{');

			for (idx, (key, value)) in entries.into_iter().enumerate() {
				if idx > 0 {
					out.push(',');
				}

				out.push_str(&Value::String(key.clone()).to_string());
				out.push(':');
				write_canonical(value, out);
			}

			out.push('}');
		},
		Value::Array(items) => {
			out.push('[');

			for (idx, item) in items.iter().enumerate() {
				if idx > 0 {
					out.push(',');
				}

				write_canonical(item, out);
			}

			out.push(']');
		},
		scalar => out.push_str(&scalar.to_string()),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(path: &str, query: &[(&str, &str)]) -> Url {
		let mut url = Url::parse("https://api.test.local").expect("Test base URL should parse.");

		url.set_path(path);

		if !query.is_empty() {
			url.query_pairs_mut().extend_pairs(query);
		}

		url
	}

	fn get(path: &str, query: &[(&str, &str)]) -> Fingerprint {
		Fingerprint::compute(Method::Get, None, &url(path, query), None)
	}

	#[test]
	fn fingerprint_ignores_query_order() {
		assert_eq!(
			get("/bookings", &[("page", "2"), ("size", "20")]),
			get("/bookings", &[("size", "20"), ("page", "2")])
		);
	}

	#[test]
	fn reserved_characters_in_values_never_collide() {
		assert_ne!(get("/search", &[("a", "b&c=d")]), get("/search", &[("a", "b"), ("c", "d")]));
		assert_ne!(get("/search", &[("a", "b=c")]), get("/search", &[("a=b", "c")]));
		assert_eq!(normalize_query(&url("/search", &[("a", "b&c=d")])), "a=b%26c%3Dd");
	}

	#[test]
	fn distinct_paths_on_the_wire_stay_distinct() {
		assert_ne!(get("/rooms//1", &[]), get("/rooms/1", &[]));
		assert_ne!(get("/rooms/", &[]), get("/rooms", &[]));
	}

	#[test]
	fn fingerprint_separates_method_tenant_and_body() {
		let tenant = TenantId::new("tenant-a").expect("Tenant fixture should be valid.");
		let rooms = url("/rooms", &[]);
		let base = Fingerprint::compute(Method::Get, None, &rooms, None);

		assert_ne!(base, Fingerprint::compute(Method::Head, None, &rooms, None));
		assert_ne!(base, Fingerprint::compute(Method::Get, Some(&tenant), &rooms, None));
		assert_ne!(
			Fingerprint::compute(Method::Post, None, &rooms, Some(&serde_json::json!({"a": 1}))),
			Fingerprint::compute(Method::Post, None, &rooms, Some(&serde_json::json!({"a": 2}))),
		);
	}

	#[test]
	fn canonical_json_sorts_nested_keys() {
		let a = serde_json::json!({ "b": 1, "a": { "d": [1, 2], "c": null } });

		assert_eq!(canonical_json(&a), "{\"a\":{\"c\":null,\"d\":[1,2]},\"b\":1}");
	}
}
