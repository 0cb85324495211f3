//! Session credential and the rules that decide when the backend rejected it.

// std
use std::collections::BTreeSet;
// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access/renewal token pair owned by the token manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Bearer token attached to outbound requests.
	pub access: TokenSecret,
	/// Token exchanged for a new credential.
	pub renewal: TokenSecret,
	/// Instant the credential was accepted.
	pub issued_at: OffsetDateTime,
	/// Instant the access token stops being accepted.
	pub expires_at: OffsetDateTime,
}
impl Credential {
	/// Builds a credential issued now that expires after `expires_in`.
	pub fn new(access: TokenSecret, renewal: TokenSecret, expires_in: Duration) -> Self {
		Self::issued_at(access, renewal, OffsetDateTime::now_utc(), expires_in)
	}

	/// Builds a credential issued at `issued_at`.
	pub fn issued_at(
		access: TokenSecret,
		renewal: TokenSecret,
		issued_at: OffsetDateTime,
		expires_in: Duration,
	) -> Self {
		Self { access, renewal, issued_at, expires_at: issued_at.saturating_add(expires_in) }
	}

	/// Returns `true` when the access token expires within `skew` of `now`.
	pub fn expires_within(&self, skew: StdDuration, now: OffsetDateTime) -> bool {
		let skew = Duration::try_from(skew).unwrap_or(Duration::MAX);

		now.saturating_add(skew) >= self.expires_at
	}
}

/// Sets the bearer header on `headers`, replacing any existing value.
pub fn attach_credential(
	headers: &mut Vec<(String, String)>,
	header_name: &str,
	credential: &Credential,
) {
	headers.retain(|(name, _)| !name.eq_ignore_ascii_case(header_name));
	headers.push((header_name.to_owned(), credential.access.bearer()));
}

/// Decides which `401` responses mean "the attached credential is expired or invalid".
///
/// Only those responses trigger a renewal. A `401` carrying a different error code (for
/// example a disabled account) is a terminal [`Error::Unauthenticated`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialInvalidPolicy {
	/// Body fields inspected for an error code, in order.
	pub marker_fields: Vec<String>,
	/// Codes that mark the credential as invalid.
	pub marker_values: BTreeSet<String>,
	/// Treat a `401` without any error code as credential-invalid.
	pub bare_401_is_invalid: bool,
}
impl Default for CredentialInvalidPolicy {
	fn default() -> Self {
		Self {
			marker_fields: vec!["code".into(), "error".into()],
			marker_values: ["token_expired", "token_invalid", "invalid_token"]
				.into_iter()
				.map(String::from)
				.collect(),
			bare_401_is_invalid: true,
		}
	}
}
impl CredentialInvalidPolicy {
	/// Strict policy: only an explicit marker triggers renewal.
	pub fn marker_only() -> Self {
		Self { bare_401_is_invalid: false, ..Self::default() }
	}

	/// Returns `true` when a response signals an invalidated credential.
	pub fn is_credential_invalid(&self, status: u16, body: &Value) -> bool {
		if status != 401 {
			return false;
		}

		let code = self.marker_fields.iter().find_map(|field| body.get(field)?.as_str());

		match code {
			Some(code) => self.marker_values.contains(code),
			None => self.bare_401_is_invalid,
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	fn credential(expires_in: Duration) -> Credential {
		Credential::issued_at(
			TokenSecret::new("access"),
			TokenSecret::new("renewal"),
			OffsetDateTime::UNIX_EPOCH,
			expires_in,
		)
	}

	#[test]
	fn expiry_honors_skew() {
		let credential = credential(Duration::minutes(5));
		let now = OffsetDateTime::UNIX_EPOCH + Duration::minutes(4);

		assert!(!credential.expires_within(StdDuration::from_secs(30), now));
		assert!(credential.expires_within(StdDuration::from_secs(60), now));
		assert!(credential.expires_within(StdDuration::ZERO, credential.expires_at));
	}

	#[test]
	fn attach_replaces_existing_authorization() {
		let mut headers = vec![("authorization".to_owned(), "Bearer stale".to_owned())];

		attach_credential(&mut headers, "Authorization", &credential(Duration::minutes(5)));

		assert_eq!(headers, vec![("Authorization".to_owned(), "Bearer access".to_owned())]);
	}

	#[test]
	fn default_policy_accepts_markers_and_bare_401() {
		let policy = CredentialInvalidPolicy::default();

		assert!(policy.is_credential_invalid(401, &json!({ "code": "token_expired" })));
		assert!(policy.is_credential_invalid(401, &json!({ "error": "invalid_token" })));
		assert!(policy.is_credential_invalid(401, &Value::Null));
		assert!(!policy.is_credential_invalid(401, &json!({ "code": "account_disabled" })));
		assert!(!policy.is_credential_invalid(403, &json!({ "code": "token_expired" })));
	}

	#[test]
	fn marker_only_policy_ignores_bare_401() {
		let policy = CredentialInvalidPolicy::marker_only();

		assert!(!policy.is_credential_invalid(401, &json!({})));
		assert!(policy.is_credential_invalid(401, &json!({ "code": "token_invalid" })));
	}
}
