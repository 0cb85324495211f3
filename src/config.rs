//! Client configuration, its builder, and validation.
//!
//! [`ClientConfig`] can be assembled in code through [`ClientConfig::builder`] or loaded from
//! JSON with [`ClientConfig::from_json_str`]; both paths run the same validation. Durations
//! are expressed in milliseconds when serialized.

// std
use std::collections::BTreeSet;
// self
use crate::{
	_prelude::*,
	auth::{CredentialInvalidPolicy, TenantId},
	error::ConfigError,
	rate_limit::RateQuota,
	request::EndpointClass,
	retry::RetryPolicy,
	sanitize::FieldRules,
};

/// Header names written by the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderNames {
	/// Bearer credential header.
	pub authorization: String,
	/// Anti-forgery token header (state-changing methods only).
	pub anti_forgery: String,
	/// Per-request correlation identifier header.
	pub correlation_id: String,
	/// Tenant context header.
	pub tenant: String,
	/// Retry attempt counter header added to re-dispatched requests.
	pub retry_attempt: String,
}
impl Default for HeaderNames {
	fn default() -> Self {
		Self {
			authorization: "Authorization".into(),
			anti_forgery: "X-CSRF-Token".into(),
			correlation_id: "X-Request-ID".into(),
			tenant: "X-Tenant-ID".into(),
			retry_attempt: "X-Retry-Attempt".into(),
		}
	}
}
impl HeaderNames {
	fn validate(&self) -> Result<(), ConfigError> {
		for name in [
			&self.authorization,
			&self.anti_forgery,
			&self.correlation_id,
			&self.tenant,
			&self.retry_attempt,
		] {
			if !is_header_token(name) {
				return Err(ConfigError::InvalidHeaderName { name: name.clone() });
			}
		}

		Ok(())
	}
}

/// Complete configuration for a [`GatewayClient`](crate::client::GatewayClient).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Backend base URL; request paths are resolved against it.
	pub base_url: Url,
	/// Tenant applied when a request does not carry its own.
	#[serde(default)]
	pub default_tenant: Option<TenantId>,
	/// Header names written by the pipeline.
	#[serde(default)]
	pub headers: HeaderNames,
	/// Path of the credential renewal endpoint.
	#[serde(default = "ClientConfig::default_renewal_path")]
	pub renewal_path: String,
	/// Rules deciding which `401` responses mean "credential invalid".
	#[serde(default)]
	pub credential_policy: CredentialInvalidPolicy,
	/// Per-class quotas; classes missing here share `global_quota`.
	///
	/// Entries loaded from JSON override the built-in quota of their class only.
	#[serde(
		default = "ClientConfig::default_quotas",
		deserialize_with = "ClientConfig::deserialize_quotas"
	)]
	pub quotas: BTreeMap<EndpointClass, RateQuota>,
	/// Fallback quota.
	#[serde(default = "ClientConfig::default_global_quota")]
	pub global_quota: RateQuota,
	/// Per-class transport timeouts; classes missing here use `default_timeout`.
	///
	/// Entries loaded from JSON override the built-in timeout of their class only.
	#[serde(default = "ClientConfig::default_timeouts", with = "timeouts_ms")]
	pub timeouts: BTreeMap<EndpointClass, StdDuration>,
	/// Fallback transport timeout.
	#[serde(default = "ClientConfig::default_timeout", with = "duration_ms")]
	pub default_timeout: StdDuration,
	/// Retry budget and backoff shape.
	#[serde(default)]
	pub retry: RetryPolicy,
	/// Credentials expiring within this margin are renewed before dispatch.
	#[serde(default = "ClientConfig::default_expiry_skew", with = "duration_ms")]
	pub expiry_skew: StdDuration,
	/// Interval after which the anti-forgery token is rotated.
	#[serde(default = "ClientConfig::default_anti_forgery_rotation", with = "duration_ms")]
	pub anti_forgery_rotation: StdDuration,
	/// URL schemes accepted by the sanitizer.
	#[serde(default = "ClientConfig::default_url_schemes")]
	pub allowed_url_schemes: BTreeSet<String>,
	/// Explicit field kinds and required fields for payload sanitization.
	#[serde(default)]
	pub field_rules: FieldRules,
	/// Permits plain-HTTP base URLs (local development only).
	#[serde(default)]
	pub allow_insecure_http: bool,
}
impl ClientConfig {
	/// Starts a builder for `base_url` seeded with defaults.
	pub fn builder(base_url: Url) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Parses and validates a JSON configuration document.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(de).map_err(|err| ConfigError::Parse {
			path: err.path().to_string(),
			source: err.into_inner(),
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Transport timeout for `class`.
	pub fn timeout_for(&self, class: EndpointClass) -> StdDuration {
		self.timeouts.get(&class).copied().unwrap_or(self.default_timeout)
	}

	/// Resolves `path` against the base URL.
	///
	/// Absolute URLs are only accepted when they share the base URL's origin, so credentials
	/// and tenant headers are never sent to another host.
	pub fn resolve(&self, path: &str, query: &[(String, String)]) -> Result<Url, ConfigError> {
		let relative = path.trim_start_matches('/');
		let mut url = self
			.base_url
			.join(relative)
			.map_err(|source| ConfigError::InvalidPath { path: path.to_owned(), source })?;

		if url.origin() != self.base_url.origin() {
			return Err(ConfigError::ForeignOrigin { path: path.to_owned() });
		}

		if !query.is_empty() {
			url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
		}

		Ok(url)
	}

	/// Validates invariants shared by the builder and JSON loading.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.base_url.cannot_be_a_base() {
			return Err(ConfigError::InvalidBaseUrl { url: self.base_url.to_string() });
		}
		if self.base_url.scheme() != "https" && !self.allow_insecure_http {
			return Err(ConfigError::InsecureBaseUrl { url: self.base_url.to_string() });
		}

		let quotas = self.quotas.iter().map(|(class, quota)| (*class, quota));

		for (class, quota) in quotas.chain([(EndpointClass::Global, &self.global_quota)]) {
			if quota.max_requests == 0 || quota.window.is_zero() {
				return Err(ConfigError::EmptyQuota { class: class.as_str() });
			}
		}

		self.resolve(&self.renewal_path, &[])?;
		self.retry.validate()?;
		self.headers.validate()?;

		Ok(())
	}

	fn default_renewal_path() -> String {
		"/auth/refresh".into()
	}

	fn default_quotas() -> BTreeMap<EndpointClass, RateQuota> {
		const MINUTE: StdDuration = StdDuration::from_secs(60);

		BTreeMap::from([
			(EndpointClass::Auth, RateQuota::new(10, MINUTE)),
			(EndpointClass::Read, RateQuota::new(120, MINUTE)),
			(EndpointClass::Write, RateQuota::new(30, MINUTE)),
		])
	}

	fn deserialize_quotas<'de, D>(
		deserializer: D,
	) -> Result<BTreeMap<EndpointClass, RateQuota>, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let mut quotas = Self::default_quotas();

		quotas.extend(<BTreeMap<EndpointClass, RateQuota>>::deserialize(deserializer)?);

		Ok(quotas)
	}

	fn default_global_quota() -> RateQuota {
		RateQuota::new(300, StdDuration::from_secs(60))
	}

	fn default_timeouts() -> BTreeMap<EndpointClass, StdDuration> {
		BTreeMap::from([
			(EndpointClass::Auth, StdDuration::from_secs(10)),
			(EndpointClass::Read, StdDuration::from_secs(30)),
			(EndpointClass::Write, StdDuration::from_secs(30)),
			(EndpointClass::Bulk, StdDuration::from_secs(120)),
		])
	}

	fn default_timeout() -> StdDuration {
		StdDuration::from_secs(30)
	}

	fn default_expiry_skew() -> StdDuration {
		StdDuration::from_secs(30)
	}

	fn default_anti_forgery_rotation() -> StdDuration {
		StdDuration::from_secs(15 * 60)
	}

	fn default_url_schemes() -> BTreeSet<String> {
		["http", "https", "mailto"].into_iter().map(String::from).collect()
	}
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
	config: ClientConfig,
}
impl ClientConfigBuilder {
	fn new(base_url: Url) -> Self {
		Self {
			config: ClientConfig {
				base_url,
				default_tenant: None,
				headers: HeaderNames::default(),
				renewal_path: ClientConfig::default_renewal_path(),
				credential_policy: CredentialInvalidPolicy::default(),
				quotas: ClientConfig::default_quotas(),
				global_quota: ClientConfig::default_global_quota(),
				timeouts: ClientConfig::default_timeouts(),
				default_timeout: ClientConfig::default_timeout(),
				retry: RetryPolicy::default(),
				expiry_skew: ClientConfig::default_expiry_skew(),
				anti_forgery_rotation: ClientConfig::default_anti_forgery_rotation(),
				allowed_url_schemes: ClientConfig::default_url_schemes(),
				field_rules: FieldRules::default(),
				allow_insecure_http: false,
			},
		}
	}

	/// Sets the default tenant.
	pub fn default_tenant(mut self, tenant: TenantId) -> Self {
		self.config.default_tenant = Some(tenant);

		self
	}

	/// Overrides header names.
	pub fn headers(mut self, headers: HeaderNames) -> Self {
		self.config.headers = headers;

		self
	}

	/// Overrides the renewal endpoint path.
	pub fn renewal_path(mut self, path: impl Into<String>) -> Self {
		self.config.renewal_path = path.into();

		self
	}

	/// Overrides the credential-invalid detection policy.
	pub fn credential_policy(mut self, policy: CredentialInvalidPolicy) -> Self {
		self.config.credential_policy = policy;

		self
	}

	/// Sets the quota for one class (use [`EndpointClass::Global`] for the fallback).
	pub fn quota(mut self, class: EndpointClass, quota: RateQuota) -> Self {
		if class == EndpointClass::Global {
			self.config.global_quota = quota;
		} else {
			self.config.quotas.insert(class, quota);
		}

		self
	}

	/// Sets the transport timeout for one class.
	pub fn timeout(mut self, class: EndpointClass, timeout: StdDuration) -> Self {
		self.config.timeouts.insert(class, timeout);

		self
	}

	/// Overrides the retry policy.
	pub fn retry(mut self, policy: RetryPolicy) -> Self {
		self.config.retry = policy;

		self
	}

	/// Overrides the proactive renewal margin.
	pub fn expiry_skew(mut self, skew: StdDuration) -> Self {
		self.config.expiry_skew = skew;

		self
	}

	/// Overrides the anti-forgery rotation interval.
	pub fn anti_forgery_rotation(mut self, interval: StdDuration) -> Self {
		self.config.anti_forgery_rotation = interval;

		self
	}

	/// Replaces the URL scheme allow-list.
	pub fn allowed_url_schemes<I, S>(mut self, schemes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.config.allowed_url_schemes =
			schemes.into_iter().map(|scheme| scheme.into().to_ascii_lowercase()).collect();

		self
	}

	/// Replaces the sanitizer field rules.
	pub fn field_rules(mut self, rules: FieldRules) -> Self {
		self.config.field_rules = rules;

		self
	}

	/// Allows a plain-HTTP base URL.
	pub fn allow_insecure_http(mut self) -> Self {
		self.config.allow_insecure_http = true;

		self
	}

	/// Validates and returns the configuration.
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		self.config.validate()?;

		Ok(self.config)
	}
}

fn is_header_token(name: &str) -> bool {
	!name.is_empty()
		&& name.bytes().all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// Serde helpers encoding [`StdDuration`] as whole milliseconds.
pub mod duration_ms {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	/// Serializes `value` as milliseconds.
	pub fn serialize<S>(value: &StdDuration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	/// Deserializes milliseconds into a duration.
	pub fn deserialize<'de, D>(deserializer: D) -> Result<StdDuration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(StdDuration::from_millis)
	}
}

/// Per-class timeouts in milliseconds, merged over the built-in defaults when read.
mod timeouts_ms {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use super::ClientConfig;
	use crate::{_prelude::*, request::EndpointClass};

	pub fn serialize<S>(
		value: &BTreeMap<EndpointClass, StdDuration>,
		serializer: S,
	) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let millis = value
			.iter()
			.map(|(class, timeout)| (*class, u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)))
			.collect::<BTreeMap<_, _>>();

		millis.serialize(serializer)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<EndpointClass, StdDuration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let millis = <BTreeMap<EndpointClass, u64>>::deserialize(deserializer)?;
		let mut timeouts = ClientConfig::default_timeouts();

		timeouts.extend(millis.into_iter().map(|(class, ms)| (class, StdDuration::from_millis(ms))));

		Ok(timeouts)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Failed to parse test URL.")
	}

	#[test]
	fn builder_rejects_insecure_and_empty_quotas() {
		let err = ClientConfig::builder(url("http://api.example.com"))
			.build()
			.expect_err("Plain HTTP should be rejected by default.");

		assert!(matches!(err, ConfigError::InsecureBaseUrl { .. }));

		ClientConfig::builder(url("http://localhost:8080"))
			.allow_insecure_http()
			.build()
			.expect("Plain HTTP should be accepted when explicitly allowed.");

		let err = ClientConfig::builder(url("https://api.example.com"))
			.quota(EndpointClass::Write, RateQuota::new(0, StdDuration::from_secs(1)))
			.build()
			.expect_err("Zero quotas should be rejected.");

		assert!(matches!(err, ConfigError::EmptyQuota { class: "write" }));
	}

	#[test]
	fn resolve_joins_paths_and_query() {
		let config = ClientConfig::builder(url("https://api.example.com/v1/"))
			.build()
			.expect("Configuration should build.");
		let resolved = config
			.resolve("/bookings/42", &[("expand".into(), "guest".into())])
			.expect("Path should resolve.");

		assert_eq!(resolved.as_str(), "https://api.example.com/v1/bookings/42?expand=guest");
	}

	#[test]
	fn resolve_refuses_other_origins() {
		let config = ClientConfig::builder(url("https://api.example.com/v1/"))
			.build()
			.expect("Configuration should build.");

		for path in
			["http://evil.example/steal", "https://evil.example/steal", "http://api.example.com/v1/rooms"]
		{
			let err = config.resolve(path, &[]).expect_err("Foreign origins should be refused.");

			assert!(matches!(err, ConfigError::ForeignOrigin { .. }), "Unexpected error for {path}.");
		}

		let same = config
			.resolve("https://api.example.com/v1/rooms", &[])
			.expect("Same-origin absolute URLs should resolve.");

		assert_eq!(same.host_str(), Some("api.example.com"));

		let err = ClientConfig::builder(url("https://api.example.com/"))
			.renewal_path("https://auth.elsewhere.example/refresh")
			.build()
			.expect_err("Renewal endpoints on another origin should be refused.");

		assert!(matches!(err, ConfigError::ForeignOrigin { .. }));
	}

	#[test]
	fn json_config_uses_millisecond_durations_and_defaults() {
		let config = ClientConfig::from_json_str(
			r#"{
				"base_url": "https://api.example.com",
				"timeouts": { "auth": 2500 },
				"quotas": { "write": { "max_requests": 3, "window": 10000 } }
			}"#,
		)
		.expect("JSON configuration should load.");

		assert_eq!(config.timeout_for(EndpointClass::Auth), StdDuration::from_millis(2500));
		assert_eq!(config.timeout_for(EndpointClass::Read), StdDuration::from_secs(30));
		assert_eq!(config.timeout_for(EndpointClass::Bulk), StdDuration::from_secs(120));
		assert_eq!(
			config.quotas.get(&EndpointClass::Write),
			Some(&RateQuota::new(3, StdDuration::from_secs(10)))
		);
		assert_eq!(
			config.quotas.get(&EndpointClass::Read),
			Some(&RateQuota::new(120, StdDuration::from_secs(60)))
		);
		assert_eq!(
			config.quotas.get(&EndpointClass::Auth),
			Some(&RateQuota::new(10, StdDuration::from_secs(60)))
		);
		assert_eq!(config.renewal_path, "/auth/refresh");
		assert_eq!(config.headers.anti_forgery, "X-CSRF-Token");
	}

	#[test]
	fn json_errors_report_the_failing_path() {
		let err = ClientConfig::from_json_str(
			r#"{ "base_url": "https://api.example.com", "retry": { "max_attempts": "three" } }"#,
		)
		.expect_err("Malformed retry policy should fail.");

		assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "retry.max_attempts"));
	}

	#[test]
	fn header_names_are_validated() {
		let headers = HeaderNames { tenant: "X Tenant".into(), ..HeaderNames::default() };
		let err = ClientConfig::builder(url("https://api.example.com"))
			.headers(headers)
			.build()
			.expect_err("Header names with spaces should be rejected.");

		assert!(matches!(err, ConfigError::InvalidHeaderName { .. }));
	}
}
