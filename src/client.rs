//! Gateway client facade and its construction.
//!
//! A [`GatewayClient`] owns every piece of mutable pipeline state (credential, rate windows,
//! in-flight map) so independent instances never interfere. Clones share that state.

pub mod pipeline;

pub use pipeline::{Phase, STAGES, Stage};

// self
use crate::{
	_prelude::*,
	auth::{Credential, RenewalMetrics, Renewer, TokenManager, TransportRenewer},
	config::ClientConfig,
	dedup::InFlightCache,
	error::ConfigError,
	rate_limit::{RateLimitStatus, RateLimiter},
	request::{ApiRequest, EndpointClass},
	sanitize::{AntiForgerySource, RequestPreparer, RotatingAntiForgery},
	transport::Transport,
};
#[cfg(feature = "reqwest")] use crate::transport::ReqwestTransport;

pub(crate) struct ClientInner<T> {
	pub(crate) config: Arc<ClientConfig>,
	pub(crate) transport: Arc<T>,
	pub(crate) limiter: RateLimiter,
	pub(crate) preparer: RequestPreparer,
	pub(crate) dedup: InFlightCache,
	pub(crate) tokens: Arc<TokenManager>,
}

/// Entry point for every outbound backend request.
pub struct GatewayClient<T> {
	pub(crate) inner: Arc<ClientInner<T>>,
}
#[cfg(feature = "reqwest")]
impl GatewayClient<ReqwestTransport> {
	/// Builds a client over a fresh reqwest transport.
	pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
		Self::builder(config, Arc::new(ReqwestTransport::new()?)).build()
	}
}
impl<T> GatewayClient<T>
where
	T: Transport,
{
	/// Starts a builder over `transport`.
	pub fn builder(config: ClientConfig, transport: Arc<T>) -> GatewayClientBuilder<T> {
		GatewayClientBuilder { config, transport, renewer: None, anti_forgery: None }
	}

	/// Builds a client over `transport` with the default renewer and anti-forgery source.
	pub fn with_transport(config: ClientConfig, transport: Arc<T>) -> Result<Self, ConfigError> {
		Self::builder(config, transport).build()
	}

	/// Executes `request` and decodes the JSON body into `R`.
	pub async fn execute_json<R>(&self, request: ApiRequest) -> Result<R>
	where
		R: serde::de::DeserializeOwned,
	{
		self.execute(request).await?.decode()
	}

	/// Registers a callback fired once whenever a failed renewal ends the session.
	pub fn on_session_invalidated<F>(&self, listener: F)
	where
		F: 'static + Fn() + Send + Sync,
	{
		self.inner.tokens.on_session_invalidated(listener);
	}

	/// Remaining admission budget for `class`.
	pub fn rate_limit_status(&self, class: EndpointClass) -> RateLimitStatus {
		self.inner.limiter.status(class)
	}

	/// Installs a credential obtained from a login.
	pub fn set_credential(&self, credential: Credential) {
		self.inner.tokens.set_credential(credential);
	}

	/// Drops the session credential (logout).
	pub fn clear_session(&self) {
		self.inner.tokens.clear();
	}

	/// Current credential snapshot.
	pub fn credential(&self) -> Option<Arc<Credential>> {
		self.inner.tokens.current()
	}

	/// Number of distinct coalesced calls in flight.
	pub fn in_flight(&self) -> usize {
		self.inner.dedup.in_flight()
	}

	/// Renewal counters.
	pub fn renewal_metrics(&self) -> &RenewalMetrics {
		self.inner.tokens.metrics()
	}

	/// Active configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}
}
impl<T> Clone for GatewayClient<T> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<T> Debug for GatewayClient<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("GatewayClient")
			.field("base_url", &self.inner.config.base_url.as_str())
			.field("tokens", &self.inner.tokens)
			.field("dedup", &self.inner.dedup)
			.finish()
	}
}

/// Builder for [`GatewayClient`] allowing custom renewal and anti-forgery collaborators.
pub struct GatewayClientBuilder<T> {
	config: ClientConfig,
	transport: Arc<T>,
	renewer: Option<Arc<dyn Renewer>>,
	anti_forgery: Option<Arc<dyn AntiForgerySource>>,
}
impl<T> GatewayClientBuilder<T>
where
	T: Transport,
{
	/// Overrides the credential renewer.
	pub fn renewer(mut self, renewer: Arc<dyn Renewer>) -> Self {
		self.renewer = Some(renewer);

		self
	}

	/// Overrides the anti-forgery token source.
	pub fn anti_forgery(mut self, source: Arc<dyn AntiForgerySource>) -> Self {
		self.anti_forgery = Some(source);

		self
	}

	/// Validates the configuration and assembles the client.
	pub fn build(self) -> Result<GatewayClient<T>, ConfigError> {
		let Self { config, transport, renewer, anti_forgery } = self;

		config.validate()?;

		let config = Arc::new(config);
		let anti_forgery = anti_forgery.unwrap_or_else(|| {
			Arc::new(RotatingAntiForgery::new(config.anti_forgery_rotation))
		});
		let renewer = match renewer {
			Some(renewer) => renewer,
			None => Arc::new(
				TransportRenewer::new(transport.clone(), &config)?
					.with_anti_forgery(anti_forgery.clone()),
			),
		};
		let inner = ClientInner {
			limiter: RateLimiter::new(&config.quotas, config.global_quota),
			preparer: RequestPreparer::new(config.clone(), anti_forgery),
			dedup: InFlightCache::new(),
			tokens: Arc::new(TokenManager::new(renewer, config.expiry_skew)),
			transport,
			config,
		};

		Ok(GatewayClient { inner: Arc::new(inner) })
	}
}
impl<T> Debug for GatewayClientBuilder<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("GatewayClientBuilder")
			.field("base_url", &self.config.base_url.as_str())
			.field("custom_renewer", &self.renewer.is_some())
			.field("custom_anti_forgery", &self.anti_forgery.is_some())
			.finish()
	}
}
