// self
use crate::{
	_prelude::*,
	request::{EndpointClass, Method},
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedRequest<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedRequest<F> = F;

/// Span covering one logical request from admission to its terminal outcome.
#[derive(Clone, Debug)]
pub struct RequestSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl RequestSpan {
	/// Creates a span tagged with the request's class, method, and correlation id.
	pub fn new(class: EndpointClass, method: Method, correlation_id: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"gateway_client.request",
				class = class.as_str(),
				method = method.as_str(),
				correlation_id
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (class, method, correlation_id);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedRequest<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = RequestSpan::new(EndpointClass::Read, Method::Get, "corr-1");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
