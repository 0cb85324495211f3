// self
use crate::{
	obs::{Component, Outcome},
	request::EndpointClass,
};

/// Records a component outcome via the global metrics recorder (when enabled).
pub fn record_outcome(component: Component, class: EndpointClass, outcome: Outcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			component.metric_name(),
			"class" => class.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (component, class, outcome);
	}
}
