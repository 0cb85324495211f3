//! Anti-forgery token sources attached to state-changing requests.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
// self
use crate::_prelude::*;

/// Supplies the anti-forgery token for the next state-changing request.
pub trait AntiForgerySource
where
	Self: 'static + Send + Sync,
{
	/// Returns the token to attach now.
	fn token(&self) -> String;
}

/// Client-minted token (32 random bytes, URL-safe base64) rotated on a fixed interval.
#[derive(Debug)]
pub struct RotatingAntiForgery {
	interval: StdDuration,
	current: Mutex<(String, Instant)>,
}
impl RotatingAntiForgery {
	/// Mints the first token; it is replaced once `interval` has elapsed.
	pub fn new(interval: StdDuration) -> Self {
		Self { interval, current: Mutex::new((mint(), Instant::now())) }
	}

	/// Replaces the token immediately.
	pub fn rotate(&self) {
		*self.current.lock() = (mint(), Instant::now());
	}
}
impl AntiForgerySource for RotatingAntiForgery {
	fn token(&self) -> String {
		let mut current = self.current.lock();

		if current.1.elapsed() >= self.interval {
			*current = (mint(), Instant::now());
		}

		current.0.clone()
	}
}

/// Token issued by the backend (cookie, bootstrap payload) and replaced by the application.
#[derive(Debug)]
pub struct IssuedAntiForgery(RwLock<String>);
impl IssuedAntiForgery {
	/// Wraps the initially issued token.
	pub fn new(token: impl Into<String>) -> Self {
		Self(RwLock::new(token.into()))
	}

	/// Replaces the token with a newly issued one.
	pub fn set(&self, token: impl Into<String>) {
		*self.0.write() = token.into();
	}
}
impl AntiForgerySource for IssuedAntiForgery {
	fn token(&self) -> String {
		self.0.read().clone()
	}
}

fn mint() -> String {
	let mut bytes = [0_u8; 32];

	rand::rng().fill(&mut bytes);

	URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn rotating_tokens_change_after_the_interval() {
		let source = RotatingAntiForgery::new(StdDuration::from_secs(60));
		let first = source.token();

		assert_eq!(first.len(), 43);
		assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
		assert_eq!(source.token(), first);

		tokio::time::advance(StdDuration::from_secs(61)).await;

		assert_ne!(source.token(), first);
	}

	#[test]
	fn issued_tokens_are_replaceable() {
		let source = IssuedAntiForgery::new("server-issued");

		assert_eq!(source.token(), "server-issued");

		source.set("rotated");

		assert_eq!(source.token(), "rotated");
	}
}
