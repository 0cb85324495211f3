//! Tenant identifiers, credentials, and the single-flight credential lifecycle.

pub mod credential;
pub mod id;
pub mod metrics;
pub mod renewal;
pub mod secret;

pub use credential::*;
pub use id::*;
pub use metrics::*;
pub use renewal::*;
pub use secret::*;
