//! HTTP side of the inspect gateway.
//!
//! [`BackoffClient`] retries rate-limited and failed requests with a doubling
//! delay inside a fixed budget; [`RestLookupClient`] layers the public item
//! lookup API on top of it.

pub mod client;
pub mod lookup;

pub use client::{BackoffClient, BackoffConfig, FetchError};
pub use lookup::{LookupError, RestLookupClient};
