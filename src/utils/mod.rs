//! Shared utilities: error taxonomy, retry policy, logging setup.

pub mod error;
pub mod logging;
pub mod retry;

pub use error::{CacheError, DeliveryError, Error, FetchError, FetchErrorKind, Result};
pub use retry::RetryPolicy;
