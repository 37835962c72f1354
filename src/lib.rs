//! Cache Client - An awaitable memcached client
//!
//! Wraps a callback-style driver in awaitable operations, enforces a TTL
//! ceiling, offers error-tolerant `safe_save`/`safe_get` helpers, and registers
//! a lazily built client into the host application's service locator.

pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod init;
pub mod logging;

#[cfg(test)]
mod test_support;

pub use cache::{CacheClient, OperationLabels, Pending, RequestContext};
pub use config::Config;
pub use error::{CacheError, DriverError, ValidationError};
pub use init::{initialize_cache_client, Container, Metadata, Registry};
