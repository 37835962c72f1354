//! Cache Initializer
//!
//! Registers a cache client factory when `cache.enabled` is set.

use std::sync::Arc;

use tracing::warn;

use super::{Container, Service};
use crate::cache::CacheClient;
use crate::config::Config;
use crate::driver::DriverEvent;

/// Locator key the client factory is bound under.
pub const CACHE_SERVICE: &str = "cache";

/// Feature name used in status notices.
pub const CACHING_FEATURE: &str = "caching";

fn log_cache_event(event: &DriverEvent) {
    warn!(
        event = %event.kind,
        server = %event.server,
        detail = %event.detail,
        "memcached server event: {}",
        event.kind
    );
}

/// Builds a client from `cache.memcached` with driver lifecycle logging attached.
pub fn create_cache_client(config: &Config) -> CacheClient {
    let client = CacheClient::new(&config.cache.memcached);
    client.on_driver_event(Arc::new(log_cache_event));
    client
}

/// Configures caching for the host application.
///
/// When enabled, binds a factory under [`CACHE_SERVICE`]; the client, and any
/// connection, is only built when something resolves it. Status notices are
/// skipped in testing mode. Safe to call repeatedly; nothing is retained.
pub fn initialize_cache_client(container: &Container) {
    let quiet = container.metadata.testing;

    if container.config.cache.enabled {
        if !quiet {
            container.terminal.enabled(CACHING_FEATURE);
        }
        let config = container.config.clone();
        container.locator.bind(
            CACHE_SERVICE,
            Box::new(move || Ok(Arc::new(create_cache_client(&config)) as Service)),
        );
    } else if !quiet {
        container.terminal.disabled(CACHING_FEATURE);
    }
}
