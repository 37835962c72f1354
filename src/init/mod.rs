//! Initialization Module
//!
//! Decides whether caching is active and publishes a lazily built client.

mod initializer;
mod registry;
mod status;

use std::sync::Arc;

use crate::config::Config;

pub use initializer::{create_cache_client, initialize_cache_client, CACHE_SERVICE, CACHING_FEATURE};
pub use registry::{Factory, Registry, Service, ServiceLocator};
pub use status::{StatusReporter, TracingStatusReporter};

/// Process execution metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metadata {
    /// Quiet mode: status notices are suppressed
    pub testing: bool,
}

/// The host application's collaborators, injected rather than global.
#[derive(Clone)]
pub struct Container {
    pub config: Arc<Config>,
    pub metadata: Metadata,
    pub terminal: Arc<dyn StatusReporter>,
    pub locator: Arc<dyn ServiceLocator>,
}

impl Container {
    pub fn new(
        config: Config,
        metadata: Metadata,
        terminal: Arc<dyn StatusReporter>,
        locator: Arc<dyn ServiceLocator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metadata,
            terminal,
            locator,
        }
    }
}
