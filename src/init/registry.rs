//! Service Registry
//!
//! A name-keyed locator holding lazily invoked factories.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{anyhow, Result};
use tracing::debug;

/// A constructed service, type-erased.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Zero-argument constructor invoked on each resolution.
pub type Factory = Box<dyn Fn() -> Result<Service> + Send + Sync>;

// == Service Locator ==
/// Registration side of the host application's service locator.
pub trait ServiceLocator: Send + Sync {
    /// Registers `factory` under `name`, replacing any earlier binding.
    fn bind(&self, name: &str, factory: Factory);
}

// == Registry ==
/// In-process [`ServiceLocator`] that can also resolve what it holds.
///
/// Factories are called on every `resolve`; nothing is cached.
#[derive(Default)]
pub struct Registry {
    factories: RwLock<HashMap<String, Arc<Factory>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Invokes the factory bound to `name` and downcasts the result.
    pub fn resolve<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no service bound under {:?}", name))?;

        let service = factory()?;
        service
            .downcast::<T>()
            .map_err(|_| anyhow!("service {:?} is not a {}", name, type_name::<T>()))
    }
}

impl ServiceLocator for Registry {
    fn bind(&self, name: &str, factory: Factory) {
        debug!(service = name, "binding service factory");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(factory));
    }
}
