//! Driver Module
//!
//! The callback-style driver contract the cache client is written against,
//! plus the two shipped implementations.

mod event;
mod memcached;
mod memory;

use std::collections::HashMap;

use serde_json::Value;

use crate::error::DriverError;

pub use event::{DriverEvent, DriverEventKind, EventListener, Listeners};
pub use memcached::MemcacheDriver;
pub use memory::MemoryDriver;

/// One-shot completion callback receiving the outcome of a driver call.
pub type Completion<T> = Box<dyn FnOnce(Result<T, DriverError>) + Send + 'static>;

// == Cache Driver ==
/// A client library speaking to the external cache server(s).
///
/// Every operation returns immediately and reports its outcome exactly once
/// through `done`. Implementations decide which failures are
/// [`DriverError::NotStored`].
pub trait CacheDriver: Send + Sync {
    /// Fetches one key; `None` when absent.
    fn get(&self, key: &str, done: Completion<Option<Value>>);

    /// Fetches several keys; the map holds only keys that exist.
    fn get_multi(&self, keys: &[String], done: Completion<HashMap<String, Value>>);

    /// Stores unconditionally.
    fn set(&self, key: &str, value: Value, ttl: u32, done: Completion<bool>);

    /// Stores only when the key holds no value.
    fn add(&self, key: &str, value: Value, ttl: u32, done: Completion<bool>);

    /// Removes a key; `true` when something was removed.
    fn del(&self, key: &str, done: Completion<bool>);

    /// Subscribes to connection lifecycle events.
    fn on_event(&self, listener: EventListener);
}
