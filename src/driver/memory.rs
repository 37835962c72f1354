//! In-Memory Driver
//!
//! A process-local driver with memcached-style TTL semantics. Used for tests
//! and local development where no memcached server is running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{CacheDriver, Completion, DriverEvent, EventListener, Listeners};
use crate::error::DriverError;

// == Memory Entry ==
/// A stored value with its expiration deadline.
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    expires_at: Option<u64>,
}

impl MemoryEntry {
    /// A TTL of 0 means the entry never expires.
    fn new(value: Value, ttl_seconds: u32) -> Self {
        let expires_at = match ttl_seconds {
            0 => None,
            ttl => Some(current_timestamp_ms() + u64::from(ttl) * 1000),
        };
        Self { value, expires_at }
    }

    /// Expired once the current time reaches the deadline.
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }
}

/// Returns current Unix timestamp in milliseconds.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// == Memory Store ==
#[derive(Debug, Default)]
struct MemoryStore {
    entries: HashMap<String, MemoryEntry>,
}

impl MemoryStore {
    /// Returns the live value for `key`, dropping it if it has expired.
    fn live(&mut self, key: &str) -> Option<Value> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                self.entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }
}

// == Memory Driver ==
/// Driver keeping entries in a shared in-process map.
///
/// Completions are delivered from a spawned tokio task, so a runtime must be
/// running when operations are issued.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    store: Arc<RwLock<MemoryStore>>,
    failure: Arc<Mutex<Option<DriverError>>>,
    listeners: Listeners,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<DriverError>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = error;
        }
    }

    /// Publishes `event` to subscribed listeners.
    pub fn emit(&self, event: DriverEvent) {
        self.listeners.emit(&event);
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn injected_failure(&self) -> Option<DriverError> {
        self.failure.lock().ok().and_then(|f| f.clone())
    }

    /// Runs `op` against the store on a spawned task and completes `done` with its result.
    fn dispatch<T, F>(&self, done: Completion<T>, op: F)
    where
        T: Send + 'static,
        F: FnOnce(&mut MemoryStore) -> Result<T, DriverError> + Send + 'static,
    {
        if let Some(error) = self.injected_failure() {
            tokio::spawn(async move { done(Err(error)) });
            return;
        }

        let store = self.store.clone();
        tokio::spawn(async move {
            let result = {
                let mut guard = store.write().await;
                op(&mut guard)
            };
            done(result);
        });
    }
}

impl CacheDriver for MemoryDriver {
    fn get(&self, key: &str, done: Completion<Option<Value>>) {
        let key = key.to_string();
        self.dispatch(done, move |store| Ok(store.live(&key)));
    }

    fn get_multi(&self, keys: &[String], done: Completion<HashMap<String, Value>>) {
        let keys = keys.to_vec();
        self.dispatch(done, move |store| {
            let mut found = HashMap::new();
            for key in keys {
                if let Some(value) = store.live(&key) {
                    found.insert(key, value);
                }
            }
            Ok(found)
        });
    }

    fn set(&self, key: &str, value: Value, ttl: u32, done: Completion<bool>) {
        let key = key.to_string();
        self.dispatch(done, move |store| {
            store.entries.insert(key, MemoryEntry::new(value, ttl));
            Ok(true)
        });
    }

    fn add(&self, key: &str, value: Value, ttl: u32, done: Completion<bool>) {
        let key = key.to_string();
        self.dispatch(done, move |store| {
            if store.live(&key).is_some() {
                debug!(key = %key, "add rejected, key already stored");
                return Err(DriverError::NotStored(key));
            }
            store.entries.insert(key, MemoryEntry::new(value, ttl));
            Ok(true)
        });
    }

    fn del(&self, key: &str, done: Completion<bool>) {
        let key = key.to_string();
        self.dispatch(done, move |store| {
            let existed = store.live(&key).is_some();
            store.entries.remove(&key);
            Ok(existed)
        });
    }

    fn on_event(&self, listener: EventListener) {
        self.listeners.add(listener);
    }
}
