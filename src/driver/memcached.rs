//! Memcached Driver
//!
//! Adapts the blocking `memcache` client to the callback-style
//! [`CacheDriver`] contract. Values travel as JSON text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use memcache::{CommandError, MemcacheError};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;
use tracing::{debug, warn};

use super::{CacheDriver, Completion, DriverEvent, DriverEventKind, EventListener, Listeners};
use crate::config::MemcachedConfig;
use crate::error::DriverError;

/// Consecutive transport errors tolerated before the connection is discarded.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Passthrough keys consumed by the driver itself rather than the connection URL.
const DRIVER_OPTIONS: &[&str] = &["failures", PROTOCOL_OPTION];

/// The ASCII protocol reports `NOT_STORED` as success, so only binary is spoken.
const PROTOCOL_OPTION: &str = "protocol";

// == Connection State ==
#[derive(Default)]
struct ConnState {
    client: Option<Arc<memcache::Client>>,
    consecutive_failures: u32,
    reconnecting: bool,
}

struct Inner {
    urls: Vec<String>,
    servers: String,
    timeout: Option<Duration>,
    failure_threshold: u32,
    state: Mutex<ConnState>,
    listeners: Listeners,
}

// == Memcache Driver ==
/// Driver backed by the `memcache` crate.
///
/// The connection is opened on the first request, so constructing the driver
/// never touches the network. Blocking calls run on tokio's blocking pool.
#[derive(Clone)]
pub struct MemcacheDriver {
    inner: Arc<Inner>,
}

impl MemcacheDriver {
    /// Prepares a driver for the configured endpoints without connecting.
    pub fn new(config: &MemcachedConfig) -> Self {
        if let Some(protocol) = config.options.get(PROTOCOL_OPTION) {
            if protocol.as_str() != Some("binary") {
                warn!(protocol = %protocol, "ignoring memcached protocol option, binary protocol is required");
            }
        }

        let endpoints = config.endpoints();
        let query = connection_query(&config.options);
        let urls = endpoints
            .iter()
            .map(|endpoint| connection_url(endpoint, &query))
            .collect();

        let failure_threshold = config
            .options
            .get("failures")
            .and_then(Value::as_u64)
            .map(|n| n.clamp(1, u64::from(u32::MAX)) as u32)
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD);

        Self {
            inner: Arc::new(Inner {
                urls,
                servers: endpoints.join(","),
                timeout: config.timeout.map(Duration::from_millis),
                failure_threshold,
                state: Mutex::new(ConnState::default()),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Connection URLs handed to the `memcache` client.
    pub fn urls(&self) -> &[String] {
        &self.inner.urls
    }

    /// Runs `op` on the blocking pool and completes `done` with its result.
    fn dispatch<T, F>(&self, done: Completion<T>, op: F)
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, DriverError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || done(inner.run(op)));
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run<T>(
        &self,
        op: impl FnOnce(&memcache::Client) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let client = self.connection()?;
        match op(&*client) {
            Ok(value) => {
                self.lock().consecutive_failures = 0;
                Ok(value)
            }
            Err(DriverError::Transport(detail)) => {
                let events = self.note_failure(&mut self.lock(), &detail);
                self.publish(events);
                Err(DriverError::Transport(detail))
            }
            Err(other) => Err(other),
        }
    }

    /// Returns the live client, opening one if none is held.
    fn connection(&self) -> Result<Arc<memcache::Client>, DriverError> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            if let Some(client) = state.client.clone() {
                return Ok(client);
            }
            match self.open() {
                Ok(client) => {
                    let client = Arc::new(client);
                    state.client = Some(client.clone());
                    if state.reconnecting {
                        state.reconnecting = false;
                        state.consecutive_failures = 0;
                        events.push(self.event(DriverEventKind::Reconnect, "connection re-established"));
                    }
                    Ok(client)
                }
                Err(e) => {
                    let detail = e.to_string();
                    events = self.note_failure(&mut state, &detail);
                    Err(DriverError::Transport(detail))
                }
            }
        };
        self.publish(events);
        result
    }

    fn open(&self) -> Result<memcache::Client, MemcacheError> {
        debug!(servers = %self.servers, "opening memcached connection");
        let client = memcache::Client::connect(self.urls.clone())?;
        if let Some(timeout) = self.timeout {
            client.set_read_timeout(Some(timeout))?;
            client.set_write_timeout(Some(timeout))?;
        }
        Ok(client)
    }

    /// Counts a transport failure and, at the threshold, drops the connection.
    fn note_failure(&self, state: &mut ConnState, detail: &str) -> Vec<DriverEvent> {
        state.consecutive_failures += 1;
        let mut events = vec![self.event(DriverEventKind::Issue, detail)];

        if state.consecutive_failures >= self.failure_threshold {
            events.push(self.event(
                DriverEventKind::Failure,
                format!("{} consecutive failures: {}", state.consecutive_failures, detail),
            ));
            if state.client.take().is_some() {
                events.push(self.event(DriverEventKind::Remove, "connection discarded"));
            }
            events.push(self.event(DriverEventKind::Reconnecting, "reconnect on next request"));
            state.consecutive_failures = 0;
            state.reconnecting = true;
        }
        events
    }

    fn event(&self, kind: DriverEventKind, detail: impl Into<String>) -> DriverEvent {
        DriverEvent::new(kind, self.servers.clone(), detail)
    }

    fn publish(&self, events: Vec<DriverEvent>) {
        for event in &events {
            self.listeners.emit(event);
        }
    }
}

// == Translation Helpers ==

/// Maps a `memcache` error onto the driver taxonomy.
fn classify(key: &str, error: MemcacheError) -> DriverError {
    match error {
        MemcacheError::CommandError(CommandError::KeyExists) => DriverError::NotStored(key.to_string()),
        MemcacheError::IOError(e) => DriverError::Transport(e.to_string()),
        MemcacheError::PoolError(e) => DriverError::Transport(e.to_string()),
        other => DriverError::Server(other.to_string()),
    }
}

fn encode(value: &Value) -> Result<String, DriverError> {
    serde_json::to_string(value).map_err(|e| DriverError::Codec(e.to_string()))
}

fn decode(key: &str, raw: &str) -> Result<Value, DriverError> {
    serde_json::from_str(raw).map_err(|e| DriverError::Codec(format!("{}: {}", key, e)))
}

/// Renders passthrough options as a percent-encoded URL query string
/// (without the leading `?`).
fn connection_query(options: &serde_json::Map<String, Value>) -> String {
    options
        .iter()
        .filter(|(name, _)| !DRIVER_OPTIONS.contains(&name.as_str()))
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!(
                "{}={}",
                utf8_percent_encode(name, NON_ALPHANUMERIC),
                utf8_percent_encode(&value, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Builds the connection URL for one endpoint.
///
/// A `protocol` pair already present in a full URL is removed.
fn connection_url(endpoint: &str, query: &str) -> String {
    let full = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("memcache://{}", endpoint)
    };

    let (base, existing) = match full.split_once('?') {
        Some((base, existing)) => (base.to_string(), existing.to_string()),
        None => (full, String::new()),
    };
    let pairs: Vec<&str> = existing
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split('=').next() != Some(PROTOCOL_OPTION))
        .chain(query.split('&').filter(|pair| !pair.is_empty()))
        .collect();

    if pairs.is_empty() {
        base
    } else {
        format!("{}?{}", base, pairs.join("&"))
    }
}

impl CacheDriver for MemcacheDriver {
    fn get(&self, key: &str, done: Completion<Option<Value>>) {
        let key = key.to_string();
        self.dispatch(done, move |client| {
            match client.get::<String>(&key).map_err(|e| classify(&key, e))? {
                Some(raw) => decode(&key, &raw).map(Some),
                None => Ok(None),
            }
        });
    }

    fn get_multi(&self, keys: &[String], done: Completion<HashMap<String, Value>>) {
        let keys = keys.to_vec();
        self.dispatch(done, move |client| {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let raw: HashMap<String, String> = client
                .gets(&refs)
                .map_err(|e| classify(&keys.join(","), e))?;
            raw.into_iter()
                .map(|(key, text)| decode(&key, &text).map(|value| (key, value)))
                .collect()
        });
    }

    fn set(&self, key: &str, value: Value, ttl: u32, done: Completion<bool>) {
        let key = key.to_string();
        self.dispatch(done, move |client| {
            let text = encode(&value)?;
            client
                .set(&key, text.as_str(), ttl)
                .map_err(|e| classify(&key, e))?;
            Ok(true)
        });
    }

    fn add(&self, key: &str, value: Value, ttl: u32, done: Completion<bool>) {
        let key = key.to_string();
        self.dispatch(done, move |client| {
            let text = encode(&value)?;
            client
                .add(&key, text.as_str(), ttl)
                .map_err(|e| classify(&key, e))?;
            Ok(true)
        });
    }

    fn del(&self, key: &str, done: Completion<bool>) {
        let key = key.to_string();
        self.dispatch(done, move |client| client.delete(&key).map_err(|e| classify(&key, e)));
    }

    fn on_event(&self, listener: EventListener) {
        self.inner.listeners.add(listener);
    }
}
