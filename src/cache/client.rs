//! Cache Client Module
//!
//! Awaitable cache operations over a [`CacheDriver`], with a TTL ceiling and
//! two error-tolerant helpers for request paths that must not fail on cache trouble.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::completion::{deliver, Pending};
use crate::config::MemcachedConfig;
use crate::driver::{CacheDriver, EventListener, MemcacheDriver};
use crate::error::ValidationError;

// == Request Context ==
/// Caller context attached to log records emitted by the safe helpers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
        }
    }
}

/// Resource/operation labels for timing records.
#[derive(Debug, Clone, Copy)]
pub struct OperationLabels<'a> {
    pub resource: &'a str,
    pub operation: &'a str,
}

impl<'a> OperationLabels<'a> {
    pub fn new(resource: &'a str, operation: &'a str) -> Self {
        Self { resource, operation }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

// == Cache Client ==
/// Client for one endpoint set.
///
/// All operations multiplex over the driver's connection(s); the client adds
/// no locking or queuing of its own.
#[derive(Clone)]
pub struct CacheClient {
    driver: Arc<dyn CacheDriver>,
    endpoints: Vec<String>,
    max_expiration: u32,
}

impl CacheClient {
    // == Constructors ==
    /// Creates a client backed by memcached.
    ///
    /// No connection is attempted here; failures surface on the first operation.
    pub fn new(config: &MemcachedConfig) -> Self {
        Self {
            driver: Arc::new(MemcacheDriver::new(config)),
            endpoints: config.endpoints(),
            max_expiration: config.max_expiration,
        }
    }

    /// Creates a client over an arbitrary driver.
    pub fn with_driver(driver: Arc<dyn CacheDriver>, max_expiration: u32) -> Self {
        Self {
            driver,
            endpoints: Vec::new(),
            max_expiration,
        }
    }

    /// Configured endpoints, empty when built with [`CacheClient::with_driver`].
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Largest TTL accepted by `set` and `add`.
    pub fn max_expiration(&self) -> u32 {
        self.max_expiration
    }

    /// Subscribes to the driver's connection lifecycle events.
    pub fn on_driver_event(&self, listener: EventListener) {
        self.driver.on_event(listener);
    }

    // == Primitive Operations ==
    /// Fetches a value; resolves to `None` when no entry exists.
    ///
    /// # Panics
    /// The driver call is issued immediately on a tokio task, so this panics
    /// when called outside a tokio runtime.
    pub fn get(&self, key: &str) -> Pending<Option<Value>> {
        deliver(|done| self.driver.get(key, done))
    }

    /// Fetches several keys at once. Missing keys are absent from the map.
    ///
    /// # Panics
    /// The driver call is issued immediately on a tokio task, so this panics
    /// when called outside a tokio runtime.
    pub fn get_multi<K: AsRef<str>>(&self, keys: &[K]) -> Pending<HashMap<String, Value>> {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        deliver(|done| self.driver.get_multi(&keys, done))
    }

    /// Stores a value.
    ///
    /// Rejects `ttl` above the ceiling immediately, before the driver is called.
    ///
    /// # Panics
    /// Once the TTL check passes the driver call is issued on a tokio task, so
    /// this panics when called outside a tokio runtime.
    pub fn set(&self, key: &str, value: Value, ttl: u32) -> Result<Pending<bool>, ValidationError> {
        self.check_expiration("set", ttl)?;
        Ok(deliver(|done| self.driver.set(key, value, ttl, done)))
    }

    /// Stores a value only if the key is empty.
    ///
    /// An occupied key resolves to [`DriverError::NotStored`](crate::error::DriverError::NotStored).
    ///
    /// # Panics
    /// Same runtime requirement as [`CacheClient::set`].
    pub fn add(&self, key: &str, value: Value, ttl: u32) -> Result<Pending<bool>, ValidationError> {
        self.check_expiration("add", ttl)?;
        Ok(deliver(|done| self.driver.add(key, value, ttl, done)))
    }

    /// Deletes a key; resolves to `false` if it did not exist.
    ///
    /// # Panics
    /// The driver call is issued immediately on a tokio task, so this panics
    /// when called outside a tokio runtime.
    pub fn del(&self, key: &str) -> Pending<bool> {
        deliver(|done| self.driver.del(key, done))
    }

    /// Checks a requested TTL against the ceiling.
    pub fn check_expiration(&self, operation: &'static str, ttl: u32) -> Result<(), ValidationError> {
        if ttl > self.max_expiration {
            return Err(ValidationError::ExpirationTooLong {
                operation,
                requested: ttl,
                max: self.max_expiration,
            });
        }
        Ok(())
    }

    // == Safe Save ==
    /// Adds `value` under `key`, masking cache failures.
    ///
    /// An occupied key is an expected race with another writer and is only
    /// logged at debug level; any other driver failure is logged as a warning.
    /// Always hands back `value` so callers can chain it into a response.
    /// A TTL above the ceiling is still returned as an error.
    pub async fn safe_save<T: Serialize>(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: T,
        ttl: u32,
        labels: Option<OperationLabels<'_>>,
    ) -> Result<T, ValidationError> {
        let start = Instant::now();
        let resource = labels.map(|l| l.resource);
        let operation = labels.map(|l| l.operation);

        let payload = match serde_json::to_value(&value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    request_id = ctx.request_id.as_deref(),
                    key,
                    resource,
                    operation,
                    elapsed_ms = elapsed_ms(start),
                    error = %e,
                    "unable to encode cache data"
                );
                return Ok(value);
            }
        };

        match self.add(key, payload, ttl)?.await {
            Ok(_) => {
                if labels.is_some() {
                    debug!(
                        request_id = ctx.request_id.as_deref(),
                        key,
                        resource,
                        operation,
                        elapsed_ms = elapsed_ms(start),
                        "cache data saved"
                    );
                }
            }
            Err(e) if e.is_not_stored() => {
                debug!(
                    request_id = ctx.request_id.as_deref(),
                    key,
                    resource,
                    operation,
                    elapsed_ms = elapsed_ms(start),
                    "cache data already present"
                );
            }
            Err(e) => {
                warn!(
                    request_id = ctx.request_id.as_deref(),
                    key,
                    resource,
                    operation,
                    elapsed_ms = elapsed_ms(start),
                    error = %e,
                    "unable to add cache data"
                );
            }
        }

        Ok(value)
    }

    // == Safe Get ==
    /// Fetches `keys`, returning one slot per requested key in request order.
    ///
    /// Missing keys (including repeats of a missing key) yield `None`. On
    /// driver failure the warning is logged and every slot is `None`.
    pub async fn safe_get<K: AsRef<str>>(
        &self,
        ctx: &RequestContext,
        keys: &[K],
        labels: Option<OperationLabels<'_>>,
    ) -> Vec<Option<Value>> {
        let start = Instant::now();
        let resource = labels.map(|l| l.resource);
        let operation = labels.map(|l| l.operation);
        let key_list: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();

        match self.get_multi(keys).await {
            Ok(found) => {
                let values: Vec<Option<Value>> =
                    key_list.iter().map(|key| found.get(*key).cloned()).collect();
                if labels.is_some() {
                    debug!(
                        request_id = ctx.request_id.as_deref(),
                        keys = ?key_list,
                        hits = found.len(),
                        resource,
                        operation,
                        elapsed_ms = elapsed_ms(start),
                        "cache data read"
                    );
                }
                values
            }
            Err(e) => {
                warn!(
                    request_id = ctx.request_id.as_deref(),
                    keys = ?key_list,
                    resource,
                    operation,
                    elapsed_ms = elapsed_ms(start),
                    error = %e,
                    "unable to read cache data"
                );
                vec![None; key_list.len()]
            }
        }
    }
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient")
            .field("endpoints", &self.endpoints)
            .field("max_expiration", &self.max_expiration)
            .finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::error::DriverError;
    use crate::test_support::Capture;
    use serde_json::json;
    use tracing::Level;

    fn memory_client(max_expiration: u32) -> (CacheClient, MemoryDriver) {
        let driver = MemoryDriver::new();
        let client = CacheClient::with_driver(Arc::new(driver.clone()), max_expiration);
        (client, driver)
    }

    #[test]
    fn test_new_parses_endpoints() {
        let config = MemcachedConfig {
            hosts: "localhost:11211,localhost:11212".to_string(),
            max_expiration: 1000,
            ..MemcachedConfig::default()
        };
        let client = CacheClient::new(&config);

        assert_eq!(client.endpoints(), &["localhost:11211", "localhost:11212"]);
        assert_eq!(client.max_expiration(), 1000);
    }

    #[tokio::test]
    async fn test_set_rejects_ttl_before_io() {
        let (client, driver) = memory_client(900);

        let result = client.set("foo", json!("bar"), 10_000_000);
        assert!(matches!(
            result,
            Err(ValidationError::ExpirationTooLong { operation: "set", max: 900, .. })
        ));

        let result = client.add("foo", json!("bar"), 901);
        assert!(matches!(
            result,
            Err(ValidationError::ExpirationTooLong { operation: "add", .. })
        ));
        assert!(driver.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_accepts_ttl_at_ceiling() {
        let (client, _) = memory_client(900);

        let stored = client.set("foo", json!("bar"), 900).unwrap().await;
        assert_eq!(stored, Ok(true));
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (client, _) = memory_client(900);

        client.set("foo", json!("bar"), 20).unwrap().await.unwrap();
        assert_eq!(client.get("foo").await, Ok(Some(json!("bar"))));

        client.set("foo", json!("bas"), 20).unwrap().await.unwrap();
        assert_eq!(client.get("foo").await, Ok(Some(json!("bas"))));
    }

    #[tokio::test]
    async fn test_add_existing_fails_not_stored() {
        let (client, _) = memory_client(900);

        client.set("foo", json!("bar"), 20).unwrap().await.unwrap();
        let result = client.add("foo", json!("baz"), 20).unwrap().await;

        assert!(result.unwrap_err().is_not_stored());
        assert_eq!(client.get("foo").await, Ok(Some(json!("bar"))));
    }

    #[tokio::test]
    async fn test_get_propagates_driver_error() {
        let (client, driver) = memory_client(900);
        driver.fail_with(Some(DriverError::Transport("refused".to_string())));

        assert!(matches!(client.get("foo").await, Err(DriverError::Transport(_))));
        assert!(matches!(client.del("foo").await, Err(DriverError::Transport(_))));
    }

    #[tokio::test]
    async fn test_safe_save_returns_input_value() {
        let (client, _) = memory_client(900);
        let ctx = RequestContext::new();

        let first = client.safe_save(&ctx, "foo", "bar", 20, None).await.unwrap();
        let second = client.safe_save(&ctx, "foo", "baz", 20, None).await.unwrap();

        assert_eq!(first, "bar");
        assert_eq!(second, "baz");
        assert_eq!(client.get("foo").await, Ok(Some(json!("bar"))));
    }

    #[tokio::test]
    async fn test_safe_save_masks_driver_failure() {
        let (client, driver) = memory_client(900);
        driver.fail_with(Some(DriverError::Server("out of memory".to_string())));
        let ctx = RequestContext::with_request_id("req-1");

        let labels = OperationLabels::new("user", "retrieve");
        let saved = client.safe_save(&ctx, "foo", json!({"id": 1}), 20, Some(labels)).await;

        assert_eq!(saved.unwrap(), json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_safe_save_surfaces_ttl_misuse() {
        let (client, _) = memory_client(900);
        let ctx = RequestContext::new();

        let result = client.safe_save(&ctx, "foo", "bar", 901, None).await;
        assert!(matches!(result, Err(ValidationError::ExpirationTooLong { .. })));
    }

    #[tokio::test]
    async fn test_safe_get_aligns_with_keys() {
        let (client, _) = memory_client(900);
        let ctx = RequestContext::new();

        client.set("foo", json!("bar"), 20).unwrap().await.unwrap();
        client.set("bar", json!("baz"), 20).unwrap().await.unwrap();

        let values = client.safe_get(&ctx, &["foo", "bar", "pow", "foo"], None).await;
        assert_eq!(
            values,
            vec![Some(json!("bar")), Some(json!("baz")), None, Some(json!("bar"))]
        );
    }

    #[tokio::test]
    async fn test_safe_get_masks_driver_failure() {
        let (client, driver) = memory_client(900);
        driver.fail_with(Some(DriverError::Transport("timeout".to_string())));
        let ctx = RequestContext::new();

        let labels = OperationLabels::new("user", "search");
        let values = client.safe_get(&ctx, &["a", "b", "a"], Some(labels)).await;
        assert_eq!(values, vec![None, None, None]);
    }

    #[tokio::test]
    async fn test_safe_save_race_is_not_a_warning() {
        let (client, _) = memory_client(900);
        let ctx = RequestContext::new();
        client.set("foo", json!("bar"), 20).unwrap().await.unwrap();

        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let labels = OperationLabels::new("user", "retrieve");
        client.safe_save(&ctx, "foo", "baz", 20, Some(labels)).await.unwrap();

        assert!(capture.at(Level::WARN).is_empty());
        let races: Vec<_> = capture
            .at(Level::DEBUG)
            .into_iter()
            .filter(|r| r.message == "cache data already present")
            .collect();
        assert_eq!(races.len(), 1);
        assert_eq!(races[0].field("key"), Some("foo"));
        assert!(races[0].has("elapsed_ms"));
    }

    #[tokio::test]
    async fn test_safe_save_failure_logs_one_warning() {
        let (client, driver) = memory_client(900);
        driver.fail_with(Some(DriverError::Transport("refused".to_string())));
        let ctx = RequestContext::with_request_id("req-7");

        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        client.safe_save(&ctx, "foo", "bar", 20, None).await.unwrap();

        let warnings = capture.at(Level::WARN);
        assert_eq!(warnings.len(), 1);
        let record = &warnings[0];
        assert_eq!(record.message, "unable to add cache data");
        assert_eq!(record.field("key"), Some("foo"));
        assert_eq!(record.field("request_id"), Some("req-7"));
        assert!(record.field("error").unwrap().contains("refused"));
        assert!(record.has("elapsed_ms"));
        assert!(!record.has("resource"));
    }

    #[tokio::test]
    async fn test_safe_get_failure_logs_one_warning_with_labels() {
        let (client, driver) = memory_client(900);
        driver.fail_with(Some(DriverError::Transport("timeout".to_string())));
        let ctx = RequestContext::new();

        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let labels = OperationLabels::new("user", "search");
        client.safe_get(&ctx, &["a", "b"], Some(labels)).await;

        let warnings = capture.at(Level::WARN);
        assert_eq!(warnings.len(), 1);
        let record = &warnings[0];
        assert_eq!(record.field("keys"), Some(r#"["a", "b"]"#));
        assert!(record.field("error").unwrap().contains("timeout"));
        assert!(record.has("elapsed_ms"));
        assert_eq!(record.field("resource"), Some("user"));
        assert_eq!(record.field("operation"), Some("search"));
    }

    #[tokio::test]
    async fn test_labelled_success_logs_timing() {
        let (client, _) = memory_client(900);
        let ctx = RequestContext::new();

        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let labels = OperationLabels::new("user", "retrieve");
        client.safe_save(&ctx, "foo", "bar", 20, Some(labels)).await.unwrap();
        client.safe_get(&ctx, &["foo"], Some(labels)).await;

        assert!(capture.at(Level::WARN).is_empty());
        let timed: Vec<_> = capture
            .at(Level::DEBUG)
            .into_iter()
            .filter(|r| r.message == "cache data saved" || r.message == "cache data read")
            .collect();
        assert_eq!(timed.len(), 2);
        for record in timed {
            assert!(record.has("elapsed_ms"));
            assert_eq!(record.field("resource"), Some("user"));
            assert_eq!(record.field("operation"), Some("retrieve"));
        }
    }
}
