//! Configuration Module
//!
//! Handles loading the `cache` configuration section, either from a JSON
//! document or from environment variables.

use std::env;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::{CacheError, Result};

/// Memcached's own expiration ceiling: 30 days in seconds.
pub const DEFAULT_MAX_EXPIRATION: u32 = 60 * 60 * 24 * 30;

/// Endpoint used when no hosts are configured.
pub const DEFAULT_HOSTS: &str = "localhost:11211";

/// Root configuration object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
}

/// The `cache` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Whether a cache client is registered at all
    #[serde(default)]
    pub enabled: bool,
    /// Driver settings
    #[serde(default)]
    pub memcached: MemcachedConfig,
}

/// The `cache.memcached` section.
///
/// Unrecognized keys are kept in `options` and forwarded to the driver.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedConfig {
    /// Comma-separated `host:port` list
    #[serde(default = "default_hosts")]
    pub hosts: String,
    /// Largest TTL accepted by `set`/`add`, in seconds
    #[serde(default = "default_max_expiration")]
    pub max_expiration: u32,
    /// Driver read/write timeout in milliseconds
    #[serde(default, deserialize_with = "deserialize_timeout")]
    pub timeout: Option<u64>,
    /// Driver-specific passthrough options
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

fn default_hosts() -> String {
    DEFAULT_HOSTS.to_string()
}

fn default_max_expiration() -> u32 {
    DEFAULT_MAX_EXPIRATION
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            max_expiration: DEFAULT_MAX_EXPIRATION,
            timeout: None,
            options: Map::new(),
        }
    }
}

impl MemcachedConfig {
    /// Splits `hosts` into the ordered endpoint list.
    ///
    /// Order and duplicates are preserved; empty segments are dropped.
    pub fn endpoints(&self) -> Vec<String> {
        parse_hosts(&self.hosts)
    }
}

/// Splits a comma-separated endpoint string.
pub fn parse_hosts(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Coerces a timeout given as a number or a numeric string into whole
/// milliseconds. Zero means "no timeout".
pub fn coerce_timeout(raw: &Value) -> std::result::Result<Option<u64>, String> {
    let millis = match raw {
        Value::Null => return Ok(None),
        Value::Number(n) => match (n.as_u64(), n.as_f64()) {
            (Some(v), _) => v,
            (None, Some(f)) if f >= 0.0 => f.trunc() as u64,
            _ => return Err(format!("timeout must be non-negative, got {}", n)),
        },
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                return Err(format!("timeout is not an integer: {:?}", s));
            }
            digits
                .parse()
                .map_err(|_| format!("timeout out of range: {:?}", s))?
        }
        other => return Err(format!("timeout must be a number or string, got {}", other)),
    };

    Ok(if millis == 0 { None } else { Some(millis) })
}

fn deserialize_timeout<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    coerce_timeout(&raw).map_err(serde::de::Error::custom)
}

impl Config {
    /// Parses a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENABLED` - Enable caching (default: false)
    /// - `CACHE_MEMCACHED_HOSTS` - Endpoint list (default: localhost:11211)
    /// - `CACHE_MEMCACHED_MAX_EXPIRATION` - TTL ceiling in seconds (default: 30 days)
    /// - `CACHE_MEMCACHED_TIMEOUT` - Driver timeout in milliseconds (default: none)
    pub fn from_env() -> Result<Self> {
        let enabled = env::var("CACHE_ENABLED")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let max_expiration = match env::var("CACHE_MEMCACHED_MAX_EXPIRATION") {
            Ok(v) => v.trim().parse().map_err(|_| {
                CacheError::Config(format!("maxExpiration is not a whole number of seconds: {:?}", v))
            })?,
            Err(_) => DEFAULT_MAX_EXPIRATION,
        };

        let timeout = match env::var("CACHE_MEMCACHED_TIMEOUT") {
            Ok(v) => coerce_timeout(&Value::String(v)).map_err(CacheError::Config)?,
            Err(_) => None,
        };

        Ok(Self {
            cache: CacheConfig {
                enabled,
                memcached: MemcachedConfig {
                    hosts: env::var("CACHE_MEMCACHED_HOSTS").unwrap_or_else(|_| default_hosts()),
                    max_expiration,
                    timeout,
                    options: Map::new(),
                },
            },
        })
    }
}
