//! Environment-driven configuration and wiring
//!
//! | Env var | Default |
//! |---|---|
//! | `NATS_URL` | unset (memory only) |
//! | `EVENT_BUS_PERSISTENCE` | `true` |
//! | `EVENT_BUS_KV_BUCKET` | `events` |
//! | `EVENT_BUS_EVENT_TTL_SECS` | `86400` |
//! | `EVENT_BUS_MAX_RETRIES` | `3` |
//! | `EVENT_BUS_RETRY_BASE_MS` | `1000` |
//! | `EVENT_BUS_RETRY_MAX_MS` | `60000` |
//! | `EVENT_BUS_HANDLER_TIMEOUT_MS` | `0` (no timeout) |
//! | `EVENT_BUS_SUBJECT_PREFIX` | `events` |
//! | `EVENT_BUS_MEMORY_CAPACITY` | `0` (unbounded) |

use crate::broadcast::NatsBroadcast;
use crate::bus::{EventBus, DEFAULT_SUBJECT_PREFIX};
use crate::event::DEFAULT_MAX_RETRIES;
use crate::kv_store::{KeyValueStore, NatsKvStore, DEFAULT_EVENT_TTL, DEFAULT_KV_BUCKET};
use crate::retry::RetryPolicy;
use crate::storage::EventStorage;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusConfig {
    pub nats_url: Option<String>,
    pub enable_persistence: bool,
    pub kv_bucket: String,
    pub event_ttl: Duration,
    pub default_max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub handler_timeout: Option<Duration>,
    pub subject_prefix: String,
    /// Cap on events held in memory; `None` is unbounded
    pub memory_capacity: Option<usize>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            nats_url: None,
            enable_persistence: true,
            kv_bucket: DEFAULT_KV_BUCKET.to_string(),
            event_ttl: DEFAULT_EVENT_TTL,
            default_max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: retry.base_delay,
            retry_max_delay: retry.max_delay,
            handler_timeout: None,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            memory_capacity: None,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn parse_bool_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key) {
        Some(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
        },
        None => Ok(default),
    }
}

impl EventBusConfig {
    /// Read configuration from process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through `lookup` (env-like key -> value)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let nats_url = lookup("NATS_URL").filter(|url| !url.trim().is_empty());

        // 0 disables the timeout
        let handler_timeout_ms = parse_or(&lookup, "EVENT_BUS_HANDLER_TIMEOUT_MS", 0u64)?;
        // 0 means unbounded
        let memory_capacity = parse_or(&lookup, "EVENT_BUS_MEMORY_CAPACITY", 0usize)?;

        Ok(Self {
            nats_url,
            enable_persistence: parse_bool_or(
                &lookup,
                "EVENT_BUS_PERSISTENCE",
                defaults.enable_persistence,
            )?,
            kv_bucket: lookup("EVENT_BUS_KV_BUCKET").unwrap_or(defaults.kv_bucket),
            event_ttl: Duration::from_secs(parse_or(
                &lookup,
                "EVENT_BUS_EVENT_TTL_SECS",
                defaults.event_ttl.as_secs(),
            )?),
            default_max_retries: parse_or(
                &lookup,
                "EVENT_BUS_MAX_RETRIES",
                defaults.default_max_retries,
            )?,
            retry_base_delay: Duration::from_millis(parse_or(
                &lookup,
                "EVENT_BUS_RETRY_BASE_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            retry_max_delay: Duration::from_millis(parse_or(
                &lookup,
                "EVENT_BUS_RETRY_MAX_MS",
                defaults.retry_max_delay.as_millis() as u64,
            )?),
            handler_timeout: (handler_timeout_ms > 0)
                .then(|| Duration::from_millis(handler_timeout_ms)),
            subject_prefix: lookup("EVENT_BUS_SUBJECT_PREFIX").unwrap_or(defaults.subject_prefix),
            memory_capacity: (memory_capacity > 0).then_some(memory_capacity),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_base_delay, self.retry_max_delay)
    }
}

impl EventBus {
    /// Build a bus from configuration
    ///
    /// Connects to NATS when `nats_url` is set. An unreachable server or KV
    /// bucket degrades to memory-only storage and no broadcast; this never fails.
    pub async fn from_config(config: &EventBusConfig) -> Self {
        let mut backend: Option<Arc<dyn KeyValueStore>> = None;
        let mut broadcast = None;

        if let Some(url) = &config.nats_url {
            match async_nats::connect(url.as_str()).await {
                Ok(client) => {
                    info!(nats_url = %url, "Connected to NATS for event bus");

                    if config.enable_persistence {
                        match NatsKvStore::open(client.clone(), &config.kv_bucket, config.event_ttl)
                            .await
                        {
                            Ok(store) => backend = Some(Arc::new(store)),
                            Err(e) => warn!(
                                bucket = %config.kv_bucket,
                                error = %e,
                                "Event KV bucket unavailable, using in-memory storage"
                            ),
                        }
                    }

                    broadcast = Some(NatsBroadcast::new(client));
                }
                Err(e) => warn!(
                    nats_url = %url,
                    error = %e,
                    "NATS unreachable, event bus running in memory only"
                ),
            }
        }

        let mut storage = EventStorage::new(backend, config.enable_persistence);
        if let Some(capacity) = config.memory_capacity {
            storage = storage.with_memory_capacity(capacity);
        }
        let mut bus = EventBus::new(storage)
            .with_retry_policy(config.retry_policy())
            .with_default_max_retries(config.default_max_retries)
            .with_subject_prefix(config.subject_prefix.clone());

        if let Some(timeout) = config.handler_timeout {
            bus = bus.with_handler_timeout(timeout);
        }
        if let Some(client) = broadcast {
            bus = bus.with_broadcast(Arc::new(client));
        }

        bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EventBusConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, EventBusConfig::default());
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.event_ttl, Duration::from_secs(86_400));
        assert!(config.enable_persistence);
        assert!(config.nats_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = EventBusConfig::from_lookup(lookup_from(&[
            ("NATS_URL", "nats://bus:4222"),
            ("EVENT_BUS_PERSISTENCE", "off"),
            ("EVENT_BUS_KV_BUCKET", "audit_events"),
            ("EVENT_BUS_EVENT_TTL_SECS", "3600"),
            ("EVENT_BUS_MAX_RETRIES", "5"),
            ("EVENT_BUS_RETRY_BASE_MS", "250"),
            ("EVENT_BUS_RETRY_MAX_MS", "2000"),
            ("EVENT_BUS_HANDLER_TIMEOUT_MS", "1500"),
            ("EVENT_BUS_SUBJECT_PREFIX", "platform.events"),
            ("EVENT_BUS_MEMORY_CAPACITY", "10000"),
        ]))
        .unwrap();

        assert_eq!(config.nats_url.as_deref(), Some("nats://bus:4222"));
        assert!(!config.enable_persistence);
        assert_eq!(config.kv_bucket, "audit_events");
        assert_eq!(config.event_ttl, Duration::from_secs(3600));
        assert_eq!(config.default_max_retries, 5);
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::new(Duration::from_millis(250), Duration::from_secs(2))
        );
        assert_eq!(config.handler_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.subject_prefix, "platform.events");
        assert_eq!(config.memory_capacity, Some(10_000));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = EventBusConfig::from_lookup(lookup_from(&[("EVENT_BUS_MAX_RETRIES", "three")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "EVENT_BUS_MAX_RETRIES".to_string(),
                value: "three".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        assert!(EventBusConfig::from_lookup(lookup_from(&[("EVENT_BUS_PERSISTENCE", "maybe")])).is_err());
    }

    #[test]
    fn test_blank_nats_url_means_memory_only() {
        let config = EventBusConfig::from_lookup(lookup_from(&[("NATS_URL", "  ")])).unwrap();
        assert!(config.nats_url.is_none());
    }

    #[tokio::test]
    async fn test_from_config_without_nats_is_memory_only() {
        let bus = EventBus::from_config(&EventBusConfig::default()).await;
        assert!(!bus.storage().persistence_enabled());
    }
}
