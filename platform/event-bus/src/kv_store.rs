//! Durable key-value backend for event records

use crate::{BusError, BusResult};
use async_nats::jetstream::{self, kv};
use async_nats::Client;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Default bucket for event records
pub const DEFAULT_KV_BUCKET: &str = "events";

/// Default record retention
pub const DEFAULT_EVENT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Point-lookup store used by `EventStorage` as its durable backend
///
/// Retention (TTL) is a property of the store, not of individual writes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: Vec<u8>) -> BusResult<()>;

    /// Read the current value under `key`
    ///
    /// # Returns
    /// * `Ok(None)` if the key does not exist or has expired
    async fn get(&self, key: &str) -> BusResult<Option<Vec<u8>>>;
}

impl fmt::Debug for dyn KeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyValueStore")
    }
}

/// KeyValueStore backed by a NATS JetStream key-value bucket
///
/// The bucket's `max_age` acts as the TTL for every record.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{KeyValueStore, NatsKvStore};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = async_nats::connect("nats://localhost:4222").await?;
/// let store = NatsKvStore::open(client, "events", Duration::from_secs(3600)).await?;
///
/// store.put("event.abc", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsKvStore {
    store: kv::Store,
}

impl NatsKvStore {
    /// Bind to `bucket`, creating it with `max_age = ttl` if it does not exist
    pub async fn open(client: Client, bucket: &str, ttl: Duration) -> BusResult<Self> {
        let context = jetstream::new(client);

        let store = match context.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => context
                .create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    max_age: ttl,
                    history: 1,
                    ..Default::default()
                })
                .await
                .map_err(|e| BusError::ConnectionError(e.to_string()))?,
        };

        Ok(Self { store })
    }

    /// Wrap an already-bound bucket
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl KeyValueStore for NatsKvStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> BusResult<()> {
        self.store
            .put(key, value.into())
            .await
            .map_err(|e| BusError::StorageError(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> BusResult<Option<Vec<u8>>> {
        let value = self
            .store
            .get(key)
            .await
            .map_err(|e| BusError::StorageError(e.to_string()))?;

        Ok(value.map(|bytes| bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: requires a running NATS server with JetStream enabled
    // docker run -p 4222:4222 nats:2.10-alpine -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_nats_kv_put_get() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let store = NatsKvStore::open(client, "events_test", Duration::from_secs(60))
            .await
            .unwrap();

        store.put("event.test-key", b"payload".to_vec()).await.unwrap();

        let value = store.get("event.test-key").await.unwrap();
        assert_eq!(value, Some(b"payload".to_vec()));

        let missing = store.get("event.missing-key").await.unwrap();
        assert!(missing.is_none());
    }
}
