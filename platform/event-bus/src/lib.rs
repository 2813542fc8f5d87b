//! # EventBus
//!
//! In-process publish/subscribe used to decouple side effects (audit logging,
//! notifications, billing reactions) from the request path.
//!
//! ## Guarantees
//!
//! - **At-least-once**: every matched handler runs until a round succeeds or
//!   the retry budget is spent; failed rounds re-run *all* handlers
//! - **Dead letter**: exhausted events are kept with status `DEAD_LETTER` and
//!   can be re-driven with [`EventBus::replay_event`]
//! - **Synchronous outcome**: `publish` returns only once the event is
//!   `COMPLETED` or `DEAD_LETTER`
//! - **Graceful degradation**: durable storage (NATS JetStream KV) and the
//!   broadcast side channel (NATS) are best-effort; failures fall back to
//!   memory or are logged and ignored
//!
//! ## Routing
//!
//! Handlers subscribe to an exact event type, to `*` (everything), or to a
//! namespace such as `billing.*` (anything under `billing.`, at any depth).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{handler_fn, EventBus, EventBusConfig, EventMetadata, HandlerError, PublishOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Production: NATS-backed storage and broadcast from env
//! let bus = Arc::new(EventBus::from_config(&EventBusConfig::from_env()?).await);
//!
//! // Dev/Test: memory only
//! let bus = Arc::new(EventBus::in_memory());
//!
//! bus.subscribe(
//!     "billing.*",
//!     handler_fn("billing_audit", |event| async move {
//!         tracing::info!(event_id = %event.event_id, "audit");
//!         Ok::<(), HandlerError>(())
//!     }),
//! )
//! .await;
//!
//! let payload = serde_json::json!({"invoice_id": "inv_123"});
//! let event = bus
//!     .publish_with(
//!         "billing.invoice.created",
//!         payload.as_object().cloned().unwrap_or_default(),
//!         PublishOptions::new().with_metadata(EventMetadata::default().with_tenant_id("t1")),
//!     )
//!     .await?;
//!
//! println!("{} -> {}", event.event_id, event.status);
//! # Ok(())
//! # }
//! ```

mod best_effort;
mod broadcast;
mod bus;
mod config;
mod event;
mod global;
mod kv_store;
mod retry;
mod storage;
mod subscription;

pub use best_effort::best_effort;
pub use broadcast::{BroadcastClient, BroadcastMessage, InMemoryBroadcast, NatsBroadcast};
pub use bus::{EventBus, PublishOptions, DEFAULT_SUBJECT_PREFIX};
pub use config::{ConfigError, EventBusConfig};
pub use event::{
    event_key, validate_event_type, Event, EventMetadata, EventPriority, EventStatus, Payload,
    DEFAULT_MAX_RETRIES,
};
pub use global::{get_event_bus, reset_event_bus};
pub use kv_store::{KeyValueStore, NatsKvStore, DEFAULT_EVENT_TTL, DEFAULT_KV_BUCKET};
pub use retry::RetryPolicy;
pub use storage::{EventQuery, EventStorage};
pub use subscription::{
    handler_fn, matches_pattern, EventHandler, FnHandler, HandlerError, SubscriptionRegistry,
};

use uuid::Uuid;

/// Errors that can occur when using the event bus
///
/// Only `InvalidEventType` and `EventNotFound` ever reach callers of the bus;
/// the rest are produced by backends and absorbed by the best-effort paths.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("invalid event type: {0}")]
    InvalidEventType(String),

    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;
