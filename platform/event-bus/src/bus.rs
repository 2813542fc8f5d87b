//! # EventBus
//!
//! In-process publish/subscribe with at-least-once delivery.
//!
//! `publish` persists the event, announces it on the broadcast side channel,
//! and dispatches it to every matching handler. The caller waits for the whole
//! delivery, retries included, and gets back the event in a terminal state:
//!
//! ```text
//! PENDING ──round ok──────────────────────────────▶ COMPLETED
//!    │
//!    └─round failed─▶ RETRYING ──backoff, round ok──▶ COMPLETED
//!                        │  ▲
//!                        └──┘ round failed, budget left
//!                        │
//!                        └─round failed, budget spent─▶ DEAD_LETTER
//! ```
//!
//! Each round runs all matched handlers concurrently and waits for all of
//! them. A retry re-runs every handler, including the ones that succeeded, so
//! handlers must be idempotent.

use crate::best_effort::best_effort;
use crate::broadcast::BroadcastClient;
use crate::event::{Event, EventMetadata, EventPriority, EventStatus, Payload, DEFAULT_MAX_RETRIES};
use crate::retry::RetryPolicy;
use crate::storage::{EventQuery, EventStorage};
use crate::subscription::{EventHandler, HandlerError, SubscriptionRegistry};
use crate::{BusError, BusResult};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default broadcast subject prefix
pub const DEFAULT_SUBJECT_PREFIX: &str = "events";

/// Per-publish settings
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub metadata: EventMetadata,
    pub priority: EventPriority,
    /// Retry budget; the bus default when `None`
    pub max_retries: Option<u32>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Subscription registry plus dispatch, retry and dead-letter engine
///
/// # Example
/// ```rust
/// use event_bus::{handler_fn, EventBus, EventStatus, HandlerError};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = EventBus::in_memory();
///
/// bus.subscribe(
///     "billing.*",
///     handler_fn("invoice_mailer", |event| async move {
///         tracing::info!(event_type = %event.event_type, "sending invoice email");
///         Ok::<(), HandlerError>(())
///     }),
/// )
/// .await;
///
/// let payload = serde_json::json!({"invoice_id": "inv_1"});
/// let event = bus
///     .publish(
///         "billing.invoice.created",
///         payload.as_object().cloned().unwrap_or_default(),
///     )
///     .await?;
///
/// assert_eq!(event.status, EventStatus::Completed);
/// # Ok(())
/// # }
/// ```
pub struct EventBus {
    registry: RwLock<SubscriptionRegistry>,
    storage: EventStorage,
    broadcast: Option<Arc<dyn BroadcastClient>>,
    retry_policy: RetryPolicy,
    default_max_retries: u32,
    handler_timeout: Option<Duration>,
    subject_prefix: String,
}

impl EventBus {
    pub fn new(storage: EventStorage) -> Self {
        Self {
            registry: RwLock::new(SubscriptionRegistry::new()),
            storage,
            broadcast: None,
            retry_policy: RetryPolicy::default(),
            default_max_retries: DEFAULT_MAX_RETRIES,
            handler_timeout: None,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
        }
    }

    /// Bus with memory-only storage and no side channel
    pub fn in_memory() -> Self {
        Self::new(EventStorage::in_memory())
    }

    pub fn with_broadcast(mut self, broadcast: Arc<dyn BroadcastClient>) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Fail any handler that runs longer than `timeout` in a round
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    pub fn storage(&self) -> &EventStorage {
        &self.storage
    }

    /// Register `handler` under `pattern` (exact, `*`, or `namespace.*`)
    pub async fn subscribe(&self, pattern: &str, handler: Arc<dyn EventHandler>) {
        debug!(pattern = %pattern, handler = %handler.name(), "Subscribing handler");
        self.registry.write().await.subscribe(pattern, handler);
    }

    /// Remove a registration; unknown handlers are a no-op
    pub async fn unsubscribe(&self, pattern: &str, handler: &Arc<dyn EventHandler>) -> bool {
        let removed = self.registry.write().await.unsubscribe(pattern, handler);
        debug!(
            pattern = %pattern,
            handler = %handler.name(),
            removed = removed,
            "Unsubscribing handler"
        );
        removed
    }

    pub async fn handler_count(&self) -> usize {
        self.registry.read().await.handler_count()
    }

    pub async fn patterns(&self) -> Vec<String> {
        self.registry.read().await.patterns()
    }

    /// Publish with default options
    pub async fn publish(&self, event_type: &str, payload: Payload) -> BusResult<Event> {
        self.publish_with(event_type, payload, PublishOptions::default())
            .await
    }

    /// Publish an event and wait for its delivery outcome
    ///
    /// # Returns
    /// * `Ok(Event)` in `COMPLETED` or `DEAD_LETTER` state; handler failures are
    ///   reported through `status` and `error_message`, never as `Err`
    /// * `Err(BusError::InvalidEventType)` if `event_type` is empty
    ///
    /// # Cancellation
    /// Handlers run on spawned tasks. Dropping this future before it resolves
    /// does not stop handlers already running, and no further round or status
    /// update happens: the stored event keeps whatever status it had last
    /// (`PENDING` or `RETRYING`). Use [`EventBus::replay_event`] to re-drive it.
    pub async fn publish_with(
        &self,
        event_type: &str,
        payload: Payload,
        options: PublishOptions,
    ) -> BusResult<Event> {
        let mut event = Event::new(event_type, payload)?
            .with_metadata(options.metadata)
            .with_priority(options.priority)
            .with_max_retries(options.max_retries.unwrap_or(self.default_max_retries));

        self.storage.save_event(&event).await;
        self.broadcast(&event).await;

        self.deliver(&mut event).await;
        Ok(event)
    }

    pub async fn get_event(&self, event_id: Uuid) -> Option<Event> {
        self.storage.get_event(event_id).await
    }

    pub async fn get_events(&self, query: EventQuery) -> Vec<Event> {
        self.storage.query_events(&query).await
    }

    /// Events whose retry budget ran out
    pub async fn dead_letters(&self) -> Vec<Event> {
        self.get_events(EventQuery::new().status(EventStatus::DeadLetter))
            .await
    }

    /// Re-drive a stored event through the current subscriptions
    ///
    /// Retry bookkeeping is reset first, so the event gets a full retry budget.
    ///
    /// # Errors
    /// * `BusError::EventNotFound` if no event with `event_id` is stored
    pub async fn replay_event(&self, event_id: Uuid) -> BusResult<Event> {
        let mut event = self
            .storage
            .get_event(event_id)
            .await
            .ok_or(BusError::EventNotFound(event_id))?;

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            previous_status = %event.status,
            "Replaying event"
        );

        event.reset_for_replay();
        self.storage.save_event(&event).await;

        self.deliver(&mut event).await;
        Ok(event)
    }

    async fn broadcast(&self, event: &Event) {
        let Some(client) = &self.broadcast else {
            return;
        };

        let subject = if self.subject_prefix.is_empty() {
            event.event_type.clone()
        } else {
            format!("{}.{}", self.subject_prefix, event.event_type)
        };

        best_effort("broadcast", event.event_id, async {
            let bytes = event.to_json_bytes()?;
            client.publish(&subject, bytes).await
        })
        .await;
    }

    /// Resolve handlers and drive the event to a terminal status
    async fn deliver(&self, event: &mut Event) {
        let handlers = self.registry.read().await.resolve(&event.event_type);

        if handlers.is_empty() {
            debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No subscribers, completing event"
            );
            event.error_message = None;
            event.transition(EventStatus::Completed);
            self.storage.save_event(event).await;
            return;
        }

        self.dispatch(event, &handlers).await;
    }

    /// Run rounds until every handler succeeds or the retry budget is spent
    async fn dispatch(&self, event: &mut Event, handlers: &[Arc<dyn EventHandler>]) {
        loop {
            debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                attempt = event.retry_count + 1,
                handlers = handlers.len(),
                "Dispatching event"
            );

            match self.run_round(event, handlers).await {
                Ok(()) => {
                    event.error_message = None;
                    event.transition(EventStatus::Completed);
                    self.storage.save_event(event).await;

                    info!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        attempts = event.retry_count + 1,
                        "Event delivered"
                    );
                    return;
                }
                Err(e) => {
                    event.error_message = Some(e.to_string());

                    if event.retry_count >= event.max_retries {
                        event.transition(EventStatus::DeadLetter);
                        self.storage.save_event(event).await;

                        error!(
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            tenant_id = %event.tenant_id().unwrap_or("none"),
                            retry_count = event.retry_count,
                            error = %e,
                            "Event moved to dead letter after retries"
                        );
                        return;
                    }

                    let backoff = self.retry_policy.backoff(event.retry_count);
                    event.retry_count += 1;
                    event.transition(EventStatus::Retrying);
                    self.storage.save_event(event).await;

                    warn!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        retry_count = event.retry_count,
                        max_retries = event.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Dispatch round failed, retrying with backoff"
                    );

                    sleep(backoff).await;
                }
            }
        }
    }

    /// One fan-out/fan-in round over all handlers
    ///
    /// # Returns
    /// * the first failure in handler order, if any handler failed
    async fn run_round(
        &self,
        event: &Event,
        handlers: &[Arc<dyn EventHandler>],
    ) -> Result<(), HandlerError> {
        let snapshot = Arc::new(event.clone());
        let handler_timeout = self.handler_timeout;

        let tasks = handlers.iter().map(|handler| {
            let handler = Arc::clone(handler);
            let event = Arc::clone(&snapshot);

            tokio::spawn(async move {
                let fut = handler.handle(&event);
                match handler_timeout {
                    Some(limit) => match tokio::time::timeout(limit, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(HandlerError::new(format!(
                            "handler {} timed out after {}ms",
                            handler.name(),
                            limit.as_millis()
                        ))),
                    },
                    None => fut.await,
                }
            })
        });

        let results = join_all(tasks).await;

        let mut first_error = None;
        for (handler, joined) in handlers.iter().zip(results) {
            let outcome = joined.unwrap_or_else(|e| {
                Err(HandlerError::new(format!(
                    "handler {} panicked: {}",
                    handler.name(),
                    e
                )))
            });

            if let Err(e) = outcome {
                warn!(
                    event_id = %event.event_id,
                    handler = %handler.name(),
                    error = %e,
                    "Handler failed"
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::in_memory()
    }
}
