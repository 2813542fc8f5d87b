//! # Event Model
//!
//! The record that flows through the bus. An [`Event`] is created by
//! `EventBus::publish`, mutated only by the bus during dispatch, retry and
//! replay, and never deleted by it (durable storage may expire it via TTL).
//!
//! ## Fields
//!
//! - `event_id`: UUID v4, assigned at creation
//! - `event_type`: dot-segmented routing key (e.g. `billing.invoice.created`)
//! - `payload`: JSON object owned by the event
//! - `metadata`: correlation, causation, tracing and tenancy fields
//! - `priority`: advisory only, does not affect ordering
//! - `status`: `PENDING -> (RETRYING)* -> COMPLETED | DEAD_LETTER`
//! - `retry_count` / `max_retries`: retry bookkeeping, `retry_count <= max_retries`
//! - `error_message`: last captured handler error
//! - `created_at` / `updated_at`: `updated_at` moves on every status transition

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{BusError, BusResult};

/// Retry budget applied when the publisher does not pick one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Event payload: an owned JSON object.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Advisory scheduling hint carried with every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Delivery state of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Created, first dispatch round not finished yet
    #[default]
    Pending,
    /// At least one round failed, waiting for the next one
    Retrying,
    /// Every matched handler succeeded on the last round
    Completed,
    /// Retry budget exhausted
    DeadLetter,
}

impl EventStatus {
    /// Whether a dispatch loop may stop at this status
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::DeadLetter)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Retrying => "RETRYING",
            EventStatus::Completed => "COMPLETED",
            EventStatus::DeadLetter => "DEAD_LETTER",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional correlation fields attached to an event at publish time
///
/// # Examples
///
/// ```rust
/// use event_bus::EventMetadata;
///
/// let metadata = EventMetadata::default()
///     .with_tenant_id("tenant-123")
///     .with_correlation_id("corr-456")
///     .with_source("billing");
///
/// assert_eq!(metadata.tenant_id.as_deref(), Some("tenant-123"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Links related events in a business transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// The event_id that caused this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Tenant scope, usable as a query filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Logical producer name (e.g. "billing", "auth")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl EventMetadata {
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A published event and its delivery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier, never reassigned (replay keeps it)
    pub event_id: Uuid,

    /// Routing key
    pub event_type: String,

    pub payload: Payload,

    #[serde(default)]
    pub metadata: EventMetadata,

    #[serde(default)]
    pub priority: EventPriority,

    pub status: EventStatus,

    /// Dispatch attempts made beyond the first
    pub retry_count: u32,

    pub max_retries: u32,

    /// Last captured handler error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Create a pending event with a fresh id
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidEventType`] if `event_type` is empty or blank.
    pub fn new(event_type: &str, payload: Payload) -> BusResult<Self> {
        validate_event_type(event_type)?;

        let now = Utc::now();
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload,
            metadata: EventMetadata::default(),
            priority: EventPriority::default(),
            status: EventStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
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
        self.max_retries = max_retries;
        self
    }

    /// Tenant from the metadata, if any
    pub fn tenant_id(&self) -> Option<&str> {
        self.metadata.tenant_id.as_deref()
    }

    /// Deserialize the payload into a handler-specific shape
    ///
    /// # Examples
    ///
    /// ```rust
    /// use event_bus::Event;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct InvoiceCreated {
    ///     invoice_id: String,
    ///     amount: i64,
    /// }
    ///
    /// let payload = serde_json::json!({"invoice_id": "inv_1", "amount": 1200});
    /// let event = Event::new(
    ///     "billing.invoice.created",
    ///     payload.as_object().cloned().unwrap_or_default(),
    /// )
    /// .unwrap();
    ///
    /// let invoice: InvoiceCreated = event.payload_as().unwrap();
    /// assert_eq!(invoice.amount, 1200);
    /// ```
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(self.payload.clone()))
    }

    /// Move to `status`, refreshing `updated_at`
    pub(crate) fn transition(&mut self, status: EventStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Clear retry bookkeeping before re-driving a stored event
    pub(crate) fn reset_for_replay(&mut self) {
        self.retry_count = 0;
        self.error_message = None;
        self.transition(EventStatus::Pending);
    }

    pub fn to_json_bytes(&self) -> BusResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BusError::SerializationError(e.to_string()))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> BusResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| BusError::SerializationError(e.to_string()))
    }
}

/// Reject empty or blank event types
pub fn validate_event_type(event_type: &str) -> BusResult<()> {
    if event_type.trim().is_empty() {
        return Err(BusError::InvalidEventType(
            "event_type cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Key-value store key for an event record
pub fn event_key(event_id: Uuid) -> String {
    format!("event.{}", event_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_event_creation() {
        let event = Event::new("billing.invoice.created", payload(json!({"id": 1}))).unwrap();

        assert_eq!(event.event_type, "billing.invoice.created");
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(event.priority, EventPriority::Normal);
        assert!(event.error_message.is_none());
        assert_eq!(event.created_at, event.updated_at);
    }

    #[test]
    fn test_event_rejects_empty_type() {
        assert!(matches!(
            Event::new("", Payload::new()),
            Err(BusError::InvalidEventType(_))
        ));
        assert!(matches!(
            Event::new("   ", Payload::new()),
            Err(BusError::InvalidEventType(_))
        ));
    }

    #[test]
    fn test_event_with_builder() {
        let event = Event::new("auth.user.created", Payload::new())
            .unwrap()
            .with_metadata(
                EventMetadata::default()
                    .with_tenant_id("t1")
                    .with_causation_id("cause-789"),
            )
            .with_priority(EventPriority::Critical)
            .with_max_retries(5);

        assert_eq!(event.tenant_id(), Some("t1"));
        assert_eq!(event.metadata.causation_id.as_deref(), Some("cause-789"));
        assert_eq!(event.priority, EventPriority::Critical);
        assert_eq!(event.max_retries, 5);
    }

    #[test]
    fn test_serialized_shape() {
        let mut event = Event::new("test.event", payload(json!({"key": "value"}))).unwrap();
        event.transition(EventStatus::DeadLetter);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "DEAD_LETTER");
        assert_eq!(value["priority"], "NORMAL");
        assert_eq!(value["payload"]["key"], "value");
        assert!(value.get("error_message").is_none());
        assert!(value["metadata"].get("tenant_id").is_none());

        let decoded = Event::from_json_bytes(&event.to_json_bytes().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_transition_refreshes_updated_at() {
        let mut event = Event::new("test.event", Payload::new()).unwrap();
        let before = event.updated_at;
        event.transition(EventStatus::Completed);

        assert!(event.updated_at >= before);
        assert!(event.status.is_terminal());
        assert!(!EventStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_reset_for_replay() {
        let mut event = Event::new("test.event", Payload::new()).unwrap();
        event.retry_count = 3;
        event.error_message = Some("boom".to_string());
        event.transition(EventStatus::DeadLetter);

        event.reset_for_replay();

        assert_eq!(event.retry_count, 0);
        assert_eq!(event.status, EventStatus::Pending);
        assert!(event.error_message.is_none());
    }

    #[test]
    fn test_event_key() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(event_key(id), "event.550e8400-e29b-41d4-a716-446655440000");
    }
}
