//! # Event Storage
//!
//! Persistence for published events with transparent fallback.
//!
//! An in-memory map is always maintained and is the ground truth for
//! [`EventStorage::query_events`]. When a durable [`KeyValueStore`] is configured,
//! writes go to it as well and point lookups try it first. Any backend failure
//! is logged and the in-memory path is used instead; nothing propagates to the
//! publisher.
//!
//! The memory copy does not expire like the durable bucket does. It is
//! unbounded by default; [`EventStorage::with_memory_capacity`] evicts the
//! oldest events once the cap is reached.

use crate::best_effort::best_effort;
use crate::event::{event_key, Event, EventStatus};
use crate::kv_store::KeyValueStore;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Equality filters for [`EventStorage::query_events`], combined with AND
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub event_type: Option<String>,
    pub status: Option<EventStatus>,
    pub tenant_id: Option<String>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(event_type) = &self.event_type {
            if &event.event_type != event_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if event.status != status {
                return false;
            }
        }
        if let Some(tenant_id) = &self.tenant_id {
            if event.tenant_id() != Some(tenant_id.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Default)]
struct MemoryStore {
    events: HashMap<Uuid, Event>,
    // insertion order for queries, oldest first
    order: VecDeque<Uuid>,
}

/// Backend-or-memory event store
pub struct EventStorage {
    backend: Option<Arc<dyn KeyValueStore>>,
    memory: RwLock<MemoryStore>,
    memory_capacity: Option<usize>,
}

impl EventStorage {
    /// Create a storage
    ///
    /// # Arguments
    /// * `backend` - Durable store, used only if `enable_persistence` is true
    /// * `enable_persistence` - Whether to write through to the backend at all
    pub fn new(backend: Option<Arc<dyn KeyValueStore>>, enable_persistence: bool) -> Self {
        Self {
            backend: if enable_persistence { backend } else { None },
            memory: RwLock::new(MemoryStore::default()),
            memory_capacity: None,
        }
    }

    /// Memory-only storage
    pub fn in_memory() -> Self {
        Self::new(None, false)
    }

    /// Drop the durable backend, keeping any events already held in memory
    pub fn without_persistence(mut self) -> Self {
        self.backend = None;
        self
    }

    /// Keep at most `capacity` events in memory, evicting the oldest first
    ///
    /// Evicted events stay reachable through the durable backend until it
    /// expires them.
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = Some(capacity);
        self
    }

    /// Whether a durable backend is active
    pub fn persistence_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Persist an event; never fails
    ///
    /// The in-memory copy is always updated, whether or not the backend write
    /// succeeded. Re-saving an event keeps its first insertion position.
    pub async fn save_event(&self, event: &Event) {
        if let Some(backend) = &self.backend {
            best_effort("persist", event.event_id, async {
                let bytes = event.to_json_bytes()?;
                backend.put(&event_key(event.event_id), bytes).await
            })
            .await;
        }

        let mut memory = self.memory.write().await;
        if memory.events.insert(event.event_id, event.clone()).is_none() {
            memory.order.push_back(event.event_id);
        }
        if let Some(cap) = self.memory_capacity {
            while memory.order.len() > cap {
                if let Some(oldest) = memory.order.pop_front() {
                    memory.events.remove(&oldest);
                }
            }
        }
    }

    /// Look up an event by id
    ///
    /// Tries the backend first when configured, then memory on miss or error.
    pub async fn get_event(&self, event_id: Uuid) -> Option<Event> {
        if let Some(backend) = &self.backend {
            match backend.get(&event_key(event_id)).await {
                Ok(Some(bytes)) => match Event::from_json_bytes(&bytes) {
                    Ok(event) => return Some(event),
                    Err(e) => warn!(
                        event_id = %event_id,
                        error = %e,
                        "Undecodable durable event record, using memory copy"
                    ),
                },
                Ok(None) => {}
                Err(e) => warn!(
                    event_id = %event_id,
                    error = %e,
                    "Durable event lookup failed, using memory copy"
                ),
            }
        }

        self.memory.read().await.events.get(&event_id).cloned()
    }

    /// Events matching every supplied filter, in insertion order
    pub async fn query_events(&self, query: &EventQuery) -> Vec<Event> {
        let memory = self.memory.read().await;
        memory
            .order
            .iter()
            .filter_map(|id| memory.events.get(id))
            .filter(|event| query.matches(event))
            .cloned()
            .collect()
    }

    /// Number of events held in memory
    pub async fn len(&self) -> usize {
        self.memory.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for EventStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}
