//! Process-wide bus accessor
//!
//! Prefer constructing one [`EventBus`] at startup and passing it (as
//! `Arc<EventBus>`) to producers and handlers. This accessor exists for call
//! sites that cannot be handed the bus explicitly.

use crate::broadcast::BroadcastClient;
use crate::bus::EventBus;
use crate::storage::EventStorage;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

static GLOBAL_BUS: Lazy<Mutex<Option<Arc<EventBus>>>> = Lazy::new(|| Mutex::new(None));

/// Shared bus, built from the arguments of the first call
///
/// Later calls return the memoized instance and ignore their arguments until
/// [`reset_event_bus`] is called.
///
/// # Arguments
/// * `storage` - Storage to use; in-memory when `None`
/// * `broadcast` - Optional side-channel client
/// * `enable_persistence` - When false, any durable backend in `storage` is dropped
pub fn get_event_bus(
    storage: Option<EventStorage>,
    broadcast: Option<Arc<dyn BroadcastClient>>,
    enable_persistence: bool,
) -> Arc<EventBus> {
    let mut slot = GLOBAL_BUS.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(bus) = slot.as_ref() {
        return Arc::clone(bus);
    }

    let mut storage = storage.unwrap_or_default();
    if !enable_persistence {
        storage = storage.without_persistence();
    }

    let mut bus = EventBus::new(storage);
    if let Some(client) = broadcast {
        bus = bus.with_broadcast(client);
    }

    debug!(
        persistence = bus.storage().persistence_enabled(),
        "Initialized process-wide event bus"
    );

    let bus = Arc::new(bus);
    *slot = Some(Arc::clone(&bus));
    bus
}

/// Forget the shared bus so the next [`get_event_bus`] builds a new one
///
/// Intended for test isolation.
pub fn reset_event_bus() {
    GLOBAL_BUS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}
