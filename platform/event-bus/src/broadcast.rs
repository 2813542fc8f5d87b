//! Side-channel broadcast of published events
//!
//! The bus announces every published event on a subject (`<prefix>.<event_type>`)
//! so that out-of-process listeners can observe traffic. Delivery through this
//! channel is fire-and-forget; the bus never waits on or reacts to listeners.
//!
//! - **NatsBroadcast**: core NATS publish
//! - **InMemoryBroadcast**: tokio broadcast channel for tests and local dev

use crate::{BusError, BusResult};
use async_nats::Client;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;

/// Fire-and-forget publish primitive used as the bus side channel
#[async_trait]
pub trait BroadcastClient: Send + Sync {
    /// Publish serialized event bytes to `subject`
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;
}

impl fmt::Debug for dyn BroadcastClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BroadcastClient")
    }
}

/// BroadcastClient backed by a NATS connection
///
/// # Example
/// ```rust,no_run
/// use event_bus::{BroadcastClient, NatsBroadcast};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = async_nats::connect("nats://localhost:4222").await?;
/// let broadcast = NatsBroadcast::new(client);
/// broadcast.publish("events.user.created", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBroadcast {
    client: Client,
}

impl NatsBroadcast {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BroadcastClient for NatsBroadcast {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))
    }
}

/// One announcement sent through [`InMemoryBroadcast`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// BroadcastClient using an in-process tokio broadcast channel
///
/// Messages published with no live receiver are dropped.
#[derive(Clone)]
pub struct InMemoryBroadcast {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl InMemoryBroadcast {
    /// Channel with a 1000 message buffer
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Receive every message published from now on
    pub fn receiver(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.sender.subscribe()
    }
}

impl Default for InMemoryBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastClient for InMemoryBroadcast {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        // No receivers is not an error for a side channel
        let _ = self.sender.send(BroadcastMessage {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }
}
