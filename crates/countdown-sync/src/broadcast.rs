use tab_bus::{Bus, BusPublisher};
use tracing::debug;

use crate::error::SyncError;
use crate::protocol::SyncMessage;

/// Outbound half of the sync protocol.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, message: &SyncMessage) -> Result<(), SyncError>;
}

/// Publishes JSON-encoded [`SyncMessage`]s through a tab's bus endpoint.
pub struct BusBroadcaster<B: Bus> {
    publisher: BusPublisher<B>,
}

impl<B: Bus> BusBroadcaster<B> {
    pub fn new(publisher: BusPublisher<B>) -> Self {
        Self { publisher }
    }
}

impl<B: Bus> Broadcaster for BusBroadcaster<B> {
    fn broadcast(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let payload = message.encode()?;
        self.publisher.publish(payload)?;
        debug!(
            target: "countdown.tab",
            tab = self.publisher.id(),
            kind = message.kind(),
            "broadcast sync message"
        );
        Ok(())
    }
}

impl<B: Bus> Clone for BusBroadcaster<B> {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
        }
    }
}
