//! Same-origin broadcast bus connecting every open tab of the page.
//!
//! Delivery is best-effort: a lagging subscriber loses messages and nothing is
//! replayed to endpoints opened later. An endpoint never observes its own
//! publications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 64;

pub type EndpointId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub origin: EndpointId,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus endpoint {0} already released")]
    Released(EndpointId),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage>;
    fn publish(&self, channel: &str, origin: EndpointId, payload: Bytes) -> BusResult<()>;
    fn next_endpoint_id(&self) -> EndpointId;
}

/// In-process bus shared by every tab running in this process.
#[derive(Debug)]
pub struct LocalBus {
    channels: parking_lot::RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: parking_lot::RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Live endpoints attached to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.channels.read().get(channel) {
            return sender.clone();
        }
        let mut guard = self.channels.write();
        guard
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(channel).subscribe()
    }

    fn publish(&self, channel: &str, origin: EndpointId, payload: Bytes) -> BusResult<()> {
        let sender = self.sender_for(channel);
        let message = BusMessage {
            channel: channel.to_string(),
            origin,
            payload,
        };
        // No live receivers is not a failure: there may simply be no other tab.
        if sender.send(message).is_err() {
            debug!(target: "tab_bus", channel, origin, "published with no live subscribers");
        }
        Ok(())
    }

    fn next_endpoint_id(&self) -> EndpointId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// One tab's attachment to a named channel.
pub struct BusEndpoint<B: Bus> {
    publisher: BusPublisher<B>,
    rx: Option<broadcast::Receiver<BusMessage>>,
}

impl<B: Bus> BusEndpoint<B> {
    pub fn open(bus: Arc<B>, channel: &str) -> Self {
        let id = bus.next_endpoint_id();
        let rx = bus.subscribe(channel);
        debug!(target: "tab_bus", channel, endpoint = id, "endpoint opened");
        Self {
            publisher: BusPublisher {
                bus,
                channel: Arc::from(channel),
                id,
                released: Arc::new(AtomicBool::new(false)),
            },
            rx: Some(rx),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.publisher.id
    }

    pub fn is_open(&self) -> bool {
        self.rx.is_some()
    }

    pub fn publisher(&self) -> BusPublisher<B> {
        self.publisher.clone()
    }

    pub fn publish(&self, payload: Bytes) -> BusResult<()> {
        self.publisher.publish(payload)
    }

    /// Waits for the next message published by another endpoint.
    pub async fn recv(&mut self) -> BusResult<BusMessage> {
        let own = self.publisher.id;
        let rx = self.rx.as_mut().ok_or(BusError::Released(own))?;
        loop {
            match rx.recv().await {
                Ok(message) if message.origin == own => continue,
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "tab_bus",
                        endpoint = own,
                        skipped,
                        "endpoint lagged; dropped messages"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }

    /// Releases the subscription. Safe to call more than once.
    pub fn close(&mut self) {
        if self.rx.take().is_some() {
            self.publisher.released.store(true, Ordering::Release);
            debug!(
                target: "tab_bus",
                channel = %self.publisher.channel,
                endpoint = self.publisher.id,
                "endpoint released"
            );
        }
    }
}

impl<B: Bus> Drop for BusEndpoint<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cloneable publishing half of a [`BusEndpoint`].
pub struct BusPublisher<B: Bus> {
    bus: Arc<B>,
    channel: Arc<str>,
    id: EndpointId,
    released: Arc<AtomicBool>,
}

impl<B: Bus> BusPublisher<B> {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn publish(&self, payload: Bytes) -> BusResult<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(BusError::Released(self.id));
        }
        self.bus.publish(&self.channel, self.id, payload)
    }
}

impl<B: Bus> Clone for BusPublisher<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            channel: Arc::clone(&self.channel),
            id: self.id,
            released: Arc::clone(&self.released),
        }
    }
}
