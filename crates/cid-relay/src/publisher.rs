//! Live update fan-out
//!
//! Two broadcast feeds, one for device snapshots and one for events. Each
//! subscriber reads from its own cursor into a shared ring, so a slow reader
//! only ever loses its own backlog and never holds up the panel connection
//! that published.

use std::sync::{Arc, PoisonError, RwLock};

use cid_protocol::Event;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::state::Device;

/// Publishes device and event updates to any number of subscribers
pub struct UpdatePublisher {
    devices: RwLock<Option<broadcast::Sender<Device>>>,
    events: RwLock<Option<broadcast::Sender<Arc<Event>>>>,
}

impl UpdatePublisher {
    /// Create a publisher buffering up to `capacity` updates per feed
    pub fn new(capacity: usize) -> Self {
        let (devices, _) = broadcast::channel(capacity.max(1));
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            devices: RwLock::new(Some(devices)),
            events: RwLock::new(Some(events)),
        }
    }

    /// Publish one processed event on both feeds
    ///
    /// Never waits. Updates published with no subscribers attached are discarded.
    pub fn publish(&self, device: Device, event: Arc<Event>) {
        if let Some(tx) = self.devices.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            let _ = tx.send(device);
        }
        if let Some(tx) = self.events.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Attach a new device-update subscriber
    pub fn subscribe_devices(&self) -> Subscription<Device> {
        Subscription::new(
            "device",
            subscribe(&self.devices.read().unwrap_or_else(PoisonError::into_inner)),
        )
    }

    /// Attach a new event-update subscriber
    pub fn subscribe_events(&self) -> Subscription<Arc<Event>> {
        Subscription::new(
            "event",
            subscribe(&self.events.read().unwrap_or_else(PoisonError::into_inner)),
        )
    }

    /// Number of attached subscribers per feed (devices, events)
    pub fn subscriber_counts(&self) -> (usize, usize) {
        let count = |n: Option<usize>| n.unwrap_or(0);
        (
            count(
                self.devices
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .map(broadcast::Sender::receiver_count),
            ),
            count(
                self.events
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .map(broadcast::Sender::receiver_count),
            ),
        )
    }

    /// Close both feeds
    ///
    /// Existing subscriptions still receive what is buffered, then end.
    pub fn close(&self) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("Update publisher closed");
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

fn subscribe<T: Clone>(sender: &Option<broadcast::Sender<T>>) -> broadcast::Receiver<T> {
    match sender {
        Some(tx) => tx.subscribe(),
        None => {
            // Already closed: hand out a receiver that ends immediately
            let (tx, rx) = broadcast::channel(1);
            drop(tx);
            rx
        }
    }
}

/// One subscriber's view of a feed
///
/// Dropping the subscription detaches it.
pub struct Subscription<T> {
    feed: &'static str,
    rx: broadcast::Receiver<T>,
    lagged: u64,
}

impl<T: Clone> Subscription<T> {
    fn new(feed: &'static str, rx: broadcast::Receiver<T>) -> Self {
        Self { feed, rx, lagged: 0 }
    }

    /// Next update, skipping anything this subscriber fell too far behind on
    ///
    /// Returns `None` once the publisher is closed and the backlog is drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(update) => return Some(update),
                Err(RecvError::Lagged(n)) => {
                    self.lagged += n;
                    warn!("{} subscriber lagged, skipped {} updates", self.feed, n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Updates skipped so far because this subscriber fell behind
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}
