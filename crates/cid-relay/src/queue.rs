//! Bounded outbound retranslation queue
//!
//! The listener side never waits on the queue: a full queue drops the event
//! and bumps the rejected counter, which the client folds into its stats.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cid_protocol::Event;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Create a retranslation queue holding at most `capacity` events
pub fn retranslation_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let rejected = Arc::new(AtomicU64::new(0));
    (
        QueueSender {
            tx,
            rejected: Arc::clone(&rejected),
        },
        QueueReceiver { rx, rejected },
    )
}

/// Producer half, cloned into every panel connection task
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Arc<Event>>,
    rejected: Arc<AtomicU64>,
}

impl QueueSender {
    /// Offer an event for retranslation without waiting
    ///
    /// Returns `false` if the event was dropped.
    pub fn enqueue(&self, event: Arc<Event>) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let total = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Outbound queue full, dropping {} from {} ({} rejected)",
                    event.code(),
                    event.account(),
                    total
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Outbound queue closed, dropping {}", event.code());
                false
            }
        }
    }

    /// Events dropped so far
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Events currently waiting
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether no events are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half, owned by the retranslation client
pub struct QueueReceiver {
    rx: mpsc::Receiver<Arc<Event>>,
    rejected: Arc<AtomicU64>,
}

impl QueueReceiver {
    /// Wait for the next event; `None` once every sender is gone and the queue is drained
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Take an event if one is ready
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }

    /// Events dropped so far
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Events currently waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no events are waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
