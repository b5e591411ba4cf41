//! Panel-facing TCP listener
//!
//! Every accepted panel connection gets its own task that splits the byte
//! stream into frames and feeds each one through [`Ingest`]. Frames from one
//! connection are processed in order; connections run independently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cid_protocol::{decode_frame, DecodeError, Event, FrameSplitter, ACK, NAK};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Endpoint, RetranslatorConfig};
use crate::error::RelayError;
use crate::publisher::UpdatePublisher;
use crate::queue::QueueSender;
use crate::registry::EventStore;

/// Pause after a failed accept, doubled per consecutive failure
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Everything a decoded frame touches
#[derive(Clone)]
pub struct Ingest {
    store: Arc<EventStore>,
    queue: QueueSender,
    publisher: Arc<UpdatePublisher>,
}

impl Ingest {
    /// Bundle the store, outbound queue and publisher
    pub fn new(store: Arc<EventStore>, queue: QueueSender, publisher: Arc<UpdatePublisher>) -> Self {
        Self {
            store,
            queue,
            publisher,
        }
    }

    /// Decode one frame and apply it
    ///
    /// On success the event is stored, offered to the outbound queue and
    /// published while the store is still locked, so the queue and both feeds
    /// follow log order across connections. A frame that fails to decode
    /// changes nothing.
    pub fn process_frame(&self, raw: &[u8]) -> Result<Arc<Event>, DecodeError> {
        let event = decode_frame(raw, Utc::now())?;
        let (event, _) = self.store.update_then(event, |event, device| {
            self.queue.enqueue(Arc::clone(event));
            self.publisher.publish(device.clone(), Arc::clone(event));
        });
        Ok(event)
    }
}

#[derive(Debug, Clone, Copy)]
struct PanelSettings {
    ack_panels: bool,
    read_idle: Duration,
    write: Duration,
}

/// Accepts panel connections
pub struct InboundListener {
    listener: TcpListener,
    ingest: Ingest,
    settings: PanelSettings,
}

impl InboundListener {
    /// Bind the listening socket
    pub async fn bind(
        addr: &Endpoint,
        ingest: Ingest,
        config: &RetranslatorConfig,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr.to_string())
            .await
            .map_err(|source| RelayError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!("Listening for panels on {}", addr);

        Ok(Self {
            listener,
            ingest,
            settings: PanelSettings {
                ack_panels: config.ack_panels,
                read_idle: config.timeouts.read_idle(),
                write: config.timeouts.write(),
            },
        })
    }

    /// The address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires, then wait for every
    /// connection task to finish
    pub async fn run(self, cancel: CancellationToken) {
        let mut connections = JoinSet::new();
        let mut backoff = ACCEPT_BACKOFF_MIN;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Panel connection task panicked: {}", e);
                        }
                    }
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        backoff = ACCEPT_BACKOFF_MIN;
                        info!("Panel connected from {}", peer);
                        connections.spawn(handle_panel(
                            stream,
                            peer,
                            self.ingest.clone(),
                            self.settings,
                            cancel.child_token(),
                        ));
                    }
                    Err(e) => {
                        warn!("Accept failed: {}, retrying in {:?}", e, backoff);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                    }
                },
            }
        }

        debug!("Listener stopping, waiting for {} panel connections", connections.len());
        while connections.join_next().await.is_some() {}
        info!("Panel listener stopped");
    }
}

async fn handle_panel(
    mut stream: TcpStream,
    peer: SocketAddr,
    ingest: Ingest,
    settings: PanelSettings,
    cancel: CancellationToken,
) {
    let mut splitter = FrameSplitter::new();
    let mut buffer = vec![0u8; 1024];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = timeout(settings.read_idle, stream.read(&mut buffer)) => read,
        };

        let n = match read {
            Ok(Ok(0)) => {
                info!("Panel {} disconnected", peer);
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Read error from panel {}: {}", peer, e);
                break;
            }
            Err(_) => {
                info!("Panel {} idle for {:?}, closing", peer, settings.read_idle);
                break;
            }
        };

        splitter.push_bytes(&buffer[..n]);
        while let Some(frame) = splitter.next_frame() {
            debug!("Panel {} RX: {}", peer, String::from_utf8_lossy(&frame));

            let reply = match ingest.process_frame(&frame) {
                Ok(event) => {
                    debug!("Event {} from device {}", event.code(), event.account());
                    ACK
                }
                Err(e) => {
                    warn!("Rejected frame from panel {}: {}", peer, e);
                    NAK
                }
            };

            if settings.ack_panels {
                match timeout(settings.write, stream.write_all(&[reply])).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Write error to panel {}: {}", peer, e);
                        return;
                    }
                    Err(_) => {
                        warn!("Write to panel {} timed out", peer);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::retranslation_queue;

    fn ingest(capacity: usize) -> (Ingest, crate::queue::QueueReceiver, Arc<EventStore>) {
        let store = Arc::new(EventStore::new(100, 100));
        let (tx, rx) = retranslation_queue(capacity);
        let publisher = Arc::new(UpdatePublisher::new(16));
        (Ingest::new(Arc::clone(&store), tx, publisher), rx, store)
    }

    #[test]
    fn test_process_frame_updates_everything() {
        let (ingest, mut queue, store) = ingest(4);
        let event = ingest.process_frame(b"00000001234E13001002").unwrap();

        assert_eq!(event.account(), "1234");
        assert_eq!(store.device("1234").unwrap().last_event_code, "E130");
        assert_eq!(queue.try_recv().unwrap().code(), "E130");
    }

    #[test]
    fn test_short_frame_changes_nothing() {
        let (ingest, mut queue, store) = ingest(4);
        let result = ingest.process_frame(b"00000001234E130");

        assert!(matches!(result, Err(DecodeError::FrameTooShort { .. })));
        assert!(store.is_empty());
        assert!(store.devices().is_empty());
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_still_records_event() {
        let (ingest, _queue, store) = ingest(1);
        ingest.process_frame(b"00000001234E13001002").unwrap();
        ingest.process_frame(b"00000001234R13001002").unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(ingest.queue.rejected(), 1);
    }

    #[tokio::test]
    async fn test_device_updates_follow_registry_order() {
        let store = Arc::new(EventStore::new(1_000, 1_000));
        let (tx, _rx) = retranslation_queue(1_000);
        let publisher = Arc::new(UpdatePublisher::new(1_024));
        let ingest = Ingest::new(Arc::clone(&store), tx, Arc::clone(&publisher));
        let mut devices = publisher.subscribe_devices();
        let mut events = publisher.subscribe_events();

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let ingest = ingest.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        ingest.process_frame(b"00000001234E13001002").unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        for expected in 1..=400u64 {
            assert_eq!(devices.recv().await.unwrap().event_count, expected);
        }
        assert_eq!(store.device("1234").unwrap().event_count, 400);

        let logged = store.retained_events();
        for stored in &logged {
            assert!(Arc::ptr_eq(stored, &events.recv().await.unwrap()));
        }
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let (ingest, _queue, _store) = ingest(4);
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = InboundListener::bind(
            &Endpoint::new("127.0.0.1", port),
            ingest,
            &RetranslatorConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(RelayError::Bind { .. })));
    }
}
