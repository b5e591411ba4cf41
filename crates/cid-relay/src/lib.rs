//! Contact ID Retranslation Engine
//!
//! This crate receives alarm event frames from panels over TCP, keeps
//! per-device state and a bounded event history, and relays every event to a
//! single upstream monitoring receiver.
//!
//! # Architecture
//!
//! ```text
//! panel ──TCP──▶ InboundListener ──▶ Ingest ──┬─▶ EventStore (devices + log)
//!                 (task per conn)             ├─▶ outbound queue ──▶ client actor ──TCP──▶ upstream
//!                                             └─▶ UpdatePublisher ──▶ subscribers
//! ```
//!
//! - The listener and the client fail independently: a dead upstream never
//!   blocks panels, a full queue drops events instead of waiting
//! - The client is an actor that owns the upstream socket and its counters;
//!   stats are requested over a channel with a bounded wait
//! - Subscribers each get their own cursor into a broadcast ring
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cid_protocol::EventDictionary;
//! use cid_relay::{Retranslator, RetranslatorConfig};
//!
//! # async fn run() -> Result<(), cid_relay::RelayError> {
//! let retranslator = Retranslator::startup(RetranslatorConfig::default(), EventDictionary::new()).await?;
//!
//! let mut updates = retranslator.subscribe_event_updates();
//! if let Some(event) = updates.recv().await {
//!     println!("{} from {}", event.code(), event.account());
//! }
//!
//! let stats = retranslator.queue_stats(Duration::from_millis(500)).await?;
//! println!("accepted {}, uptime {}", stats.accepted, stats.uptime_string());
//!
//! retranslator.shutdown(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod enrich;
pub mod error;
pub mod listener;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod service;
pub mod state;

// Re-export the service facade
pub use service::{Retranslator, ShutdownReport};

pub use client::{spawn_retranslation_client, ClientCommand, ClientHandle};
pub use config::{Endpoint, ReconnectConfig, RetranslatorConfig, TimeoutConfig};
pub use enrich::{enrich_events, enrich_latest, EnrichedEvent, EnrichedSubscription};
pub use error::RelayError;
pub use listener::{InboundListener, Ingest};
pub use publisher::{Subscription, UpdatePublisher};
pub use queue::{retranslation_queue, QueueReceiver, QueueSender};
pub use registry::EventStore;
pub use state::{ClientState, Device, QueueStats};
