//! Contact ID Simulation Library
//!
//! This crate provides simulated endpoints for exercising the retranslator
//! over real TCP without panels or a monitoring receiver:
//!
//! - **VirtualPanel**: connects to the panel listener and sends frames
//! - **VirtualReceiver**: stands in for the upstream receiver, recording what
//!   it is sent, acknowledging on request, and dropping the connection on demand
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cid_sim::{AckMode, VirtualPanel, VirtualReceiver};
//!
//! # async fn run(listener: std::net::SocketAddr) -> std::io::Result<()> {
//! let mut receiver = VirtualReceiver::start(AckMode::Ack).await?;
//!
//! let mut panel = VirtualPanel::connect(listener, "1234").await?;
//! panel.send_event("E130", "01", "002").await?;
//!
//! let relayed = receiver.next_frame(Duration::from_secs(1)).await;
//! # Ok(())
//! # }
//! ```

pub mod panel;
pub mod receiver;

pub use panel::{build_frame, VirtualPanel, DEFAULT_HEADER};
pub use receiver::{AckMode, ReceiverCommand, VirtualReceiver};
