//! Contact ID Protocol Library
//!
//! This crate provides decoding and encoding for Contact ID alarm event
//! reports as they arrive from alarm panels (or panel-side receivers) over TCP:
//!
//! - **Frame decoding**: fixed-offset text frames carrying account, qualifier,
//!   event code, group, and zone
//! - **Streaming framing**: splitting a TCP byte stream into frames on the
//!   DC4 / CR / LF terminators
//! - **Event dictionary**: code → (type, description) lookup used when
//!   presenting events
//! - **Upstream encoding**: pluggable re-encoding of frames for the upstream
//!   monitoring receiver
//!
//! # Frame Layout
//!
//! ```text
//! offset  0      7      11     15   17    20
//!         |header|acct  |q+code|grp |zone |trailer...
//!         5010 18 1234   E130   01   002   ...
//! ```
//!
//! Anything past offset 20 is kept in the raw frame but never validated.
//!
//! # Example
//!
//! ```rust
//! use cid_protocol::{decode_frame, EventPriority, FrameSplitter};
//!
//! let mut splitter = FrameSplitter::new();
//! splitter.push_bytes(b"00000001234E13001002\x14");
//!
//! let raw = splitter.next_frame().unwrap();
//! let event = decode_frame(&raw, chrono::Utc::now()).unwrap();
//! assert_eq!(event.account(), "1234");
//! assert_eq!(event.code(), "E130");
//! assert_eq!(event.priority(), EventPriority::Ok);
//! ```

pub mod dictionary;
pub mod encoder;
pub mod error;
pub mod event;
pub mod frame;
pub mod priority;

pub use dictionary::{EventDictionary, EventDictionaryEntry};
pub use encoder::{HeaderRewrite, PassThrough, UpstreamEncoder};
pub use error::{DecodeError, DictionaryError, EncodeError};
pub use event::{Event, Qualifier};
pub use frame::{decode_frame, FrameSplitter, MIN_FRAME_LEN};
pub use priority::EventPriority;

/// Frame terminator used by panel receivers and upstream receivers (DC4)
pub const FRAME_TERMINATOR: u8 = 0x14;

/// Positive acknowledgement byte
pub const ACK: u8 = 0x06;

/// Negative acknowledgement byte
pub const NAK: u8 = 0x15;

/// Identifies how frames are encoded for the upstream receiver
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum UpstreamDialect {
    /// Relay the frame exactly as received
    #[default]
    PassThrough,
    /// Replace the 7-character header with a fixed receiver/line prefix
    HeaderRewrite {
        /// Replacement header, exactly 7 ASCII characters
        header: String,
    },
}

impl UpstreamDialect {
    /// Returns a human-readable name for the dialect
    pub fn name(&self) -> &'static str {
        match self {
            UpstreamDialect::PassThrough => "pass-through",
            UpstreamDialect::HeaderRewrite { .. } => "header rewrite",
        }
    }
}

/// Create an encoder for the given upstream dialect
pub fn create_upstream_encoder(
    dialect: &UpstreamDialect,
) -> Result<Box<dyn UpstreamEncoder>, EncodeError> {
    match dialect {
        UpstreamDialect::PassThrough => Ok(Box::new(PassThrough)),
        UpstreamDialect::HeaderRewrite { header } => Ok(Box::new(HeaderRewrite::new(header)?)),
    }
}
