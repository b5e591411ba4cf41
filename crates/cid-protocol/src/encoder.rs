//! Upstream frame encoders
//!
//! The upstream receiver normally accepts frames exactly as the panel sent
//! them. Receivers that expect their own line/receiver numbering get the
//! header rewritten instead. Both append the DC4 terminator.

use crate::error::EncodeError;
use crate::event::Event;
use crate::FRAME_TERMINATOR;

/// Length of the header that precedes the account field
pub const HEADER_LEN: usize = 7;

/// Encodes a decoded event into bytes for the upstream receiver
pub trait UpstreamEncoder: Send + Sync {
    /// Encode this event to its upstream wire format, terminator included
    fn encode(&self, event: &Event) -> Vec<u8>;
}

/// Relays the raw frame unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl UpstreamEncoder for PassThrough {
    fn encode(&self, event: &Event) -> Vec<u8> {
        let mut out = Vec::with_capacity(event.raw().len() + 1);
        out.extend_from_slice(event.raw());
        out.push(FRAME_TERMINATOR);
        out
    }
}

/// Replaces the 7-character header, keeping every other byte
#[derive(Debug, Clone)]
pub struct HeaderRewrite {
    header: [u8; HEADER_LEN],
}

impl HeaderRewrite {
    /// Create a rewrite encoder; the header must be exactly 7 ASCII characters
    pub fn new(header: &str) -> Result<Self, EncodeError> {
        let invalid = || EncodeError::InvalidHeader {
            header: header.to_string(),
            expected: HEADER_LEN,
        };

        if !header.is_ascii() {
            return Err(invalid());
        }
        let header: [u8; HEADER_LEN] = header.as_bytes().try_into().map_err(|_| invalid())?;
        Ok(Self { header })
    }
}

impl UpstreamEncoder for HeaderRewrite {
    fn encode(&self, event: &Event) -> Vec<u8> {
        let raw = event.raw();
        let mut out = Vec::with_capacity(raw.len() + 1);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&raw[HEADER_LEN..]);
        out.push(FRAME_TERMINATOR);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_upstream_encoder, decode_frame, UpstreamDialect};
    use chrono::Utc;

    #[test]
    fn test_pass_through() {
        let event = decode_frame(b"50101801234E13001002XY", Utc::now()).unwrap();
        assert_eq!(PassThrough.encode(&event), b"50101801234E13001002XY\x14");
    }

    #[test]
    fn test_header_rewrite() {
        let event = decode_frame(b"50101801234E13001002", Utc::now()).unwrap();
        let encoder = HeaderRewrite::new("5020 18").unwrap();
        assert_eq!(encoder.encode(&event), b"5020 181234E13001002\x14");
    }

    #[test]
    fn test_header_rewrite_validates_length() {
        assert!(matches!(
            HeaderRewrite::new("12345"),
            Err(EncodeError::InvalidHeader { expected: 7, .. })
        ));
        assert!(HeaderRewrite::new("50201é").is_err());
    }

    #[test]
    fn test_create_from_dialect() {
        let event = decode_frame(b"00000001234E13001002", Utc::now()).unwrap();
        let encoder = create_upstream_encoder(&UpstreamDialect::HeaderRewrite {
            header: "1111111".into(),
        })
        .unwrap();
        assert_eq!(encoder.encode(&event), b"11111111234E13001002\x14");

        let encoder = create_upstream_encoder(&UpstreamDialect::default()).unwrap();
        assert_eq!(encoder.encode(&event), b"00000001234E13001002\x14");
    }
}
