//! Contact ID frame decoding and stream framing
//!
//! Frames are fixed-offset ASCII text. The field positions never vary between
//! frames, so they are declared once here instead of being searched for.
//!
//! # Format
//! - `[0..7]`   header (receiver / line number, reserved)
//! - `[7..11]`  account / device
//! - `[11..15]` qualifier + event code
//! - `[15..17]` group
//! - `[17..20]` zone
//! - `[20..]`   trailer, kept but not validated
//!
//! On the wire frames end with DC4 (0x14); CR and LF are accepted too.

use std::ops::Range;

use chrono::{DateTime, Utc};

use crate::error::DecodeError;
use crate::event::{Event, Qualifier};

/// Account / device field
pub const ACCOUNT: Range<usize> = 7..11;
/// Qualifier + event code field
pub const CODE: Range<usize> = 11..15;
/// Group field
pub const GROUP: Range<usize> = 15..17;
/// Zone field
pub const ZONE: Range<usize> = 17..20;

/// Shortest frame that carries every fixed field
pub const MIN_FRAME_LEN: usize = ZONE.end;

/// Maximum buffered frame length before the splitter gives up on a frame
const MAX_FRAME_LEN: usize = 256;

/// Decode one frame (without terminator) into an [`Event`]
///
/// Decoding does not consult the event dictionary: an unknown code still
/// produces an event.
pub fn decode_frame(raw: &[u8], received_at: DateTime<Utc>) -> Result<Event, DecodeError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(DecodeError::FrameTooShort {
            len: raw.len(),
            min: MIN_FRAME_LEN,
        });
    }

    if let Some((offset, &byte)) = raw[..MIN_FRAME_LEN]
        .iter()
        .enumerate()
        .find(|(_, b)| !b.is_ascii())
    {
        return Err(DecodeError::Malformed { offset, byte });
    }

    let field = |range: Range<usize>| String::from_utf8_lossy(&raw[range]).into_owned();
    let code = field(CODE);
    let qualifier = Qualifier::from_char(char::from(raw[CODE.start]));

    Ok(Event {
        received_at,
        raw: raw.to_vec(),
        account: field(ACCOUNT),
        qualifier,
        code,
        group: field(GROUP),
        zone: field(ZONE),
    })
}

/// Check whether a byte terminates a frame
fn is_terminator(b: u8) -> bool {
    matches!(b, crate::FRAME_TERMINATOR | b'\r' | b'\n')
}

/// Streaming frame splitter
///
/// Accumulates bytes read from a socket and yields complete frames with their
/// terminators stripped. Empty frames (e.g. the LF of a CR LF pair) are skipped.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buffer: Vec<u8>,
}

impl FrameSplitter {
    /// Create a new splitter
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
        }
    }

    /// Push raw bytes into the splitter buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // A frame this long without a terminator is garbage
        if self.buffer.len() > MAX_FRAME_LEN && !self.buffer.iter().any(|&b| is_terminator(b)) {
            tracing::warn!(
                "Discarding {} unterminated bytes from frame buffer",
                self.buffer.len()
            );
            self.buffer.clear();
        }
    }

    /// Try to extract the next complete frame
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let term_pos = self.buffer.iter().position(|&b| is_terminator(b))?;
            let mut frame: Vec<u8> = self.buffer.drain(..=term_pos).collect();
            frame.pop();
            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }

    /// Number of buffered bytes not yet part of a complete frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the internal buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BURGLARY: &[u8] = b"00000001234E13001002";

    #[test]
    fn test_decode_burglary_frame() {
        let event = decode_frame(BURGLARY, Utc::now()).unwrap();
        assert_eq!(event.account(), "1234");
        assert_eq!(event.code(), "E130");
        assert_eq!(event.group(), "01");
        assert_eq!(event.zone(), "002");
        assert_eq!(event.qualifier(), Qualifier::New);
        assert_eq!(event.priority().rank(), 3);
        assert!(event.trailer().is_empty());
    }

    #[test]
    fn test_decode_keeps_trailer() {
        let event = decode_frame(b"00000001234E13001002A7", Utc::now()).unwrap();
        assert_eq!(event.raw(), b"00000001234E13001002A7");
        assert_eq!(event.trailer(), b"A7");
    }

    #[test]
    fn test_decode_too_short() {
        let err = decode_frame(b"00000001234E1300100", Utc::now()).unwrap_err();
        assert_eq!(err, DecodeError::FrameTooShort { len: 19, min: 20 });
    }

    #[test]
    fn test_decode_rejects_non_ascii_fields() {
        let mut frame = BURGLARY.to_vec();
        frame[8] = 0xC3;
        let err = decode_frame(&frame, Utc::now()).unwrap_err();
        assert_eq!(err, DecodeError::Malformed { offset: 8, byte: 0xC3 });
    }

    #[test]
    fn test_non_ascii_trailer_is_accepted() {
        let mut frame = BURGLARY.to_vec();
        frame.extend_from_slice(&[0xFF, 0xFE]);
        let event = decode_frame(&frame, Utc::now()).unwrap();
        assert_eq!(event.trailer(), &[0xFF, 0xFE]);
    }

    #[test]
    fn test_streaming_split() {
        let mut splitter = FrameSplitter::new();

        splitter.push_bytes(b"00000001234E1");
        assert!(splitter.next_frame().is_none());

        splitter.push_bytes(b"3001002\x14");
        assert_eq!(splitter.next_frame().as_deref(), Some(BURGLARY));
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_split_multiple_terminators() {
        let mut splitter = FrameSplitter::new();
        splitter.push_bytes(b"first\r\nsecond\x14\x14third\n");

        assert_eq!(splitter.next_frame().as_deref(), Some(&b"first"[..]));
        assert_eq!(splitter.next_frame().as_deref(), Some(&b"second"[..]));
        assert_eq!(splitter.next_frame().as_deref(), Some(&b"third"[..]));
        assert!(splitter.next_frame().is_none());
    }

    #[test]
    fn test_overlong_garbage_is_discarded() {
        let mut splitter = FrameSplitter::new();
        splitter.push_bytes(&[b'x'; MAX_FRAME_LEN + 1]);
        assert_eq!(splitter.pending(), 0);

        splitter.push_bytes(BURGLARY);
        splitter.push_bytes(b"\x14");
        assert_eq!(splitter.next_frame().as_deref(), Some(BURGLARY));
    }

    fn ascii_field(len: usize) -> impl Strategy<Value = String> {
        proptest::collection::vec(0x21u8..0x7F, len)
            .prop_map(|bytes| String::from_utf8(bytes).unwrap())
    }

    proptest! {
        #[test]
        fn fields_come_from_fixed_offsets(
            header in ascii_field(7),
            account in ascii_field(4),
            code in ascii_field(4),
            group in ascii_field(2),
            zone in ascii_field(3),
            trailer in ascii_field(3),
        ) {
            let frame = format!("{header}{account}{code}{group}{zone}{trailer}");
            let event = decode_frame(frame.as_bytes(), Utc::now()).unwrap();

            prop_assert_eq!(event.account(), &frame[7..11]);
            prop_assert_eq!(event.code(), &frame[11..15]);
            prop_assert_eq!(event.group(), &frame[15..17]);
            prop_assert_eq!(event.zone(), &frame[17..20]);
        }

        #[test]
        fn short_frames_always_fail(frame in proptest::collection::vec(any::<u8>(), 0..MIN_FRAME_LEN)) {
            let is_too_short = matches!(
                decode_frame(&frame, Utc::now()),
                Err(DecodeError::FrameTooShort { .. })
            );
            prop_assert!(is_too_short);
        }
    }
}
