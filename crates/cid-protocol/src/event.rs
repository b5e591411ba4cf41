//! Decoded Contact ID event

use chrono::{DateTime, Utc};

use crate::frame::MIN_FRAME_LEN;
use crate::priority::EventPriority;

/// Event qualifier (first character of the code field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Qualifier {
    /// `E` or `1` - new event / opening
    New,
    /// `R` or `3` - restore / closing
    Restore,
    /// `P` or `6` - previously reported condition still present
    Repeat,
    /// Anything else, kept verbatim
    Other(char),
}

impl Qualifier {
    /// Classify the qualifier character
    pub fn from_char(c: char) -> Self {
        match c {
            'E' | '1' => Self::New,
            'R' | '3' => Self::Restore,
            'P' | '6' => Self::Repeat,
            other => Self::Other(other),
        }
    }

    /// Whether this qualifier reports a restore
    pub fn is_restore(&self) -> bool {
        matches!(self, Self::Restore)
    }
}

/// A decoded alarm event
///
/// Built by [`decode_frame`](crate::decode_frame) and never modified afterwards.
/// The raw frame is kept byte-for-byte so it can be relayed unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Event {
    /// Arrival time at the listener
    pub(crate) received_at: DateTime<Utc>,
    /// The complete frame as received, without its terminator
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_raw"))]
    pub(crate) raw: Vec<u8>,
    /// Account / device field, offset 7..11
    pub(crate) account: String,
    /// Qualifier derived from the first character of the code field
    pub(crate) qualifier: Qualifier,
    /// Qualifier + event code field, offset 11..15 (e.g. `E130`)
    pub(crate) code: String,
    /// Group / partition field, offset 15..17
    pub(crate) group: String,
    /// Zone / user field, offset 17..20
    pub(crate) zone: String,
}

impl Event {
    /// Return this event with a different arrival time
    ///
    /// Used before the event is stored, to keep the log in arrival order when
    /// clocks of concurrent connections interleave.
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Arrival time at the listener
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// The complete frame as received
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The raw frame as text (lossy for any non-ASCII trailer bytes)
    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    /// Account / device identifier
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Event qualifier
    pub fn qualifier(&self) -> Qualifier {
        self.qualifier
    }

    /// Qualifier + event code, e.g. `E130`
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The 3-character event number without its qualifier, e.g. `130`
    pub fn event_number(&self) -> &str {
        self.code.get(1..).unwrap_or_default()
    }

    /// Group / partition number
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Zone / user number
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Header bytes preceding the account field
    pub fn header(&self) -> &[u8] {
        &self.raw[..7]
    }

    /// Bytes after the fixed field region (checksum or receiver trailer).
    ///
    /// These are not validated.
    pub fn trailer(&self) -> &[u8] {
        &self.raw[MIN_FRAME_LEN..]
    }

    /// Display priority derived from the code prefix
    pub fn priority(&self) -> EventPriority {
        EventPriority::from_code(&self.code)
    }
}

#[cfg(feature = "serde")]
fn serialize_raw<S>(raw: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(raw))
}
