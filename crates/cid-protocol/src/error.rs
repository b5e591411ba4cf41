//! Error types for Contact ID decoding, encoding, and dictionary loading

use thiserror::Error;

/// Errors that can occur while decoding a frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame is shorter than the fixed field region
    #[error("frame too short: {len} bytes (minimum {min})")]
    FrameTooShort { len: usize, min: usize },

    /// Fixed field region contains bytes that are not ASCII
    #[error("malformed frame: non-ASCII byte 0x{byte:02X} at offset {offset}")]
    Malformed { offset: usize, byte: u8 },

    /// Event code is not present in the event dictionary
    #[error("unknown event code: {0}")]
    UnknownCode(String),
}

/// Errors that can occur while building an upstream encoder
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Replacement header has the wrong length or is not ASCII
    #[error("invalid header {header:?}: expected {expected} ASCII characters")]
    InvalidHeader { header: String, expected: usize },
}

/// Errors that can occur while loading an event dictionary
#[derive(Debug, Error)]
pub enum DictionaryError {
    /// Dictionary source is not valid JSON or has an unexpected shape
    #[cfg(feature = "serde")]
    #[error("invalid dictionary JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// An entry has an empty or non-ASCII code
    #[error("invalid event code {0:?}")]
    InvalidCode(String),
}
