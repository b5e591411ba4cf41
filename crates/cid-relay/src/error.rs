//! Error types for the retranslation engine

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the retranslation engine
#[derive(Debug, Error)]
pub enum RelayError {
    /// The panel listener could not bind its socket
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Configuration is invalid
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Upstream encoder could not be built from the configured dialect
    #[error("encoder error: {0}")]
    Encoder(#[from] cid_protocol::EncodeError),

    /// Connecting to the upstream receiver timed out
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Upstream address
        addr: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Writing a frame upstream timed out
    #[error("upstream write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The upstream receiver did not acknowledge a frame in time
    #[error("upstream acknowledgement timed out after {0:?}")]
    AckTimeout(Duration),

    /// The upstream receiver rejected a frame
    #[error("upstream receiver rejected frame (NAK)")]
    Nak,

    /// The upstream receiver closed the connection
    #[error("upstream receiver at {0} closed the connection")]
    UpstreamClosed(String),

    /// The retranslation client did not answer a stats request in time
    #[error("queue stats request timed out after {0:?}")]
    StatsTimeout(Duration),

    /// The retranslation client task has stopped
    #[error("retranslation client is not running")]
    ClientStopped,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
