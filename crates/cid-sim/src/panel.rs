//! Virtual alarm panel

use std::io;
use std::time::Duration;

use cid_protocol::FRAME_TERMINATOR;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::debug;

/// Header used when none is given
pub const DEFAULT_HEADER: &str = "5010180";

/// Build a frame body (no terminator) from its fields
///
/// Fields are concatenated as given, so a test can build short or malformed
/// frames on purpose.
pub fn build_frame(header: &str, account: &str, code: &str, group: &str, zone: &str) -> Vec<u8> {
    format!("{header}{account}{code}{group}{zone}").into_bytes()
}

/// A panel connected to the retranslator's listener
pub struct VirtualPanel {
    stream: TcpStream,
    header: String,
    account: String,
}

impl VirtualPanel {
    /// Connect as `account` using the default header
    pub async fn connect(addr: impl ToSocketAddrs, account: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            header: DEFAULT_HEADER.to_string(),
            account: account.to_string(),
        })
    }

    /// Use a different header for subsequent events
    pub fn set_header(&mut self, header: &str) {
        self.header = header.to_string();
    }

    /// Account this panel reports as
    pub fn account(&self) -> &str {
        &self.account
    }

    /// The frame body [`send_event`](Self::send_event) would send
    pub fn frame_for(&self, code: &str, group: &str, zone: &str) -> Vec<u8> {
        build_frame(&self.header, &self.account, code, group, zone)
    }

    /// Send one event from this panel's account
    pub async fn send_event(&mut self, code: &str, group: &str, zone: &str) -> io::Result<()> {
        let frame = self.frame_for(code, group, zone);
        self.send_frame(&frame).await
    }

    /// Send an arbitrary frame body followed by the terminator
    pub async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        debug!("Panel {} TX: {}", self.account, String::from_utf8_lossy(frame));
        let mut out = Vec::with_capacity(frame.len() + 1);
        out.extend_from_slice(frame);
        out.push(FRAME_TERMINATOR);
        self.stream.write_all(&out).await?;
        self.stream.flush().await
    }

    /// Send raw bytes exactly as given
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Wait up to `wait` for a single reply byte (ACK / NAK)
    ///
    /// `Ok(None)` means nothing arrived in time.
    pub async fn read_reply(&mut self, wait: Duration) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match timeout(wait, self.stream.read(&mut byte)).await {
            Ok(Ok(0)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "listener closed the connection",
            )),
            Ok(Ok(_)) => Ok(Some(byte[0])),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }
}
