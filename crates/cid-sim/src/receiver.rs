//! Virtual upstream monitoring receiver
//!
//! Accepts one retranslator connection at a time. Every frame it receives is
//! recorded and answered according to the current [`AckMode`]. Tests drive it
//! through commands, e.g. to drop the connection and force a reconnect.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use cid_protocol::{FrameSplitter, ACK, NAK};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How the receiver answers each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Reply ACK
    #[default]
    Ack,
    /// Reply NAK
    Nak,
    /// Never reply
    Silent,
}

/// Commands sent to the receiver task
#[derive(Debug, Clone)]
pub enum ReceiverCommand {
    /// Close the current connection (the listener keeps accepting)
    DropConnection,
    /// Change how frames are answered
    SetAckMode(AckMode),
    /// Stop the receiver
    Shutdown,
}

/// A simulated upstream receiver on a loopback port
pub struct VirtualReceiver {
    local_addr: SocketAddr,
    cmd_tx: mpsc::Sender<ReceiverCommand>,
    frames_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    connections: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl VirtualReceiver {
    /// Start on an ephemeral loopback port
    pub async fn start(ack: AckMode) -> io::Result<Self> {
        Self::bind("127.0.0.1:0", ack).await
    }

    /// Start on a specific address
    pub async fn bind(addr: &str, ack: AckMode) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (conn_tx, connections) = watch::channel(0);

        info!("Virtual receiver listening on {}", local_addr);
        let task = tokio::spawn(run_receiver(listener, cmd_rx, frames_tx, conn_tx, ack));

        Ok(Self {
            local_addr,
            cmd_tx,
            frames_rx,
            connections,
            task,
        })
    }

    /// Address the retranslator should connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next recorded frame body (terminator stripped), waiting up to `wait`
    pub async fn next_frame(&mut self, wait: Duration) -> Option<Vec<u8>> {
        timeout(wait, self.frames_rx.recv()).await.ok().flatten()
    }

    /// Close the current connection
    pub async fn drop_connection(&self) {
        let _ = self.cmd_tx.send(ReceiverCommand::DropConnection).await;
    }

    /// Change how frames are answered
    pub async fn set_ack_mode(&self, mode: AckMode) {
        let _ = self.cmd_tx.send(ReceiverCommand::SetAckMode(mode)).await;
    }

    /// Connections accepted so far
    pub fn connections(&self) -> u64 {
        *self.connections.borrow()
    }

    /// Wait until at least `count` connections have been accepted
    pub async fn wait_for_connections(&mut self, count: u64, wait: Duration) -> bool {
        matches!(
            timeout(wait, self.connections.wait_for(|n| *n >= count)).await,
            Ok(Ok(_))
        )
    }

    /// Stop the receiver and close its socket
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(ReceiverCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

async fn read_connection(conn: &mut Option<TcpStream>, buf: &mut [u8]) -> io::Result<usize> {
    match conn {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn run_receiver(
    listener: TcpListener,
    mut cmd_rx: mpsc::Receiver<ReceiverCommand>,
    frames_tx: mpsc::UnboundedSender<Vec<u8>>,
    conn_tx: watch::Sender<u64>,
    mut ack: AckMode,
) {
    let mut conn: Option<TcpStream> = None;
    let mut splitter = FrameSplitter::new();
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ReceiverCommand::DropConnection) => {
                    if conn.take().is_some() {
                        info!("Virtual receiver dropping connection");
                    }
                    splitter.clear();
                }
                Some(ReceiverCommand::SetAckMode(mode)) => ack = mode,
                Some(ReceiverCommand::Shutdown) | None => break,
            },

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Virtual receiver accepted {}", peer);
                    conn = Some(stream);
                    splitter.clear();
                    conn_tx.send_modify(|n| *n += 1);
                }
                Err(e) => warn!("Virtual receiver accept failed: {}", e),
            },

            read = read_connection(&mut conn, &mut buf) => match read {
                Ok(0) => {
                    debug!("Virtual receiver connection closed by peer");
                    conn = None;
                }
                Ok(n) => {
                    splitter.push_bytes(&buf[..n]);
                    while let Some(frame) = splitter.next_frame() {
                        debug!("Virtual receiver RX: {}", String::from_utf8_lossy(&frame));
                        let _ = frames_tx.send(frame);

                        let reply = match ack {
                            AckMode::Ack => ACK,
                            AckMode::Nak => NAK,
                            AckMode::Silent => continue,
                        };
                        if let Some(stream) = conn.as_mut() {
                            if let Err(e) = stream.write_all(&[reply]).await {
                                warn!("Virtual receiver reply failed: {}", e);
                                conn = None;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Virtual receiver read error: {}", e);
                    conn = None;
                }
            },
        }
    }

    info!("Virtual receiver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_acknowledges() {
        let mut receiver = VirtualReceiver::start(AckMode::Ack).await.unwrap();
        let mut client = TcpStream::connect(receiver.local_addr()).await.unwrap();

        client.write_all(b"50101801234E13001002\x14").await.unwrap();
        let frame = receiver.next_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame, b"50101801234E13001002");

        let mut reply = [0u8; 1];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], ACK);
        assert_eq!(receiver.connections(), 1);

        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn test_drop_connection_closes_socket() {
        let mut receiver = VirtualReceiver::start(AckMode::Silent).await.unwrap();
        let mut client = TcpStream::connect(receiver.local_addr()).await.unwrap();
        assert!(receiver.wait_for_connections(1, Duration::from_secs(1)).await);

        receiver.drop_connection().await;
        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
