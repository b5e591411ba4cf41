//! Retranslation client actor
//!
//! A single task owns the upstream socket and every delivery counter. It
//! drains the outbound queue while connected, reconnects with exponential
//! backoff when the connection is lost, and answers stats requests at any
//! point of that cycle, including while a connect or write is in progress.
//!
//! # Example
//!
//! ```rust,ignore
//! use cid_relay::client::spawn_retranslation_client;
//! use cid_relay::queue::retranslation_queue;
//!
//! let (queue_tx, queue_rx) = retranslation_queue(config.queue_capacity);
//! let (handle, task) = spawn_retranslation_client(&config, encoder, queue_rx, cancel.clone());
//!
//! let stats = handle.queue_stats(config.timeouts.stats()).await?;
//! ```

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cid_protocol::{Event, UpstreamEncoder, ACK, NAK};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Endpoint, ReconnectConfig, RetranslatorConfig, TimeoutConfig};
use crate::error::RelayError;
use crate::queue::QueueReceiver;
use crate::state::{ClientState, QueueStats};

/// Commands sent to the retranslation client
#[derive(Debug)]
pub enum ClientCommand {
    /// Snapshot the counters
    QueryStats {
        /// Channel to send the snapshot back on
        response: oneshot::Sender<QueueStats>,
    },
}

/// Cloneable handle for talking to a running retranslation client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<ClientCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Ask the client for a counter snapshot, waiting at most `bound`
    pub async fn queue_stats(&self, bound: Duration) -> Result<QueueStats, RelayError> {
        let (response, reply) = oneshot::channel();
        let request = async {
            self.cmd_tx
                .send(ClientCommand::QueryStats { response })
                .await
                .map_err(|_| RelayError::ClientStopped)?;
            reply.await.map_err(|_| RelayError::ClientStopped)
        };

        timeout(bound, request)
            .await
            .map_err(|_| RelayError::StatsTimeout(bound))?
    }
}

/// Spawn the retranslation client on the current runtime
pub fn spawn_retranslation_client(
    config: &RetranslatorConfig,
    encoder: Box<dyn UpstreamEncoder>,
    queue: QueueReceiver,
    cancel: CancellationToken,
) -> (ClientHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let worker = ClientWorker {
        upstream: config.upstream.clone(),
        timeouts: config.timeouts.clone(),
        reconnect: config.reconnect.clone(),
        encoder,
        queue,
        cmd_rx,
        cancel,
        state: ClientState::Disconnected,
        accepted: 0,
        reconnects: 0,
        dropped_in_flight: 0,
        connected_at: None,
        ever_connected: false,
        pending: None,
    };
    (ClientHandle::new(cmd_tx), tokio::spawn(worker.run()))
}

/// An event taken off the queue that has not been delivered yet
struct InFlight {
    event: Arc<Event>,
    retried: bool,
}

/// How a connected session ended
enum SessionEnd {
    Lost(RelayError),
    Stopped,
}

struct ClientWorker {
    upstream: Endpoint,
    timeouts: TimeoutConfig,
    reconnect: ReconnectConfig,
    encoder: Box<dyn UpstreamEncoder>,
    queue: QueueReceiver,
    cmd_rx: mpsc::Receiver<ClientCommand>,
    cancel: CancellationToken,
    state: ClientState,
    accepted: u64,
    reconnects: u64,
    dropped_in_flight: u64,
    connected_at: Option<(Instant, DateTime<Utc>)>,
    ever_connected: bool,
    /// Requeued at the head after a failed transmit
    pending: Option<InFlight>,
}

impl ClientWorker {
    async fn run(mut self) {
        info!("Retranslation client starting, upstream {}", self.upstream);
        let mut attempt: u32 = 0;

        loop {
            self.state = ClientState::Connecting;
            let addr = self.upstream.to_string();
            let Some(result) = self
                .serve_until(connect(addr.clone(), self.timeouts.connect()))
                .await
            else {
                break;
            };

            match result {
                Ok(stream) => {
                    attempt = 0;
                    if self.ever_connected {
                        self.reconnects += 1;
                        info!("Reconnected to upstream {} ({} reconnects)", addr, self.reconnects);
                    } else {
                        info!("Connected to upstream {}", addr);
                    }
                    self.ever_connected = true;
                    self.state = ClientState::Connected;
                    self.connected_at = Some((Instant::now(), Utc::now()));

                    let end = self.run_session(stream, &addr).await;

                    self.state = ClientState::Disconnected;
                    self.connected_at = None;
                    match end {
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(e) => warn!("Upstream connection lost: {}", e),
                    }
                }
                Err(e) => {
                    self.state = ClientState::Disconnected;
                    warn!("Upstream connect failed: {}", e);
                }
            }

            let delay = self.reconnect.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            debug!("Reconnecting in {:?}", delay);
            if self.serve_until(tokio::time::sleep(delay)).await.is_none() {
                break;
            }
        }

        self.state = ClientState::Disconnected;
        info!(
            "Retranslation client stopped ({} accepted, {} still queued)",
            self.accepted,
            self.queue.len()
        );
    }

    /// Drive `fut` to completion while still answering commands
    ///
    /// Returns `None` if the client was told to stop first.
    async fn serve_until<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return None,

                cmd = self.cmd_rx.recv() => {
                    if !self.handle_command(cmd) {
                        return None;
                    }
                }

                output = &mut fut => return Some(output),
            }
        }
    }

    /// Returns `false` when the client should stop
    fn handle_command(&mut self, cmd: Option<ClientCommand>) -> bool {
        match cmd {
            Some(ClientCommand::QueryStats { response }) => {
                let _ = response.send(self.snapshot());
                true
            }
            None => {
                debug!("All client handles dropped");
                false
            }
        }
    }

    async fn run_session(&mut self, stream: TcpStream, addr: &str) -> SessionEnd {
        let (mut reader, mut writer) = stream.into_split();
        let mut scratch = [0u8; 64];

        loop {
            let in_flight = match self.pending.take() {
                Some(in_flight) => in_flight,
                None => {
                    tokio::select! {
                        biased;

                        _ = self.cancel.cancelled() => return SessionEnd::Stopped,

                        cmd = self.cmd_rx.recv() => {
                            if !self.handle_command(cmd) {
                                return SessionEnd::Stopped;
                            }
                            continue;
                        }

                        next = self.queue.recv() => match next {
                            Some(event) => InFlight { event, retried: false },
                            None => {
                                debug!("Outbound queue closed");
                                return SessionEnd::Stopped;
                            }
                        },

                        // Keep reading while idle so a peer close is noticed
                        read = reader.read(&mut scratch) => match read {
                            Ok(0) => return SessionEnd::Lost(RelayError::UpstreamClosed(addr.to_string())),
                            Ok(n) => {
                                debug!("Ignoring {} unsolicited bytes from upstream", n);
                                continue;
                            }
                            Err(e) => return SessionEnd::Lost(e.into()),
                        },
                    }
                }
            };

            let frame = self.encoder.encode(&in_flight.event);
            debug!(
                "Upstream TX: {}",
                String::from_utf8_lossy(&frame[..frame.len().saturating_sub(1)])
            );

            let sent = self
                .serve_until(transmit(
                    &mut writer,
                    &mut reader,
                    &frame,
                    self.timeouts.write(),
                    self.timeouts.ack(),
                ))
                .await;

            match sent {
                None => return SessionEnd::Stopped,
                Some(Ok(())) => self.accepted += 1,
                Some(Err(e)) => {
                    self.requeue_or_drop(in_flight);
                    return SessionEnd::Lost(e);
                }
            }
        }
    }

    fn requeue_or_drop(&mut self, mut in_flight: InFlight) {
        if in_flight.retried {
            self.dropped_in_flight += 1;
            warn!(
                "Dropping {} from {} after a second failed delivery",
                in_flight.event.code(),
                in_flight.event.account()
            );
        } else {
            in_flight.retried = true;
            debug!("Requeueing {} for retry after reconnect", in_flight.event.code());
            self.pending = Some(in_flight);
        }
    }

    fn snapshot(&self) -> QueueStats {
        let (uptime, connected_since) = match self.connected_at {
            Some((at, since)) => (at.elapsed(), Some(since)),
            None => (Duration::ZERO, None),
        };
        QueueStats {
            connected: self.state == ClientState::Connected,
            accepted: self.accepted,
            rejected: self.queue.rejected(),
            reconnects: self.reconnects,
            dropped_in_flight: self.dropped_in_flight,
            queued: self.queue.len() + usize::from(self.pending.is_some()),
            connected_since,
            uptime,
        }
    }
}

async fn connect(addr: String, connect_timeout: Duration) -> Result<TcpStream, RelayError> {
    debug!("Connecting to upstream {}", addr);
    let result = timeout(connect_timeout, TcpStream::connect(addr.as_str())).await;
    match result {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(RelayError::ConnectTimeout {
            addr,
            timeout: connect_timeout,
        }),
    }
}

/// Write one frame and, if `ack_timeout` is set, wait for the receiver's verdict
async fn transmit<W, R>(
    writer: &mut W,
    reader: &mut R,
    frame: &[u8],
    write_timeout: Duration,
    ack_timeout: Option<Duration>,
) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let write = async {
        writer.write_all(frame).await?;
        writer.flush().await
    };
    match timeout(write_timeout, write).await {
        Ok(result) => result?,
        Err(_) => return Err(RelayError::WriteTimeout(write_timeout)),
    }

    let Some(ack_timeout) = ack_timeout else {
        return Ok(());
    };
    timeout(ack_timeout, wait_for_ack(reader))
        .await
        .map_err(|_| RelayError::AckTimeout(ack_timeout))?
}

async fn wait_for_ack<R>(reader: &mut R) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upstream closed before acknowledging",
            )
            .into());
        }
        match byte[0] {
            ACK => return Ok(()),
            NAK => return Err(RelayError::Nak),
            other => debug!("Ignoring byte {:#04x} while waiting for ACK", other),
        }
    }
}
