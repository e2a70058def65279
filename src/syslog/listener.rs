//! UDP syslog listener
//!
//! Receives datagrams, decodes them and hands normalized messages to the
//! ingest task through a bounded queue. The receive loop never waits on
//! downstream processing: when the queue is full the message is dropped and
//! counted.

use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::envelope::{self, SyslogMessage};
use crate::error::ExporterError;
use crate::metrics;
use crate::signals::ShutdownSignal;

/// Largest possible UDP payload
const MAX_DATAGRAM: usize = 65_535;

/// What happened to one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    Queued,
    /// No hostname, discarded silently
    MissingIdentity,
    Malformed,
    QueueFull,
    /// Ingest side has gone away
    Closed,
}

pub struct SyslogListener {
    socket: UdpSocket,
    tx: mpsc::Sender<SyslogMessage>,
}

impl SyslogListener {
    pub async fn bind(addr: &str, tx: mpsc::Sender<SyslogMessage>) -> Result<Self, ExporterError> {
        let socket = UdpSocket::bind(addr).await?;
        info!(address = %socket.local_addr()?, "Syslog listener bound");
        Ok(Self { socket, tx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until a shutdown signal arrives or the ingest side closes.
    /// Dropping `self` closes the queue, which lets the ingest task drain.
    pub async fn run(self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Syslog listener stopping");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            if handle_datagram(&buf[..len], peer, &self.tx) == DatagramOutcome::Closed {
                                warn!("Ingest queue closed, syslog listener stopping");
                                break;
                            }
                        }
                        Err(e) => {
                            // ICMP errors surface here on some platforms; keep listening
                            warn!(error = %e, "Failed to receive datagram");
                        }
                    }
                }
            }
        }
    }
}

/// Decode a datagram and queue it without blocking
pub fn handle_datagram(
    datagram: &[u8],
    peer: SocketAddr,
    tx: &mpsc::Sender<SyslogMessage>,
) -> DatagramOutcome {
    metrics::record_datagram();

    let envelope = match envelope::decode(datagram) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Dropping malformed syslog datagram");
            metrics::record_decode_error();
            return DatagramOutcome::Malformed;
        }
    };

    let Some(message) = envelope.normalize(peer, None) else {
        debug!(peer = %peer, "Dropping syslog message without hostname");
        metrics::record_dropped("missing_identity");
        return DatagramOutcome::MissingIdentity;
    };

    match tx.try_send(message) {
        Ok(()) => DatagramOutcome::Queued,
        Err(mpsc::error::TrySendError::Full(message)) => {
            debug!(device = %message.device, "Ingest queue full, dropping message");
            metrics::record_dropped("queue_full");
            DatagramOutcome::QueueFull
        }
        Err(mpsc::error::TrySendError::Closed(_)) => DatagramOutcome::Closed,
    }
}
