//! Datagram transport seam

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use tracing::trace;

use crate::error::Result;

/// Unreliable, unordered datagram delivery.
///
/// `send` never blocks; a datagram that cannot be queued is dropped.
pub trait Transport: Send + Sync {
    fn send(&self, datagram: &[u8]) -> Result<()>;

    /// Next queued datagram, if any
    fn try_receive(&self) -> Option<Bytes>;
}

/// In-process transport over a pair of bounded channels
pub struct ChannelTransport {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
}

impl ChannelTransport {
    /// Two connected ends, each queueing up to `capacity` datagrams.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = bounded(capacity);
        let (b_tx, a_rx) = bounded(capacity);
        (Self { tx: a_tx, rx: a_rx }, Self { tx: b_tx, rx: b_rx })
    }

    /// A transport that receives its own datagrams
    pub fn loopback(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, datagram: &[u8]) -> Result<()> {
        match self.tx.try_send(Bytes::copy_from_slice(datagram)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("Channel full, dropping datagram"),
            Err(TrySendError::Disconnected(_)) => trace!("Peer gone, dropping datagram"),
        }
        Ok(())
    }

    fn try_receive(&self) -> Option<Bytes> {
        match self.rx.try_recv() {
            Ok(datagram) => Some(datagram),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
