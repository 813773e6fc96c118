//! UDP transport on a non-blocking socket2 socket

use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use tracing::{info, trace, warn};

use super::transport::Transport;
use crate::config::NetworkConfig;
use crate::error::{NetworkError, Result};

/// Largest datagram the receive buffer accepts
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Create a non-blocking UDP socket bound to `bind` with the configured buffer sizes.
pub fn create_socket(config: &NetworkConfig) -> Result<UdpSocket> {
    let domain = if config.bind.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::SocketConfig(format!("Failed to create socket: {}", e)))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::SocketConfig(format!("Failed to set reuse address: {}", e)))?;
    socket
        .set_send_buffer_size(config.send_buffer_size)
        .map_err(|e| NetworkError::SocketConfig(format!("Failed to set send buffer: {}", e)))?;
    socket
        .set_recv_buffer_size(config.recv_buffer_size)
        .map_err(|e| NetworkError::SocketConfig(format!("Failed to set receive buffer: {}", e)))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::SocketConfig(format!("Failed to set non-blocking: {}", e)))?;
    socket
        .bind(&config.bind.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", config.bind, e)))?;

    Ok(socket.into())
}

/// Point-to-point UDP transport
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    buffer: Mutex<Vec<u8>>,
}

impl UdpTransport {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let socket = create_socket(config)?;
        info!(
            "UDP transport on {} sending to {}",
            socket.local_addr()?,
            config.peer
        );
        Ok(Self {
            socket,
            peer: config.peer,
            buffer: Mutex::new(vec![0u8; MAX_DATAGRAM_SIZE]),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for UdpTransport {
    fn send(&self, datagram: &[u8]) -> Result<()> {
        match self.socket.send_to(datagram, self.peer) {
            Ok(sent) if sent != datagram.len() => {
                warn!("Partial send: {} of {} bytes", sent, datagram.len());
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                trace!("Socket would block, dropping datagram");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_receive(&self) -> Option<Bytes> {
        let mut buffer = self.buffer.lock();
        match self.socket.recv_from(&mut buffer) {
            Ok((len, from)) => {
                if from != self.peer {
                    trace!("Datagram of {} bytes from {}", len, from);
                }
                Some(Bytes::copy_from_slice(&buffer[..len]))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                // ICMP port-unreachable from a peer that is not up yet
                trace!("Receive failed: {}", e);
                None
            }
        }
    }
}
