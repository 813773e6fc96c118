//! Datagram transports for chunk packets

pub mod transport;
pub mod udp;

pub use transport::{ChannelTransport, Transport};
pub use udp::{create_socket, UdpTransport, MAX_DATAGRAM_SIZE};
