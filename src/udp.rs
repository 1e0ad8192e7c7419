//! UDP datagram transport
//!
//! [`DatagramSocket`] is connectionless: it is either closed or bound to a
//! local endpoint, and every send names its destination. One datagram maps
//! to exactly one OS call in both directions — a payload that does not fit
//! a single datagram is rejected rather than fragmented, since fragments
//! sent as separate datagrams could be reordered or interleaved with other
//! peers' traffic and corrupt message framing.

use std::io;

use tracing::warn;

use crate::addr::Ipv4Address;
use crate::packet::Packet;
use crate::socket::{Socket, SocketCore, SocketKind};
use crate::{sys, SocketError, SocketResult};

/// Largest payload that fits one UDP datagram: 65535 minus the 8-byte UDP
/// header and the 20-byte IP header.
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// A UDP socket.
///
/// The lifecycle is Closed ⇄ Bound; there is no connected state. Sending
/// creates the handle on demand, so an unbound socket can transmit and the
/// OS assigns it an ephemeral port.
pub struct DatagramSocket {
    core: SocketCore,
    /// Lazily allocated scratch for packet receives.
    recv_buffer: Vec<u8>,
}

impl DatagramSocket {
    /// Create a closed datagram socket in blocking mode.
    pub fn new() -> Self {
        Self {
            core: SocketCore::new(SocketKind::Datagram),
            recv_buffer: Vec::new(),
        }
    }

    /// Port this socket is bound to, or 0 when closed.
    pub fn local_port(&self) -> u16 {
        self.core.local_port()
    }

    /// Bind to a local endpoint so the socket can receive.
    ///
    /// Port 0 lets the OS pick one. The broadcast address is not a valid
    /// bind target and is rejected. A previous binding is dropped first.
    pub fn bind(&mut self, port: u16, address: Ipv4Address) -> SocketResult<()> {
        self.core.close();

        if address == Ipv4Address::BROADCAST {
            warn!("cannot bind a datagram socket to the broadcast address");
            return Err(SocketError::Unexpected(io::ErrorKind::InvalidInput));
        }

        let handle = self.core.ensure_handle()?;
        let endpoint = sys::endpoint(address, port);
        handle.bind(&endpoint).map_err(|err| {
            warn!(port, "failed to bind datagram socket");
            sys::error_status(&err)
        })
    }

    /// Drop the local binding and release the handle.
    pub fn unbind(&mut self) {
        self.core.close();
    }

    /// Send one datagram to `remote:remote_port`.
    ///
    /// Payloads larger than [`MAX_DATAGRAM_SIZE`] are rejected before any
    /// OS call is made.
    pub fn send_to(
        &mut self,
        data: &[u8],
        remote: Ipv4Address,
        remote_port: u16,
    ) -> SocketResult<()> {
        if data.len() > MAX_DATAGRAM_SIZE {
            warn!(
                size = data.len(),
                max = MAX_DATAGRAM_SIZE,
                "payload does not fit in a single datagram"
            );
            return Err(SocketError::Unexpected(io::ErrorKind::InvalidInput));
        }

        let handle = self.core.ensure_handle()?;
        let endpoint = sys::endpoint(remote, remote_port);
        match handle.send_to(data, &endpoint) {
            // Unlike TCP, a datagram is sent whole or not at all.
            Ok(_) => Ok(()),
            Err(err) => Err(sys::error_status(&err)),
        }
    }

    /// Receive one datagram into `buffer`.
    ///
    /// On success returns the byte count (possibly less than the buffer
    /// size) together with the sender's address and port.
    pub fn receive_from(&mut self, buffer: &mut [u8]) -> SocketResult<(usize, Ipv4Address, u16)> {
        let handle = self.core.ensure_handle()?;

        match sys::recv_from(handle, buffer) {
            Ok((received, origin)) => match origin.as_socket_ipv4() {
                Some(endpoint) => Ok((received, Ipv4Address::from(*endpoint.ip()), endpoint.port())),
                None => Err(SocketError::Unexpected(io::ErrorKind::InvalidData)),
            },
            Err(err) => Err(sys::error_status(&err)),
        }
    }

    /// Send a packet's bytes as one datagram.
    ///
    /// The datagram boundary is the packet boundary, so no extra framing
    /// travels on the wire.
    pub fn send_packet_to(
        &mut self,
        packet: &Packet,
        remote: Ipv4Address,
        remote_port: u16,
    ) -> SocketResult<()> {
        self.send_to(packet.on_send(), remote, remote_port)
    }

    /// Receive one datagram into a packet: the packet is cleared, then fed
    /// only the bytes that actually arrived.
    pub fn receive_packet_from(&mut self, packet: &mut Packet) -> SocketResult<(Ipv4Address, u16)> {
        let mut buffer = std::mem::take(&mut self.recv_buffer);
        if buffer.is_empty() {
            buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        }

        let result = self.receive_from(&mut buffer);
        packet.clear();
        if let Ok((received, _, _)) = result {
            packet.on_receive(&buffer[..received]);
        }

        self.recv_buffer = buffer;
        result.map(|(_, address, port)| (address, port))
    }
}

impl Default for DatagramSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Socket for DatagramSocket {
    fn raw_handle(&self) -> Option<std::os::fd::RawFd> {
        self.core.raw_fd()
    }

    fn is_blocking(&self) -> bool {
        self.core.is_blocking()
    }

    fn set_blocking(&mut self, blocking: bool) -> SocketResult<()> {
        self.core.set_blocking(blocking)
    }

    fn close(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_broadcast_rejected() {
        let mut socket = DatagramSocket::new();
        let result = socket.bind(0, Ipv4Address::BROADCAST);
        assert!(result.is_err());
        assert!(socket.raw_handle().is_none());
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let mut socket = DatagramSocket::new();
        socket.bind(0, Ipv4Address::ANY).unwrap();
        assert_ne!(socket.local_port(), 0);

        socket.unbind();
        assert_eq!(socket.local_port(), 0);
    }

    #[test]
    fn test_oversize_datagram_rejected() {
        let mut socket = DatagramSocket::new();
        let payload = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        let result = socket.send_to(&payload, Ipv4Address::LOCALHOST, 9);
        assert!(result.is_err());
        // Rejected before any handle or OS send call.
        assert!(socket.raw_handle().is_none());
    }

    #[test]
    fn test_max_size_datagram_is_sendable() {
        let mut socket = DatagramSocket::new();
        let payload = vec![0u8; MAX_DATAGRAM_SIZE];
        // Exactly at the ceiling passes the size gate; loopback delivery is
        // covered by the integration tests.
        assert!(socket.send_to(&payload, Ipv4Address::LOCALHOST, 9).is_ok());
    }
}
