//! TCP stream transport
//!
//! [`StreamSocket`] is a connection-oriented socket with explicit status
//! reporting: partial writes, would-block conditions and peer disconnects
//! are returned to the caller instead of being papered over. The matching
//! [`StreamListener`] accepts incoming connections.

use std::io;
use std::time::Duration;

use socket2::{SockAddr, Socket as SysSocket};
use tracing::{debug, warn};

use crate::addr::Ipv4Address;
use crate::packet::Packet;
use crate::socket::{Socket, SocketCore, SocketKind};
use crate::{sys, SocketError, SocketResult};

/// Scratch size when draining a stream into a packet.
const RECV_BUFFER_SIZE: usize = 65536;

/// A TCP socket, either connected to a remote peer or idle.
///
/// The socket walks Closed → Connecting → Connected → Closed; the OS handle
/// is created lazily and released by [`StreamSocket::disconnect`] or drop.
pub struct StreamSocket {
    core: SocketCore,
    /// Lazily allocated scratch for packet receives.
    recv_buffer: Vec<u8>,
}

impl StreamSocket {
    /// Create an idle stream socket in blocking mode.
    pub fn new() -> Self {
        Self {
            core: SocketCore::new(SocketKind::Stream),
            recv_buffer: Vec::new(),
        }
    }

    /// Wrap a connection handed over by a listener.
    pub(crate) fn from_accepted(socket: SysSocket) -> SocketResult<Self> {
        Ok(Self {
            core: SocketCore::adopt(SocketKind::Stream, socket, true)?,
            recv_buffer: Vec::new(),
        })
    }

    /// Port this socket is bound to locally, or 0 when not connected.
    pub fn local_port(&self) -> u16 {
        self.core.local_port()
    }

    /// Address of the connected peer, if any.
    pub fn remote_address(&self) -> Option<Ipv4Address> {
        self.peer_endpoint().map(|addr| Ipv4Address::from(*addr.ip()))
    }

    /// Port of the connected peer, or 0 when not connected.
    pub fn remote_port(&self) -> u16 {
        self.peer_endpoint().map(|addr| addr.port()).unwrap_or(0)
    }

    fn peer_endpoint(&self) -> Option<std::net::SocketAddrV4> {
        self.core
            .handle()
            .and_then(|socket| socket.peer_addr().ok())
            .and_then(|addr| addr.as_socket_ipv4())
    }

    /// Connect to a remote endpoint.
    ///
    /// Any previous connection is dropped first. With a timeout of `None`
    /// (or zero) the connect blocks until the OS resolves it; otherwise the
    /// attempt is bounded by `timeout` and expiry reports
    /// [`SocketError::NotReady`]. The socket's blocking mode is restored
    /// before returning.
    pub fn connect(
        &mut self,
        address: Ipv4Address,
        port: u16,
        timeout: Option<Duration>,
    ) -> SocketResult<()> {
        self.disconnect();

        let endpoint = sys::endpoint(address, port);
        let result = match timeout {
            Some(timeout) if !timeout.is_zero() => self.connect_with_timeout(&endpoint, timeout),
            _ => {
                let handle = self.core.ensure_handle()?;
                handle.connect(&endpoint).map_err(|err| sys::error_status(&err))
            }
        };

        // A failed attempt must not leak a half-connected handle.
        if result.is_err() {
            self.core.close();
        }
        result
    }

    /// Non-blocking connect bounded by a readiness wait, as a plain
    /// blocking connect cannot be interrupted once issued.
    fn connect_with_timeout(&mut self, endpoint: &SockAddr, timeout: Duration) -> SocketResult<()> {
        let previous_mode = self.core.is_blocking();
        self.core.ensure_handle()?;
        self.core.set_blocking(false)?;

        let result = self.start_connect(endpoint, timeout);

        // The caller's blocking mode is restored on every path.
        let restored = self.core.set_blocking(previous_mode);
        result?;
        restored
    }

    fn start_connect(&mut self, endpoint: &SockAddr, timeout: Duration) -> SocketResult<()> {
        let handle = self.core.ensure_handle()?;
        match handle.connect(endpoint) {
            // Connected straight away (loopback, typically).
            Ok(()) => Ok(()),
            Err(err) => match sys::error_status(&err) {
                SocketError::NotReady => Self::finish_connect(handle, timeout),
                status => Err(status),
            },
        }
    }

    /// Wait for an in-progress connect, then check how it ended.
    fn finish_connect(handle: &SysSocket, timeout: Duration) -> SocketResult<()> {
        use std::os::fd::AsRawFd;

        match sys::poll_write_ready(handle.as_raw_fd(), timeout) {
            Ok(true) => match handle.take_error() {
                Ok(None) => Ok(()),
                Ok(Some(err)) => Err(sys::error_status(&err)),
                Err(err) => Err(sys::error_status(&err)),
            },
            Ok(false) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "connect timed out");
                Err(SocketError::NotReady)
            }
            Err(err) => Err(sys::error_status(&err)),
        }
    }

    /// Drop the connection and release the handle. Safe to call when idle.
    pub fn disconnect(&mut self) {
        self.core.close();
    }

    /// Send the whole buffer, looping over partial writes.
    ///
    /// Interrupted system calls are retried internally. On a non-blocking
    /// socket that cannot flush everything the call fails with
    /// [`SocketError::Partial`] carrying the number of bytes already
    /// transmitted; the caller resumes from that offset.
    pub fn send(&mut self, data: &[u8]) -> SocketResult<()> {
        let handle = self.core.ensure_handle()?;

        let mut sent = 0;
        while sent < data.len() {
            match handle.send(&data[sent..]) {
                Ok(written) => sent += written,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let status = sys::error_status(&err);
                    return match status {
                        SocketError::NotReady if sent > 0 => Err(SocketError::Partial { sent }),
                        other => Err(other),
                    };
                }
            }
        }

        Ok(())
    }

    /// Read once from the stream into `buffer`, returning the byte count.
    ///
    /// Zero bytes from the OS is the peer's orderly shutdown and is
    /// reported as [`SocketError::Disconnected`], so a successful return
    /// always carries at least one byte.
    pub fn receive(&mut self, buffer: &mut [u8]) -> SocketResult<usize> {
        let handle = self.core.ensure_handle()?;

        match sys::recv(handle, buffer) {
            Ok(0) => Err(SocketError::Disconnected),
            Ok(received) => Ok(received),
            Err(err) => Err(sys::error_status(&err)),
        }
    }

    /// Send a packet's bytes over the stream.
    ///
    /// The wire carries exactly the packet payload; delimiting successive
    /// packets on the byte stream is the application's concern.
    pub fn send_packet(&mut self, packet: &Packet) -> SocketResult<()> {
        self.send(packet.on_send())
    }

    /// Receive into a packet: the packet is cleared, then fed only the
    /// bytes that actually arrived.
    pub fn receive_packet(&mut self, packet: &mut Packet) -> SocketResult<()> {
        let mut buffer = std::mem::take(&mut self.recv_buffer);
        if buffer.is_empty() {
            buffer = vec![0u8; RECV_BUFFER_SIZE];
        }

        let result = self.receive(&mut buffer);
        packet.clear();
        if let Ok(received) = result {
            packet.on_receive(&buffer[..received]);
        }

        self.recv_buffer = buffer;
        result.map(|_| ())
    }
}

impl Default for StreamSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Socket for StreamSocket {
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
        self.disconnect();
    }
}

/// A TCP socket that accepts incoming connections.
pub struct StreamListener {
    core: SocketCore,
}

impl StreamListener {
    /// Create an idle listener.
    pub fn new() -> Self {
        Self {
            core: SocketCore::new(SocketKind::Stream),
        }
    }

    /// Port the listener is bound to, or 0 when not listening.
    pub fn local_port(&self) -> u16 {
        self.core.local_port()
    }

    /// Start listening for connections on `address:port`.
    ///
    /// Port 0 lets the OS pick one; read it back with
    /// [`StreamListener::local_port`]. A previous listening session is torn
    /// down first.
    pub fn listen(&mut self, port: u16, address: Ipv4Address) -> SocketResult<()> {
        self.core.close();

        if address == Ipv4Address::BROADCAST {
            warn!("cannot listen on the broadcast address");
            return Err(SocketError::Unexpected(io::ErrorKind::InvalidInput));
        }

        let handle = self.core.ensure_handle()?;
        if let Err(err) = handle.set_reuse_address(true) {
            warn!(error = %err, "failed to set SO_REUSEADDR on listener");
        }

        let endpoint = sys::endpoint(address, port);
        handle.bind(&endpoint).map_err(|err| {
            warn!(port, "failed to bind listener");
            sys::error_status(&err)
        })?;
        handle.listen(128).map_err(|err| sys::error_status(&err))
    }

    /// Stop listening and release the handle.
    pub fn stop(&mut self) {
        self.core.close();
    }

    /// Accept one pending connection as a blocking-mode stream socket.
    ///
    /// On a non-blocking listener with no pending connection this reports
    /// [`SocketError::NotReady`].
    pub fn accept(&mut self) -> SocketResult<StreamSocket> {
        let handle = match self.core.handle() {
            Some(handle) => handle,
            None => {
                warn!("accept called on a listener that is not listening");
                return Err(SocketError::Unexpected(io::ErrorKind::NotConnected));
            }
        };

        match handle.accept() {
            Ok((socket, _remote)) => StreamSocket::from_accepted(socket),
            Err(err) => Err(sys::error_status(&err)),
        }
    }
}

impl Default for StreamListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Socket for StreamListener {
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
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_socket_reports_no_endpoints() {
        let socket = StreamSocket::new();
        assert_eq!(socket.local_port(), 0);
        assert_eq!(socket.remote_port(), 0);
        assert!(socket.remote_address().is_none());
        assert!(socket.raw_handle().is_none());
    }

    #[test]
    fn test_connect_timeout_unroutable() {
        // 192.0.2.0/24 is reserved for documentation and never routed.
        let mut socket = StreamSocket::new();
        let target = Ipv4Address::from_octets(192, 0, 2, 1);
        let result = socket.connect(target, 80, Some(Duration::from_millis(100)));
        assert!(result.is_err());
        // The failed attempt must not leak a handle.
        assert!(socket.raw_handle().is_none());
    }

    #[test]
    fn test_connect_restores_blocking_mode() {
        let mut socket = StreamSocket::new();
        socket.set_blocking(false).unwrap();
        let target = Ipv4Address::from_octets(192, 0, 2, 1);
        let _ = socket.connect(target, 80, Some(Duration::from_millis(50)));
        assert!(!socket.is_blocking());
    }

    #[test]
    fn test_accept_without_listen_fails() {
        let mut listener = StreamListener::new();
        assert!(listener.accept().is_err());
    }

    #[test]
    fn test_listen_on_broadcast_rejected() {
        let mut listener = StreamListener::new();
        let result = listener.listen(0, Ipv4Address::BROADCAST);
        assert!(result.is_err());
        assert_eq!(listener.local_port(), 0);
    }
}
