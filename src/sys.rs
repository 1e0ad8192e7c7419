//! Platform socket layer
//!
//! The only module that talks to the OS socket API directly and the only
//! one allowed to look at raw platform error codes. Every wrapper returns
//! the error value explicitly; higher layers classify it through
//! [`error_status`] and never read ambient error state.

use std::io;
use std::mem::MaybeUninit;
use std::net::{SocketAddr, SocketAddrV4};
use std::os::fd::RawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::trace;

use crate::addr::Ipv4Address;
use crate::socket::SocketKind;
use crate::SocketError;

/// Allocate a new IPv4 socket of the given flavor.
pub(crate) fn create(kind: SocketKind) -> io::Result<Socket> {
    let (ty, protocol) = match kind {
        SocketKind::Stream => (Type::STREAM, Protocol::TCP),
        SocketKind::Datagram => (Type::DGRAM, Protocol::UDP),
    };
    Socket::new(Domain::IPV4, ty, Some(protocol))
}

/// Toggle the non-blocking flag. Callers must check the result.
pub(crate) fn set_blocking(socket: &Socket, blocking: bool) -> io::Result<()> {
    socket.set_nonblocking(!blocking)
}

/// Build the OS endpoint structure for an address/port pair.
pub(crate) fn endpoint(address: Ipv4Address, port: u16) -> SockAddr {
    SockAddr::from(SocketAddr::V4(SocketAddrV4::new(address.into(), port)))
}

/// Classify a platform error into the portable status set.
///
/// The mapping is part of the crate contract: callers branch on the
/// returned variant, never on the raw code.
pub(crate) fn error_status(err: &io::Error) -> SocketError {
    if err.kind() == io::ErrorKind::WouldBlock {
        return SocketError::NotReady;
    }

    let code = err.raw_os_error();
    // EAGAIN and EINPROGRESS can share a value with EWOULDBLOCK, so they
    // are tested up front rather than in the match below.
    if code == Some(libc::EAGAIN) || code == Some(libc::EWOULDBLOCK) || code == Some(libc::EINPROGRESS)
    {
        return SocketError::NotReady;
    }

    match code {
        Some(libc::ECONNABORTED)
        | Some(libc::ECONNRESET)
        | Some(libc::ETIMEDOUT)
        | Some(libc::ENETRESET)
        | Some(libc::ENOTCONN)
        | Some(libc::EPIPE) => SocketError::Disconnected,
        _ => {
            trace!(error = %err, "unclassified socket error");
            SocketError::Unexpected(err.kind())
        }
    }
}

/// Receive on a connected socket into an initialized buffer.
pub(crate) fn recv(socket: &Socket, buffer: &mut [u8]) -> io::Result<usize> {
    socket.recv(as_uninit(buffer))
}

/// Receive one datagram, returning the byte count and the sender endpoint.
pub(crate) fn recv_from(socket: &Socket, buffer: &mut [u8]) -> io::Result<(usize, SockAddr)> {
    socket.recv_from(as_uninit(buffer))
}

// socket2 receives into MaybeUninit slices; an initialized byte slice is a
// valid view for that, and the kernel only ever writes plain bytes into it.
fn as_uninit(buffer: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    unsafe { &mut *(buffer as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        // Negative timeout means block indefinitely.
        None => -1,
        Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

/// Wait until the descriptor is writable or the timeout elapses.
pub(crate) fn poll_write_ready(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };

    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms(Some(timeout))) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(ret == 1 && (pfd.revents & libc::POLLOUT) != 0)
}

/// Wait until at least one descriptor is readable or the timeout elapses,
/// returning the subset that became ready.
///
/// A hung-up or errored descriptor counts as readable: the next read on it
/// reports the disconnect instead of blocking.
pub(crate) fn poll_read_ready(fds: &[RawFd], timeout: Option<Duration>) -> io::Result<Vec<RawFd>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms(timeout)) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(pollfds
        .iter()
        .filter(|pfd| pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
        .map(|pfd| pfd.fd)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_mapping() {
        for code in [libc::EAGAIN, libc::EWOULDBLOCK, libc::EINPROGRESS] {
            let err = io::Error::from_raw_os_error(code);
            assert_eq!(error_status(&err), SocketError::NotReady, "errno {}", code);
        }
    }

    #[test]
    fn test_disconnected_mapping() {
        for code in [
            libc::ECONNABORTED,
            libc::ECONNRESET,
            libc::ETIMEDOUT,
            libc::ENETRESET,
            libc::ENOTCONN,
            libc::EPIPE,
        ] {
            let err = io::Error::from_raw_os_error(code);
            assert_eq!(error_status(&err), SocketError::Disconnected, "errno {}", code);
        }
    }

    #[test]
    fn test_unmapped_errors_are_unexpected() {
        let err = io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(error_status(&err), SocketError::Unexpected(err.kind()));

        let err = io::Error::from_raw_os_error(libc::ENOMEM);
        assert!(matches!(error_status(&err), SocketError::Unexpected(_)));
    }

    #[test]
    fn test_endpoint_construction() {
        let endpoint = endpoint(Ipv4Address::from_octets(192, 168, 0, 1), 7777);
        let addr = endpoint.as_socket_ipv4().unwrap();
        assert_eq!(addr.ip().octets(), [192, 168, 0, 1]);
        assert_eq!(addr.port(), 7777);
    }
}
