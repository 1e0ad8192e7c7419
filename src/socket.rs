//! Common socket state shared by the transports
//!
//! Both socket flavors own one OS handle at a time, created lazily on
//! first use and released on close or drop. The [`Socket`] trait is the
//! base contract the selector and generic callers program against.

use std::os::fd::{AsRawFd, RawFd};

use socket2::Socket as SysSocket;
use tracing::warn;

use crate::{sys, SocketResult};

/// Transport flavor of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Connection-oriented TCP byte stream.
    Stream,
    /// Connectionless UDP datagrams.
    Datagram,
}

/// Base contract shared by every socket type: handle access and
/// blocking-mode control.
pub trait Socket {
    /// Raw descriptor of the underlying handle, if one has been created.
    fn raw_handle(&self) -> Option<RawFd>;

    /// Whether calls on this socket block until they complete.
    fn is_blocking(&self) -> bool;

    /// Switch between blocking and non-blocking mode.
    ///
    /// In non-blocking mode operations return
    /// [`SocketError::NotReady`](crate::SocketError::NotReady) instead of
    /// waiting.
    fn set_blocking(&mut self, blocking: bool) -> SocketResult<()>;

    /// Close the underlying handle, returning the socket to its initial
    /// state. Safe to call when no handle exists.
    fn close(&mut self);
}

/// Owned handle plus the settings that must survive handle re-creation.
#[derive(Debug)]
pub(crate) struct SocketCore {
    handle: Option<SysSocket>,
    kind: SocketKind,
    blocking: bool,
}

impl SocketCore {
    pub(crate) fn new(kind: SocketKind) -> Self {
        Self {
            handle: None,
            kind,
            blocking: true,
        }
    }

    /// Wrap a handle obtained from the OS (an accepted connection),
    /// applying the per-kind options and the given blocking mode.
    pub(crate) fn adopt(kind: SocketKind, socket: SysSocket, blocking: bool) -> SocketResult<Self> {
        apply_options(kind, &socket);
        sys::set_blocking(&socket, blocking).map_err(|err| sys::error_status(&err))?;
        Ok(Self {
            handle: Some(socket),
            kind,
            blocking,
        })
    }

    /// Create the OS handle if none exists yet and return it.
    pub(crate) fn ensure_handle(&mut self) -> SocketResult<&SysSocket> {
        if self.handle.is_none() {
            let socket = sys::create(self.kind).map_err(|err| sys::error_status(&err))?;
            apply_options(self.kind, &socket);
            sys::set_blocking(&socket, self.blocking).map_err(|err| sys::error_status(&err))?;
            self.handle = Some(socket);
        }

        match self.handle.as_ref() {
            Some(socket) => Ok(socket),
            // Unreachable: the handle was set just above.
            None => Err(crate::SocketError::Unexpected(std::io::ErrorKind::NotConnected)),
        }
    }

    pub(crate) fn handle(&self) -> Option<&SysSocket> {
        self.handle.as_ref()
    }

    /// Release the handle. The OS resource is closed on drop of the inner
    /// socket; calling this twice is harmless.
    pub(crate) fn close(&mut self) {
        self.handle = None;
    }

    pub(crate) fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Record the desired blocking mode and apply it to the handle if one
    /// exists; otherwise it is applied at creation time.
    pub(crate) fn set_blocking(&mut self, blocking: bool) -> SocketResult<()> {
        if let Some(socket) = &self.handle {
            sys::set_blocking(socket, blocking).map_err(|err| sys::error_status(&err))?;
        }
        self.blocking = blocking;
        Ok(())
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.handle.as_ref().map(|socket| socket.as_raw_fd())
    }

    /// Port the handle is bound to, or 0 when unbound or closed.
    pub(crate) fn local_port(&self) -> u16 {
        self.handle
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
            .and_then(|addr| addr.as_socket_ipv4())
            .map(|addr| addr.port())
            .unwrap_or(0)
    }
}

// Options are best-effort: a socket that cannot take them still works, so
// failures are logged rather than propagated.
fn apply_options(kind: SocketKind, socket: &SysSocket) {
    match kind {
        SocketKind::Stream => {
            if let Err(err) = socket.set_nodelay(true) {
                warn!(error = %err, "failed to disable the Nagle algorithm");
            }
        }
        SocketKind::Datagram => {
            if let Err(err) = socket.set_broadcast(true) {
                warn!(error = %err, "failed to enable broadcast on datagram socket");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_starts_without_handle() {
        let core = SocketCore::new(SocketKind::Stream);
        assert!(core.handle().is_none());
        assert!(core.raw_fd().is_none());
        assert!(core.is_blocking());
        assert_eq!(core.local_port(), 0);
    }

    #[test]
    fn test_ensure_handle_creates_once() {
        let mut core = SocketCore::new(SocketKind::Datagram);
        core.ensure_handle().unwrap();
        let first = core.raw_fd().unwrap();
        core.ensure_handle().unwrap();
        assert_eq!(core.raw_fd().unwrap(), first);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut core = SocketCore::new(SocketKind::Datagram);
        core.ensure_handle().unwrap();
        core.close();
        assert!(core.handle().is_none());
        core.close();
        assert!(core.handle().is_none());
    }

    #[test]
    fn test_blocking_mode_survives_recreation() {
        let mut core = SocketCore::new(SocketKind::Datagram);
        core.set_blocking(false).unwrap();
        core.ensure_handle().unwrap();
        assert!(!core.is_blocking());
        core.close();
        core.ensure_handle().unwrap();
        assert!(!core.is_blocking());
    }
}
