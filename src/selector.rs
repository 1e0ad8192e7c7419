//! Readiness multiplexing
//!
//! [`SocketSelector`] waits on several sockets at once, so a caller can
//! service whichever becomes readable without dedicating a blocking call
//! to each. A listening socket counts as readable when a connection is
//! pending.

use std::os::fd::RawFd;
use std::time::Duration;

use tracing::debug;

use crate::socket::Socket;
use crate::{sys, SocketResult};

/// A watched set of sockets and, after a successful wait, the subset that
/// is ready to read.
///
/// The selector tracks descriptors, not the socket objects themselves: a
/// socket must have its handle created (be bound, listening or connected)
/// before it can be watched.
#[derive(Debug, Default, Clone)]
pub struct SocketSelector {
    watched: Vec<RawFd>,
    ready: Vec<RawFd>,
}

impl SocketSelector {
    /// Create an empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch a socket. Adding the same socket twice registers it once;
    /// a socket without a created handle is ignored.
    pub fn add(&mut self, socket: &dyn Socket) {
        let Some(fd) = socket.raw_handle() else {
            debug!("selector ignored a socket with no handle");
            return;
        };

        if !self.watched.contains(&fd) {
            self.watched.push(fd);
        }
    }

    /// Stop watching a socket.
    pub fn remove(&mut self, socket: &dyn Socket) {
        if let Some(fd) = socket.raw_handle() {
            self.watched.retain(|&watched| watched != fd);
            self.ready.retain(|&ready| ready != fd);
        }
    }

    /// Drop every watched socket.
    pub fn clear(&mut self) {
        self.watched.clear();
        self.ready.clear();
    }

    /// Number of watched sockets.
    pub fn len(&self) -> usize {
        self.watched.len()
    }

    /// Whether no socket is being watched.
    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }

    /// Block until at least one watched socket is readable or the timeout
    /// elapses; `None` or a zero timeout waits indefinitely.
    ///
    /// Returns whether any socket became ready; the ready subset is kept
    /// for [`SocketSelector::is_ready`] until the next wait.
    pub fn wait(&mut self, timeout: Option<Duration>) -> SocketResult<bool> {
        self.ready.clear();
        if self.watched.is_empty() {
            return Ok(false);
        }

        let timeout = timeout.filter(|t| !t.is_zero());

        self.ready =
            sys::poll_read_ready(&self.watched, timeout).map_err(|err| sys::error_status(&err))?;
        Ok(!self.ready.is_empty())
    }

    /// After a wait that returned true, whether this socket is in the
    /// ready subset.
    pub fn is_ready(&self, socket: &dyn Socket) -> bool {
        socket
            .raw_handle()
            .is_some_and(|fd| self.ready.contains(&fd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Ipv4Address;
    use crate::udp::DatagramSocket;

    #[test]
    fn test_add_deduplicates() {
        let mut socket = DatagramSocket::new();
        socket.bind(0, Ipv4Address::ANY).unwrap();

        let mut selector = SocketSelector::new();
        selector.add(&socket);
        selector.add(&socket);
        assert_eq!(selector.len(), 1);

        selector.remove(&socket);
        assert!(selector.is_empty());
    }

    #[test]
    fn test_add_ignores_closed_socket() {
        let socket = DatagramSocket::new();
        let mut selector = SocketSelector::new();
        selector.add(&socket);
        assert!(selector.is_empty());
        assert!(!selector.is_ready(&socket));
    }

    #[test]
    fn test_wait_on_empty_set_returns_immediately() {
        let mut selector = SocketSelector::new();
        assert!(!selector.wait(None).unwrap());
    }

    #[test]
    fn test_wait_times_out_on_idle_socket() {
        let mut socket = DatagramSocket::new();
        socket.bind(0, Ipv4Address::ANY).unwrap();

        let mut selector = SocketSelector::new();
        selector.add(&socket);

        let ready = selector.wait(Some(Duration::from_millis(50))).unwrap();
        assert!(!ready);
        assert!(!selector.is_ready(&socket));
    }

    #[test]
    fn test_clear_forgets_ready_state() {
        let mut socket = DatagramSocket::new();
        socket.bind(0, Ipv4Address::ANY).unwrap();

        let mut selector = SocketSelector::new();
        selector.add(&socket);
        selector.clear();
        assert!(selector.is_empty());
        assert!(!selector.wait(Some(Duration::from_millis(10))).unwrap());
    }
}
