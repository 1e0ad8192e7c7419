//! Binary packets over portable socket transports
//!
//! This crate provides a typed, append/extract message container
//! ([`Packet`]) together with the synchronous TCP and UDP transports that
//! carry it ([`StreamSocket`], [`DatagramSocket`]), address resolution
//! ([`Ipv4Address`], [`resolver`]) and readiness multiplexing
//! ([`SocketSelector`]).
//!
//! All scalars travel in network byte order and strings are length-prefixed,
//! so packets produced on one machine deserialize identically on any other.
//! Transport outcomes are reported through [`SocketError`]; raw operating
//! system error codes never surface past the platform layer.

pub mod addr;
pub mod http;
pub mod packet;
pub mod resolver;
pub mod selector;
pub mod socket;
mod sys;
pub mod tcp;
pub mod udp;

pub use addr::Ipv4Address;
pub use packet::Packet;
pub use selector::SocketSelector;
pub use socket::{Socket, SocketKind};
pub use tcp::{StreamListener, StreamSocket};
pub use udp::{DatagramSocket, MAX_DATAGRAM_SIZE};

/// Result type for transport operations.
///
/// `Ok` is the "done" outcome; every other outcome of the closed status set
/// is a [`SocketError`] variant.
pub type SocketResult<T> = std::result::Result<T, SocketError>;

/// Outcome of a transport operation that did not complete.
///
/// Together with a successful return these variants form the closed set of
/// transport statuses callers branch on. Platform error codes are mapped to
/// this set inside the platform layer and never exposed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// The socket is not ready; the operation would have blocked.
    ///
    /// Also reported by `connect` when the timeout expired before the
    /// connection was established.
    #[error("socket not ready, the operation would block")]
    NotReady,

    /// Only part of the data could be sent.
    ///
    /// `sent` bytes were transmitted; the caller resumes the send from that
    /// offset once the socket is writable again.
    #[error("partial send, {sent} bytes were transmitted")]
    Partial { sent: usize },

    /// The remote peer closed the connection.
    #[error("remote peer disconnected")]
    Disconnected,

    /// Unclassified platform failure.
    #[error("socket error: {0}")]
    Unexpected(std::io::ErrorKind),
}
