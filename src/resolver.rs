//! Host identifier resolution and endpoint discovery
//!
//! Turns host identifiers (dotted quads or host names) into
//! [`Ipv4Address`] values, and answers the two questions a single machine
//! cannot read off a config file: which local address faces outward, and
//! which address the internet sees.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::addr::Ipv4Address;
use crate::http::{HttpClient, Method, Request};
use crate::socket::SocketKind;
use crate::sys;

/// Resolve a host identifier to an address.
///
/// A numeric dotted quad is parsed directly; anything else goes through a
/// blocking name-service lookup restricted to the IPv4 family. Returns
/// `None` for empty input and when both paths fail — including inputs like
/// `"256.256.256.256"` that look numeric but are not.
pub fn resolve(host: &str) -> Option<Ipv4Address> {
    if host.is_empty() {
        return None;
    }

    if let Ok(address) = host.parse::<Ipv4Address>() {
        return Some(address);
    }

    match (host, 0u16).to_socket_addrs() {
        Ok(mut addrs) => addrs.find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(Ipv4Address::from(*v4.ip())),
            SocketAddr::V6(_) => None,
        }),
        Err(err) => {
            debug!(host, error = %err, "host name lookup failed");
            None
        }
    }
}

/// Address of the local interface used to reach other hosts.
///
/// Connects a throwaway UDP socket to loopback and reads the kernel's
/// choice of local endpoint back with getsockname — connecting a datagram
/// socket sends nothing, it only pins the outbound interface. This is the
/// only portable way to discover the outward-facing address without a
/// real peer.
pub fn local_address() -> Option<Ipv4Address> {
    let socket = sys::create(SocketKind::Datagram).ok()?;

    let target = sys::endpoint(Ipv4Address::LOCALHOST, 9);
    socket.connect(&target).ok()?;

    let local = socket.local_addr().ok()?;
    local
        .as_socket_ipv4()
        .map(|endpoint| Ipv4Address::from(*endpoint.ip()))
}

/// Address of this machine as seen from the internet.
///
/// Only a remote host can answer this, so a single HTTP GET is issued to a
/// plain-text address echo service and the page body is parsed as the
/// address. The timeout bounds connection establishment.
pub fn public_address(timeout: Option<Duration>) -> Option<Ipv4Address> {
    let mut client = HttpClient::new("checkip.amazonaws.com", 0);
    let request = Request::new("/", Method::Get);

    match client.send_request(&request, timeout) {
        Ok(response) if response.status() == 200 => resolve(response.body().trim()),
        Ok(response) => {
            debug!(status = response.status(), "address echo service returned an error");
            None
        }
        Err(err) => {
            debug!(error = %err, "failed to query the address echo service");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_dotted_quad() {
        assert_eq!(resolve("127.0.0.1"), Some(Ipv4Address::LOCALHOST));
        assert_eq!(resolve("0.0.0.0"), Some(Ipv4Address::ANY));
        assert_eq!(
            resolve("255.255.255.255"),
            Some(Ipv4Address::BROADCAST)
        );
    }

    #[test]
    fn test_resolve_empty_is_none() {
        assert_eq!(resolve(""), None);
    }

    #[test]
    fn test_resolve_out_of_range_quad_is_none() {
        // Not a valid numeric address; falls through to the name service,
        // which cannot know it either.
        assert_eq!(resolve("256.256.256.256"), None);
    }

    #[test]
    fn test_resolve_host_name() {
        assert_eq!(resolve("localhost"), Some(Ipv4Address::LOCALHOST));
    }

    #[test]
    fn test_local_address_is_usable() {
        let address = local_address().unwrap();
        assert_ne!(address, Ipv4Address::BROADCAST);
        assert_ne!(address, Ipv4Address::ANY);
    }
}
