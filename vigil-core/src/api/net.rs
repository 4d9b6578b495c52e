//! Outward-facing local address discovery.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Resolve the address this host would use to reach the network.
///
/// Connecting a UDP socket toward a public address sends nothing but makes
/// the OS pick the outbound route, so the bound local side is the interface
/// address the central server can reach us on. Falls back to loopback when
/// no route exists.
pub fn local_ip() -> IpAddr {
    fn resolve() -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip())
    }
    resolve().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_some_address() {
        // Offline hosts legitimately resolve to loopback; anything else must
        // at least not be unspecified.
        let ip = local_ip();
        assert!(!ip.is_unspecified());
    }
}
