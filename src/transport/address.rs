//! Peer addresses used as routing keys

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Immutable (host, port) pair identifying a remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: IpAddr,
    pub port: u16,
}

impl Address {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    /// Same host, different port.
    ///
    /// A peer's UDP address is its TCP address with the port it announced.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host,
            port,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        addr.socket_addr()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    #[test]
    fn test_with_port_keeps_host() {
        let tcp: Address = "10.0.0.7:15681".parse::<SocketAddr>().unwrap().into();
        let udp = tcp.with_port(40001);

        assert_eq!(udp.host, tcp.host);
        assert_eq!(udp.port, 40001);
        assert_ne!(udp, tcp);
    }

    #[test]
    fn test_address_as_map_key() {
        let host = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut map = HashMap::new();
        map.insert(Address::new(host, 1), "a");
        map.insert(Address::new(host, 2), "b");

        assert_eq!(map.get(&Address::new(host, 1)), Some(&"a"));
        assert_eq!(map.get(&Address::new(host, 3)), None);
    }

    #[test]
    fn test_display_matches_socket_addr() {
        let addr = Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 15682);
        assert_eq!(addr.to_string(), "127.0.0.1:15682");
    }
}
