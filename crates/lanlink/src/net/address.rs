use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::str::FromStr;

// Ordering sorts shorter families first, then by address bytes, then by port,
// which makes the type usable as an ordered map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    size: u8,
    bytes: [u8; 16],
    port: u16,
}

impl Address {
    pub fn v4(ip: Ipv4Addr, port: u16) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&ip.octets());
        Self {
            size: 4,
            bytes,
            port,
        }
    }

    pub fn v6(ip: Ipv6Addr, port: u16) -> Self {
        Self {
            size: 16,
            bytes: ip.octets(),
            port,
        }
    }

    pub fn broadcast4(port: u16) -> Self {
        Self::v4(Ipv4Addr::BROADCAST, port)
    }

    pub fn localhost(port: u16) -> Self {
        Self::v4(Ipv4Addr::LOCALHOST, port)
    }

    pub fn resolve(host: &str, port: u16) -> io::Result<Self> {
        let candidates: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        candidates
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| candidates.first())
            .map(|a| Self::from(*a))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host))
            })
    }

    pub fn family_size(&self) -> usize {
        self.size as usize
    }

    pub fn octets(&self) -> &[u8] {
        &self.bytes[..self.family_size()]
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_ipv4(&self) -> bool {
        self.size == 4
    }

    pub fn ip(&self) -> IpAddr {
        if self.is_ipv4() {
            IpAddr::V4(Ipv4Addr::new(
                self.bytes[0],
                self.bytes[1],
                self.bytes[2],
                self.bytes[3],
            ))
        } else {
            IpAddr::V6(Ipv6Addr::from(self.bytes))
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip(), self.port)
    }

    pub fn is_unspecified(&self) -> bool {
        self.ip().is_unspecified()
    }

    pub fn is_broadcast(&self) -> bool {
        match self.ip() {
            IpAddr::V4(ip) => ip.is_broadcast(),
            IpAddr::V6(_) => false,
        }
    }

    /// A unicast address with a non-zero port that a client may connect to.
    pub fn is_connectable(&self) -> bool {
        self.port != 0 && !self.is_unspecified() && !self.is_broadcast()
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.size
            .cmp(&other.size)
            .then_with(|| self.octets().cmp(other.octets()))
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Self::v4(*addr.ip(), addr.port())
    }
}

impl From<SocketAddrV6> for Address {
    fn from(addr: SocketAddrV6) -> Self {
        // v4-mapped peers show up on dual-stack sockets; keep them comparable with plain v4
        match addr.ip().to_ipv4_mapped() {
            Some(ip) => Self::v4(ip, addr.port()),
            None => Self::v6(*addr.ip(), addr.port()),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(a) => a.into(),
            SocketAddr::V6(a) => a.into(),
        }
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        addr.socket_addr()
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self::from)
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

    #[test]
    fn test_ordering_family_then_bytes_then_port() {
        let a = Address::v4(Ipv4Addr::new(10, 0, 0, 1), 9000);
        let b = Address::v4(Ipv4Addr::new(10, 0, 0, 1), 9001);
        let c = Address::v4(Ipv4Addr::new(10, 0, 0, 2), 1);
        let d = Address::v6(Ipv6Addr::LOCALHOST, 1);

        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
        assert_eq!(a, "10.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn test_connectable() {
        assert!(Address::localhost(4000).is_connectable());
        assert!(!Address::localhost(0).is_connectable());
        assert!(!Address::broadcast4(4000).is_connectable());
        assert!(!Address::v4(Ipv4Addr::UNSPECIFIED, 4000).is_connectable());
    }

    #[test]
    fn test_socket_addr_conversion() {
        let sock: SocketAddr = "192.168.1.20:27015".parse().unwrap();
        let addr = Address::from(sock);
        assert_eq!(addr.family_size(), 4);
        assert_eq!(addr.octets(), &[192, 168, 1, 20]);
        assert_eq!(SocketAddr::from(addr), sock);
        assert_eq!(addr.to_string(), "192.168.1.20:27015");
    }

    #[test]
    fn test_v4_mapped_collapses_to_v4() {
        let mapped: SocketAddr = "[::ffff:127.0.0.1]:5000".parse().unwrap();
        assert_eq!(Address::from(mapped), Address::localhost(5000));
    }
}
