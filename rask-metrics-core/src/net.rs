use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubnetError {
    #[error("Subnet '{0}' must be in CIDR form address/prefix")]
    MissingPrefix(String),
    #[error("Invalid network address in '{0}'")]
    InvalidAddress(String),
    #[error("Invalid prefix length in '{0}'")]
    InvalidPrefix(String),
}

/// A CIDR block such as `192.168.1.0/24` or `fd00::/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix: u8,
}

impl TrustedSubnet {
    pub fn parse(cidr: &str) -> Result<Self, SubnetError> {
        let cidr = cidr.trim();
        let (addr, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| SubnetError::MissingPrefix(cidr.to_string()))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| SubnetError::InvalidAddress(cidr.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| SubnetError::InvalidPrefix(cidr.to_string()))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(SubnetError::InvalidPrefix(cidr.to_string()));
        }
        Ok(Self {
            network: mask(addr, prefix),
            prefix,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if ip.is_ipv4() != self.network.is_ipv4() {
            return false;
        }
        mask(ip, self.prefix) == self.network
    }

    /// First host address of the block, used to probe which local interface routes into it.
    fn probe_target(&self) -> IpAddr {
        match self.network {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4).saturating_add(1))),
            IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6).saturating_add(1))),
        }
    }
}

impl FromStr for TrustedSubnet {
    type Err = SubnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn mask(ip: IpAddr, prefix: u8) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(bits & mask))
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(bits & mask))
        }
    }
}

/// Local address the OS would use to reach `remote` (`host:port`).
///
/// Connecting a UDP socket sends nothing; it only performs route selection.
pub fn outbound_ip(remote: &str) -> std::io::Result<IpAddr> {
    let target = remote.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{remote} did not resolve"),
        )
    })?;
    route_source(target)
}

/// Picks the address to advertise as the client's real IP: an address inside
/// `subnet` when one routes there, otherwise the route towards `remote`.
pub fn advertised_ip(remote: &str, subnet: Option<&TrustedSubnet>) -> std::io::Result<IpAddr> {
    let outbound = outbound_ip(remote);
    let Some(subnet) = subnet else {
        return outbound;
    };
    if let Ok(ip) = &outbound {
        if subnet.contains(*ip) {
            return outbound;
        }
    }
    match route_source(SocketAddr::new(subnet.probe_target(), 9)) {
        Ok(ip) if subnet.contains(ip) => Ok(ip),
        _ => outbound,
    }
}

fn route_source(target: SocketAddr) -> std::io::Result<IpAddr> {
    let bind: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind)?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_ipv4_membership() {
        let subnet = TrustedSubnet::parse("192.168.1.0/24").unwrap();
        assert!(subnet.contains(ip("192.168.1.77")));
        assert!(!subnet.contains(ip("192.168.2.1")));
        assert!(!subnet.contains(ip("::1")));
        assert!(subnet.contains(ip("::ffff:192.168.1.5")));
    }

    #[test]
    fn test_host_bits_are_masked() {
        let subnet = TrustedSubnet::parse("10.1.2.3/8").unwrap();
        assert_eq!(subnet.to_string(), "10.0.0.0/8");
        assert!(subnet.contains(ip("10.255.0.1")));
    }

    #[test]
    fn test_edge_prefixes() {
        let all = TrustedSubnet::parse("0.0.0.0/0").unwrap();
        assert!(all.contains(ip("8.8.8.8")));
        let single = TrustedSubnet::parse("127.0.0.1/32").unwrap();
        assert!(single.contains(ip("127.0.0.1")));
        assert!(!single.contains(ip("127.0.0.2")));
        let v6 = TrustedSubnet::parse("fd00::/8").unwrap();
        assert!(v6.contains(ip("fd12::1")));
        assert!(!v6.contains(ip("fe80::1")));
    }

    #[test]
    fn test_malformed_cidr() {
        assert!(matches!(
            TrustedSubnet::parse("192.168.1.0"),
            Err(SubnetError::MissingPrefix(_))
        ));
        assert!(matches!(
            TrustedSubnet::parse("192.168.1/24"),
            Err(SubnetError::InvalidAddress(_))
        ));
        assert!(matches!(
            TrustedSubnet::parse("192.168.1.0/33"),
            Err(SubnetError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_loopback_route() {
        assert_eq!(outbound_ip("127.0.0.1:8080").unwrap(), ip("127.0.0.1"));
        let subnet = TrustedSubnet::parse("127.0.0.0/8").unwrap();
        assert_eq!(
            advertised_ip("127.0.0.1:8080", Some(&subnet)).unwrap(),
            ip("127.0.0.1")
        );
    }
}
