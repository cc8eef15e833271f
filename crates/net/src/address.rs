use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6, ToSocketAddrs};
use std::str::FromStr;

use crate::error::NetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ip {
    V4(u32),
    V6([u16; 8]),
}

/// A peer endpoint. Two addresses are equal when both ip and port match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    ip: Ip,
    port: u16,
}

impl Address {
    pub fn new(ip: Ip, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn v4(octets: [u8; 4], port: u16) -> Self {
        Self::new(Ip::V4(u32::from_be_bytes(octets)), port)
    }

    pub fn localhost(port: u16) -> Self {
        Self::v4([127, 0, 0, 1], port)
    }

    pub fn unspecified(port: u16) -> Self {
        Self::v4([0, 0, 0, 0], port)
    }

    pub fn ip(&self) -> Ip {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn with_port(self, port: u16) -> Self {
        Self { port, ..self }
    }

    pub fn is_v6(&self) -> bool {
        matches!(self.ip, Ip::V6(_))
    }

    pub fn to_socket_addr(self) -> SocketAddr {
        match self.ip {
            Ip::V4(value) => SocketAddr::from((Ipv4Addr::from(value), self.port)),
            Ip::V6(groups) => {
                let [a, b, c, d, e, f, g, h] = groups;
                SocketAddr::from((Ipv6Addr::new(a, b, c, d, e, f, g, h), self.port))
            }
        }
    }

    /// Resolves a host name or literal through the OS resolver. Every
    /// returned address carries `port`.
    pub fn resolve(host: &str, port: u16) -> Result<Vec<Address>, NetError> {
        let resolved = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetError::InvalidAddress(format!("{}: {}", host, e)))?;

        let mut addresses: Vec<Address> = Vec::new();
        for socket_addr in resolved {
            let address = Address::from(socket_addr);
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        Ok(addresses)
    }

    /// Enumerates the local endpoints a host listens on, one per distinct
    /// resolved address across `hosts`.
    pub fn resolve_local(hosts: &[String], port: u16) -> Result<Vec<Address>, NetError> {
        let mut addresses: Vec<Address> = Vec::new();
        for host in hosts {
            match Address::resolve(host, port) {
                Ok(resolved) => {
                    for address in resolved {
                        if !addresses.contains(&address) {
                            addresses.push(address);
                        }
                    }
                }
                Err(e) => log::warn!("Skipping local host {}: {}", host, e),
            }
        }

        if addresses.is_empty() {
            return Err(NetError::NoLocalAddress(hosts.to_vec()));
        }
        Ok(addresses)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Address::new(Ip::V4(u32::from(*v4.ip())), v4.port()),
            SocketAddr::V6(v6) => Address::new(Ip::V6(v6.ip().segments()), v6.port()),
        }
    }
}

impl From<Address> for SocketAddr {
    fn from(address: Address) -> Self {
        address.to_socket_addr()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Ip::V4(value) => write!(f, "{}:{}", Ipv4Addr::from(value), self.port),
            Ip::V6(_) => write!(f, "{}", self.to_socket_addr()),
        }
    }
}

/// `A.B.C.D:port` with 1-3 digit octets and a 1-5 digit port.
fn has_v4_endpoint_shape(text: &str) -> bool {
    let Some((ip, port)) = text.split_once(':') else {
        return false;
    };

    let all_digits = |part: &str, max: usize| {
        !part.is_empty() && part.len() <= max && part.bytes().all(|b| b.is_ascii_digit())
    };

    let octets: Vec<&str> = ip.split('.').collect();
    octets.len() == 4 && octets.iter().all(|o| all_digits(o, 3)) && all_digits(port, 5)
}

impl FromStr for Address {
    type Err = NetError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();

        if text.starts_with('[') {
            return text
                .parse::<SocketAddrV6>()
                .map(|v6| Address::from(SocketAddr::V6(v6)))
                .map_err(|_| NetError::InvalidAddress(text.to_string()));
        }

        if !has_v4_endpoint_shape(text) {
            return Err(NetError::InvalidAddress(text.to_string()));
        }

        let invalid = || NetError::InvalidAddress(text.to_string());
        let (ip, port) = text.split_once(':').ok_or_else(invalid)?;

        let mut octets = [0u8; 4];
        for (slot, part) in octets.iter_mut().zip(ip.split('.')) {
            *slot = part.parse().map_err(|_| invalid())?;
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;

        Ok(Address::v4(octets, port))
    }
}
