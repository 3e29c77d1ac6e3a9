//! Subnet arithmetic.
//!
//! This file parses CIDR strings into a subnet plus the address that was
//! written in front of the prefix length, and provides the integer view of
//! addresses that the navigator walks over.

use ipnet::IpNet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Errors that can occur while parsing a subnet
#[derive(Debug, thiserror::Error)]
pub enum SubnetError {
    #[error("Invalid CIDR '{cidr}': {source}")]
    InvalidCidr {
        cidr: String,
        #[source]
        source: ipnet::AddrParseError,
    },
}

/// Address family of a subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    /// Version string used in CNI results ("4" or "6")
    pub fn version(&self) -> &'static str {
        match self {
            Family::V4 => "4",
            Family::V6 => "6",
        }
    }
}

/// An immutable network prefix. The host bits are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    net: IpNet,
}

impl Subnet {
    pub fn new(net: IpNet) -> Self {
        Subnet { net: net.trunc() }
    }

    /// Parse `addr/len` into the subnet and the address as written.
    ///
    /// `10.0.0.7/24` yields the subnet `10.0.0.0/24` and the address
    /// `10.0.0.7`; `10.0.0.0/24` yields the network ID itself, which callers
    /// treat as a request for any free address.
    pub fn parse_cidr(cidr: &str) -> Result<(Subnet, IpAddr), SubnetError> {
        let net: IpNet = cidr.trim().parse().map_err(|source| SubnetError::InvalidCidr {
            cidr: cidr.to_string(),
            source,
        })?;
        Ok((Subnet::new(net), net.addr()))
    }

    /// All host bits zero
    pub fn network_id(&self) -> IpAddr {
        self.net.network()
    }

    /// All host bits one
    pub fn broadcast(&self) -> IpAddr {
        self.net.broadcast()
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    pub fn family(&self) -> Family {
        Family::of(self.net.addr())
    }

    pub fn net(&self) -> IpNet {
        self.net
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.net.contains(addr)
    }

    /// The address carrying this subnet's prefix length, e.g. `10.0.0.7/24`
    pub fn with_address(&self, addr: IpAddr) -> IpNet {
        IpNet::new(addr, self.prefix_len()).unwrap_or_else(|_| IpNet::from(addr))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

/// Project an address to its full-length host route (/32 or /128)
pub fn host_route(addr: IpAddr) -> IpNet {
    IpNet::from(addr)
}

/// Integer view of an address, used for range arithmetic
pub fn to_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Inverse of [`to_bits`]. IPv4 values are truncated to 32 bits.
pub fn from_bits(family: Family, bits: u128) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}
