//! Allocation error taxonomy.

use crate::ip::Subnet;
use crate::route::RouteError;
use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;

/// The two addresses of a subnet that can never be claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedAddress {
    NetworkId,
    Broadcast,
}

impl fmt::Display for ReservedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservedAddress::NetworkId => write!(f, "network ID"),
            ReservedAddress::Broadcast => write!(f, "broadcast address"),
        }
    }
}

/// Errors that can end an allocation attempt or session
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("Cannot request the {kind} {address} of subnet {subnet}")]
    InvalidAddress {
        address: IpAddr,
        subnet: Subnet,
        kind: ReservedAddress,
    },

    #[error("No directly connected interface found for subnet {subnet}")]
    LinkNotFound { subnet: Subnet },

    #[error("Address {address} already in use")]
    AddressInUse { address: IpAddr },

    #[error("Added {destination} to the routing table on link {link_index}, but it was gone when we checked")]
    RouteVanished { destination: IpNet, link_index: u32 },

    #[error("Selected {destination}, but someone else selected it at the same time")]
    RaceLost { destination: IpNet, link_index: u32 },

    #[error("Exhausted address space and found no available address in {subnet} after {attempts} attempts")]
    ExhaustedSpace { subnet: Subnet, attempts: u128 },

    #[error("Failed to add route to {destination} on link {link_index} for subnet {subnet}")]
    RouteMutation {
        subnet: Subnet,
        destination: IpNet,
        link_index: u32,
        #[source]
        source: RouteError,
    },

    #[error("Failed to query routes to {destination} for subnet {subnet}")]
    RouteQuery {
        subnet: Subnet,
        destination: IpNet,
        #[source]
        source: RouteError,
    },

    #[error("Rolling back route to {destination} on link {link_index} for subnet {subnet} failed, the route may be leaked")]
    RouteLeaked {
        subnet: Subnet,
        destination: IpNet,
        link_index: u32,
        #[source]
        source: RouteError,
    },
}

impl AllocationError {
    /// Whether a session should move on and try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AllocationError::AddressInUse { .. }
                | AllocationError::RouteVanished { .. }
                | AllocationError::RaceLost { .. }
        )
    }
}

/// Errors from releasing a claimed address
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("Failed to delete route to {destination} on link {link_index}")]
    RouteMutation {
        destination: IpNet,
        link_index: u32,
        #[source]
        source: RouteError,
    },
}
