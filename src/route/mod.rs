//! Routing table access.
//!
//! The allocator only needs four things from a routing table: list the routes
//! to a host destination, add one, delete one, and find the interface a
//! subnet is directly attached to. [`RouteTable`] captures that contract.
//!
//! - `netlink`: the kernel main table, over a raw `NETLINK_ROUTE` socket
//! - `memory`: an in-process table for simulation and tests

pub mod memory;
pub mod netlink;

use crate::ip::Subnet;
use ipnet::IpNet;
use std::io;

pub use memory::{Interference, MemoryRouteTable, Path};
pub use netlink::NetlinkRouteTable;

/// Route protocol tag marking host routes installed by this allocator
pub const DEFAULT_ROUTE_PROTOCOL: u8 = 192;

/// One route to a destination as reported by the table.
///
/// Several claimants merging into a single multipath route show up as one
/// entry with `path_count > 1`; separately installed routes show up as
/// separate entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: IpNet,
    pub link_index: Option<u32>,
    pub protocol: u8,
    pub path_count: usize,
}

impl RouteEntry {
    pub fn is_multipath(&self) -> bool {
        self.path_count > 1
    }
}

/// Errors reported by a routing table
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Netlink request failed: {0}")]
    Netlink(#[from] io::Error),

    #[error("No route to {destination} on link {link_index} with protocol {protocol}")]
    NoSuchRoute {
        destination: IpNet,
        link_index: u32,
        protocol: u8,
    },

    #[error("Route to {destination} already exists")]
    RouteExists { destination: IpNet },

    #[error("Route table unavailable: {0}")]
    Unavailable(String),
}

/// Host route operations consumed by the allocator
pub trait RouteTable {
    /// All routes in the main table whose destination equals `destination` exactly
    fn query_routes(&mut self, destination: IpNet) -> Result<Vec<RouteEntry>, RouteError>;

    /// Install a route to `destination` out of `link_index`, tagged with `protocol`
    fn add_route(&mut self, destination: IpNet, link_index: u32, protocol: u8) -> Result<(), RouteError>;

    /// Remove the route matching `destination`, `link_index` and `protocol`
    fn delete_route(&mut self, destination: IpNet, link_index: u32, protocol: u8) -> Result<(), RouteError>;

    /// Interface index of the directly connected (gateway-less) route covering `subnet`
    fn resolve_local_interface(&mut self, subnet: &Subnet) -> Result<Option<u32>, RouteError>;
}

impl<T: RouteTable + ?Sized> RouteTable for &mut T {
    fn query_routes(&mut self, destination: IpNet) -> Result<Vec<RouteEntry>, RouteError> {
        (**self).query_routes(destination)
    }

    fn add_route(&mut self, destination: IpNet, link_index: u32, protocol: u8) -> Result<(), RouteError> {
        (**self).add_route(destination, link_index, protocol)
    }

    fn delete_route(&mut self, destination: IpNet, link_index: u32, protocol: u8) -> Result<(), RouteError> {
        (**self).delete_route(destination, link_index, protocol)
    }

    fn resolve_local_interface(&mut self, subnet: &Subnet) -> Result<Option<u32>, RouteError> {
        (**self).resolve_local_interface(subnet)
    }
}
