//! Claimed addresses.

use super::error::ReleaseError;
use crate::ip::{host_route, Family, Subnet};
use crate::route::RouteTable;
use ipnet::IpNet;
use log::debug;
use std::net::IpAddr;

/// An address claimed through a host route that this process installed.
///
/// Dropping a record does not touch the routing table; the claim lives until
/// [`AddressRecord::release`] deletes the backing route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    address: IpAddr,
    subnet: Subnet,
    link_index: u32,
    protocol: u8,
}

impl AddressRecord {
    /// Bind `address` to the host route on `link_index` tagged with `protocol`.
    ///
    /// Besides the protocol's own success path, this rebuilds the record of
    /// an earlier claim so that it can be released.
    pub fn new(address: IpAddr, subnet: Subnet, link_index: u32, protocol: u8) -> Self {
        AddressRecord {
            address,
            subnet,
            link_index,
            protocol,
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn link_index(&self) -> u32 {
        self.link_index
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn family(&self) -> Family {
        self.subnet.family()
    }

    /// The /32 or /128 backing this claim
    pub fn host_route(&self) -> IpNet {
        host_route(self.address)
    }

    /// The address with the subnet's prefix length, as handed to the container
    pub fn ip_net(&self) -> IpNet {
        self.subnet.with_address(self.address)
    }

    /// Delete the backing host route. Fails if the route is already gone; the
    /// record stays usable so the release can be retried.
    pub fn release<T: RouteTable + ?Sized>(&self, table: &mut T) -> Result<(), ReleaseError> {
        let destination = self.host_route();
        debug!("Releasing {} on link {}", destination, self.link_index);

        table
            .delete_route(destination, self.link_index, self.protocol)
            .map_err(|source| ReleaseError::RouteMutation {
                destination,
                link_index: self.link_index,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{MemoryRouteTable, RouteError};

    #[test]
    fn test_record_views() {
        let (subnet, _) = Subnet::parse_cidr("10.0.0.0/24").unwrap();
        let record = AddressRecord::new("10.0.0.7".parse().unwrap(), subnet, 3, 192);
        assert_eq!(record.host_route().to_string(), "10.0.0.7/32");
        assert_eq!(record.ip_net().to_string(), "10.0.0.7/24");
        assert_eq!(record.family(), Family::V4);
    }

    #[test]
    fn test_release_deletes_route() {
        let (subnet, _) = Subnet::parse_cidr("10.0.0.0/24").unwrap();
        let address: IpAddr = "10.0.0.7".parse().unwrap();
        let mut table = MemoryRouteTable::new();
        table.add_route(host_route(address), 3, 192).unwrap();

        AddressRecord::new(address, subnet, 3, 192).release(&mut table).unwrap();
        assert!(table.paths(address).is_empty());
    }

    #[test]
    fn test_release_is_not_idempotent() {
        let (subnet, _) = Subnet::parse_cidr("10.0.0.0/24").unwrap();
        let record = AddressRecord::new("10.0.0.7".parse().unwrap(), subnet, 3, 192);
        let mut table = MemoryRouteTable::new();

        let err = record.release(&mut table).unwrap_err();
        let ReleaseError::RouteMutation { source, .. } = err;
        assert!(matches!(source, RouteError::NoSuchRoute { .. }));
    }

    #[test]
    fn test_release_can_be_retried() {
        let (subnet, _) = Subnet::parse_cidr("10.0.0.0/24").unwrap();
        let address: IpAddr = "10.0.0.7".parse().unwrap();
        let record = AddressRecord::new(address, subnet, 3, 192);
        let mut table = MemoryRouteTable::new();

        assert!(record.release(&mut table).is_err());

        table.add_route(record.host_route(), 3, record.protocol()).unwrap();
        record.release(&mut table).unwrap();
        assert!(table.paths(address).is_empty());
    }
}
