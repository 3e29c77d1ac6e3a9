//! A single claim attempt.
//!
//! One attempt runs validate → query → claim → await propagation → reverify
//! for one candidate and ends either with an [`AddressRecord`] owning the
//! inserted host route, or with the route deleted again and an error saying
//! why. The only exception is a failed rollback, reported as
//! [`AllocationError::RouteLeaked`].
//!
//! Peers on other hosts run the same steps against their own tables. The
//! propagation window gives a peer's route the time to show up here, either
//! before our query (we skip the address) or merged into our route before
//! the reverify (both claimants back off).

use super::error::{AllocationError, ReservedAddress};
use super::record::AddressRecord;
use crate::config::AllocatorConfig;
use crate::ip::{host_route, Subnet};
use crate::route::RouteTable;
use ipnet::IpNet;
use log::{debug, error, warn};
use std::net::IpAddr;
use std::thread;

/// One address to try, bound to the interface its route will point out of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub subnet: Subnet,
    pub address: IpAddr,
    pub link_index: u32,
}

impl Candidate {
    pub fn host_route(&self) -> IpNet {
        host_route(self.address)
    }
}

/// Try to claim `candidate` cluster-wide.
pub fn attempt<T: RouteTable + ?Sized>(
    table: &mut T,
    config: &AllocatorConfig,
    candidate: Candidate,
) -> Result<AddressRecord, AllocationError> {
    let Candidate {
        subnet,
        address,
        link_index,
    } = candidate;
    let destination = candidate.host_route();

    if address == subnet.network_id() {
        return Err(AllocationError::InvalidAddress {
            address,
            subnet,
            kind: ReservedAddress::NetworkId,
        });
    }
    if address == subnet.broadcast() {
        return Err(AllocationError::InvalidAddress {
            address,
            subnet,
            kind: ReservedAddress::Broadcast,
        });
    }

    let existing = table
        .query_routes(destination)
        .map_err(|source| AllocationError::RouteQuery {
            subnet,
            destination,
            source,
        })?;
    if !existing.is_empty() {
        return Err(AllocationError::AddressInUse { address });
    }

    debug!("Claiming {} on link {}", destination, link_index);
    table
        .add_route(destination, link_index, config.route_protocol)
        .map_err(|source| AllocationError::RouteMutation {
            subnet,
            destination,
            link_index,
            source,
        })?;

    // wait for at least the estimated route propagation time
    thread::sleep(config.propagation_delay);

    let routes = match table.query_routes(destination) {
        Ok(routes) => routes,
        Err(source) => {
            warn!("Reverifying {} failed: {}", destination, source);
            rollback(table, config, candidate)?;
            return Err(AllocationError::RouteQuery {
                subnet,
                destination,
                source,
            });
        }
    };

    match routes.as_slice() {
        [] => Err(AllocationError::RouteVanished {
            destination,
            link_index,
        }),
        [route] if route.path_count <= 1 => {
            debug!("Confirmed sole ownership of {}", destination);
            Ok(AddressRecord::new(address, subnet, link_index, config.route_protocol))
        }
        _ => {
            for route in &routes {
                debug!(
                    "Competing route to {} via link {:?}, protocol {}, {} path(s)",
                    route.destination, route.link_index, route.protocol, route.path_count
                );
            }
            debug!(
                "Found {} competing route(s) to {}, backing off",
                routes.len(),
                destination
            );
            rollback(table, config, candidate)?;
            Err(AllocationError::RaceLost {
                destination,
                link_index,
            })
        }
    }
}

/// Delete the route this attempt inserted
fn rollback<T: RouteTable + ?Sized>(
    table: &mut T,
    config: &AllocatorConfig,
    candidate: Candidate,
) -> Result<(), AllocationError> {
    let destination = candidate.host_route();

    table
        .delete_route(destination, candidate.link_index, config.route_protocol)
        .map_err(|source| {
            error!(
                "Failed to remove {} from link {}, the route is likely leaked: {}",
                destination, candidate.link_index, source
            );
            AllocationError::RouteLeaked {
                subnet: candidate.subnet,
                destination,
                link_index: candidate.link_index,
                source,
            }
        })
}
