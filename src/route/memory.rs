//! In-process routing table.
//!
//! This file keeps routes in memory so the allocation protocol can be driven
//! without touching the kernel. Peers and routing protocol side effects are
//! simulated by claiming destinations on behalf of another host or by arming
//! a one-shot [`Interference`] on a destination.

use super::{RouteEntry, RouteError, RouteTable};
use crate::ip::{host_route, Subnet};
use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;

/// Protocol tag used for routes learned from peers (RTPROT_BGP)
const PEER_PROTOCOL: u8 = 186;

/// Routing protocol behaviour triggered by our next insert of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interference {
    /// A peer's path to the same destination merges with ours into a multipath route
    Race,
    /// A peer's route to the same destination is installed next to ours as a separate route
    Duplicate,
    /// Our route disappears before it can be verified
    Withdraw,
    /// The verification query fails
    QueryFailure,
    /// Deleting the route is rejected
    DeleteFailure,
}

/// A single next hop of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Path {
    pub link_index: Option<u32>,
    pub protocol: u8,
}

impl Path {
    fn peer() -> Self {
        Path {
            link_index: None,
            protocol: PEER_PROTOCOL,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryRoute {
    destination: IpNet,
    paths: Vec<Path>,
}

/// Routing table held in memory
#[derive(Debug, Default)]
pub struct MemoryRouteTable {
    routes: Vec<MemoryRoute>,
    connected: Vec<(IpNet, u32)>,
    armed: HashMap<IpNet, Interference>,
    failing_queries: Vec<IpNet>,
    failing_deletes: Vec<IpNet>,
    queries: Vec<IpNet>,
    adds: usize,
}

impl MemoryRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `net` as directly attached to `link_index`
    pub fn with_connected(mut self, net: IpNet, link_index: u32) -> Self {
        self.connected.push((net, link_index));
        self
    }

    /// Install a route to `address` on behalf of another host
    pub fn claim_by_peer(&mut self, address: IpAddr) {
        self.routes.push(MemoryRoute {
            destination: host_route(address),
            paths: vec![Path::peer()],
        });
    }

    /// Arm a one-shot interference, consumed by the next insert of `address`
    pub fn interfere(&mut self, address: IpAddr, interference: Interference) {
        self.armed.insert(host_route(address), interference);
    }

    /// Every path currently installed towards `address`
    pub fn paths(&self, address: IpAddr) -> Vec<Path> {
        let destination = host_route(address);
        self.routes
            .iter()
            .filter(|route| route.destination == destination)
            .flat_map(|route| route.paths.iter().copied())
            .collect()
    }

    /// Destinations queried so far, in order
    pub fn queried(&self) -> &[IpNet] {
        &self.queries
    }

    /// Number of `add_route` calls so far, successful or not
    pub fn add_calls(&self) -> usize {
        self.adds
    }

    /// Number of distinct routes in the table
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl RouteTable for MemoryRouteTable {
    fn query_routes(&mut self, destination: IpNet) -> Result<Vec<RouteEntry>, RouteError> {
        self.queries.push(destination);

        if let Some(pos) = self.failing_queries.iter().position(|d| *d == destination) {
            self.failing_queries.remove(pos);
            return Err(RouteError::Unavailable(format!("query for {} failed", destination)));
        }

        Ok(self
            .routes
            .iter()
            .filter(|route| route.destination == destination)
            .map(|route| RouteEntry {
                destination,
                link_index: route.paths.first().and_then(|p| p.link_index),
                protocol: route.paths.first().map_or(0, |p| p.protocol),
                path_count: route.paths.len(),
            })
            .collect())
    }

    fn add_route(&mut self, destination: IpNet, link_index: u32, protocol: u8) -> Result<(), RouteError> {
        self.adds += 1;

        if self.routes.iter().any(|route| route.destination == destination) {
            return Err(RouteError::RouteExists { destination });
        }

        let ours = Path {
            link_index: Some(link_index),
            protocol,
        };

        match self.armed.remove(&destination) {
            None => self.routes.push(MemoryRoute {
                destination,
                paths: vec![ours],
            }),
            Some(Interference::Race) => self.routes.push(MemoryRoute {
                destination,
                paths: vec![ours, Path::peer()],
            }),
            Some(Interference::Duplicate) => {
                self.routes.push(MemoryRoute {
                    destination,
                    paths: vec![ours],
                });
                self.routes.push(MemoryRoute {
                    destination,
                    paths: vec![Path::peer()],
                });
            }
            Some(Interference::Withdraw) => {}
            Some(Interference::QueryFailure) => {
                self.failing_queries.push(destination);
                self.routes.push(MemoryRoute {
                    destination,
                    paths: vec![ours],
                });
            }
            Some(Interference::DeleteFailure) => {
                self.failing_deletes.push(destination);
                self.routes.push(MemoryRoute {
                    destination,
                    paths: vec![ours],
                });
            }
        }

        Ok(())
    }

    fn delete_route(&mut self, destination: IpNet, link_index: u32, protocol: u8) -> Result<(), RouteError> {
        if self.failing_deletes.contains(&destination) {
            return Err(RouteError::Unavailable(format!("delete of {} rejected", destination)));
        }

        let ours = Path {
            link_index: Some(link_index),
            protocol,
        };

        let found = self.routes.iter().enumerate().find_map(|(idx, route)| {
            if route.destination != destination {
                return None;
            }
            route.paths.iter().position(|p| *p == ours).map(|pos| (idx, pos))
        });

        match found {
            Some((idx, pos)) => {
                self.routes[idx].paths.remove(pos);
                if self.routes[idx].paths.is_empty() {
                    self.routes.remove(idx);
                }
                Ok(())
            }
            None => Err(RouteError::NoSuchRoute {
                destination,
                link_index,
                protocol,
            }),
        }
    }

    fn resolve_local_interface(&mut self, subnet: &Subnet) -> Result<Option<u32>, RouteError> {
        Ok(self
            .connected
            .iter()
            .filter(|(net, _)| net.contains(&subnet.net()))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, link_index)| *link_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_query_delete() {
        let mut table = MemoryRouteTable::new();
        let dst = host_route(ip("10.0.0.5"));

        table.add_route(dst, 3, 192).unwrap();
        let routes = table.query_routes(dst).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].link_index, Some(3));
        assert_eq!(routes[0].path_count, 1);

        table.delete_route(dst, 3, 192).unwrap();
        assert!(table.query_routes(dst).unwrap().is_empty());
        assert_eq!(table.queried().len(), 2);
    }

    #[test]
    fn test_exclusive_insert() {
        let mut table = MemoryRouteTable::new();
        table.claim_by_peer(ip("10.0.0.5"));
        let err = table.add_route(host_route(ip("10.0.0.5")), 3, 192).unwrap_err();
        assert!(matches!(err, RouteError::RouteExists { .. }));
        assert_eq!(table.add_calls(), 1);
    }

    #[test]
    fn test_delete_requires_matching_path() {
        let mut table = MemoryRouteTable::new();
        let dst = host_route(ip("10.0.0.5"));
        table.add_route(dst, 3, 192).unwrap();

        assert!(matches!(
            table.delete_route(dst, 4, 192),
            Err(RouteError::NoSuchRoute { link_index: 4, .. })
        ));
        assert!(table.delete_route(dst, 3, 100).is_err());
        table.delete_route(dst, 3, 192).unwrap();
        assert!(table.delete_route(dst, 3, 192).is_err());
    }

    #[test]
    fn test_race_merges_paths() {
        let mut table = MemoryRouteTable::new();
        let dst = host_route(ip("10.0.0.5"));
        table.interfere(ip("10.0.0.5"), Interference::Race);
        table.add_route(dst, 3, 192).unwrap();

        let routes = table.query_routes(dst).unwrap();
        assert_eq!(routes.len(), 1);
        assert!(routes[0].is_multipath());

        table.delete_route(dst, 3, 192).unwrap();
        assert_eq!(table.paths(ip("10.0.0.5")), vec![Path::peer()]);
    }

    #[test]
    fn test_duplicate_adds_separate_route() {
        let mut table = MemoryRouteTable::new();
        let dst = host_route(ip("10.0.0.5"));
        table.interfere(ip("10.0.0.5"), Interference::Duplicate);
        table.add_route(dst, 3, 192).unwrap();

        let routes = table.query_routes(dst).unwrap();
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|route| !route.is_multipath()));

        table.delete_route(dst, 3, 192).unwrap();
        assert_eq!(table.route_count(), 1);
        assert_eq!(table.paths(ip("10.0.0.5")), vec![Path::peer()]);
    }

    #[test]
    fn test_interference_is_one_shot() {
        let mut table = MemoryRouteTable::new();
        let dst = host_route(ip("10.0.0.5"));
        table.interfere(ip("10.0.0.5"), Interference::Withdraw);

        table.add_route(dst, 3, 192).unwrap();
        assert_eq!(table.route_count(), 0);

        table.add_route(dst, 3, 192).unwrap();
        assert_eq!(table.route_count(), 1);
    }

    #[test]
    fn test_query_failure_after_insert() {
        let mut table = MemoryRouteTable::new();
        let dst = host_route(ip("10.0.0.5"));
        table.interfere(ip("10.0.0.5"), Interference::QueryFailure);
        assert!(table.query_routes(dst).unwrap().is_empty());

        table.add_route(dst, 3, 192).unwrap();
        assert!(table.query_routes(dst).is_err());
        assert_eq!(table.query_routes(dst).unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_prefers_longest_prefix() {
        let mut table = MemoryRouteTable::new()
            .with_connected("10.0.0.0/8".parse().unwrap(), 1)
            .with_connected("10.1.0.0/16".parse().unwrap(), 2);

        let (inner, _) = Subnet::parse_cidr("10.1.2.0/24").unwrap();
        let (outer, _) = Subnet::parse_cidr("10.2.0.0/24").unwrap();
        let (elsewhere, _) = Subnet::parse_cidr("192.168.0.0/24").unwrap();

        assert_eq!(table.resolve_local_interface(&inner).unwrap(), Some(2));
        assert_eq!(table.resolve_local_interface(&outer).unwrap(), Some(1));
        assert_eq!(table.resolve_local_interface(&elsewhere).unwrap(), None);
    }
}
