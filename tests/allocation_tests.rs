#[cfg(test)]
mod allocation_tests {
    use std::net::IpAddr;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use route_table_ipam::allocator::{attempt, Candidate};
    use route_table_ipam::config::AllocatorConfig;
    use route_table_ipam::ip::{host_route, AddressSpace, ExclusionZone, Subnet};
    use route_table_ipam::route::{Interference, MemoryRouteTable, RouteTable};
    use route_table_ipam::{AllocationError, AllocationRequest, AllocationSession};

    const LINK: u32 = 2;

    fn fast_config() -> AllocatorConfig {
        AllocatorConfig {
            retry_delay: Duration::ZERO,
            propagation_delay: Duration::ZERO,
            ..AllocatorConfig::default()
        }
    }

    fn session(table: MemoryRouteTable, seed: u64) -> AllocationSession<MemoryRouteTable> {
        AllocationSession::with_rng(table, fast_config(), StdRng::seed_from_u64(seed))
    }

    fn request(cidr: &str, exclude_first: u64, exclude_last: u64) -> AllocationRequest {
        AllocationRequest::from_cidr(cidr)
            .unwrap()
            .with_exclusion(ExclusionZone::new(exclude_first, exclude_last))
            .with_link_index(Some(LINK))
    }

    fn v4(last_octet: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last_octet])
    }

    /// Every candidate queried by a search lies inside the eligible range
    #[test]
    fn test_exclusion_invariant() {
        let request = request("10.0.0.0/26", 5, 7);
        let space = AddressSpace::new(&request.subnet, request.exclusion).unwrap();

        for seed in 0..20 {
            let mut table = MemoryRouteTable::new();
            // leave a single free address so most of the range gets visited
            for host in 0..64u8 {
                if host != 30 {
                    table.claim_by_peer(v4(host));
                }
            }

            let mut session = session(table, seed);
            let record = session.allocate(&request).unwrap();
            assert_eq!(record.address(), v4(30));

            for destination in session.table().queried() {
                assert!(
                    space.contains(destination.addr()),
                    "seed {} queried {} outside {}..={}",
                    seed,
                    destination,
                    space.first(),
                    space.last()
                );
            }
        }
    }

    /// A fully claimed range ends after exactly one attempt per address
    #[test]
    fn test_termination_after_full_cycle() {
        let request = request("10.0.0.0/27", 3, 4);
        let space = AddressSpace::new(&request.subnet, request.exclusion).unwrap();

        for seed in [1, 7, 42] {
            let mut table = MemoryRouteTable::new();
            for host in 0..32u8 {
                table.claim_by_peer(v4(host));
            }

            let mut session = session(table, seed);
            match session.allocate(&request) {
                Err(AllocationError::ExhaustedSpace { attempts, .. }) => {
                    assert_eq!(attempts, space.size());
                }
                other => panic!("expected exhaustion, got {:?}", other),
            }

            let mut queried: Vec<_> = session.table().queried().to_vec();
            queried.sort();
            queried.dedup();
            assert_eq!(queried.len() as u128, space.size());
        }
    }

    /// Single claimant against an empty table installs exactly one route
    #[test]
    fn test_single_writer() {
        let (subnet, _) = Subnet::parse_cidr("10.0.0.0/24").unwrap();
        let mut table = MemoryRouteTable::new();
        let candidate = Candidate {
            subnet,
            address: v4(40),
            link_index: LINK,
        };

        let record = attempt(&mut table, &fast_config(), candidate).unwrap();
        assert_eq!(record.address(), v4(40));
        assert_eq!(table.route_count(), 1);
        assert_eq!(table.add_calls(), 1);
    }

    /// Losing a race removes our path and the session moves on
    #[test]
    fn test_race_then_next_candidate() {
        let request = request("10.0.0.0/24", 0, 0);
        let space = AddressSpace::new(&request.subnet, request.exclusion).unwrap();
        let start = space.first_candidate(&mut StdRng::seed_from_u64(3));

        let mut table = MemoryRouteTable::new();
        table.interfere(start, Interference::Race);

        let mut session = session(table, 3);
        let record = session.allocate(&request).unwrap();

        assert_eq!(record.address(), space.advance(start));
        // only the peer's path is left on the contested address
        let contested = session.table().paths(start);
        assert_eq!(contested.len(), 1);
        assert_ne!(contested[0].link_index, Some(LINK));
    }

    /// 10.0.0.0/24 excluding one address at each end, with .2 taken
    #[test]
    fn test_scenario_exclusion_with_taken_address() {
        for seed in 0..50 {
            let mut table = MemoryRouteTable::new();
            table.claim_by_peer(v4(2));

            let mut session = session(table, seed);
            let record = session.allocate(&request("10.0.0.0/24", 1, 1)).unwrap();

            let address = record.address();
            assert!(address >= v4(3) && address <= v4(253), "seed {} got {}", seed, address);
            assert_eq!(record.ip_net().to_string(), format!("{}/24", address));
        }
    }

    #[test]
    fn test_pinned_reserved_addresses() {
        let (subnet, _) = Subnet::parse_cidr("10.0.0.0/24").unwrap();
        for address in [subnet.network_id(), subnet.broadcast()] {
            let mut table = MemoryRouteTable::new();
            let candidate = Candidate {
                subnet,
                address,
                link_index: LINK,
            };
            let err = attempt(&mut table, &fast_config(), candidate).unwrap_err();
            assert!(matches!(err, AllocationError::InvalidAddress { .. }));
            assert_eq!(table.add_calls(), 0);
        }
    }

    #[test]
    fn test_ipv6_allocation_and_release() {
        let table = MemoryRouteTable::new().with_connected("fd00:10::/64".parse().unwrap(), 9);
        let mut session = session(table, 5);

        let request = AllocationRequest::from_cidr("fd00:10::/120").unwrap();
        let record = session.allocate(&request).unwrap();

        assert_eq!(record.link_index(), 9);
        assert_eq!(record.host_route().prefix_len(), 128);
        assert!(request.subnet.contains(&record.address()));
        assert_ne!(record.address(), request.subnet.network_id());
        assert_ne!(record.address(), request.subnet.broadcast());

        let address = record.address();
        session.release(&record).unwrap();
        assert!(session.table_mut().query_routes(host_route(address)).unwrap().is_empty());
    }
}
