//! Allocation sessions.
//!
//! A session turns an [`AllocationRequest`] into a sequence of
//! [`attempt`]s. Pinned requests retry the same address; search requests
//! start at a random eligible address and walk the range once.

use super::attempt::{attempt, Candidate};
use super::error::{AllocationError, ReleaseError};
use super::record::AddressRecord;
use crate::config::AllocatorConfig;
use crate::ip::{AddressSpace, ExclusionZone, Subnet, SubnetError};
use crate::route::RouteTable;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::IpAddr;
use std::thread;

/// What to allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    pub subnet: Subnet,
    /// The network ID asks for any address, anything else pins that address
    pub requested: IpAddr,
    pub exclusion: ExclusionZone,
    /// Interface to bind the host route to; resolved from the subnet when absent
    pub link_index: Option<u32>,
}

impl AllocationRequest {
    /// Request for the address written in `cidr`, e.g. `10.0.0.0/24` for any address
    pub fn from_cidr(cidr: &str) -> Result<Self, SubnetError> {
        let (subnet, requested) = Subnet::parse_cidr(cidr)?;
        Ok(AllocationRequest {
            subnet,
            requested,
            exclusion: ExclusionZone::default(),
            link_index: None,
        })
    }

    pub fn with_exclusion(mut self, exclusion: ExclusionZone) -> Self {
        self.exclusion = exclusion;
        self
    }

    pub fn with_link_index(mut self, link_index: Option<u32>) -> Self {
        self.link_index = link_index;
        self
    }

    /// The pinned address, or `None` when any address will do
    pub fn pinned_address(&self) -> Option<IpAddr> {
        (self.requested != self.subnet.network_id()).then_some(self.requested)
    }
}

/// Drives allocations against one routing table
#[derive(Debug)]
pub struct AllocationSession<T, R = StdRng> {
    table: T,
    config: AllocatorConfig,
    rng: R,
}

impl<T: RouteTable> AllocationSession<T, StdRng> {
    pub fn new(table: T, config: AllocatorConfig) -> Self {
        Self::with_rng(table, config, StdRng::from_entropy())
    }
}

impl<T: RouteTable, R: Rng> AllocationSession<T, R> {
    /// Session with a caller supplied randomness source, e.g. a seeded `StdRng`
    pub fn with_rng(table: T, config: AllocatorConfig, rng: R) -> Self {
        AllocationSession { table, config, rng }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    /// Interface index of the directly connected route covering `subnet`
    pub fn resolve_link(&mut self, subnet: &Subnet) -> Result<u32, AllocationError> {
        let link = self
            .table
            .resolve_local_interface(subnet)
            .map_err(|source| AllocationError::RouteQuery {
                subnet: *subnet,
                destination: subnet.net(),
                source,
            })?;

        link.ok_or(AllocationError::LinkNotFound { subnet: *subnet })
    }

    /// Claim an address for `request`. Retryable failures never escape.
    pub fn allocate(&mut self, request: &AllocationRequest) -> Result<AddressRecord, AllocationError> {
        let link_index = match request.link_index {
            Some(link_index) => link_index,
            None => self.resolve_link(&request.subnet)?,
        };

        let record = match request.pinned_address() {
            Some(address) => self.allocate_pinned(request.subnet, address, link_index)?,
            None => self.search(request.subnet, request.exclusion, link_index)?,
        };

        info!("Allocated {} on link {}", record.ip_net(), record.link_index());
        Ok(record)
    }

    /// Delete the route backing `record`
    pub fn release(&mut self, record: &AddressRecord) -> Result<(), ReleaseError> {
        record.release(&mut self.table)
    }

    /// Retry one address until it is ours or a fatal error occurs. There is
    /// no upper bound on the number of attempts.
    fn allocate_pinned(
        &mut self,
        subnet: Subnet,
        address: IpAddr,
        link_index: u32,
    ) -> Result<AddressRecord, AllocationError> {
        let candidate = Candidate {
            subnet,
            address,
            link_index,
        };

        loop {
            debug!("Attempting to provision requested address {}", address);
            match attempt(&mut self.table, &self.config, candidate) {
                Ok(record) => return Ok(record),
                Err(err) if err.is_retryable() => {
                    warn!("Unable to provision {}: {}", address, err);
                }
                Err(err) => return Err(err),
            }

            thread::sleep(self.config.retry_delay);
        }
    }

    /// Walk the eligible range once from a random start
    fn search(
        &mut self,
        subnet: Subnet,
        exclusion: ExclusionZone,
        link_index: u32,
    ) -> Result<AddressRecord, AllocationError> {
        let space = AddressSpace::new(&subnet, exclusion)
            .ok_or(AllocationError::ExhaustedSpace { subnet, attempts: 0 })?;

        let start = space.first_candidate(&mut self.rng);
        let mut current = start;
        let mut attempts: u128 = 0;

        debug!(
            "Searching {} between {} and {} starting at {}",
            subnet,
            space.first(),
            space.last(),
            start
        );

        loop {
            attempts += 1;
            let candidate = Candidate {
                subnet,
                address: current,
                link_index,
            };

            match attempt(&mut self.table, &self.config, candidate) {
                Ok(record) => return Ok(record),
                Err(err) if err.is_retryable() => {
                    warn!("Unable to provision {}: {}", current, err);
                }
                Err(err) => return Err(err),
            }

            current = space.advance(current);
            if current == start {
                return Err(AllocationError::ExhaustedSpace { subnet, attempts });
            }

            thread::sleep(self.config.retry_delay);
        }
    }
}
