//! Candidate address navigation.
//!
//! This file computes the eligible host range of a subnet after applying the
//! head/tail exclusion zone, picks a random starting point inside it and
//! steps through it with wraparound.

use super::subnet::{from_bits, to_bits, Family, Subnet};
use rand::Rng;
use std::net::IpAddr;

/// Addresses reserved right after the network ID and right before the broadcast address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExclusionZone {
    pub exclude_first: u64,
    pub exclude_last: u64,
}

impl ExclusionZone {
    pub fn new(exclude_first: u64, exclude_last: u64) -> Self {
        ExclusionZone { exclude_first, exclude_last }
    }
}

/// The inclusive range `[network + 1 + exclude_first, broadcast - 1 - exclude_last]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace {
    family: Family,
    first: u128,
    last: u128,
}

impl AddressSpace {
    /// Returns `None` when the exclusion zone leaves no eligible address.
    pub fn new(subnet: &Subnet, zone: ExclusionZone) -> Option<Self> {
        let network = to_bits(subnet.network_id());
        let broadcast = to_bits(subnet.broadcast());

        let first = network
            .checked_add(1)?
            .checked_add(zone.exclude_first as u128)?;
        let last = broadcast
            .checked_sub(1)?
            .checked_sub(zone.exclude_last as u128)?;

        if first > last {
            return None;
        }

        Some(AddressSpace {
            family: subnet.family(),
            first,
            last,
        })
    }

    /// Lowest eligible address
    pub fn first(&self) -> IpAddr {
        from_bits(self.family, self.first)
    }

    /// Highest eligible address
    pub fn last(&self) -> IpAddr {
        from_bits(self.family, self.last)
    }

    /// Number of eligible addresses
    pub fn size(&self) -> u128 {
        self.last - self.first + 1
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        if Family::of(addr) != self.family {
            return false;
        }
        let bits = to_bits(addr);
        bits >= self.first && bits <= self.last
    }

    /// Uniformly distributed starting address for a search
    pub fn first_candidate<R: Rng + ?Sized>(&self, rng: &mut R) -> IpAddr {
        from_bits(self.family, rng.gen_range(self.first..=self.last))
    }

    /// The next address, wrapping from the last eligible address to the first
    pub fn advance(&self, current: IpAddr) -> IpAddr {
        let bits = to_bits(current);
        if bits >= self.last || bits < self.first {
            self.first()
        } else {
            from_bits(self.family, bits + 1)
        }
    }
}
