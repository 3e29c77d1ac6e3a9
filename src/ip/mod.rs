//! IP address arithmetic for allocation.
//!
//! This module parses subnets, derives their network ID and broadcast
//! address, and walks the eligible host range that candidates are drawn from.

pub mod subnet;
pub mod navigator;

// Re-export commonly used types
pub use subnet::{host_route, Family, Subnet, SubnetError};
pub use navigator::{AddressSpace, ExclusionZone};
