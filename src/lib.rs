//! # route-table-ipam - Cluster-wide IP allocation through the routing table
//!
//! This library provides a CNI IPAM plugin that hands out addresses from a
//! subnet shared by many hosts without any central allocator.
//!
//! ## Overview
//!
//! Every host of the cluster runs a routing protocol that propagates the
//! routes of its local table to its peers. An address is claimed by adding a
//! /32 (or /128) host route for it locally. After a propagation window the
//! claimant reads the route back: if it is still the only path to the
//! address, the address is taken; if a peer's route merged into it, both
//! claimants back off and pick again.
//!
//! ## Key Features
//!
//! - **No coordinator**: the routing table is the only shared state
//! - **Random search**: candidates start at a random address and wrap around
//! - **Pinned requests**: a specific address can be requested and is retried until free
//! - **Exclusion zones**: leading and trailing addresses of a subnet can be held back
//! - **IPv4 and IPv6**: host routes are /32 or /128 as appropriate
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `config`: Configuration structures and validation
//! - `config_loader`: Configuration file loading
//! - `ip`: Subnet arithmetic and the eligible address range
//! - `route`: The routing table contract, backed by netlink or memory
//! - `allocator`: Claim attempts, allocation sessions, and address records
//! - `cni`: CNI arguments and result documents
//! - `plugin`: CNI command dispatch and error codes
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use route_table_ipam::config::AllocatorConfig;
//! use route_table_ipam::{AllocationRequest, AllocationSession, NetlinkRouteTable};
//!
//! let mut session = AllocationSession::new(NetlinkRouteTable::new(), AllocatorConfig::default());
//! let request = AllocationRequest::from_cidr("10.0.0.0/24")?;
//!
//! let record = session.allocate(&request)?;
//! println!("claimed {}", record.ip_net());
//!
//! session.release(&record)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Configuration Format
//!
//! Configurations use YAML format and every field is optional:
//!
//! ```yaml
//! general:
//!   log_level: debug
//!   log_file: /var/log/route-table.log   # "-" for stderr
//!
//! allocator:
//!   retry_delay: "100ms"
//!   propagation_delay: "250ms"
//!   route_protocol: 192
//! ```
//!
//! ## Error Handling
//!
//! Library operations return `thiserror` enums so that callers can tell
//! retryable allocation failures from fatal ones. Configuration loading
//! returns `color_eyre::Result` with file context attached.

pub mod config;
pub mod config_loader;
pub mod ip;
pub mod route;
pub mod allocator;
pub mod cni;
pub mod plugin;

pub use allocator::{AddressRecord, AllocationError, AllocationRequest, AllocationSession};
pub use route::{MemoryRouteTable, NetlinkRouteTable, RouteTable};
