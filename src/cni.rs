//! CNI wire types.
//!
//! The runtime hands us a command and a `K=V;K=V` argument string through the
//! environment and reads a JSON document from stdout. This file parses the
//! former and serializes the latter.

use crate::allocator::{AddressRecord, AllocationRequest};
use crate::ip::{ExclusionZone, SubnetError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// CNI specification version spoken by this plugin
pub const CNI_VERSION: &str = "0.4.0";

pub const EXIT_INVALID_COMMAND: i32 = 4;
pub const EXIT_INVALID_CONFIG: i32 = 7;
pub const EXIT_TRY_AGAIN: i32 = 11;
pub const EXIT_INTERNAL: i32 = 99;

/// Lifecycle command taken from `CNI_COMMAND`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Del,
    Check,
    Version,
}

impl FromStr for Command {
    type Err = CniArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ADD" => Ok(Command::Add),
            "DEL" => Ok(Command::Del),
            "CHECK" => Ok(Command::Check),
            "VERSION" => Ok(Command::Version),
            other => Err(CniArgsError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Add => "ADD",
            Command::Del => "DEL",
            Command::Check => "CHECK",
            Command::Version => "VERSION",
        };
        write!(f, "{}", name)
    }
}

/// Errors found in the CNI environment
#[derive(Debug, thiserror::Error)]
pub enum CniArgsError {
    #[error("Unknown CNI command '{0}'")]
    UnknownCommand(String),

    #[error("CIDR missing from CNI_ARGS")]
    MissingCidr,

    #[error("Malformed CNI_ARGS entry '{0}', expected KEY=VALUE")]
    MalformedPair(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidNumber {
        key: String,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error(transparent)]
    Subnet(#[from] SubnetError),
}

/// Raw `K=V;K=V` pairs from `CNI_ARGS`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CniArgs {
    pairs: HashMap<String, String>,
}

impl CniArgs {
    /// Split on `;` then on the first `=`. Empty segments are skipped.
    pub fn parse(raw: &str) -> Result<Self, CniArgsError> {
        let mut pairs = HashMap::new();
        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| CniArgsError::MalformedPair(segment.to_string()))?;
            pairs.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(CniArgs { pairs })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    fn number<N>(&self, key: &str) -> Result<Option<N>, CniArgsError>
    where
        N: FromStr<Err = std::num::ParseIntError>,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|source| CniArgsError::InvalidNumber {
                    key: key.to_string(),
                    value: value.to_string(),
                    source,
                })
            })
            .transpose()
    }
}

/// The IPAM part of `CNI_ARGS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamArgs {
    pub cidr: String,
    pub exclusion: ExclusionZone,
    /// `None` when absent or negative
    pub link_index: Option<u32>,
}

impl IpamArgs {
    pub fn from_args(args: &CniArgs) -> Result<Self, CniArgsError> {
        let cidr = args.get("CIDR").ok_or(CniArgsError::MissingCidr)?;
        let exclude_first = args.number::<u64>("EXCLUDE_FIRST")?.unwrap_or(0);
        let exclude_last = args.number::<u64>("EXCLUDE_LAST")?.unwrap_or(0);
        let link_index = args
            .number::<i64>("LINK_INDEX")?
            .and_then(|idx| u32::try_from(idx).ok());

        Ok(IpamArgs {
            cidr: cidr.to_string(),
            exclusion: ExclusionZone::new(exclude_first, exclude_last),
            link_index,
        })
    }

    pub fn to_request(&self) -> Result<AllocationRequest, CniArgsError> {
        Ok(AllocationRequest::from_cidr(&self.cidr)?
            .with_exclusion(self.exclusion)
            .with_link_index(self.link_index))
    }
}

/// One address of an ADD result
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct IpConfig {
    pub version: String,
    pub address: String,
}

/// Result printed for a successful ADD
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct AddResult {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    pub ips: Vec<IpConfig>,
}

impl AddResult {
    pub fn from_record(record: &AddressRecord) -> Self {
        AddResult {
            cni_version: CNI_VERSION.to_string(),
            ips: vec![IpConfig {
                version: record.family().version().to_string(),
                address: record.ip_net().to_string(),
            }],
        }
    }
}

/// Result printed for VERSION
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct VersionInfo {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    #[serde(rename = "supportedVersions")]
    pub supported_versions: Vec<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        VersionInfo {
            cni_version: CNI_VERSION.to_string(),
            supported_versions: vec![CNI_VERSION.to_string()],
        }
    }
}

/// Error document printed on failure
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorResult {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}
