use crate::route::DEFAULT_ROUTE_PROTOCOL;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default log file, kept off stdout because stdout carries the CNI result
pub const DEFAULT_LOG_FILE: &str = "/var/log/route-table.log";

/// Highest route protocol value reserved by the kernel (RTPROT_STATIC)
const MAX_RESERVED_ROUTE_PROTOCOL: u8 = 4;

/// Plugin configuration, every section optional
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub allocator: AllocatorConfig,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(level) = &self.general.log_level {
            if log::LevelFilter::from_str(level).is_err() {
                return Err(ValidationError::InvalidGeneral(format!(
                    "unknown log_level '{}'",
                    level
                )));
            }
        }

        if let Some(path) = &self.general.log_file {
            if path.as_os_str().is_empty() {
                return Err(ValidationError::InvalidGeneral(
                    "log_file cannot be empty".to_string(),
                ));
            }
        }

        self.allocator.validate()
    }
}

/// Logging settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// env_logger filter level, overridden by RUST_LOG
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Log destination; `-` logs to stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: Some("debug".to_string()),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}

/// Timing and tagging of the allocation protocol
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Pause between two attempts of a session
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Minimum time for a claimed host route to reach every peer
    #[serde(with = "humantime_serde")]
    pub propagation_delay: Duration,
    /// rtm_protocol value marking routes owned by this allocator
    pub route_protocol: u8,
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.route_protocol <= MAX_RESERVED_ROUTE_PROTOCOL {
            return Err(ValidationError::InvalidAllocator(format!(
                "route_protocol {} is reserved by the kernel, use a value above {}",
                self.route_protocol, MAX_RESERVED_ROUTE_PROTOCOL
            )));
        }

        if self.propagation_delay.is_zero() {
            log::warn!("propagation_delay is zero, concurrent claims on other hosts will go unnoticed");
        }

        Ok(())
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(100),
            propagation_delay: Duration::from_millis(250),
            route_protocol: DEFAULT_ROUTE_PROTOCOL,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid allocator configuration: {0}")]
    InvalidAllocator(String),
}
