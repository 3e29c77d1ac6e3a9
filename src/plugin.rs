//! CNI command dispatch.
//!
//! [`execute`] maps one lifecycle command onto an [`AllocationSession`] and
//! returns the text to print on stdout. Failures are [`PluginError`]s, which
//! know their CNI error code and render themselves as the CNI error document.

use crate::allocator::{AddressRecord, AllocationError, AllocationSession, ReleaseError};
use crate::cni::{
    AddResult, CniArgs, CniArgsError, Command, ErrorResult, IpamArgs, VersionInfo, CNI_VERSION,
    EXIT_INTERNAL, EXIT_INVALID_COMMAND, EXIT_INVALID_CONFIG, EXIT_TRY_AGAIN,
};
use crate::route::RouteTable;
use log::{debug, info};
use rand::Rng;
use std::error::Error as StdError;
use std::path::PathBuf;

/// Errors reported back to the container runtime
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Invalid CNI command '{0}'")]
    InvalidCommand(String),

    #[error("CIDR must be provided in CNI_ARGS")]
    MissingCidr,

    #[error("Invalid CNI_ARGS")]
    InvalidArgument(#[source] CniArgsError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to allocate an address")]
    Allocation(#[from] AllocationError),

    #[error("Failed to release an address")]
    Release(#[from] ReleaseError),

    #[error("Cannot release {cidr}: the network ID is never allocated")]
    ReleaseNetworkId { cidr: String },

    #[error("Failed to open log file '{}'", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize logging")]
    Logger(#[from] log::SetLoggerError),

    #[error("Failed to serialize result")]
    Output(#[from] serde_json::Error),

    #[error("Plugin panicked: {0}")]
    Panic(String),
}

impl From<CniArgsError> for PluginError {
    fn from(err: CniArgsError) -> Self {
        match err {
            CniArgsError::UnknownCommand(command) => PluginError::InvalidCommand(command),
            CniArgsError::MissingCidr => PluginError::MissingCidr,
            other => PluginError::InvalidArgument(other),
        }
    }
}

impl PluginError {
    /// CNI error code, also used as the exit status
    pub fn code(&self) -> i32 {
        match self {
            PluginError::InvalidCommand(_) => EXIT_INVALID_COMMAND,
            PluginError::MissingCidr | PluginError::Config(_) => EXIT_INVALID_CONFIG,
            PluginError::InvalidArgument(_)
            | PluginError::Allocation(_)
            | PluginError::Release(_)
            | PluginError::ReleaseNetworkId { .. } => EXIT_TRY_AGAIN,
            PluginError::LogFile { .. }
            | PluginError::Logger(_)
            | PluginError::Output(_)
            | PluginError::Panic(_) => EXIT_INTERNAL,
        }
    }

    /// Every underlying cause, outermost first, joined by `: `
    pub fn details(&self) -> String {
        let mut causes = Vec::new();
        let mut source = self.source();
        while let Some(err) = source {
            causes.push(err.to_string());
            source = err.source();
        }
        causes.join(": ")
    }

    pub fn to_result(&self) -> ErrorResult {
        ErrorResult {
            cni_version: CNI_VERSION.to_string(),
            code: self.code(),
            msg: self.to_string(),
            details: self.details(),
        }
    }

    /// The CNI error document
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.to_result()).unwrap_or_default()
    }
}

/// Run `command` with the raw `CNI_ARGS` string and return what goes to stdout.
pub fn execute<T, R>(
    command: &str,
    cni_args: &str,
    session: &mut AllocationSession<T, R>,
) -> Result<String, PluginError>
where
    T: RouteTable,
    R: Rng,
{
    let command: Command = command.parse()?;
    debug!("Executing {}", command);

    if command == Command::Version {
        return Ok(serde_json::to_string(&VersionInfo::default())?);
    }

    let args = CniArgs::parse(cni_args)?;
    let ipam = IpamArgs::from_args(&args)?;
    let request = ipam.to_request()?;

    match command {
        Command::Add => {
            let record = session.allocate(&request)?;
            Ok(serde_json::to_string(&AddResult::from_record(&record))?)
        }
        Command::Del => {
            let address = request.pinned_address().ok_or_else(|| PluginError::ReleaseNetworkId {
                cidr: ipam.cidr.clone(),
            })?;
            let link_index = match request.link_index {
                Some(link_index) => link_index,
                None => session.resolve_link(&request.subnet)?,
            };

            let record = AddressRecord::new(
                address,
                request.subnet,
                link_index,
                session.config().route_protocol,
            );
            session.release(&record)?;
            info!(
                "Released {} on link {} with protocol {}",
                record.host_route(),
                record.link_index(),
                record.protocol()
            );
            Ok(String::new())
        }
        // no verification is performed, but CIDR must still parse like for ADD and DEL
        Command::Check => Ok(String::new()),
        Command::Version => Ok(serde_json::to_string(&VersionInfo::default())?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocatorConfig;
    use crate::route::MemoryRouteTable;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn session() -> AllocationSession<MemoryRouteTable> {
        let config = AllocatorConfig {
            retry_delay: Duration::ZERO,
            propagation_delay: Duration::ZERO,
            ..AllocatorConfig::default()
        };
        let table = MemoryRouteTable::new().with_connected("10.0.0.0/24".parse().unwrap(), 2);
        AllocationSession::with_rng(table, config, StdRng::seed_from_u64(11))
    }

    #[test]
    fn test_version() {
        let output = execute("VERSION", "", &mut session()).unwrap();
        assert_eq!(output, r#"{"cniVersion":"0.4.0","supportedVersions":["0.4.0"]}"#);
    }

    #[test]
    fn test_add_pinned() {
        let output = execute("ADD", "CIDR=10.0.0.7/24", &mut session()).unwrap();
        assert_eq!(
            output,
            r#"{"cniVersion":"0.4.0","ips":[{"version":"4","address":"10.0.0.7/24"}]}"#
        );
    }

    #[test]
    fn test_add_then_del() {
        let mut session = session();
        execute("ADD", "CIDR=10.0.0.7/24", &mut session).unwrap();
        assert_eq!(session.table().route_count(), 1);

        let output = execute("DEL", "CIDR=10.0.0.7/24;LINK_INDEX=2", &mut session).unwrap();
        assert!(output.is_empty());
        assert_eq!(session.table().route_count(), 0);

        let err = execute("DEL", "CIDR=10.0.0.7/24", &mut session).unwrap_err();
        assert!(matches!(err, PluginError::Release(_)));
        assert_eq!(err.code(), EXIT_TRY_AGAIN);
    }

    #[test]
    fn test_del_network_id() {
        let err = execute("DEL", "CIDR=10.0.0.0/24", &mut session()).unwrap_err();
        assert!(matches!(err, PluginError::ReleaseNetworkId { .. }));
    }

    #[test]
    fn test_check_is_noop() {
        let mut session = session();
        assert_eq!(execute("CHECK", "CIDR=10.0.0.7/24", &mut session).unwrap(), "");
        assert!(session.table().queried().is_empty());
        assert_eq!(session.table().add_calls(), 0);
    }

    #[test]
    fn test_check_requires_valid_cidr() {
        let err = execute("CHECK", "CIDR=10.0.0.0", &mut session()).unwrap_err();
        assert!(matches!(err, PluginError::InvalidArgument(CniArgsError::Subnet(_))));
        assert_eq!(err.code(), EXIT_TRY_AGAIN);

        let err = execute("CHECK", "", &mut session()).unwrap_err();
        assert_eq!(err.code(), EXIT_INVALID_CONFIG);
    }

    #[test]
    fn test_error_codes() {
        let err = execute("RESET", "", &mut session()).unwrap_err();
        assert_eq!(err.code(), EXIT_INVALID_COMMAND);

        let err = execute("ADD", "EXCLUDE_FIRST=1", &mut session()).unwrap_err();
        assert!(matches!(err, PluginError::MissingCidr));
        assert_eq!(err.code(), EXIT_INVALID_CONFIG);

        let err = execute("ADD", "CIDR=10.0.0.0/24;LINK_INDEX=eth0", &mut session()).unwrap_err();
        assert_eq!(err.code(), EXIT_TRY_AGAIN);
    }

    #[test]
    fn test_error_document() {
        let err = execute("ADD", "CIDR=10.0.0.255/24", &mut session()).unwrap_err();
        let doc: serde_json::Value = serde_json::from_str(&err.to_json()).unwrap();

        assert_eq!(doc["cniVersion"], "0.4.0");
        assert_eq!(doc["code"], 11);
        assert_eq!(doc["msg"], "Failed to allocate an address");
        assert!(doc["details"]
            .as_str()
            .unwrap()
            .contains("broadcast address 10.0.0.255"));
    }
}
