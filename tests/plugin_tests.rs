#[cfg(test)]
mod plugin_tests {
    use std::io::Write;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::NamedTempFile;

    use route_table_ipam::cni::{EXIT_INVALID_COMMAND, EXIT_INVALID_CONFIG, EXIT_TRY_AGAIN};
    use route_table_ipam::config_loader::load_config;
    use route_table_ipam::plugin::{execute, PluginError};
    use route_table_ipam::route::MemoryRouteTable;
    use route_table_ipam::AllocationSession;

    fn session_from_yaml(yaml: &str) -> AllocationSession<MemoryRouteTable> {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", yaml).unwrap();
        let config = load_config(file.path()).unwrap();

        let table = MemoryRouteTable::new().with_connected("192.168.10.0/24".parse().unwrap(), 4);
        AllocationSession::with_rng(table, config.allocator, StdRng::seed_from_u64(17))
    }

    fn session() -> AllocationSession<MemoryRouteTable> {
        session_from_yaml(
            r#"
allocator:
  retry_delay: "0s"
  propagation_delay: "0s"
"#,
        )
    }

    #[test]
    fn test_add_and_del_round() {
        let mut session = session();

        let output = execute(
            "ADD",
            "IgnoreUnknown=1;CIDR=192.168.10.0/24;EXCLUDE_FIRST=9;EXCLUDE_LAST=9",
            &mut session,
        )
        .unwrap();
        let result: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(result["cniVersion"], "0.4.0");
        assert_eq!(result["ips"][0]["version"], "4");

        let address = result["ips"][0]["address"].as_str().unwrap().to_string();
        let host: u8 = address
            .trim_start_matches("192.168.10.")
            .trim_end_matches("/24")
            .parse()
            .unwrap();
        assert!((10..=245).contains(&host), "allocated {}", address);

        // the DEL carries the allocated address
        let del_args = format!("CIDR={}", address);
        assert_eq!(execute("DEL", &del_args, &mut session).unwrap(), "");
        assert_eq!(session.table().route_count(), 0);

        let err = execute("DEL", &del_args, &mut session).unwrap_err();
        assert_eq!(err.code(), EXIT_TRY_AGAIN);
    }

    #[test]
    fn test_custom_protocol_is_used_for_release() {
        let mut session = session_from_yaml(
            r#"
allocator:
  retry_delay: "0s"
  propagation_delay: "0s"
  route_protocol: 201
"#,
        );

        execute("ADD", "CIDR=192.168.10.50/24", &mut session).unwrap();
        let paths = session.table().paths("192.168.10.50".parse().unwrap());
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].protocol, 201);
        assert_eq!(paths[0].link_index, Some(4));

        execute("DEL", "CIDR=192.168.10.50/24;LINK_INDEX=4", &mut session).unwrap();
        assert_eq!(session.table().route_count(), 0);
    }

    #[test]
    fn test_unknown_subnet_has_no_link() {
        let err = execute("ADD", "CIDR=172.16.0.0/24", &mut session()).unwrap_err();
        assert_eq!(err.code(), EXIT_TRY_AGAIN);
        assert!(err.details().contains("No directly connected interface"));
    }

    #[test]
    fn test_command_errors() {
        let err = execute("", "CIDR=192.168.10.0/24", &mut session()).unwrap_err();
        assert!(matches!(err, PluginError::InvalidCommand(_)));
        assert_eq!(err.code(), EXIT_INVALID_COMMAND);

        let err = execute("DEL", "", &mut session()).unwrap_err();
        assert_eq!(err.code(), EXIT_INVALID_CONFIG);

        let doc: serde_json::Value = serde_json::from_str(&err.to_json()).unwrap();
        assert_eq!(doc["code"], 7);
        assert_eq!(doc["msg"], "CIDR must be provided in CNI_ARGS");
        assert!(doc.get("details").is_none());
    }

    #[test]
    fn test_version_needs_no_args() {
        let output = execute("VERSION", "garbage", &mut session()).unwrap();
        let info: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(info["supportedVersions"][0], "0.4.0");
    }
}
