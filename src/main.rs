use clap::Parser;
use env_logger::{Env, Target};
use log::{debug, error, info};
use route_table_ipam::config::{GeneralConfig, DEFAULT_LOG_FILE};
use route_table_ipam::config_loader;
use route_table_ipam::plugin::{self, PluginError};
use route_table_ipam::{AllocationSession, NetlinkRouteTable};
use std::any::Any;
use std::fs::OpenOptions;
use std::panic;
use std::path::{Path, PathBuf};
use std::process;

/// CNI IPAM plugin claiming addresses through host routes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lifecycle command: ADD, DEL, CHECK or VERSION
    #[arg(long, env = "CNI_COMMAND", default_value = "")]
    command: String,

    #[arg(long, env = "CNI_CONTAINERID", default_value = "")]
    container_id: String,

    #[arg(long, env = "CNI_NETNS", default_value = "")]
    netns: String,

    #[arg(long, env = "CNI_IFNAME", default_value = "")]
    ifname: String,

    /// IPAM arguments as KEY=VALUE pairs separated by ';'
    #[arg(long, env = "CNI_ARGS", default_value = "")]
    cni_args: String,

    #[arg(long, env = "CNI_PATH", default_value = "")]
    cni_path: String,

    /// Path to the plugin configuration YAML file
    #[arg(short, long, env = "ROUTE_TABLE_IPAM_CONFIG")]
    config: Option<PathBuf>,

    /// Log destination, '-' for stderr. Overrides the configuration file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() {
    // stdout belongs to the CNI result, so a missing hook is not fatal
    if let Err(err) = color_eyre::install() {
        eprintln!("Failed to install error hook: {}", err);
    }

    let args = Args::parse();

    let outcome = panic::catch_unwind(|| run(&args))
        .unwrap_or_else(|payload| Err(PluginError::Panic(panic_message(payload.as_ref()))));

    let code = match outcome {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            0
        }
        Err(err) => {
            error!("{} (code {}): {}", err, err.code(), err.details());
            println!("{}", err.to_json());
            err.code()
        }
    };

    process::exit(code);
}

fn run(args: &Args) -> Result<String, PluginError> {
    let config = config_loader::load_or_default(args.config.as_deref())
        .map_err(|report| PluginError::Config(format!("{:#}", report)))?;

    init_logging(&config.general, args.log_file.as_deref())?;

    info!("Starting route-table-ipam {}", env!("CARGO_PKG_VERSION"));
    debug!("CNI_COMMAND={}", args.command);
    debug!("CNI_CONTAINERID={}", args.container_id);
    debug!("CNI_NETNS={}", args.netns);
    debug!("CNI_IFNAME={}", args.ifname);
    debug!("CNI_ARGS={}", args.cni_args);
    debug!("CNI_PATH={}", args.cni_path);

    let mut session = AllocationSession::new(NetlinkRouteTable::new(), config.allocator);
    plugin::execute(&args.command, &args.cni_args, &mut session)
}

/// Route log records to the configured file, or stderr for `-`
fn init_logging(general: &GeneralConfig, log_file: Option<&Path>) -> Result<(), PluginError> {
    let level = general.log_level.as_deref().unwrap_or("debug");
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));

    let path = log_file
        .or(general.log_file.as_deref())
        .unwrap_or_else(|| Path::new(DEFAULT_LOG_FILE));

    if path == Path::new("-") {
        builder.target(Target::Stderr);
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| PluginError::LogFile {
                path: path.to_path_buf(),
                source,
            })?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
