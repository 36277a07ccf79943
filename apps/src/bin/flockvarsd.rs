//! The variable-dissemination daemon binary. Registers with a running
//! beacon daemon and serves database clients.

use clap::Parser;
use flock_apps::{init_tracing, load_toml, VarsFileConfig};
use flock_client::{BeaconClient, RegisterOptions};
use flock_proto::constants::PROTOCOL_VARS;
use flock_proto::{NodeId, SystemTimeProvider};
use flock_vars::{VarsConfig, VarsDaemon};
use flock_beacon::QueueingMode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "flockvarsd", about = "flock variable-dissemination daemon")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Node identifier (aa:bb:cc:dd:ee:ff), overrides the config file.
    #[arg(short, long)]
    node_id: Option<String>,
    /// Command socket path of this daemon.
    #[arg(short, long)]
    socket: Option<PathBuf>,
    /// Command socket path of the beacon daemon to ride.
    #[arg(short, long)]
    beacon_socket: Option<PathBuf>,
    /// Activate immediately instead of waiting for an Activate command.
    #[arg(long)]
    activate: bool,
    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(message) => {
            tracing::error!("{message}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let file: VarsFileConfig = load_toml(cli.config.as_deref())?;

    let node_text = cli
        .node_id
        .or(file.node_id)
        .ok_or("a node id is required (--node-id or config file)")?;
    let node_id =
        NodeId::parse(&node_text).ok_or_else(|| format!("invalid node id '{node_text}'"))?;

    let mut config = VarsConfig {
        node_id,
        ..VarsConfig::default()
    };
    if let Some(len) = file.max_value_length {
        config.max_value_length = len;
    }
    if let Some(len) = file.max_description_length {
        config.max_description_length = len;
    }
    if let Some(reps) = file.max_repetitions {
        config.max_repetitions = reps;
    }
    if let Some(cap) = file.max_summaries {
        config.max_summaries = cap;
    }
    if let Some(size) = file.payload_size {
        config.payload_size = size;
    }
    if let Some(ms) = file.beacon_period_ms {
        config.beacon_period = Duration::from_millis(ms);
    }
    if let Some(flag) = file.lock_per_container {
        config.lock_per_container = flag;
    }
    if let Some(path) = cli.socket.or(file.socket_path) {
        config.socket_path = path;
    }
    if let Some(path) = cli.beacon_socket.or(file.beacon_socket_path) {
        config.beacon_socket_path = path;
    }
    if let Some(path) = file.beacon_pool_path {
        config.beacon_pool_path = path;
    }

    // ride the beacon daemon: one payload per beacon, paced by confirms
    let port = BeaconClient::register(
        &config.beacon_socket_path,
        &config.beacon_pool_path,
        RegisterOptions {
            protocol_id: PROTOCOL_VARS,
            name: "variable-dissemination".into(),
            max_payload_size: config.payload_size as u16,
            mode: QueueingMode::Once,
            allow_multiple_payloads: false,
            wants_tx_confirms: true,
        },
    )
    .map_err(|e| format!("beacon registration failed: {e}"))?;

    if port.own_node_id() != node_id {
        return Err(format!(
            "beacon daemon identifies as {}, we are configured as {}",
            port.own_node_id(),
            node_id
        ));
    }

    let mut daemon = VarsDaemon::start(config, Arc::new(port), Arc::new(SystemTimeProvider))
        .map_err(|e| format!("daemon failed to start: {e}"))?;
    if cli.activate {
        daemon.ctx.engine.lock().active = true;
        tracing::info!("activated at startup");
    }

    // SIGINT raises the exit flag; every daemon loop checks it
    let ctx = Arc::clone(&daemon.ctx);
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, shutting down");
        ctx.request_exit();
    })
    .map_err(|e| format!("cannot install signal handler: {e}"))?;

    tracing::info!(socket = %daemon.ctx.config.socket_path.display(), "variable daemon ready");
    daemon.wait();
    Ok(())
}
