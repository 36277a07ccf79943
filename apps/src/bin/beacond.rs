//! The beacon daemon binary.

use clap::Parser;
use flock_apps::medium::UdpBroadcastMedium;
use flock_apps::{init_tracing, load_toml, BeaconFileConfig};
use flock_beacon::{BeaconConfig, BeaconDaemon};
use flock_proto::{NodeId, SystemTimeProvider};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "beacond", about = "flock beacon daemon")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Node identifier (aa:bb:cc:dd:ee:ff), overrides the config file.
    #[arg(short, long)]
    node_id: Option<String>,
    /// Command socket path, overrides the config file.
    #[arg(short, long)]
    socket: Option<PathBuf>,
    /// UDP port of the development broadcast medium.
    #[arg(short, long)]
    port: Option<u16>,
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
    let file: BeaconFileConfig = load_toml(cli.config.as_deref())?;

    let node_text = cli
        .node_id
        .or(file.node_id)
        .ok_or("a node id is required (--node-id or config file)")?;
    let node_id =
        NodeId::parse(&node_text).ok_or_else(|| format!("invalid node id '{node_text}'"))?;

    let mut config = BeaconConfig {
        node_id,
        ..BeaconConfig::default()
    };
    if let Some(ms) = file.avg_beacon_period_ms {
        config.avg_beacon_period = Duration::from_millis(ms);
    }
    if let Some(jitter) = file.jitter_fraction {
        config.jitter_fraction = jitter;
    }
    if let Some(size) = file.max_beacon_size {
        config.max_beacon_size = size;
    }
    if let Some(ether_type) = file.ether_type {
        config.ether_type = ether_type;
    }
    if let Some(path) = cli.socket.or(file.socket_path) {
        config.socket_path = path;
    }

    let port = cli.port.or(file.broadcast_port).unwrap_or(47100);
    let medium =
        UdpBroadcastMedium::open(node_id, port).map_err(|e| format!("medium failed: {e}"))?;

    let mut daemon = BeaconDaemon::start(config, Arc::new(medium), Arc::new(SystemTimeProvider))
        .map_err(|e| format!("daemon failed to start: {e}"))?;
    if cli.activate {
        daemon.ctx.active.store(true, Ordering::Relaxed);
        tracing::info!("activated at startup");
    }

    // SIGINT raises the exit flag; every daemon loop checks it
    let ctx = Arc::clone(&daemon.ctx);
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, shutting down");
        ctx.request_exit();
    })
    .map_err(|e| format!("cannot install signal handler: {e}"))?;

    tracing::info!(socket = %daemon.ctx.config.socket_path.display(), "beacon daemon ready");
    daemon.wait();
    Ok(())
}
