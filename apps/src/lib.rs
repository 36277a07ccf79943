//! Shared plumbing of the daemon binaries: config files and the
//! development medium.

pub mod medium;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// On-disk configuration of the beacon daemon (TOML).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BeaconFileConfig {
    pub node_id: Option<String>,
    pub avg_beacon_period_ms: Option<u64>,
    pub jitter_fraction: Option<f64>,
    pub max_beacon_size: Option<usize>,
    pub ether_type: Option<u16>,
    pub socket_path: Option<PathBuf>,
    pub broadcast_port: Option<u16>,
}

/// On-disk configuration of the variable daemon (TOML).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VarsFileConfig {
    pub node_id: Option<String>,
    pub max_value_length: Option<usize>,
    pub max_description_length: Option<usize>,
    pub max_repetitions: Option<u8>,
    pub max_summaries: Option<usize>,
    pub payload_size: Option<usize>,
    pub beacon_period_ms: Option<u64>,
    pub lock_per_container: Option<bool>,
    pub socket_path: Option<PathBuf>,
    pub beacon_socket_path: Option<PathBuf>,
    pub beacon_pool_path: Option<PathBuf>,
}

pub fn load_toml<T: for<'de> Deserialize<'de> + Default>(
    path: Option<&Path>,
) -> Result<T, String> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    toml::from_str(&text).map_err(|e| format!("cannot parse {}: {e}", path.display()))
}

pub fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .try_init();
}
