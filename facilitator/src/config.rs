//! Configuration for the x402 escrow facilitator server.
//!
//! The network registry (CAIP-2 id -> RPC/escrow/signer config) is a JSON
//! file on disk (spec §6: "Network registry ... JSON/YAML file or database
//! table"); everything else - the database connection, shared secrets, and
//! engine tunables - is resolved from environment variables per spec §6's
//! environment-configuration table.

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use x402_chain_eip155::config::NetworkConfig;
use x402_facilitator_local::config::{
    DEFAULT_CAPTURE_BATCH_SIZE, DEFAULT_CAPTURE_PRE_EXPIRY_WINDOW_SECS, DEFAULT_CAPTURE_THRESHOLD,
    DEFAULT_RECLAIM_ALL_TIMEOUT_SECS, DEFAULT_RECLAIM_TIMEOUT_SECS, DEFAULT_SETTLE_TIMEOUT_SECS,
    DEFAULT_TIER3_THRESHOLD_SECS, DEFAULT_VERIFY_TIMEOUT_SECS, EngineConfig,
};
use x402_types::chain::ChainId;

/// CLI arguments for the facilitator server.
#[derive(Parser, Debug)]
#[command(name = "x402-facilitator")]
#[command(about = "x402 escrow facilitator HTTP server")]
struct CliArgs {
    /// Path to the network registry JSON file.
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read network config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse network config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for environment variable {0}")]
    InvalidEnv(&'static str),
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name))
}

fn env_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidEnv(name)),
        Err(_) => Ok(default),
    }
}

pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub networks: HashMap<ChainId, NetworkConfig>,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub cron_secret: String,
    pub engine: EngineConfig,
    /// How often the background capture sweep runs between cron-triggered `/capture` calls.
    pub capture_sweep_interval: Duration,
}

impl Config {
    /// Loads the network registry from `--config`/`CONFIG` (default
    /// `config.json`) and the rest from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config.clone(), e))?;
        let content =
            fs::read_to_string(&config_path).map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
        let networks: HashMap<ChainId, NetworkConfig> = serde_json::from_str(&content)?;

        Ok(Self {
            host: env_or("HOST", IpAddr::from([0, 0, 0, 0]))?,
            port: env_or("PORT", 8080u16)?,
            networks,
            database_url: required_env("DATABASE_URL")?,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10u32)?,
            jwt_secret: required_env("JWT_SECRET")?,
            cron_secret: required_env("CRON_SECRET")?,
            engine: EngineConfig {
                capture_threshold: env_or("CAPTURE_THRESHOLD", DEFAULT_CAPTURE_THRESHOLD)?,
                capture_batch_size: env_or("CAPTURE_BATCH_SIZE", DEFAULT_CAPTURE_BATCH_SIZE)?,
                capture_pre_expiry_window_secs: env_or(
                    "CAPTURE_PRE_EXPIRY_WINDOW_SECS",
                    DEFAULT_CAPTURE_PRE_EXPIRY_WINDOW_SECS,
                )?,
                tier3_threshold_secs: env_or("TIER3_THRESHOLD_SECS", DEFAULT_TIER3_THRESHOLD_SECS)?,
                reclaim_timeout: Duration::from_secs(env_or("RECLAIM_TIMEOUT_SECS", DEFAULT_RECLAIM_TIMEOUT_SECS)?),
                reclaim_all_timeout: Duration::from_secs(env_or(
                    "RECLAIM_ALL_TIMEOUT_SECS",
                    DEFAULT_RECLAIM_ALL_TIMEOUT_SECS,
                )?),
                verify_timeout: Duration::from_secs(env_or("VERIFY_TIMEOUT_SECS", DEFAULT_VERIFY_TIMEOUT_SECS)?),
                settle_timeout: Duration::from_secs(env_or("SETTLE_TIMEOUT_SECS", DEFAULT_SETTLE_TIMEOUT_SECS)?),
            },
            capture_sweep_interval: Duration::from_secs(env_or("CAPTURE_SWEEP_INTERVAL_SECS", 60u64)?),
        })
    }
}
