//! Configuration management for peer-rpc
//!
//! Loads listen/dial settings, worker-pool size, default request timeout,
//! and verbosity from a YAML file, layered with environment variable and
//! CLI overrides on top.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::{PeerError, Result};
use crate::workers::DEFAULT_WORKER_COUNT;

fn default_listen_addr() -> String {
    "127.0.0.1:7890".to_string()
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_verbose() -> bool {
    false
}

/// Top-level configuration for a `peer-rpc` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the server subcommand binds to, or the client dials.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Number of workers draining each peer's job queue.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Default timeout, in seconds, for `request_wait` calls issued by the
    /// CLI demo.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable debug-level logging.
    #[serde(default = "default_verbose")]
    pub verbose: bool,

    /// Enable the RSA/AES secure-channel handshake.
    #[serde(default)]
    pub encrypt: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            worker_count: default_worker_count(),
            request_timeout_secs: default_request_timeout_secs(),
            verbose: default_verbose(),
            encrypt: false,
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists), then apply
    /// environment and CLI overrides.
    pub fn load(path: &str, cli: &Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PeerError::InternalError(format!("failed to read config file: {e}")))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| PeerError::InternalError(format!("failed to parse config: {e}")).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(addr) = std::env::var("PEER_RPC_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Ok(workers) = std::env::var("PEER_RPC_WORKER_COUNT") {
            match workers.parse() {
                Ok(value) => self.worker_count = value,
                Err(_) => tracing::warn!("invalid PEER_RPC_WORKER_COUNT: {}", workers),
            }
        }
        if let Ok(timeout) = std::env::var("PEER_RPC_REQUEST_TIMEOUT_SECS") {
            match timeout.parse() {
                Ok(value) => self.request_timeout_secs = value,
                Err(_) => tracing::warn!("invalid PEER_RPC_REQUEST_TIMEOUT_SECS: {}", timeout),
            }
        }
        if std::env::var("PEER_RPC_VERBOSE").is_ok() {
            self.verbose = true;
        }
        if std::env::var("PEER_RPC_ENCRYPT").is_ok() {
            self.encrypt = true;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(addr) = &cli.addr {
            self.listen_addr = addr.clone();
        }
        if cli.verbose {
            self.verbose = true;
        }
        if cli.encrypt {
            self.encrypt = true;
        }
        if let Some(workers) = cli.workers {
            self.worker_count = workers;
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.worker_count == 0 {
            return Err(PeerError::InternalError("worker_count must be at least 1".into()).into());
        }
        if self.request_timeout_secs == 0 {
            return Err(PeerError::InternalError("request_timeout_secs must be at least 1".into()).into());
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| PeerError::InternalError(format!("invalid listen_addr {}: {e}", self.listen_addr)).into())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
