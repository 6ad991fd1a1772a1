//! Command-line interface definition for peer-rpc
//!
//! Defines the CLI structure using clap's derive API: `serve` runs an
//! accept loop, `dial` connects to a running server, `ping` dials, sends a
//! single `PING`, and exits.

use clap::{Parser, Subcommand};

/// peer-rpc - bidirectional JSON-RPC 2.0 peer framework
#[derive(Parser, Debug, Clone)]
#[command(name = "peer-rpc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short = 'c', long, default_value = "config/peer-rpc.yaml")]
    pub config: Option<String>,

    /// Override the configured listen/dial address
    #[arg(short, long, env = "PEER_RPC_ADDR")]
    pub addr: Option<String>,

    /// Override the configured worker-pool size
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Enable verbose (debug-level) logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable the RSA/AES secure-channel handshake
    #[arg(short, long)]
    pub encrypt: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for peer-rpc
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Bind and accept connections, echoing a built-in `TIME` handler
    Serve,

    /// Dial a running server and hold the connection open
    Dial,

    /// Dial a running server, send one `PING`, print the response, exit
    Ping {
        /// Payload to echo back
        #[arg(default_value = "hello")]
        message: String,
    },
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve() {
        let cli = Cli::try_parse_from(["peer-rpc", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn parses_ping_with_default_message() {
        let cli = Cli::try_parse_from(["peer-rpc", "ping"]).unwrap();
        match cli.command {
            Commands::Ping { message } => assert_eq!(message, "hello"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_ping_with_custom_message() {
        let cli = Cli::try_parse_from(["peer-rpc", "ping", "custom"]).unwrap();
        match cli.command {
            Commands::Ping { message } => assert_eq!(message, "custom"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_global_overrides() {
        let cli = Cli::try_parse_from([
            "peer-rpc",
            "--addr",
            "127.0.0.1:6000",
            "--workers",
            "3",
            "-v",
            "-e",
            "dial",
        ])
        .unwrap();
        assert_eq!(cli.addr, Some("127.0.0.1:6000".to_string()));
        assert_eq!(cli.workers, Some(3));
        assert!(cli.verbose);
        assert!(cli.encrypt);
        assert!(matches!(cli.command, Commands::Dial));
    }

    #[test]
    fn missing_command_is_error() {
        assert!(Cli::try_parse_from(["peer-rpc"]).is_err());
    }
}
