//! peer-rpc - bidirectional JSON-RPC 2.0 peer framework CLI
//!
//! Main entry point: wires configuration into the TCP transport and peer
//! engine for the `serve`, `dial`, and `ping` subcommands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};

use peer_rpc::cli::{Cli, Commands};
use peer_rpc::config::Config;
use peer_rpc::crypto::{Crypto, NullCrypto, RsaAesCrypto};
use peer_rpc::handlers::HandlerRegistry;
use peer_rpc::logging::{init_tracing, TracingLogger};
use peer_rpc::peer::Peer;
use peer_rpc::transport::{dial, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref().unwrap_or("config/peer-rpc.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    match cli.command.clone() {
        Commands::Serve => run_serve(config).await,
        Commands::Dial => run_dial(config).await,
        Commands::Ping { message } => run_ping(config, message).await,
    }
}

fn crypto_for(config: &Config) -> Arc<dyn Crypto> {
    if config.encrypt {
        Arc::new(RsaAesCrypto)
    } else {
        Arc::new(NullCrypto)
    }
}

/// Bind the configured address and accept connections forever, registering
/// a `TIME` handler (reporting the server's own startup time, fixed once at
/// bind time) on every accepted peer.
async fn run_serve(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;
    let startup = unix_timestamp_f64();
    let mut inherited = HandlerRegistry::new();
    inherited.requests.register(
        "TIME",
        Arc::new(move |_id, _params, _peer| {
            Box::pin(async move { Some(Ok(json!({"startup": startup}))) })
        }) as peer_rpc::handlers::RequestHandler,
    );

    let server = Server::bind(
        addr,
        inherited,
        Arc::new(TracingLogger),
        crypto_for(&config),
        config.worker_count,
    )
    .await?;

    tracing::info!(%addr, "listening");
    server
        .serve(|peer: Peer| async move {
            tracing::info!(peer = %peer.addr(), "peer connected");
        })
        .await
}

/// Dial the configured address and hold the connection open, demonstrating
/// the secure-channel handshake when `--encrypt` is set.
async fn run_dial(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;
    let peer = dial(addr, Arc::new(TracingLogger), crypto_for(&config), config.worker_count).await?;

    if config.encrypt {
        let activated = peer.enable_encryption().await?;
        tracing::info!(activated, "secure channel handshake complete");
    }

    tracing::info!(peer = %peer.addr(), "dialed; holding connection open");
    tokio::signal::ctrl_c().await.ok();
    peer.terminate(Some("client shutting down".into())).await;
    Ok(())
}

/// Dial, send a single `PING`, print the echoed response, and exit.
async fn run_ping(config: Config, message: String) -> Result<()> {
    let addr = config.socket_addr()?;
    let peer = dial(addr, Arc::new(TracingLogger), crypto_for(&config), config.worker_count).await?;

    if config.encrypt {
        peer.enable_encryption().await?;
    }

    let result: Value = peer
        .request_wait(
            "PING",
            Some(json!([message])),
            Value::Null,
            config.request_timeout(),
            true,
        )
        .await?;
    println!("{result}");

    peer.close().await;
    Ok(())
}

fn unix_timestamp_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}
