//! peer-rpc - bidirectional JSON-RPC 2.0 peer framework
//!
//! This library provides a symmetric, bidirectional JSON-RPC 2.0 engine
//! over a framed byte stream, with an optional mid-stream RSA/AES secure
//! channel upgrade.
//!
//! # Architecture
//!
//! - `envelope`: JSON-RPC 2.0 request/notification/response classification
//! - `id`: correlation-id minting
//! - `codec`: newline-delimited line framing over `AsyncRead`/`AsyncWrite`
//! - `crypto`: the `Crypto` capability and its RSA/AES implementation
//! - `secure`: the secure-channel handshake state machine
//! - `pending`: the outbound-request completion registry
//! - `handlers`: the two-level request/notification handler registry
//! - `workers`: the bounded worker pool draining each peer's job queue
//! - `group`: peer-group cohort tracking for broadcast
//! - `peer`: the peer engine tying the above together
//! - `transport`: the TCP accept loop and dialer
//! - `logging`: the `Logger` capability and its `tracing` default
//! - `config`: configuration loading and validation
//! - `cli`: command-line interface definition
//! - `error`: error types and the `Result` alias

pub mod cli;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod group;
pub mod handlers;
pub mod id;
pub mod logging;
pub mod peer;
pub mod pending;
pub mod secure;
pub mod transport;
pub mod workers;

pub use config::Config;
pub use error::{PeerError, Result};
pub use peer::Peer;
