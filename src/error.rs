//! Error types for peer-rpc
//!
//! This module defines all error types used throughout the engine, using
//! `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for peer-rpc operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeerError {
    /// Transport-level failure: connection reset, incomplete read, EOF.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be parsed as JSON (JSON-RPC code -32700).
    #[error("parse error: {0}")]
    ParseError(String),

    /// A frame parsed as JSON but was not a valid JSON-RPC 2.0 envelope
    /// (JSON-RPC code -32600).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No handler registered for an inbound request method
    /// (JSON-RPC code -32601).
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A request handler panicked or returned an unexpected error
    /// (JSON-RPC code -32603).
    #[error("internal error: {0}")]
    InternalError(String),

    /// A response carrying a JSON-RPC error object was delivered to a
    /// pending call.
    #[error("remote error {code}: {message}")]
    RemoteError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The peer closed (or had never opened) while a `request` was pending
    /// or being issued.
    #[error("connection reset")]
    ConnectionReset,

    /// `request_wait` exceeded its timeout without a response.
    #[error("request timed out")]
    Timeout,

    /// `RSA.EXCH` was received by a peer lacking a `Crypto` capability.
    #[error("Encryption Unavailable")]
    EncryptionUnavailable,

    /// `RSA.CONF` was received while the secure channel could not activate
    /// (missing peer key, or already active).
    #[error("Cannot Activate")]
    CannotActivate,

    /// Decryption of an inbound frame failed. Non-fatal: the frame is
    /// dropped and the peer keeps running.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

impl PeerError {
    /// The JSON-RPC 2.0 error code this variant corresponds to, where
    /// applicable.
    pub fn code(&self) -> i64 {
        match self {
            PeerError::ParseError(_) => -32700,
            PeerError::InvalidRequest(_) => -32600,
            PeerError::MethodNotFound(_) => -32601,
            PeerError::InternalError(_) => -32603,
            PeerError::RemoteError { code, .. } => *code,
            PeerError::EncryptionUnavailable => 92,
            PeerError::CannotActivate => 1,
            _ => -32603,
        }
    }
}

/// Result type alias for peer-rpc operations.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_not_found_display() {
        let e = PeerError::MethodNotFound("NOPE".into());
        assert_eq!(e.to_string(), "method not found: NOPE");
        assert_eq!(e.code(), -32601);
    }

    #[test]
    fn encryption_unavailable_code() {
        assert_eq!(PeerError::EncryptionUnavailable.code(), 92);
    }

    #[test]
    fn cannot_activate_code() {
        assert_eq!(PeerError::CannotActivate.code(), 1);
    }

    #[test]
    fn remote_error_carries_code() {
        let e = PeerError::RemoteError {
            code: -32000,
            message: "custom".into(),
            data: None,
        };
        assert_eq!(e.code(), -32000);
        assert!(e.to_string().contains("custom"));
    }
}
