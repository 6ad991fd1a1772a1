//! Logging interface: a small set of typed event kinds the core engine
//! emits, realized as a `Logger` capability rather than a process-global
//! singleton so callers can swap in their own sink. The default
//! implementation routes to `tracing`.

use tracing::{debug, error, info, warn};

/// One of the event kinds the core engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A peer connected.
    Connect,
    /// A peer disconnected.
    Disconnect,
    /// Handshake / activation succeeded (`win` in the source: "secure
    /// channel activated").
    Activated,
    /// A frame was received.
    Recv,
    /// A frame was sent.
    Send,
    /// General informational message.
    Info,
    /// Recoverable, per-frame problem (unsolicited response, decryption
    /// failure, unknown method).
    Warn,
    /// Unrecoverable or transport-level problem.
    Err,
    /// Diagnostic/debug-level detail.
    Detail,
}

/// The logging capability the core engine is built against. Implementers
/// may route events to stdout, a file, or structured logging; verbosity is
/// a sink-side concern.
pub trait Logger: Send + Sync + std::fmt::Debug {
    fn event(&self, kind: EventKind, peer: &str, message: &str);
}

/// Default [`Logger`] routing each event kind to a `tracing` level, with the
/// peer's correlation id as a structured field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn event(&self, kind: EventKind, peer: &str, message: &str) {
        match kind {
            EventKind::Connect => info!(peer, "connect: {message}"),
            EventKind::Disconnect => info!(peer, "disconnect: {message}"),
            EventKind::Activated => info!(peer, "activated: {message}"),
            EventKind::Recv => debug!(peer, "recv: {message}"),
            EventKind::Send => debug!(peer, "send: {message}"),
            EventKind::Info => info!(peer, "{message}"),
            EventKind::Warn => warn!(peer, "{message}"),
            EventKind::Err => error!(peer, "{message}"),
            EventKind::Detail => debug!(peer, "{message}"),
        }
    }
}

/// Initialize the global `tracing` subscriber: env-filter driven verbosity,
/// default `info`.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("peer_rpc={default_level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Recording {
        events: std::sync::Mutex<Vec<(EventKind, String)>>,
    }

    impl Logger for Recording {
        fn event(&self, kind: EventKind, _peer: &str, message: &str) {
            self.events.lock().unwrap().push((kind, message.to_string()));
        }
    }

    #[test]
    fn custom_logger_records_events() {
        let logger = Recording::default();
        logger.event(EventKind::Warn, "peer-1", "unsolicited response");
        let events = logger.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EventKind::Warn);
    }

    #[test]
    fn tracing_logger_does_not_panic() {
        let logger = TracingLogger;
        logger.event(EventKind::Info, "peer-1", "hello");
    }
}
