//! Handler registry: two string-keyed tables per peer (requests,
//! notifications), each with a "local" layer and an "inherited" layer;
//! local overrides inherited on lookup. An accept-loop owner installs
//! handlers into the inherited layer once, and every peer it accepts
//! starts with them already registered.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::envelope::RpcError;
use crate::peer::Peer;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A request handler: given the request's `id`, `params`, and the peer it
/// arrived on, either returns `Some(outcome)` for the engine to send as the
/// response, or `None` if the handler already sent its own response via
/// [`Peer::respond`] — needed when the handler has to run code between the
/// response send and the caller continuing, such as the secure channel's
/// post-send activation.
pub type RequestHandler = Arc<
    dyn Fn(String, Option<Value>, Peer) -> BoxFuture<'static, Option<Result<Value, RpcError>>>
        + Send
        + Sync,
>;

/// A notification handler: given the notification's `params` and the peer
/// it arrived on, runs for its side effect.
pub type NotificationHandler = Arc<dyn Fn(Option<Value>, Peer) -> BoxFuture<'static, ()> + Send + Sync>;

/// A two-level (local + inherited) handler table for one handler kind.
pub struct HandlerTable<H> {
    local: HashMap<String, H>,
    inherited: HashMap<String, H>,
}

impl<H> Default for HandlerTable<H> {
    fn default() -> Self {
        Self {
            local: HashMap::new(),
            inherited: HashMap::new(),
        }
    }
}

impl<H: Clone> HandlerTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler on this peer's own (local) table. Idempotent
    /// overwrite: registering the same method twice replaces the handler.
    pub fn register(&mut self, method: impl Into<String>, handler: H) {
        self.local.insert(method.into(), handler);
    }

    /// Register a handler that an accept-loop owner installs across all of
    /// its peers: the "inherited" layer.
    pub fn register_inherited(&mut self, method: impl Into<String>, handler: H) {
        self.inherited.insert(method.into(), handler);
    }

    /// Merge the inherited table from another source (used when a `Server`
    /// hands its inherited handlers to a freshly accepted peer).
    pub fn inherit_from(&mut self, other: &HandlerTable<H>) {
        for (method, handler) in other.local.iter().chain(other.inherited.iter()) {
            self.inherited.insert(method.clone(), handler.clone());
        }
    }

    /// Look up a handler for `method`; local overrides inherited.
    pub fn lookup(&self, method: &str) -> Option<H> {
        self.local
            .get(method)
            .or_else(|| self.inherited.get(method))
            .cloned()
    }
}

/// The pair of tables (requests, notifications) owned by one peer.
#[derive(Default)]
pub struct HandlerRegistry {
    pub requests: HandlerTable<RequestHandler>,
    pub notifications: HandlerTable<NotificationHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_overrides_inherited() {
        let mut table: HandlerTable<i32> = HandlerTable::new();
        table.register_inherited("M", 1);
        assert_eq!(table.lookup("M"), Some(1));
        table.register("M", 2);
        assert_eq!(table.lookup("M"), Some(2));
    }

    #[test]
    fn missing_method_is_none() {
        let table: HandlerTable<i32> = HandlerTable::new();
        assert_eq!(table.lookup("NOPE"), None);
    }

    #[test]
    fn inherit_from_copies_both_layers() {
        let mut server_table: HandlerTable<i32> = HandlerTable::new();
        server_table.register("TIME", 7);

        let mut peer_table: HandlerTable<i32> = HandlerTable::new();
        peer_table.inherit_from(&server_table);
        assert_eq!(peer_table.lookup("TIME"), Some(7));

        // The peer's own local registration still wins.
        peer_table.register("TIME", 9);
        assert_eq!(peer_table.lookup("TIME"), Some(9));
    }
}
