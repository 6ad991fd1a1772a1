//! Peer group cohort tracking: the live set of connected peers an
//! accept-loop owner can broadcast to.
//!
//! Single writer per peer (each peer removes itself on `close()`), so a
//! `tokio::sync::Mutex`-guarded map suffices without additional
//! coordination.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::peer::{Peer, PeerId};

#[derive(Clone, Default)]
pub struct PeerGroup {
    inner: Arc<Mutex<HashMap<PeerId, Peer>>>,
}

impl PeerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, peer: Peer) {
        self.inner.lock().await.insert(peer.id(), peer);
    }

    /// Remove `id` from the cohort. Idempotent: removing an id twice is a
    /// no-op the second time.
    pub async fn remove(&self, id: PeerId) {
        self.inner.lock().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn peers(&self) -> Vec<Peer> {
        self.inner.lock().await.values().cloned().collect()
    }

    /// Broadcast a notification to every live peer in the cohort.
    pub async fn broadcast(&self, method: &str, params: Option<serde_json::Value>) {
        for peer in self.peers().await {
            peer.notify(method, params.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NullCrypto;
    use crate::logging::TracingLogger;
    use std::net::SocketAddr;

    fn dummy_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[tokio::test]
    async fn insert_remove_roundtrip() {
        let group = PeerGroup::new();
        let (a, _b) = tokio::io::duplex(4096);
        let peer = Peer::new(
            a,
            dummy_addr(),
            Some(group.clone()),
            Arc::new(TracingLogger),
            Arc::new(NullCrypto),
            1,
        );
        group.insert(peer.clone()).await;
        assert_eq!(group.len().await, 1);
        group.remove(peer.id()).await;
        assert!(group.is_empty().await);
    }
}
