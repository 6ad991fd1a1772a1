//! TCP transport: accept loop and dialer. Thin glue around
//! `tokio::net::{TcpListener, TcpStream}` that supplies the concrete
//! byte-stream collaborator the peer engine wraps.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::error::{PeerError, Result};
use crate::group::PeerGroup;
use crate::handlers::HandlerRegistry;
use crate::logging::Logger;
use crate::peer::Peer;

/// A bound TCP listener accepting peers and tracking them in a
/// [`PeerGroup`] cohort.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    group: PeerGroup,
    inherited: HandlerRegistry,
    logger: Arc<dyn Logger>,
    crypto: Arc<dyn crate::crypto::Crypto>,
    worker_count: usize,
}

impl Server {
    /// Bind `addr` and prepare to accept peers. `inherited` is installed on
    /// the inherited layer of every accepted peer's handler tables.
    pub async fn bind(
        addr: SocketAddr,
        inherited: HandlerRegistry,
        logger: Arc<dyn Logger>,
        crypto: Arc<dyn crate::crypto::Crypto>,
        worker_count: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PeerError::Transport(format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        Ok(Self {
            listener,
            local_addr,
            group: PeerGroup::new(),
            inherited,
            logger,
            crypto,
            worker_count,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn group(&self) -> PeerGroup {
        self.group.clone()
    }

    /// Accept one connection and construct a [`Peer`] for it, inheriting
    /// this server's handler tables and joining its peer group.
    pub async fn accept(&self) -> Result<Peer> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        info!(%peer_addr, "accepted connection");
        stream
            .set_nodelay(true)
            .map_err(|e| PeerError::Transport(e.to_string()))?;

        let peer = Peer::new(
            stream,
            peer_addr,
            Some(self.group.clone()),
            Arc::clone(&self.logger),
            Arc::clone(&self.crypto),
            self.worker_count,
        );
        peer.handlers_mut(|registry| {
            registry.requests.inherit_from(&self.inherited.requests);
            registry
                .notifications
                .inherit_from(&self.inherited.notifications);
        })
        .await;
        self.group.insert(peer.clone()).await;
        Ok(peer)
    }

    /// Accept connections in a loop, handing each accepted [`Peer`] to
    /// `on_connect`. Runs until the listener errors out.
    pub async fn serve<F, Fut>(&self, mut on_connect: F) -> Result<()>
    where
        F: FnMut(Peer) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept().await {
                Ok(peer) => {
                    let fut = on_connect(peer);
                    tokio::spawn(fut);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Dial `addr`, returning a [`Peer`] with no peer-group membership (client
/// side).
pub async fn dial(
    addr: SocketAddr,
    logger: Arc<dyn Logger>,
    crypto: Arc<dyn crate::crypto::Crypto>,
    worker_count: usize,
) -> Result<Peer> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| PeerError::Transport(format!("dial {addr}: {e}")))?;
    stream
        .set_nodelay(true)
        .map_err(|e| PeerError::Transport(e.to_string()))?;
    info!(%addr, "dialed peer");
    Ok(Peer::new(stream, addr, None, logger, crypto, worker_count))
}
