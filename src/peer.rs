//! The peer engine — ties the codec, secure channel, pending registry,
//! handler registry, and worker pool together into one connection handle.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::codec::{Frame, FrameReader, FrameWriter};
use crate::crypto::Crypto;
use crate::envelope::{self, Envelope, RpcError};
use crate::error::{PeerError, Result};
use crate::group::PeerGroup;
use crate::handlers::HandlerRegistry;
use crate::id;
use crate::logging::{EventKind, Logger};
use crate::pending::{Outcome, PendingRegistry};
use crate::secure::SecureChannel;
use crate::workers::{Job, Supervisor};

pub type PeerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Init,
    Open,
    Closing,
    Closed,
}

/// Sent/received counters: bytes, notifications, requests, and responses
/// for both directions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub notif_sent: u64,
    pub notif_recv: u64,
    pub request_sent: u64,
    pub request_recv: u64,
    pub response_sent: u64,
    pub response_recv: u64,
}

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

struct PeerShared {
    id: PeerId,
    addr: SocketAddr,
    label: Arc<str>,
    open: AtomicBool,
    state: Mutex<PeerState>,
    secure: SecureChannel,
    pending: Mutex<PendingRegistry>,
    handlers: Mutex<HandlerRegistry>,
    counters: Mutex<Counters>,
    outbound_tx: mpsc::Sender<(String, Option<oneshot::Sender<()>>)>,
    group: Option<PeerGroup>,
    logger: Arc<dyn Logger>,
    supervisor: Mutex<Option<Supervisor>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

/// A cheap, `Clone`-able handle to one side of a live JSON-RPC 2.0
/// connection. Both client and server sides are `Peer`s once connected —
/// the protocol is symmetric after the handshake.
#[derive(Clone)]
pub struct Peer {
    shared: Arc<PeerShared>,
}

impl Peer {
    /// Wrap an already-connected duplex stream as a peer, installing the
    /// built-in `PING`/`RSA.EXCH`/`RSA.CONF` handlers and spawning the read
    /// loop, writer task, and worker supervisor.
    pub fn new<S>(
        stream: S,
        addr: SocketAddr,
        group: Option<PeerGroup>,
        logger: Arc<dyn Logger>,
        crypto: Arc<dyn Crypto>,
        worker_count: usize,
    ) -> Peer
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed);
        let label: Arc<str> = Arc::from(format!("{addr}#{id}"));
        let (outbound_tx, outbound_rx) = mpsc::channel::<(String, Option<oneshot::Sender<()>>)>(256);

        let shared = Arc::new(PeerShared {
            id,
            addr,
            label: Arc::clone(&label),
            open: AtomicBool::new(true),
            state: Mutex::new(PeerState::Open),
            secure: SecureChannel::new(crypto),
            pending: Mutex::new(PendingRegistry::new()),
            handlers: Mutex::new(HandlerRegistry::new()),
            counters: Mutex::new(Counters::default()),
            outbound_tx,
            group,
            logger,
            supervisor: Mutex::new(None),
            read_task: Mutex::new(None),
            writer_task: Mutex::new(None),
        });

        let peer = Peer { shared: shared.clone() };
        peer.install_builtin_handlers();

        let (read_half, write_half) = split(stream);
        let reader = FrameReader::new(read_half);
        let writer = FrameWriter::new(write_half);

        let supervisor = Supervisor::spawn(worker_count.max(1), 256, Arc::clone(&label));
        let writer_task = tokio::spawn(run_writer(shared.clone(), writer, outbound_rx));
        let read_task = tokio::spawn(run_reader(shared.clone(), reader));

        // Assigned via `try_lock` rather than `await`: the mutexes are
        // freshly constructed and uncontended at this point, and the
        // spawned tasks above must see a populated supervisor/handles
        // before the first inbound frame can reach them.
        *shared
            .supervisor
            .try_lock()
            .expect("supervisor mutex uncontended at construction") = Some(supervisor);
        *shared
            .read_task
            .try_lock()
            .expect("read_task mutex uncontended at construction") = Some(read_task);
        *shared
            .writer_task
            .try_lock()
            .expect("writer_task mutex uncontended at construction") = Some(writer_task);

        peer.shared.logger.event(EventKind::Connect, &peer.shared.label, "connected");
        peer
    }

    pub fn id(&self) -> PeerId {
        self.shared.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    pub async fn state(&self) -> PeerState {
        *self.shared.state.lock().await
    }

    pub async fn counters(&self) -> Counters {
        *self.shared.counters.lock().await
    }

    pub fn secure(&self) -> &SecureChannel {
        &self.shared.secure
    }

    /// Mutate this peer's handler registry (used by `Server::accept` to
    /// install inherited handlers).
    pub async fn handlers_mut<F: FnOnce(&mut HandlerRegistry)>(&self, f: F) {
        let mut guard = self.shared.handlers.lock().await;
        f(&mut guard);
    }

    /// Register a local request handler.
    pub async fn on_request(&self, method: impl Into<String>, handler: crate::handlers::RequestHandler) {
        self.shared.handlers.lock().await.requests.register(method, handler);
    }

    /// Register a local notification handler.
    pub async fn on_notification(
        &self,
        method: impl Into<String>,
        handler: crate::handlers::NotificationHandler,
    ) {
        self.shared
            .handlers
            .lock()
            .await
            .notifications
            .register(method, handler);
    }

    fn install_builtin_handlers(&self) {
        // Registration happens synchronously at construction, before any
        // frame can arrive, so `try_lock` always succeeds here.
        let mut guard = self
            .shared
            .handlers
            .try_lock()
            .expect("handlers mutex uncontended at construction");

        guard.requests.register(
            "PING",
            Arc::new(|_id, params, _peer| {
                Box::pin(async move { Some(Ok(params.unwrap_or(Value::Array(vec![])))) })
            }) as crate::handlers::RequestHandler,
        );

        guard.requests.register(
            "RSA.EXCH",
            Arc::new(|_id, params, peer| {
                Box::pin(async move {
                    if !peer.secure().can_encrypt() {
                        return Some(Err(RpcError::new(
                            PeerError::EncryptionUnavailable.code(),
                            "Encryption Unavailable",
                        )));
                    }
                    let Some(peer_public) = extract_key(&params) else {
                        return Some(Err(RpcError::invalid_request("RSA.EXCH missing public key")));
                    };
                    match peer.secure().accept_exchange(peer_public).await {
                        Ok(own_public) => Some(Ok(json!([encode_key(&own_public)]))),
                        Err(_) => Some(Err(RpcError::new(
                            PeerError::EncryptionUnavailable.code(),
                            "Encryption Unavailable",
                        ))),
                    }
                })
            }) as crate::handlers::RequestHandler,
        );

        // RSA.CONF responds to itself and activates immediately after:
        // responds directly here (returning `None` so the dispatch loop
        // does not also auto-send a response) and only then flips the
        // secure channel to ACTIVE. The flip must not happen until the
        // confirmation frame has actually left on the wire — `respond`
        // only hands the line to the writer task's queue, and on a
        // multi-threaded runtime that task can still be sitting on an
        // un-run `encode_outbound`/`write_frame` when this handler
        // resumes. `respond_and_wait` blocks on an ack the writer task
        // sends back after the frame is actually written, so the
        // confirmation is guaranteed to go out in plaintext before
        // `activate_if_pending` can make this channel start encrypting.
        guard.requests.register(
            "RSA.CONF",
            Arc::new(|id, params, peer| {
                Box::pin(async move {
                    if !peer.secure().can_activate().await {
                        return Some(Err(RpcError::new(PeerError::CannotActivate.code(), "Cannot Activate")));
                    }
                    let Some(wrapped) = params
                        .as_ref()
                        .and_then(|v| v.as_array())
                        .and_then(|arr| arr.get(1))
                        .and_then(|v| v.as_str())
                        .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
                    else {
                        return Some(Err(RpcError::invalid_request("RSA.CONF missing wrapped key")));
                    };
                    if peer.secure().try_prepare_activation(wrapped).await.is_err() {
                        return Some(Err(RpcError::new(PeerError::CannotActivate.code(), "Cannot Activate")));
                    }
                    peer.respond_and_wait(&id, Ok(json!([true]))).await;
                    peer.secure().activate_if_pending().await;
                    peer.shared.logger.event(EventKind::Activated, &peer.shared.label, "RSA key exchange confirmed");
                    None
                })
            }) as crate::handlers::RequestHandler,
        );
    }

    /// Fire-and-forget notification: no correlation id, no response.
    pub async fn notify(&self, method: &str, params: Option<Value>) {
        if !self.is_open() {
            return;
        }
        let line = envelope::make_notification(method, params).to_string();
        self.shared.counters.lock().await.notif_sent += 1;
        self.send_line(line).await;
    }

    /// Issue a request and await its completion.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Outcome {
        if !self.is_open() {
            return Outcome::ConnectionReset;
        }
        let mut pending = self.shared.pending.lock().await;
        let id = id::mint_unique(&self.shared.addr, |candidate| pending.contains(candidate));
        let rx = pending.insert(id.clone());
        drop(pending);

        let line = envelope::make_request(method, params, &id).to_string();
        self.shared.counters.lock().await.request_sent += 1;

        if !self.send_line(line).await {
            self.shared.pending.lock().await.cancel(&id);
            return Outcome::ConnectionReset;
        }

        rx.await.unwrap_or(Outcome::ConnectionReset)
    }

    /// As [`Peer::request`], but bounded by a timeout and falling back to
    /// `default` on timeout or (unless `raise_remote_err`) on a remote
    /// error.
    pub async fn request_wait(
        &self,
        method: &str,
        params: Option<Value>,
        default: Value,
        timeout: Duration,
        raise_remote_err: bool,
    ) -> Result<Value> {
        if !self.is_open() {
            return Ok(default);
        }
        let mut pending = self.shared.pending.lock().await;
        let id = id::mint_unique(&self.shared.addr, |candidate| pending.contains(candidate));
        let rx = pending.insert(id.clone());
        drop(pending);

        let line = envelope::make_request(method, params, &id).to_string();
        self.shared.counters.lock().await.request_sent += 1;

        if !self.send_line(line).await {
            self.shared.pending.lock().await.cancel(&id);
            return Ok(default);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Outcome::Result(value))) => Ok(value),
            Ok(Ok(Outcome::Remote(e))) => {
                if raise_remote_err {
                    Err(PeerError::RemoteError {
                        code: e.code,
                        message: e.message,
                        data: e.data,
                    }
                    .into())
                } else {
                    Ok(default)
                }
            }
            Ok(Ok(Outcome::ConnectionReset)) | Ok(Err(_)) => Ok(default),
            Err(_) => {
                self.shared.pending.lock().await.cancel(&id);
                Ok(default)
            }
        }
    }

    /// Send a response for `id`. A no-op on a closed peer.
    pub async fn respond(&self, id: &str, outcome: std::result::Result<Value, RpcError>) {
        if !self.is_open() {
            return;
        }
        let line = Self::response_line(id, outcome);
        self.shared.counters.lock().await.response_sent += 1;
        self.send_line(line).await;
    }

    /// As [`Peer::respond`], but returns only once the writer task has
    /// actually written the response frame to the wire, not merely
    /// enqueued it. Needed wherever a state change must be ordered after
    /// the frame is observably on the wire (see the `RSA.CONF` handler).
    async fn respond_and_wait(&self, id: &str, outcome: std::result::Result<Value, RpcError>) -> bool {
        if !self.is_open() {
            return false;
        }
        let line = Self::response_line(id, outcome);
        self.shared.counters.lock().await.response_sent += 1;
        self.send_line_and_wait(line).await
    }

    fn response_line(id: &str, outcome: std::result::Result<Value, RpcError>) -> String {
        match outcome {
            Ok(result) => envelope::make_response_ok(id, result),
            Err(e) => envelope::make_response_err(id, e),
        }
        .to_string()
    }

    /// Perform the initiator side of the `RSA.EXCH` + `RSA.CONF` handshake.
    pub async fn enable_encryption(&self) -> Result<bool> {
        if !self.secure().can_encrypt() {
            return Ok(false);
        }
        let own_public = self.secure().start_initiator_exchange().await?;
        let exch = self
            .request_wait(
                "RSA.EXCH",
                Some(json!([encode_key(&own_public)])),
                Value::Array(vec![Value::Null]),
                Duration::from_secs(10),
                false,
            )
            .await?;
        let Some(peer_public) = extract_key(&Some(exch)) else {
            return Ok(false);
        };
        self.secure().complete_initiator_exchange(peer_public).await?;

        let wrapped = self.secure().prepare_confirm().await?;
        let confirmed = self
            .request_wait(
                "RSA.CONF",
                Some(json!([true, encode_key(&wrapped)])),
                Value::Array(vec![Value::Bool(false)]),
                Duration::from_secs(10),
                false,
            )
            .await?;
        let ok = confirmed
            .as_array()
            .and_then(|a| a.first())
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if ok {
            self.secure().activate_if_pending().await;
            self.shared
                .logger
                .event(EventKind::Activated, &self.shared.label, "RSA key exchange confirmed");
        }
        Ok(ok)
    }

    /// Best-effort `TERM` notification, then close.
    pub async fn terminate(&self, reason: Option<String>) {
        let reason = reason.unwrap_or_else(|| "Connection terminated by peer.".to_string());
        self.notify("TERM", Some(json!({"reason": reason.clone()}))).await;
        self.close_internal(&reason).await;
    }

    /// Idempotent close.
    pub async fn close(&self) {
        self.close_internal("closed").await;
    }

    async fn close_internal(&self, reason: &str) {
        if self
            .shared
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        {
            let mut state = self.shared.state.lock().await;
            *state = PeerState::Closing;
        }

        self.shared.pending.lock().await.reset_all();

        if let Some(sup) = self.shared.supervisor.lock().await.take() {
            sup.shutdown().await;
        }
        if let Some(handle) = self.shared.read_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.shared.writer_task.lock().await.take() {
            handle.abort();
        }

        if let Some(group) = &self.shared.group {
            group.remove(self.shared.id).await;
        }

        {
            let mut state = self.shared.state.lock().await;
            *state = PeerState::Closed;
        }

        let counters = *self.shared.counters.lock().await;
        self.shared.logger.event(
            EventKind::Disconnect,
            &self.shared.label,
            &format!(
                "{reason} (sent {}b/{}req/{}resp/{}notif, recv {}b/{}req/{}resp/{}notif)",
                counters.bytes_sent,
                counters.request_sent,
                counters.response_sent,
                counters.notif_sent,
                counters.bytes_recv,
                counters.request_recv,
                counters.response_recv,
                counters.notif_recv,
            ),
        );
    }

    /// Enqueue a plaintext JSON-RPC line for the writer task. Returns
    /// `false` if the outbound channel is gone (peer effectively closed).
    async fn send_line(&self, line: String) -> bool {
        self.send_line_inner(line, None).await
    }

    /// As [`Peer::send_line`], but waits for the writer task's ack that the
    /// frame was actually written to the transport before returning.
    async fn send_line_and_wait(&self, line: String) -> bool {
        let (tx, rx) = oneshot::channel();
        if !self.send_line_inner(line, Some(tx)).await {
            return false;
        }
        rx.await.is_ok()
    }

    async fn send_line_inner(&self, line: String, ack: Option<oneshot::Sender<()>>) -> bool {
        self.shared.counters.lock().await.bytes_sent += line.len() as u64;
        self.shared
            .logger
            .event(EventKind::Send, &self.shared.label, &line);
        self.shared.outbound_tx.send((line, ack)).await.is_ok()
    }
}

fn encode_key(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Extract the public/wrapped key bytes carried as `params[0]` (base64
/// text, since the wire format is JSON text and the core treats key
/// material as opaque bytes).
fn extract_key(params: &Option<Value>) -> Option<Vec<u8>> {
    params
        .as_ref()
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.as_str())
        .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
}

async fn run_writer<W>(
    shared: Arc<PeerShared>,
    mut writer: FrameWriter<W>,
    mut outbound_rx: mpsc::Receiver<(String, Option<oneshot::Sender<()>>)>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some((line, ack)) = outbound_rx.recv().await {
        let wire = match shared.secure.encode_outbound(&line).await {
            Ok(wire) => wire,
            Err(e) => {
                shared
                    .logger
                    .event(EventKind::Err, &shared.label, &format!("encode failed: {e}"));
                continue;
            }
        };
        if let Err(e) = writer.write_frame(&wire).await {
            shared
                .logger
                .event(EventKind::Err, &shared.label, &format!("write failed: {e}"));
            break;
        }
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

async fn run_reader<R>(shared: Arc<PeerShared>, mut reader: FrameReader<R>)
where
    R: AsyncRead + Unpin,
{
    let peer = Peer { shared: shared.clone() };
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(Frame::Line(line))) => line,
            Ok(Some(Frame::Corrupt(msg))) => {
                shared
                    .logger
                    .event(EventKind::Warn, &shared.label, &format!("dropped corrupt frame: {msg}"));
                continue;
            }
            Ok(None) => break,
            Err(e) => {
                shared
                    .logger
                    .event(EventKind::Err, &shared.label, &format!("transport error: {e}"));
                break;
            }
        };

        shared.counters.lock().await.bytes_recv += frame.len() as u64;

        let plaintext = match shared.secure.decode_inbound(&frame).await {
            Ok(text) => text,
            Err(e) => {
                shared
                    .logger
                    .event(EventKind::Warn, &shared.label, &format!("decryption failed: {e}"));
                continue;
            }
        };

        shared
            .logger
            .event(EventKind::Recv, &shared.label, &plaintext);

        dispatch_line(&peer, plaintext).await;
    }

    peer.close_internal("transport closed").await;
}

async fn dispatch_line(peer: &Peer, line: String) {
    let value: Value = match serde_json::from_str(&line) {
        Ok(v) => v,
        Err(e) => {
            peer.respond("0", Err(RpcError::parse_error(&e.to_string()))).await;
            return;
        }
    };

    match envelope::classify(&value) {
        Envelope::Request(req) => {
            peer.shared.counters.lock().await.request_recv += 1;
            dispatch_request(peer.clone(), req).await;
        }
        Envelope::Notification(n) => {
            peer.shared.counters.lock().await.notif_recv += 1;
            dispatch_notification(peer.clone(), n).await;
        }
        Envelope::Response(r) => {
            peer.shared.counters.lock().await.response_recv += 1;
            let completed = peer.shared.pending.lock().await.complete(&r.id, r.outcome);
            if !completed {
                peer.shared
                    .logger
                    .event(EventKind::Warn, &peer.shared.label, &format!("unsolicited response id={}", r.id));
            }
        }
        Envelope::Invalid => {
            if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                peer.respond(id, Err(RpcError::invalid_request("malformed envelope"))).await;
            } else {
                peer.shared
                    .logger
                    .event(EventKind::Warn, &peer.shared.label, "dropped invalid frame with no id");
            }
        }
    }
}

async fn dispatch_request(peer: Peer, req: envelope::RequestEnvelope) {
    let handler = {
        let registry = peer.shared.handlers.lock().await;
        registry.requests.lookup(&req.method)
    };

    let id = req.id.clone();
    let method = req.method.clone();
    let params = req.params;
    let peer_for_job = peer.clone();

    // The handler call is wrapped in its own `catch_unwind` (distinct from
    // the worker pool's job-level one in `workers.rs`) because only here do
    // we still have `id` in scope to answer with a -32603 response; by the
    // time a panic reaches the worker pool's wrapper, the request id is
    // long gone and the caller would otherwise hang until its own timeout.
    let job: Job = Box::pin(async move {
        let inner_id = id.clone();
        let inner_peer = peer_for_job.clone();
        let outcome = AssertUnwindSafe(async move {
            match handler {
                Some(handler) => handler(inner_id, params, inner_peer).await,
                None => Some(Err(RpcError::method_not_found(&method))),
            }
        })
        .catch_unwind()
        .await;

        match outcome {
            Ok(Some(outcome)) => peer_for_job.respond(&id, outcome).await,
            Ok(None) => {}
            Err(_) => {
                let code = PeerError::InternalError("handler panicked".to_string()).code();
                peer_for_job
                    .respond(&id, Err(RpcError::new(code, "handler panicked")))
                    .await;
            }
        }
    });

    let submitted = {
        let guard = peer.shared.supervisor.lock().await;
        match &*guard {
            Some(sup) => sup.submit(job).await,
            None => false,
        }
    };
    if !submitted {
        peer.shared
            .logger
            .event(EventKind::Warn, &peer.shared.label, "worker pool unavailable; dropping request");
    }
}

async fn dispatch_notification(peer: Peer, notif: envelope::NotificationEnvelope) {
    if notif.method == "TERM" {
        let reason = notif
            .params
            .as_ref()
            .and_then(|p| p.get("reason"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        peer.close_internal(reason.as_deref().unwrap_or("Connection terminated by peer."))
            .await;
        return;
    }

    let handler = {
        let registry = peer.shared.handlers.lock().await;
        registry.notifications.lookup(&notif.method)
    };
    let Some(handler) = handler else { return };

    let job: Job = Box::pin(async move {
        handler(notif.params, peer).await;
    });
    let guard = peer.shared.supervisor.lock().await;
    if let Some(sup) = &*guard {
        sup.submit(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{NullCrypto, RsaAesCrypto};
    use crate::logging::TracingLogger;
    use std::net::SocketAddr;

    fn addr_a() -> SocketAddr {
        "127.0.0.1:9100".parse().unwrap()
    }
    fn addr_b() -> SocketAddr {
        "127.0.0.1:9200".parse().unwrap()
    }

    fn connected_pair(crypto_a: Arc<dyn Crypto>, crypto_b: Arc<dyn Crypto>) -> (Peer, Peer) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let peer_a = Peer::new(a, addr_a(), None, Arc::new(TracingLogger), crypto_a, 2);
        let peer_b = Peer::new(b, addr_b(), None, Arc::new(TracingLogger), crypto_b, 2);
        (peer_a, peer_b)
    }

    #[tokio::test]
    async fn ping_echo_roundtrip() {
        let (a, _b) = connected_pair(Arc::new(NullCrypto), Arc::new(NullCrypto));
        let outcome = a
            .request("PING", Some(json!(["aaaa"])))
            .await;
        match outcome {
            Outcome::Result(v) => assert_eq!(v, json!(["aaaa"])),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let (a, _b) = connected_pair(Arc::new(NullCrypto), Arc::new(NullCrypto));
        let outcome = a.request("NOPE", Some(json!([]))).await;
        match outcome {
            Outcome::Remote(e) => assert_eq!(e.code, -32601),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn notification_with_no_handler_is_silently_dropped() {
        let (a, b) = connected_pair(Arc::new(NullCrypto), Arc::new(NullCrypto));
        a.notify("HEARTBEAT", Some(json!({}))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(b.counters().await.notif_recv, 1);
    }

    #[tokio::test]
    async fn term_notification_closes_receiver() {
        let (a, b) = connected_pair(Arc::new(NullCrypto), Arc::new(NullCrypto));
        a.terminate(Some("bye".to_string())).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn request_on_closed_peer_is_connection_reset() {
        let (a, _b) = connected_pair(Arc::new(NullCrypto), Arc::new(NullCrypto));
        a.close().await;
        let outcome = a.request("PING", None).await;
        assert!(matches!(outcome, Outcome::ConnectionReset));
    }

    #[tokio::test]
    async fn handshake_activates_encryption_then_ping_is_opaque() {
        let (a, b) = connected_pair(Arc::new(RsaAesCrypto), Arc::new(RsaAesCrypto));
        let activated = a.enable_encryption().await.unwrap();
        assert!(activated);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a.secure().is_active().await);
        assert!(b.secure().is_active().await);

        let outcome = a.request("PING", Some(json!(["secret"]))).await;
        match outcome {
            Outcome::Result(v) => assert_eq!(v, json!(["secret"])),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_returns_default() {
        let (a, b) = connected_pair(Arc::new(NullCrypto), Arc::new(NullCrypto));
        b.on_request(
            "SLOW",
            Arc::new(|_id, _params, _peer| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Some(Ok(Value::Null))
                })
            }),
        )
        .await;

        let result = a
            .request_wait("SLOW", None, Value::Null, Duration::from_millis(100), false)
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn panicking_handler_still_gets_an_internal_error_response() {
        let (a, b) = connected_pair(Arc::new(NullCrypto), Arc::new(NullCrypto));
        b.on_request(
            "BOOM",
            Arc::new(|_id, _params, _peer| Box::pin(async move { panic!("handler blew up") })),
        )
        .await;

        let outcome = a.request("BOOM", None).await;
        match outcome {
            Outcome::Remote(e) => assert_eq!(e.code, -32603),
            other => panic!("unexpected outcome: {other:?}"),
        }

        // The worker that ran the panicking job must still be usable.
        let outcome = a.request("PING", Some(json!(["still alive"]))).await;
        match outcome {
            Outcome::Result(v) => assert_eq!(v, json!(["still alive"])),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_handshakes_never_let_the_confirmation_be_encrypted() {
        // Regression coverage for the RSA.CONF activation race: if
        // `activate_if_pending` ever ran before the confirmation frame was
        // actually written, the initiator's read of that frame would fail
        // to decode as plaintext JSON and `enable_encryption` would return
        // an error or `false` instead of `true`. Looping catches a race
        // that a single run might miss.
        for _ in 0..20 {
            let (a, b) = connected_pair(Arc::new(RsaAesCrypto), Arc::new(RsaAesCrypto));
            let activated = a.enable_encryption().await.unwrap();
            assert!(activated);
            assert!(a.secure().is_active().await);
            assert!(b.secure().is_active().await);
            a.close().await;
            b.close().await;
        }
    }
}
