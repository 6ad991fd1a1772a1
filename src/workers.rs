//! Worker pool + supervisor: a bounded set of worker tasks draining a
//! shared inbound job queue, with panic isolation per job and a
//! `CancellationToken` for orderly shutdown.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Default worker-pool size.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// How often the reaper task sweeps the worker set for a dead handle.
const REAP_INTERVAL: Duration = Duration::from_millis(250);

pub type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

type Rx = Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>;
type Handles = Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>;

/// Owns the inbound job queue and the set of workers draining it.
///
/// Jobs are dequeued FIFO by whichever worker is free; handler execution
/// may interleave across workers, and there is no ordering guarantee
/// between unrelated methods.
pub struct Supervisor {
    tx: mpsc::Sender<Job>,
    handles: Handles,
    reaper: Option<JoinHandle<()>>,
    token: CancellationToken,
}

impl Supervisor {
    /// Spawn `worker_count` workers draining a shared inbound queue of
    /// capacity `queue_capacity`, under `peer_label` for log correlation,
    /// plus a reaper task that revives any worker whose task ended without
    /// going through the job-level `catch_unwind` (a runtime-level abort,
    /// not a handler panic).
    pub fn spawn(worker_count: usize, queue_capacity: usize, peer_label: Arc<str>) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity);
        let rx: Rx = Arc::new(tokio::sync::Mutex::new(rx));
        let token = CancellationToken::new();

        let mut initial = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            initial.push(Self::spawn_worker(
                index,
                Arc::clone(&rx),
                token.clone(),
                Arc::clone(&peer_label),
            ));
        }
        let handles: Handles = Arc::new(tokio::sync::Mutex::new(initial));

        let reaper = tokio::spawn(Self::reap(
            Arc::clone(&rx),
            Arc::clone(&handles),
            token.clone(),
            peer_label,
        ));

        Self {
            tx,
            handles,
            reaper: Some(reaper),
            token,
        }
    }

    /// Periodically sweep the worker set for any handle that finished and
    /// respawn it in place. A job panic never reaches here (it is caught
    /// inside `spawn_worker`'s loop); this only fires for a task that
    /// ended some other way.
    async fn reap(rx: Rx, handles: Handles, token: CancellationToken, peer_label: Arc<str>) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(REAP_INTERVAL) => {}
            }

            let mut guard = handles.lock().await;
            for (index, handle) in guard.iter_mut().enumerate() {
                if handle.is_finished() {
                    warn!(peer = %peer_label, worker = index, "reviving dead worker");
                    *handle = Self::spawn_worker(index, Arc::clone(&rx), token.clone(), Arc::clone(&peer_label));
                }
            }
        }
    }

    /// A job's panic is caught here rather than allowed to unwind the
    /// worker's own task, so one bad handler never takes its worker down
    /// with it.
    fn spawn_worker(index: usize, rx: Rx, token: CancellationToken, peer_label: Arc<str>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut guard = rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        job = guard.recv() => job,
                    }
                };
                match job {
                    Some(job) => {
                        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                            error!(peer = %peer_label, worker = index, "worker job panicked, continuing");
                        }
                    }
                    None => break,
                }
            }
            debug!(peer = %peer_label, worker = index, "worker stopped");
        })
    }

    /// Enqueue a job for dispatch. Returns `false` if the queue is closed
    /// (supervisor cancelled).
    pub async fn submit(&self, job: Job) -> bool {
        self.tx.send(job).await.is_ok()
    }

    /// Cancel all workers and the reaper, and wait for their orderly
    /// cessation.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Some(reaper) = self.reaper {
            let _ = reaper.await;
        }
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
impl Supervisor {
    async fn abort_worker(&self, index: usize) {
        self.handles.lock().await[index].abort();
    }

    async fn worker_is_finished(&self, index: usize) -> bool {
        self.handles.lock().await[index].is_finished()
    }
}
