//! A single worker process and its lifecycle state machine.
//!
//! Each `Worker` wraps at most one live child process that serves the
//! single-session browser HTTP API on a dedicated port. A monitor task
//! observes process exits and restarts the child unless the worker is
//! draining; a readiness probe moves a freshly started worker into the
//! pool's available queue once its `/health` endpoint answers.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::PoolError;

/// Interval between `try_wait` polls by the exit monitor.
const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Backoff before restarting a crashed worker.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);
/// Number of readiness probe attempts before giving up (6 s total).
const READY_PROBE_ATTEMPTS: u32 = 30;
/// Interval between readiness probe attempts.
const READY_PROBE_INTERVAL: Duration = Duration::from_millis(200);
/// Per-request timeout for readiness probes.
const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
/// Per-request timeout for periodic health checks.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Callback invoked with the held session id when a worker crashes mid-session.
pub type CrashHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process spawned, waiting for the readiness probe to succeed.
    Starting,
    /// Ready and idle; eligible for the pool's available queue.
    Available,
    /// Holding a session.
    Busy,
    /// Readiness never reached; the health loop will recycle it.
    Unhealthy,
    /// No live child process.
    Dead,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Available => write!(f, "available"),
            WorkerState::Busy => write!(f, "busy"),
            WorkerState::Unhealthy => write!(f, "unhealthy"),
            WorkerState::Dead => write!(f, "dead"),
        }
    }
}

struct WorkerInner {
    state: WorkerState,
    /// Empty when idle; `Busy <=> !session_id.is_empty()`.
    session_id: String,
    child: Option<Child>,
    /// When set, the monitor must not restart the process after it exits.
    draining: bool,
}

/// Handle to one worker process.
pub struct Worker {
    /// Monotonic id, never reused.
    pub id: u64,
    /// TCP port assigned once at spawn; passed to the child as `PORT`.
    pub port: u16,
    binary_path: PathBuf,
    inner: Mutex<WorkerInner>,
    /// Set while the worker sits in the available queue; makes release a
    /// no-op when already queued.
    queued: AtomicBool,
    /// Release handle into the pool's available queue.
    release_tx: mpsc::Sender<Arc<Worker>>,
    /// Self-reference so the worker can enqueue itself.
    this: Weak<Worker>,
    on_crash: Mutex<Option<CrashHandler>>,
    probe: reqwest::Client,
}

impl Worker {
    /// Create a worker in the `Dead` state. Does not start it.
    pub(crate) fn new(
        id: u64,
        port: u16,
        binary_path: PathBuf,
        release_tx: mpsc::Sender<Arc<Worker>>,
        probe: reqwest::Client,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            port,
            binary_path,
            inner: Mutex::new(WorkerInner {
                state: WorkerState::Dead,
                session_id: String::new(),
                child: None,
                draining: false,
            }),
            queued: AtomicBool::new(false),
            release_tx,
            this: this.clone(),
            on_crash: Mutex::new(None),
            probe,
        })
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, WorkerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the worker process and begin monitoring it.
    ///
    /// Fails unless the current state is `Dead` or `Unhealthy`. The spawn
    /// itself happens outside the worker lock; the `Starting` transition
    /// reserves the worker so concurrent starts cannot race.
    pub fn start(self: &Arc<Self>) -> Result<(), PoolError> {
        {
            let mut inner = self.lock_inner();
            if !matches!(inner.state, WorkerState::Dead | WorkerState::Unhealthy) {
                return Err(PoolError::WorkerAlreadyRunning {
                    id: self.id,
                    state: inner.state.to_string(),
                });
            }
            inner.state = WorkerState::Starting;
            inner.session_id.clear();
        }

        let child = match Command::new(&self.binary_path)
            .env("PORT", self.port.to_string())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.lock_inner().state = WorkerState::Dead;
                return Err(PoolError::Spawn {
                    id: self.id,
                    source: e,
                });
            }
        };

        let pid = child.id();
        self.lock_inner().child = Some(child);

        info!(worker_id = self.id, port = self.port, pid, "worker started");

        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.monitor().await });
        let probe = Arc::clone(self);
        tokio::spawn(async move { probe.wait_for_ready().await });

        Ok(())
    }

    /// Observe the process until it exits, then clean up and restart unless
    /// the worker is draining.
    async fn monitor(self: Arc<Self>) {
        let status = loop {
            sleep(MONITOR_POLL_INTERVAL).await;
            let mut inner = self.lock_inner();
            let Some(child) = inner.child.as_mut() else {
                return;
            };
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => continue,
                Err(e) => {
                    warn!(worker_id = self.id, error = %e, "failed to poll worker process");
                    break None;
                }
            }
        };

        let (prev_session, draining) = {
            let mut inner = self.lock_inner();
            let prev = std::mem::take(&mut inner.session_id);
            inner.state = WorkerState::Dead;
            inner.child = None;
            (prev, inner.draining)
        };

        if !prev_session.is_empty() {
            warn!(
                worker_id = self.id,
                session_id = %prev_session,
                "worker crashed with active session"
            );
            let handler = self.lock_crash_handler();
            if let Some(handler) = handler {
                handler(prev_session);
            }
        }

        if draining {
            info!(worker_id = self.id, "worker drained, not restarting");
            return;
        }

        info!(
            worker_id = self.id,
            exit_status = ?status,
            "worker process exited, restarting in 1s"
        );

        // Keep trying until the spawn succeeds or the worker starts draining.
        loop {
            sleep(RESTART_BACKOFF).await;
            if self.lock_inner().draining {
                info!(worker_id = self.id, "worker drained, abandoning restart");
                return;
            }
            match self.start() {
                Ok(()) => return,
                Err(e) => {
                    warn!(worker_id = self.id, error = %e, "failed to restart worker, retrying");
                }
            }
        }
    }

    /// Poll `/health` until the worker answers 200, then mark it available
    /// and push it into the pool's queue. After 30 failed probes the worker
    /// is parked `Unhealthy` for the health loop to recycle.
    async fn wait_for_ready(self: Arc<Self>) {
        let url = format!("{}/health", self.base_url());
        for _ in 0..READY_PROBE_ATTEMPTS {
            let ready = match self
                .probe
                .get(&url)
                .timeout(READY_PROBE_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) => resp.status() == StatusCode::OK,
                Err(_) => false,
            };
            if ready {
                let became_available = {
                    let mut inner = self.lock_inner();
                    if inner.state == WorkerState::Starting {
                        inner.state = WorkerState::Available;
                        true
                    } else {
                        false
                    }
                };
                if became_available {
                    info!(worker_id = self.id, port = self.port, "worker ready");
                    self.release_to_pool();
                }
                return;
            }
            sleep(READY_PROBE_INTERVAL).await;
        }

        warn!(
            worker_id = self.id,
            attempts = READY_PROBE_ATTEMPTS,
            "worker failed to become ready"
        );
        let mut inner = self.lock_inner();
        if inner.state == WorkerState::Starting {
            inner.state = WorkerState::Unhealthy;
        }
    }

    /// One `GET /health` with a 2 s deadline. True on HTTP 200.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url());
        match self
            .probe
            .get(&url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(_) => false,
        }
    }

    /// Send an unconditional kill to the child process. Idempotent and
    /// non-blocking; the monitor observes the exit and handles the rest.
    pub fn kill(&self) {
        let mut inner = self.lock_inner();
        if let Some(child) = inner.child.as_mut() {
            info!(worker_id = self.id, pid = child.id(), "killing worker process");
            let _ = child.kill();
        }
    }

    /// Suppress automatic restart after the next process exit.
    pub fn drain(&self) {
        self.lock_inner().draining = true;
    }

    /// Assign a session, marking the worker busy.
    pub fn set_session(&self, session_id: &str) {
        let mut inner = self.lock_inner();
        inner.session_id = session_id.to_string();
        inner.state = WorkerState::Busy;
    }

    /// Clear the session, mark the worker available, and release it back to
    /// the pool's queue.
    pub fn clear_session(&self) {
        {
            let mut inner = self.lock_inner();
            inner.session_id.clear();
            inner.state = WorkerState::Available;
        }
        self.release_to_pool();
    }

    /// Non-blocking push into the available queue. A worker already queued
    /// (or a full queue) makes this a no-op, so repeated release never
    /// duplicates the worker.
    pub(crate) fn release_to_pool(&self) {
        let Some(me) = self.this.upgrade() else {
            return;
        };
        if self.queued.swap(true, Ordering::AcqRel) {
            debug!(worker_id = self.id, "release skipped, already queued");
            return;
        }
        match self.release_tx.try_send(me) {
            Ok(()) => debug!(worker_id = self.id, "returned to pool"),
            Err(_) => {
                self.queued.store(false, Ordering::Release);
                debug!(worker_id = self.id, "release skipped, queue full or closed");
            }
        }
    }

    /// Called by the pool when this worker is popped off the available queue.
    pub(crate) fn mark_dequeued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    pub(crate) fn set_crash_handler(&self, handler: CrashHandler) {
        *self
            .on_crash
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    fn lock_crash_handler(&self) -> Option<CrashHandler> {
        self.on_crash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn state(&self) -> WorkerState {
        self.lock_inner().state
    }

    pub fn session_id(&self) -> String {
        self.lock_inner().session_id.clone()
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("state", &inner.state)
            .field("session_id", &inner.session_id)
            .field("draining", &inner.draining)
            .finish()
    }
}
