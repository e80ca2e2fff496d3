//! Auto-scaling worker pool with request queuing.
//!
//! The pool owns every live [`Worker`] and multiplexes them through a
//! bounded `available` queue that doubles as a counting semaphore: workers
//! are pushed when idle and popped by `acquire`. When all workers are busy
//! the pool grows toward `max`, reserving each in-flight spawn through
//! `pending_adds` so concurrent acquirers can never overshoot the ceiling.
//! A background health loop recycles unresponsive workers and a scale-down
//! loop reaps sustained idleness back toward `min`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::PoolError;
use crate::pool::port::find_free_port;
use crate::pool::worker::{CrashHandler, Worker, WorkerState};

/// Interval between periodic worker health checks.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
/// Interval between scale-down ticks.
const SCALE_DOWN_INTERVAL: Duration = Duration::from_secs(10);
/// Consecutive idle ticks required before one worker is removed.
const SCALE_DOWN_IDLE_TICKS: u32 = 2;
/// Bound on waiting for the receiver lock when popping an idle worker, so
/// the scale-down loop never stalls behind a blocked acquirer.
const SCALE_DOWN_POP_WAIT: Duration = Duration::from_millis(100);

struct PoolInner {
    workers: Vec<Arc<Worker>>,
    /// Monotonic worker id counter, never reused.
    next_id: u64,
    /// In-flight scale-up attempts not yet reflected in `workers`.
    pending_adds: usize,
}

/// Pool of worker processes, scaling between `min` and `max`.
pub struct WorkerPool {
    inner: Mutex<PoolInner>,
    /// Bounded queue of idle workers; capacity `max`.
    available_tx: mpsc::Sender<Arc<Worker>>,
    /// Receiver behind a fair async mutex so concurrent acquirers wait FIFO.
    available_rx: AsyncMutex<mpsc::Receiver<Arc<Worker>>>,
    min: usize,
    max: usize,
    binary_path: PathBuf,
    probe: reqwest::Client,
    crash_handler: Mutex<Option<CrashHandler>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool and start `min` workers. Fails if any of the initial
    /// workers cannot be spawned; readiness failures are non-fatal and are
    /// handled by the health loop.
    pub fn new(config: &OrchestratorConfig) -> Result<Arc<Self>, PoolError> {
        let (min, max) = (config.min_workers, config.max_workers);
        if min < 1 || min > max {
            return Err(PoolError::InvalidBounds { min, max });
        }

        let pool = Self::empty(min, max, config.binary_path.clone());

        for id in 0..min as u64 {
            pool.start_initial_worker(id)?;
        }
        pool.lock_pool().next_id = min as u64;

        pool.spawn_background_loops();
        Ok(pool)
    }

    fn empty(min: usize, max: usize, binary_path: PathBuf) -> Arc<Self> {
        let (available_tx, available_rx) = mpsc::channel(max);
        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                workers: Vec::with_capacity(max),
                next_id: 0,
                pending_adds: 0,
            }),
            available_tx,
            available_rx: AsyncMutex::new(available_rx),
            min,
            max,
            binary_path,
            probe: reqwest::Client::new(),
            crash_handler: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_initial_worker(self: &Arc<Self>, id: u64) -> Result<(), PoolError> {
        let port = find_free_port().map_err(PoolError::PortAllocation)?;
        let worker = Worker::new(
            id,
            port,
            self.binary_path.clone(),
            self.available_tx.clone(),
            self.probe.clone(),
        );
        worker.start()?;
        self.lock_pool().workers.push(worker);
        Ok(())
    }

    fn spawn_background_loops(self: &Arc<Self>) {
        let health = Arc::clone(self);
        let scale = Arc::clone(self);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(tokio::spawn(async move { health.health_check_loop().await }));
        tasks.push(tokio::spawn(async move { scale.scale_down_loop().await }));
    }

    /// Install the crash handler on every current and future worker.
    pub fn set_crash_handler(&self, handler: CrashHandler) {
        *self
            .crash_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler.clone());
        for worker in self.workers() {
            worker.set_crash_handler(handler.clone());
        }
    }

    fn crash_handler(&self) -> Option<CrashHandler> {
        self.crash_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Block until a worker is available or the deadline elapses.
    ///
    /// If the queue is empty and the pool has room to grow, a scale-up is
    /// launched in the background before waiting, so the new worker races
    /// any release of an already-busy one; whichever arrives first wins.
    /// An expired waiter consumes no worker.
    pub async fn acquire(self: &Arc<Self>, deadline: Duration) -> Result<Arc<Worker>, PoolError> {
        self.maybe_scale_up();

        let received = tokio::time::timeout(deadline, async {
            let mut rx = self.available_rx.lock().await;
            rx.recv().await
        })
        .await
        .map_err(|_| PoolError::AcquireTimeout)?;

        let worker = received.ok_or(PoolError::Closed)?;
        worker.mark_dequeued();
        debug!(
            worker_id = worker.id,
            available = self.queue_depth(),
            "worker acquired"
        );
        Ok(worker)
    }

    /// Return a worker to the available queue. A no-op when the worker is
    /// already queued.
    pub fn release(&self, worker: &Worker) {
        worker.release_to_pool();
    }

    /// Reserve a scale-up slot and launch the spawn in the background.
    /// The reservation makes concurrent acquirers see the in-flight worker,
    /// so `len(workers) + pending_adds` never exceeds `max`.
    fn maybe_scale_up(self: &Arc<Self>) {
        if self.queue_depth() > 0 {
            return;
        }
        let id = {
            let mut inner = self.lock_pool();
            let total = inner.workers.len() + inner.pending_adds;
            if total >= self.max {
                return;
            }
            inner.pending_adds += 1;
            let id = inner.next_id;
            inner.next_id += 1;
            info!(workers = total, max = self.max, "all workers busy, scaling up");
            id
        };
        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.add_worker(id).await });
    }

    /// Materialise a reserved scale-up slot: allocate a port, spawn, and
    /// register the worker. All slow work happens outside the pool lock;
    /// any failure rolls the reservation back.
    async fn add_worker(self: Arc<Self>, id: u64) {
        let port = match find_free_port() {
            Ok(port) => port,
            Err(e) => {
                warn!(error = %e, "scale-up failed: no free port");
                self.lock_pool().pending_adds -= 1;
                return;
            }
        };

        let worker = Worker::new(
            id,
            port,
            self.binary_path.clone(),
            self.available_tx.clone(),
            self.probe.clone(),
        );
        if let Some(handler) = self.crash_handler() {
            worker.set_crash_handler(handler);
        }

        if let Err(e) = worker.start() {
            warn!(worker_id = id, port, error = %e, "scale-up failed");
            self.lock_pool().pending_adds -= 1;
            return;
        }

        let count = {
            let mut inner = self.lock_pool();
            inner.workers.push(worker);
            inner.pending_adds -= 1;
            inner.workers.len()
        };
        info!(worker_id = id, port, workers = count, max = self.max, "scale-up complete");
    }

    /// The worker currently holding the given session, if any.
    pub fn find_by_session(&self, session_id: &str) -> Option<Arc<Worker>> {
        self.workers()
            .into_iter()
            .find(|w| w.session_id() == session_id)
    }

    /// Snapshot of all workers in the pool.
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.lock_pool().workers.clone()
    }

    /// Number of workers currently in the pool.
    pub fn worker_count(&self) -> usize {
        self.lock_pool().workers.len()
    }

    /// Number of idle workers sitting in the available queue.
    pub fn queue_depth(&self) -> usize {
        self.available_tx.max_capacity() - self.available_tx.capacity()
    }

    pub fn min_workers(&self) -> usize {
        self.min
    }

    pub fn max_workers(&self) -> usize {
        self.max
    }

    /// Drain and kill every worker. Monitors observe the drain flag and do
    /// not restart; background loops are stopped first.
    pub fn shutdown(&self) {
        info!("shutting down worker pool");
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
        for worker in self.workers() {
            worker.drain();
            worker.kill();
        }
    }

    /// Every 5 s, check every settled worker and kill the unresponsive ones;
    /// their monitors handle the restart.
    async fn health_check_loop(self: Arc<Self>) {
        loop {
            sleep(HEALTH_CHECK_INTERVAL).await;
            for worker in self.workers() {
                let state = worker.state();
                if matches!(state, WorkerState::Dead | WorkerState::Starting) {
                    continue;
                }
                if !worker.health_check().await {
                    warn!(
                        worker_id = worker.id,
                        state = %state,
                        "worker failed health check, killing"
                    );
                    worker.kill();
                }
            }
        }
    }

    /// Every 10 s, count consecutive ticks of sustained idleness above the
    /// floor; on the second such tick, remove one idle worker. The counter
    /// resets whenever the idle condition fails and after each removal.
    async fn scale_down_loop(self: Arc<Self>) {
        let mut idle_ticks = 0u32;
        loop {
            sleep(SCALE_DOWN_INTERVAL).await;

            let count = self.worker_count();
            let available = self.queue_depth();

            if available > 0 && count > self.min {
                idle_ticks += 1;
            } else {
                idle_ticks = 0;
            }

            if idle_ticks >= SCALE_DOWN_IDLE_TICKS {
                self.remove_idle_worker().await;
                idle_ticks = 0;
            }
        }
    }

    /// Pop one idle worker off the queue, remove it from the pool, and shut
    /// it down. Skips the tick when no idle worker can be popped promptly.
    async fn remove_idle_worker(&self) {
        let worker = {
            let Ok(mut rx) = tokio::time::timeout(SCALE_DOWN_POP_WAIT, self.available_rx.lock()).await
            else {
                return;
            };
            match rx.try_recv() {
                Ok(worker) => worker,
                Err(_) => return,
            }
        };
        worker.mark_dequeued();

        let count = {
            let mut inner = self.lock_pool();
            inner.workers.retain(|w| !Arc::ptr_eq(w, &worker));
            inner.workers.len()
        };

        worker.drain();
        worker.kill();

        info!(
            worker_id = worker.id,
            port = worker.port,
            workers = count,
            max = self.max,
            "scale-down: removed idle worker"
        );
    }

    #[cfg(test)]
    fn pending_adds(&self) -> usize {
        self.lock_pool().pending_adds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::worker::test_support::worker_on_channel;
    use std::time::Instant;

    fn test_pool(max: usize) -> Arc<WorkerPool> {
        WorkerPool::empty(1, max, PathBuf::from("/nonexistent/worker"))
    }

    fn attach_worker(pool: &WorkerPool, id: u64) -> Arc<Worker> {
        let worker = worker_on_channel(id, pool.available_tx.clone());
        pool.lock_pool().workers.push(worker.clone());
        worker
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let pool = test_pool(3);
        let worker = attach_worker(&pool, 1);

        pool.release(&worker);
        pool.release(&worker);
        pool.release(&worker);

        assert_eq!(pool.queue_depth(), 1);
    }

    #[tokio::test]
    async fn acquire_times_out_on_empty_pool() {
        let pool = test_pool(2);
        let start = Instant::now();

        let err = pool
            .acquire(Duration::from_millis(100))
            .await
            .expect_err("acquire on empty pool succeeded");

        assert!(matches!(err, PoolError::AcquireTimeout));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn acquire_returns_released_worker() {
        let pool = test_pool(2);
        let worker = attach_worker(&pool, 1);
        pool.release(&worker);

        let acquired = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(Arc::ptr_eq(&acquired, &worker));
        assert_eq!(pool.queue_depth(), 0);

        // The dequeued worker can be released and acquired again.
        pool.release(&acquired);
        let again = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(Arc::ptr_eq(&again, &worker));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiters_are_served_in_arrival_order() {
        let pool = test_pool(4);
        let w1 = attach_worker(&pool, 1);
        let w2 = attach_worker(&pool, 2);

        let p1 = pool.clone();
        let first = tokio::spawn(async move { p1.acquire(Duration::from_secs(5)).await.unwrap() });
        sleep(Duration::from_millis(50)).await;

        let p2 = pool.clone();
        let second = tokio::spawn(async move { p2.acquire(Duration::from_secs(5)).await.unwrap() });
        sleep(Duration::from_millis(50)).await;

        pool.release(&w1);
        sleep(Duration::from_millis(50)).await;
        pool.release(&w2);

        assert!(Arc::ptr_eq(&first.await.unwrap(), &w1));
        assert!(Arc::ptr_eq(&second.await.unwrap(), &w2));
    }

    #[tokio::test]
    async fn scale_up_respects_the_ceiling() {
        let pool = test_pool(2);
        attach_worker(&pool, 1);
        attach_worker(&pool, 2);

        for _ in 0..5 {
            pool.maybe_scale_up();
        }

        assert_eq!(pool.pending_adds(), 0);
        assert_eq!(pool.worker_count(), 2);
    }

    #[tokio::test]
    async fn failed_scale_up_rolls_back_the_reservation() {
        // Spawn fails (nonexistent binary), so the reserved slot must be
        // returned and the pool left unchanged.
        let pool = test_pool(2);
        pool.maybe_scale_up();

        sleep(Duration::from_millis(200)).await;

        assert_eq!(pool.pending_adds(), 0);
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn new_rejects_invalid_bounds() {
        let config = OrchestratorConfig {
            min_workers: 3,
            max_workers: 2,
            ..Default::default()
        };
        assert!(matches!(
            WorkerPool::new(&config),
            Err(PoolError::InvalidBounds { .. })
        ));

        let config = OrchestratorConfig {
            min_workers: 0,
            max_workers: 2,
            ..Default::default()
        };
        assert!(matches!(
            WorkerPool::new(&config),
            Err(PoolError::InvalidBounds { .. })
        ));
    }

    #[tokio::test]
    async fn new_fails_when_initial_workers_cannot_spawn() {
        let config = OrchestratorConfig {
            min_workers: 1,
            max_workers: 2,
            binary_path: PathBuf::from("/nonexistent/worker"),
            ..Default::default()
        };
        assert!(matches!(
            WorkerPool::new(&config),
            Err(PoolError::Spawn { .. })
        ));
    }
}
