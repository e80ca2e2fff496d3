//! Error types for the orchestrator.
//!
//! Forward failures (transport-layer problems talking to a worker) are kept
//! distinct from worker HTTP errors: the latter travel back to callers as
//! ordinary status codes and never appear here.

use thiserror::Error;

/// Errors from the worker pool and worker lifecycle.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool bounds: min={min}, max={max} (need 1 <= min <= max)")]
    InvalidBounds { min: usize, max: usize },

    #[error("worker {id} is already running (state={state})")]
    WorkerAlreadyRunning { id: u64, state: String },

    #[error("failed to spawn worker {id}: {source}")]
    Spawn {
        id: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to allocate a free port: {0}")]
    PortAllocation(#[source] std::io::Error),

    #[error("timed out waiting for an available worker")]
    AcquireTimeout,

    #[error("worker pool is shut down")]
    Closed,
}

/// A transport-layer failure forwarding a request to a worker: connection
/// refused or reset, deadline exceeded, or a truncated response read.
#[derive(Debug, Error)]
#[error("forward to worker {worker_id} failed: {source}")]
pub struct ForwardError {
    pub worker_id: u64,
    #[source]
    pub source: reqwest::Error,
}
