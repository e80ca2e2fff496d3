//! Worker pool: process lifecycle and scheduling.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      WorkerPool                          │
//! │  acquire ──▶ available queue (bounded, capacity = max)   │
//! │                │ pop            ▲ push                   │
//! │                ▼                │                        │
//! │  workers: [Worker 0] [Worker 1] … [Worker N]             │
//! │  loops:   health check (5 s) · scale-down (10 s)         │
//! └──────────────────────────────────────────────────────────┘
//!          │ spawn PORT=<port>          │ GET /health
//!          ▼                            ▼
//!   child process per worker, monitored for exit and
//!   restarted after a 1 s backoff unless draining
//! ```

mod port;
mod worker;
mod worker_pool;

pub use worker_pool::WorkerPool;
pub use port::find_free_port;
pub use worker::{CrashHandler, Worker, WorkerState};

#[cfg(test)]
pub(crate) use worker::test_support;
