//! Orchestrator for a fleet of single-session browser workers.
//!
//! Fronts many unreliable worker processes behind one HTTP API. Each worker
//! holds at most one browser session; the orchestrator multiplexes a
//! dynamic pool of them, routes every request for a session to the worker
//! that owns it, and evicts sessions that go idle past their TTL.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                   Orchestrator Process                     │
//! │                                                            │
//! │  HTTP client ──▶ server (axum)                             │
//! │                  ├─ POST /sessions ──▶ pool.acquire        │
//! │                  ├─ GET/DELETE /sessions/{id} ──▶ lookup   │
//! │                  └─ /health /status /debug/crash-worker    │
//! │                                                            │
//! │  WorkerPool  — available queue, scale-up/down, health loop │
//! │  SessionManager — session_id → worker, TTL sweeper         │
//! │  Forwarder   — per-worker HTTP client, 5 s call deadline   │
//! └────────────────────────────────────────────────────────────┘
//!                    │ HTTP (127.0.0.1:<port>)
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!  ┌──────────┐ ┌──────────┐ ┌──────────┐
//!  │ worker 0 │ │ worker 1 │ │ worker N │   one child process each,
//!  │ PORT=…   │ │ PORT=…   │ │ PORT=…   │   restarted on crash
//!  └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! Sessions do not survive orchestrator restarts, and a crashed worker
//! loses its session; the crash path only guarantees that the stale mapping
//! is removed promptly.

pub mod config;
pub mod error;
pub mod forward;
pub mod pool;
pub mod server;
pub mod session;

pub use config::OrchestratorConfig;
pub use error::{ForwardError, PoolError};
pub use forward::{Forwarder, SessionResponse};
pub use pool::{Worker, WorkerPool, WorkerState};
pub use server::AppState;
pub use session::SessionManager;
