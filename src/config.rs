//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default minimum (starting) number of workers.
pub const DEFAULT_MIN_WORKERS: usize = 2;
/// Default auto-scaling ceiling.
pub const DEFAULT_MAX_WORKERS: usize = 10;
/// Default orchestrator listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;
/// Default path to the worker binary.
pub const DEFAULT_BINARY_PATH: &str = "./steel-browser";
/// Default per-session idle timeout.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60);

/// Runtime configuration for the orchestrator, built from CLI flags in main.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Initial pool size and scale-down floor.
    pub min_workers: usize,
    /// Scale-up ceiling.
    pub max_workers: usize,
    /// External HTTP listen port.
    pub listen_port: u16,
    /// Path to the worker executable, launched with `PORT=<port>`.
    pub binary_path: PathBuf,
    /// Per-session idle timeout, measured from the last successful GET.
    pub session_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            listen_port: DEFAULT_LISTEN_PORT,
            binary_path: PathBuf::from(DEFAULT_BINARY_PATH),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}
