//! Orchestrator entry point: CLI parsing, wiring, and the HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use steel_orchestrator::config::OrchestratorConfig;
use steel_orchestrator::forward::Forwarder;
use steel_orchestrator::pool::WorkerPool;
use steel_orchestrator::server::{self, AppState};
use steel_orchestrator::session::SessionManager;

#[derive(Parser, Debug)]
#[command(name = "steel-orchestrator", version)]
#[command(about = "Fronts a pool of single-session browser workers behind one HTTP API")]
struct Args {
    /// Minimum (starting) number of worker processes
    #[arg(long, default_value_t = 2, env = "MIN_WORKERS")]
    min_workers: usize,

    /// Maximum number of worker processes (auto-scaling ceiling)
    #[arg(long, default_value_t = 10, env = "MAX_WORKERS")]
    max_workers: usize,

    /// Orchestrator listen port
    #[arg(long, default_value_t = 8080, env = "ORCHESTRATOR_PORT")]
    port: u16,

    /// Path to the worker binary
    #[arg(long, default_value = "./steel-browser", env = "WORKER_BINARY")]
    binary: PathBuf,

    /// Per-session idle timeout in seconds
    #[arg(long, default_value_t = 60, env = "SESSION_TTL_SECS")]
    session_ttl_secs: u64,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("steel_orchestrator={}", args.log_level))
        }))
        .init();

    anyhow::ensure!(args.min_workers >= 1, "--min-workers must be at least 1");
    anyhow::ensure!(
        args.min_workers <= args.max_workers,
        "--min-workers must not exceed --max-workers"
    );

    let config = OrchestratorConfig {
        min_workers: args.min_workers,
        max_workers: args.max_workers,
        listen_port: args.port,
        binary_path: args.binary,
        session_ttl: Duration::from_secs(args.session_ttl_secs),
    };

    info!(
        min_workers = config.min_workers,
        max_workers = config.max_workers,
        port = config.listen_port,
        binary = %config.binary_path.display(),
        session_ttl_secs = args.session_ttl_secs,
        "starting orchestrator"
    );

    let pool = WorkerPool::new(&config).context("failed to create worker pool")?;
    let forwarder = Forwarder::new();
    let sessions = SessionManager::new(config.session_ttl, forwarder.clone());

    // A worker crash with an active session leaves a stale mapping behind;
    // wire the cleanup for both the initial workers and future scale-ups.
    let sessions_for_crash = sessions.clone();
    pool.set_crash_handler(Arc::new(move |session_id: String| {
        warn!(session_id = %session_id, "removing stale session after worker crash");
        sessions_for_crash.remove(&session_id);
    }));

    let state = Arc::new(AppState {
        pool: pool.clone(),
        sessions,
        forwarder,
    });
    let app = server::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(pool))
        .await
        .context("server failed")?;

    Ok(())
}

/// Wait for SIGINT/SIGTERM, then drain and kill the pool so worker monitors
/// do not respawn children while the process exits.
async fn shutdown_signal(pool: Arc<WorkerPool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
    pool.shutdown();
}
