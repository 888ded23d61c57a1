// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! zaplined - The zapline connection daemon.
//!
//! Keeps one protocol session per tenant connection alive, watches liveness,
//! reconnects, and drains the sync queue. Listens on a Unix socket for IPC
//! from `zap` CLI processes.
//!
//! Usage:
//!   zaplined --state-dir <path> [--config <path>] [--verbose]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use zl_core::Database;

mod config;
mod context;
mod engine;
mod env;
mod error;
mod events;
mod ipc;
mod monitor;
mod notify;
mod queue;
mod reconnect;
mod registry;
mod session;
mod worker;

use config::Config;
use context::Context;
use error::Result;
use ipc::RequestHandler;
use monitor::LivenessMonitor;
use reconnect::ReconnectController;
use session::BridgeConnector;
use worker::SyncWorker;

/// Socket filename within the state directory.
const SOCKET_NAME: &str = "zaplined.sock";
/// PID filename within the state directory.
const PID_NAME: &str = "zaplined.pid";
/// Lock filename for single instance guarantee.
const LOCK_NAME: &str = "zaplined.lock";
const LOG_NAME: &str = "zaplined.log";
const DB_NAME: &str = "zapline.db";

#[derive(Parser, Debug)]
#[command(name = "zaplined", version, about = "zapline connection daemon")]
struct Args {
    /// State directory (database, socket, logs)
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Config file (default: <state-dir>/zaplined.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let state_dir = args.state_dir.clone().unwrap_or_else(env::default_state_dir);
    if let Err(e) = fs::create_dir_all(&state_dir) {
        eprintln!("error: cannot create {}: {}", state_dir.display(), e);
        std::process::exit(1);
    }

    setup_logging(&state_dir.join(LOG_NAME), args.verbose);
    info!("zaplined starting, state_dir={}", state_dir.display());

    if let Err(e) = run(&args, &state_dir).await {
        error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
    info!("zaplined stopped");
}

async fn run(args: &Args, state_dir: &Path) -> Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::config_path(state_dir));
    let config = Config::load(&config_path)?;
    if config.max_reconnect_attempts == 0 {
        info!("reconnect attempts per episode are unlimited");
    }

    // Acquire file lock for single instance
    let lock_file = acquire_lock(&state_dir.join(LOCK_NAME))?;

    let pid_path = state_dir.join(PID_NAME);
    let socket_path = state_dir.join(SOCKET_NAME);
    fs::write(&pid_path, format!("{}", std::process::id()))?;

    let result = serve(config, state_dir, &socket_path).await;

    cleanup(&pid_path, &socket_path);
    drop(lock_file);
    result
}

async fn serve(config: Config, state_dir: &Path, socket_path: &Path) -> Result<()> {
    let key = config::resolve_vault_key(
        env::credentials_key(),
        config.credentials_key.as_deref(),
        &state_dir.join(config::KEY_FILE_NAME),
    )?;
    let db = Database::open(&state_dir.join(DB_NAME))?;
    let connector = Arc::new(BridgeConnector::new(
        config.bridge_url.as_str(),
        config.remote_timeout(),
    ));
    let notify_bind = config.notify_bind;

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(Context::new(config, db, key, connector, shutdown.clone()));
    let controller = ReconnectController::new(Arc::clone(&ctx));

    let recovering = controller.reconcile_on_startup().await?;
    info!(
        connections = ctx.registry.len(),
        recovering, "connections loaded"
    );

    let monitor = LivenessMonitor::new(controller.clone());
    tokio::spawn(monitor.clone().run_heartbeat_loop(shutdown.clone()));
    tokio::spawn(monitor.run_poll_loop(shutdown.clone()));
    tokio::spawn(SyncWorker::new(Arc::clone(&ctx)).run(shutdown.clone()));

    if let Some(addr) = notify_bind {
        let listener = TcpListener::bind(addr).await?;
        tokio::spawn(notify::run_push_server(
            listener,
            ctx.hub.clone(),
            shutdown.clone(),
        ));
    }

    // Remove stale socket if it exists
    let _ = fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    info!("listening on {}", socket_path.display());

    // Signal readiness to parent process
    println!("READY");
    let _ = std::io::stdout().flush();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    ipc::serve(listener, RequestHandler::new(controller), shutdown.clone()).await;
    shutdown.cancel();
    Ok(())
}

fn setup_logging(log_path: &Path, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Try to open log file, fall back to stderr
    if let Ok(file) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn acquire_lock(lock_path: &Path) -> Result<fs::File> {
    use fs2::FileExt;

    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(lock_path)?;
    file.try_lock_exclusive()
        .map_err(|_| std::io::Error::other("another daemon instance is already running"))?;
    Ok(file)
}

fn cleanup(pid_path: &Path, socket_path: &Path) {
    let _ = fs::remove_file(pid_path);
    let _ = fs::remove_file(socket_path);
}
