// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! spoold: the print scheduler daemon.
//!
//! Single-threaded cooperative runtime; all parallelism is in the
//! filter and backend processes.

use spool_core::{Clock, SystemClock};
use spool_daemon::auth::StandardOracle;
use spool_daemon::dispatch::Engine;
use spool_daemon::listener::{ListenCtx, Listener};
use spool_daemon::{config, env, lifecycle};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

fn init_tracing(log_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::fs::create_dir_all(log_dir).is_ok() {
        let appender = tracing_appender::rolling::daily(log_dir, "spoold.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let clock = SystemClock;

    // Explicit config path must parse; the default path may be absent.
    let config = match env::config_path() {
        Some(path) => match config::Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("spoold: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            let default_path = std::path::Path::new("/etc/spool/spoold.toml");
            if default_path.exists() {
                match config::Config::load(default_path) {
                    Ok(config) => config,
                    Err(e) => {
                        eprintln!("spoold: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                config::Config::fallback()
            }
        }
    };

    let _log_guard = init_tracing(&config.log_dir);
    info!(
        server = %config.server_name,
        listen = ?config.listen,
        spool = %config.spool_dir.display(),
        "spoold starting"
    );

    let state = match lifecycle::startup(config.clone(), clock.epoch_ms()) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::new(Arc::clone(&state), clock);
    engine.bind_browse().await;
    let reload_rx = engine.reload_signal();

    let ctx = Arc::new(ListenCtx::new(
        Arc::clone(&state),
        engine.events(),
        Arc::new(StandardOracle),
    ));
    let listener =
        match Listener::bind(&config.listen, ctx, engine.shutdown.clone(), reload_rx).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "failed to bind listeners");
                return ExitCode::FAILURE;
            }
        };
    let listener_task = tokio::spawn(listener.run());

    engine.run().await;

    listener_task.abort();
    lifecycle::shutdown(&state);
    ExitCode::SUCCESS
}
