// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment variables consulted by the daemon and its clients.

use std::path::PathBuf;
use std::time::Duration;

/// Default server address for clients.
pub const DEFAULT_SERVER: &str = "127.0.0.1:6631";

/// Server host:port for clients (`SPOOL_SERVER`).
pub fn server_address() -> String {
    std::env::var("SPOOL_SERVER").unwrap_or_else(|_| DEFAULT_SERVER.to_string())
}

/// Daemon configuration file override (`SPOOL_CONFIG`).
pub fn config_path() -> Option<PathBuf> {
    std::env::var_os("SPOOL_CONFIG").map(PathBuf::from)
}

/// State/spool root override (`SPOOL_STATE_DIR`).
pub fn state_dir_override() -> Option<PathBuf> {
    std::env::var_os("SPOOL_STATE_DIR").map(PathBuf::from)
}

/// Log directory override (`SPOOL_LOG_DIR`).
pub fn log_dir_override() -> Option<PathBuf> {
    std::env::var_os("SPOOL_LOG_DIR").map(PathBuf::from)
}

/// Temporary directory preference: spool-local temp wins over `TMPDIR`.
pub fn temp_dir(spool_dir: &std::path::Path) -> PathBuf {
    let local = spool_dir.join("tmp");
    if local.is_dir() {
        return local;
    }
    std::env::var_os("TMPDIR").map(PathBuf::from).unwrap_or_else(std::env::temp_dir)
}

/// Deadline for a single request/response exchange.
pub fn ipc_timeout() -> Duration {
    std::env::var("SPOOL_IPC_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30))
}
