// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup recovery and shutdown persistence.

use crate::config::{Config, ConfigError};
use crate::jobs::{JobError, JobStore};
use crate::registry::Registry;
use crate::state::{ServiceState, SharedState};
use crate::storage;
use spool_core::PrinterState;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("startup i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Jobs(#[from] JobError),
}

/// Build the service state from persisted catalog and job records.
///
/// Printers come back with their persisted state and accepting flag; a
/// printer persisted mid-job returns as idle (processes never survive).
/// Non-terminal jobs re-enter the queue as pending.
pub fn startup(config: Config, now_ms: u64) -> Result<SharedState, LifecycleError> {
    fs::create_dir_all(&config.state_dir)?;
    fs::create_dir_all(&config.spool_dir)?;
    let tmp = config.spool_dir.join("tmp");
    fs::create_dir_all(&tmp)?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(0o700))?;

    let mut registry = Registry::new();
    for mut dest in storage::load_destinations(&config.printers_path()) {
        if dest.state == PrinterState::Processing {
            dest.state = PrinterState::Idle;
        }
        dest.current_job = None;
        if let Err(e) = registry.insert(dest) {
            warn!(error = %e, "skipping duplicate catalog entry");
        }
    }
    // Loading back what we just read leaves nothing to rewrite.
    registry.take_dirty();
    info!(destinations = registry.count(), "destination catalog loaded");

    let jobs = JobStore::load_all(config.jobs_dir(), now_ms)?;
    let default_dest = storage::load_default(&config.default_dest_path());

    let mut state = ServiceState::new(config, registry, jobs);
    state.default_dest = default_dest;
    Ok(state.shared())
}

/// Final persistence pass before exit.
pub fn shutdown(state: &SharedState) {
    let mut state = state.lock();
    state.registry.mark_dirty();
    state.persist_catalog_if_dirty();
    state.persist_default();
    info!("state persisted, goodbye");
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
