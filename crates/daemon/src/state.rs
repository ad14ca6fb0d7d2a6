// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared service state threaded through every component.
//!
//! All registries and counters live in one record behind one lock;
//! nothing blocking is ever done while it is held.

use crate::config::Config;
use crate::filters::FilterGraph;
use crate::jobs::JobStore;
use crate::registry::Registry;
use crate::storage;
use parking_lot::Mutex;
use spool_core::JobId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Bookkeeping for one running pipeline.
#[derive(Debug, Default, Clone)]
pub struct ActivePipeline {
    pub printer: String,
    /// Child pids, backend last when present.
    pub pids: Vec<u32>,
    /// Pid of the backend, if one was spawned.
    pub backend_pid: Option<u32>,
    /// Children not yet reaped.
    pub live: usize,
    /// Back-channel FIFO to unlink at teardown.
    pub back_fifo: Option<std::path::PathBuf>,
}

pub struct ServiceState {
    pub config: Config,
    pub registry: Registry,
    pub jobs: JobStore,
    pub graph: FilterGraph,
    pub default_dest: Option<String>,
    /// Per-job running pipeline bookkeeping.
    pub active: HashMap<JobId, ActivePipeline>,
    /// Set on SIGTERM/SIGINT; refuses new work while pipelines drain.
    pub shutting_down: bool,
}

pub type SharedState = Arc<Mutex<ServiceState>>;

impl ServiceState {
    pub fn new(config: Config, registry: Registry, jobs: JobStore) -> Self {
        let mut state = Self {
            config,
            registry,
            jobs,
            graph: FilterGraph::default(),
            default_dest: None,
            active: HashMap::new(),
            shutting_down: false,
        };
        state.rebuild_graph();
        state
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Rebuild the filter graph after converter or capability changes.
    pub fn rebuild_graph(&mut self) {
        let dests: Vec<_> = self.registry.iter().cloned().collect();
        self.graph = FilterGraph::build(&self.config.converters, dests.iter());
    }

    /// Effective default destination: the marker if it resolves, else
    /// the first known destination.
    pub fn effective_default(&mut self) -> Option<String> {
        if let Some(name) = self.default_dest.clone() {
            if self.registry.lookup(&name).is_some() {
                return Some(name);
            }
        }
        self.registry.iter().next().map(|d| d.name.clone())
    }

    /// Persist the destination catalog when dirty (coalesced writer).
    pub fn persist_catalog_if_dirty(&mut self) {
        if !self.registry.take_dirty() {
            return;
        }
        if let Err(e) = storage::save_destinations(&self.config.printers_path(), &self.registry) {
            warn!(error = %e, "failed to persist destination catalog");
            // Leave the state dirty so the next pass retries.
            self.registry.mark_dirty();
        }
    }

    pub fn persist_default(&self) {
        if let Err(e) =
            storage::save_default(&self.config.default_dest_path(), self.default_dest.as_deref())
        {
            warn!(error = %e, "failed to persist default destination");
        }
    }
}
