// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job store: per-job persisted records and lifecycle operations.
//!
//! Each job persists as `c<id>.json` plus one `d<id>-<n>` file per
//! attached document, both 0600 under the spool's jobs directory.
//! Every transition rewrites the record; startup re-hydrates
//! non-terminal jobs into pending (child processes never survive).

use crate::config::Retention;
use crate::storage::{atomic_write, StorageError};
use spool_core::{AttrBag, Job, JobFile, JobId, JobState, MimeType, TransitionError};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job queue is full")]
    QueueFull,
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("job i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct JobStore {
    jobs: BTreeMap<u32, Job>,
    next_id: u32,
    dir: PathBuf,
}

impl JobStore {
    pub fn new(dir: PathBuf) -> Result<Self, JobError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { jobs: BTreeMap::new(), next_id: 1, dir })
    }

    /// Load persisted records and re-hydrate. Non-terminal jobs return
    /// to pending; in-progress pipeline bookkeeping is discarded.
    pub fn load_all(dir: PathBuf, now_ms: u64) -> Result<Self, JobError> {
        fs::create_dir_all(&dir)?;
        let mut jobs = BTreeMap::new();
        let mut max_id = 0;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with('c') || !name.ends_with(".json") {
                continue;
            }
            let bytes = match fs::read(entry.path()) {
                Ok(b) => b,
                Err(e) => {
                    warn!(file = %name, error = %e, "unreadable job record, skipping");
                    continue;
                }
            };
            let mut job: Job = match serde_json::from_slice(&bytes) {
                Ok(j) => j,
                Err(e) => {
                    warn!(file = %name, error = %e, "unparseable job record, skipping");
                    continue;
                }
            };
            if !job.state.is_terminal() {
                job.state = JobState::Pending;
                job.state_at_ms = now_ms;
                job.assigned = None;
                job.current_file = 0;
                job.accumulator.reset();
            }
            max_id = max_id.max(job.id.0);
            jobs.insert(job.id.0, job);
        }
        info!(count = jobs.len(), next_id = max_id + 1, "job store loaded");
        Ok(Self { jobs, next_id: max_id + 1, dir })
    }

    /// Queue a new job. When the queue is full, one terminal job is
    /// evicted to make room; a queue full of live jobs refuses.
    pub fn submit(
        &mut self,
        target: &str,
        owner: &str,
        priority: u8,
        title: &str,
        attrs: AttrBag,
        now_ms: u64,
        max_jobs: usize,
    ) -> Result<JobId, JobError> {
        if max_jobs > 0 && self.jobs.len() >= max_jobs {
            let oldest_terminal = self
                .jobs
                .values()
                .filter(|j| j.is_terminal())
                .map(|j| j.id)
                .next();
            match oldest_terminal {
                Some(id) => self.purge(id)?,
                None => return Err(JobError::QueueFull),
            }
        }
        let id = JobId(self.next_id);
        self.next_id += 1;
        let mut job = Job::new(id, target, owner, priority, now_ms);
        job.title = title.to_string();
        job.attrs = attrs;
        self.persist(&job)?;
        self.jobs.insert(id.0, job);
        debug!(job = %id, target, owner, "job queued");
        Ok(id)
    }

    /// Store a document's bytes and attach it. Only legal while pending.
    pub fn attach_document(
        &mut self,
        id: JobId,
        bytes: &[u8],
        mime: MimeType,
    ) -> Result<(), JobError> {
        let doc_index = {
            let job = self.jobs.get(&id.0).ok_or(JobError::NotFound(id))?;
            if job.state != JobState::Pending {
                return Err(TransitionError::FilesFrozen(job.state).into());
            }
            job.files.len() + 1
        };
        let path = self.doc_path(id, doc_index);
        fs::write(&path, bytes)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        let kbytes = (bytes.len() as u64).div_ceil(1024) as u32;
        let job = self.jobs.get_mut(&id.0).ok_or(JobError::NotFound(id))?;
        job.attach_file(JobFile { path, mime, kbytes })?;
        let snapshot = job.clone();
        self.persist(&snapshot)?;
        Ok(())
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id.0)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Transition a job and persist the updated record. Document files
    /// of terminal jobs are deleted unless retention keeps them.
    pub fn set_state(
        &mut self,
        id: JobId,
        state: JobState,
        reason: Option<&str>,
        now_ms: u64,
        retention: &Retention,
    ) -> Result<(), JobError> {
        let job = self.jobs.get_mut(&id.0).ok_or(JobError::NotFound(id))?;
        job.transition(state, reason, now_ms)?;
        let snapshot = job.clone();
        self.persist(&snapshot)?;
        if state.is_terminal() && !retention.job_files {
            self.delete_documents(id);
        }
        Ok(())
    }

    /// The explicit restart: completed → pending.
    pub fn restart(&mut self, id: JobId, now_ms: u64) -> Result<(), JobError> {
        let job = self.jobs.get_mut(&id.0).ok_or(JobError::NotFound(id))?;
        job.restart(now_ms)?;
        let snapshot = job.clone();
        self.persist(&snapshot)?;
        Ok(())
    }

    /// Cancel; with `purge` the record and files go away entirely.
    pub fn cancel(
        &mut self,
        id: JobId,
        purge: bool,
        now_ms: u64,
        retention: &Retention,
    ) -> Result<(), JobError> {
        {
            let job = self.jobs.get_mut(&id.0).ok_or(JobError::NotFound(id))?;
            if !job.state.is_terminal() {
                job.transition(JobState::Canceled, Some("canceled-by-user"), now_ms)?;
            }
            let snapshot = job.clone();
            self.persist(&snapshot)?;
        }
        if purge {
            self.purge(id)?;
        } else if !retention.job_files {
            self.delete_documents(id);
        }
        Ok(())
    }

    /// Remove record and documents from disk and memory.
    pub fn purge(&mut self, id: JobId) -> Result<(), JobError> {
        self.delete_documents(id);
        let record = self.record_path(id);
        match fs::remove_file(&record) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.jobs.remove(&id.0);
        Ok(())
    }

    /// Apply retention: terminal jobs older than the history window are
    /// pruned. Without job history, terminal jobs are pruned outright.
    pub fn expire(&mut self, now_ms: u64, retention: &Retention) {
        let cutoff = now_ms.saturating_sub(retention.history_secs * 1000);
        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.is_terminal())
            .filter(|j| !retention.job_history || j.state_at_ms < cutoff)
            .map(|j| j.id)
            .collect();
        for id in expired {
            debug!(job = %id, "expiring terminal job");
            if let Err(e) = self.purge(id) {
                warn!(job = %id, error = %e, "failed to expire job");
            }
        }
    }

    /// Pending jobs in dispatch order: priority descending, id ascending.
    pub fn pending_in_order(&self) -> Vec<JobId> {
        let mut pending: Vec<(u8, u32)> = self
            .jobs
            .values()
            .filter(|j| j.state == JobState::Pending)
            .map(|j| (j.priority, j.id.0))
            .collect();
        pending.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        pending.into_iter().map(|(_, id)| JobId(id)).collect()
    }

    /// Held jobs whose hold-until time has passed.
    pub fn releasable(&self, now_ms: u64) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.state == JobState::Held)
            .filter(|j| j.hold_until_ms.map(|t| t <= now_ms).unwrap_or(false))
            .map(|j| j.id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.jobs.values().filter(|j| j.state == JobState::Processing).count()
    }

    pub fn active_for_user(&self, owner: &str) -> usize {
        self.jobs
            .values()
            .filter(|j| j.state == JobState::Processing && j.owner == owner)
            .count()
    }

    pub fn active_for_printer(&self, printer: &str) -> usize {
        self.jobs
            .values()
            .filter(|j| {
                j.state == JobState::Processing && j.assigned.as_deref() == Some(printer)
            })
            .count()
    }

    /// Persist one job record.
    pub fn persist(&self, job: &Job) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(job)?;
        atomic_write(&self.record_path(job.id), &bytes)
    }

    pub fn record_path(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("c{:05}.json", id.0))
    }

    pub fn doc_path(&self, id: JobId, index: usize) -> PathBuf {
        self.dir.join(format!("d{:05}-{:03}", id.0, index))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn delete_documents(&mut self, id: JobId) {
        let Some(job) = self.jobs.get_mut(&id.0) else { return };
        for file in &job.files {
            match fs::remove_file(&file.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %file.path.display(), error = %e, "failed to delete document"),
            }
        }
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
