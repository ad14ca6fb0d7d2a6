// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job records and their state machine.

use crate::attr::AttrBag;
use crate::mime::MimeType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Monotonically increasing job id, unique for the life of an instance.
/// Reissued after restart from the persisted maximum + 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct JobId(pub u32);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Pending,
    Held,
    Processing,
    Stopped,
    Canceled,
    Aborted,
    Completed,
}

crate::simple_display! {
    JobState {
        Pending => "pending",
        Held => "held",
        Processing => "processing",
        Stopped => "stopped",
        Canceled => "canceled",
        Aborted => "aborted",
        Completed => "completed",
    }
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Canceled | JobState::Aborted | JobState::Completed)
    }

    /// Whether `self → to` is a legal walk in the state graph. The only
    /// backward moves are release (held → pending, covered here) and
    /// restart (completed → pending, via [`Job::restart`] only).
    pub fn can_transition_to(&self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Pending, Held)
                | (Pending, Processing)
                | (Pending, Canceled)
                | (Held, Pending)
                | (Held, Canceled)
                | (Processing, Stopped)
                | (Processing, Completed)
                | (Processing, Canceled)
                | (Processing, Aborted)
                | (Stopped, Pending)
                | (Stopped, Canceled)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal job transition {from} -> {to}")]
    Illegal { from: JobState, to: JobState },
    #[error("only completed jobs can be restarted (job is {0})")]
    NotRestartable(JobState),
    #[error("documents can only be attached while pending (job is {0})")]
    FilesFrozen(JobState),
}

/// Sticky worst exit outcome for one job's pipelines.
///
/// Zero is clean; positive is a recoverable filter failure; negative is
/// a printer fault from the backend. A fault is never downgraded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExitAccumulator(i32);

impl ExitAccumulator {
    pub fn record_filter(&mut self, code: i32) {
        if self.0 == 0 && code != 0 {
            self.0 = code.abs();
        }
    }

    pub fn record_backend(&mut self, code: i32) {
        if code != 0 && self.0 >= 0 {
            self.0 = -code.abs();
        }
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    pub fn is_clean(&self) -> bool {
        self.0 == 0
    }

    pub fn is_filter_failure(&self) -> bool {
        self.0 > 0
    }

    pub fn is_printer_fault(&self) -> bool {
        self.0 < 0
    }

    pub fn code(&self) -> i32 {
        self.0
    }
}

/// One attached document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFile {
    /// Spool-local path of the stored bytes.
    pub path: PathBuf,
    /// Detected document type.
    pub mime: MimeType,
    /// Size on disk in kilobytes, for quota accounting.
    #[serde(default)]
    pub kbytes: u32,
}

/// One recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTransition {
    pub from: JobState,
    pub to: JobState,
    pub at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Transition history entries kept per job.
const MAX_HISTORY: usize = 64;

/// A submitted print request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Destination name as submitted; may resolve to a class.
    pub target: String,
    pub owner: String,
    #[serde(default)]
    pub title: String,
    /// 1..=100; higher runs first.
    pub priority: u8,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_until_ms: Option<u64>,
    #[serde(default)]
    pub attrs: AttrBag,
    #[serde(default)]
    pub files: Vec<JobFile>,
    /// Concrete printer while processing; cleared otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned: Option<String>,
    #[serde(default)]
    pub current_file: usize,
    /// job-media-sheets-completed.
    #[serde(default)]
    pub sheets: u32,
    #[serde(default)]
    pub accumulator: ExitAccumulator,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub history: Vec<JobTransition>,
    pub created_at_ms: u64,
    pub state_at_ms: u64,
}

impl Job {
    pub fn new(id: JobId, target: &str, owner: &str, priority: u8, at_ms: u64) -> Self {
        Self {
            id,
            target: target.to_string(),
            owner: owner.to_string(),
            title: String::new(),
            priority: priority.clamp(1, 100),
            state: JobState::Pending,
            hold_until_ms: None,
            attrs: AttrBag::new(),
            files: Vec::new(),
            assigned: None,
            current_file: 0,
            sheets: 0,
            accumulator: ExitAccumulator::default(),
            attempts: 0,
            history: Vec::new(),
            created_at_ms: at_ms,
            state_at_ms: at_ms,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Attach a document. Input files freeze at the first transition out
    /// of pending.
    pub fn attach_file(&mut self, file: JobFile) -> Result<(), TransitionError> {
        if self.state != JobState::Pending {
            return Err(TransitionError::FilesFrozen(self.state));
        }
        self.files.push(file);
        Ok(())
    }

    /// Move through the legal state graph, recording history.
    pub fn transition(
        &mut self,
        to: JobState,
        reason: Option<&str>,
        at_ms: u64,
    ) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError::Illegal { from: self.state, to });
        }
        self.push_history(to, reason, at_ms);
        self.state = to;
        self.state_at_ms = at_ms;
        if to != JobState::Processing {
            self.assigned = None;
        }
        Ok(())
    }

    /// The explicit restart operation: completed → pending, clearing the
    /// assigned printer and the exit accumulator.
    pub fn restart(&mut self, at_ms: u64) -> Result<(), TransitionError> {
        if self.state != JobState::Completed {
            return Err(TransitionError::NotRestartable(self.state));
        }
        self.push_history(JobState::Pending, Some("job-restarted"), at_ms);
        self.state = JobState::Pending;
        self.state_at_ms = at_ms;
        self.assigned = None;
        self.current_file = 0;
        self.accumulator.reset();
        Ok(())
    }

    /// Total attached size in kilobytes.
    pub fn kbytes(&self) -> u32 {
        self.files.iter().map(|f| f.kbytes).sum()
    }

    /// Declared page estimate from job attributes; defaults to 1 page
    /// per document when undeclared.
    pub fn expected_pages(&self) -> u32 {
        self.attrs
            .get("job-pages")
            .and_then(|a| a.as_integer())
            .map(|v| v.max(0) as u32)
            .unwrap_or_else(|| self.files.len().max(1) as u32)
    }

    fn push_history(&mut self, to: JobState, reason: Option<&str>, at_ms: u64) {
        if self.history.len() == MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(JobTransition {
            from: self.state,
            to,
            at_ms,
            reason: reason.map(str::to_string),
        });
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
