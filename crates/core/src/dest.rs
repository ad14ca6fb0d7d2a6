// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Print destinations: local printers, classes, and discovered peers.

use crate::caps::CapabilityRecord;
use crate::job::JobId;
use crate::quota::{QuotaConfig, QuotaLedger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::VecDeque;

/// Generation-checked handle into the registry slab. A stale handle
/// (freed and reused slot) never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestHandle {
    pub index: u32,
    pub generation: u32,
}

/// What a destination is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DestKind {
    LocalPrinter,
    LocalClass,
    /// Synthesized from same-named peer advertisements; never persisted.
    ImplicitClass,
    RemotePrinter,
    RemoteClass,
}

impl DestKind {
    pub fn is_class(&self) -> bool {
        matches!(self, DestKind::LocalClass | DestKind::ImplicitClass | DestKind::RemoteClass)
    }

    pub fn is_printer(&self) -> bool {
        !self.is_class()
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, DestKind::RemotePrinter | DestKind::RemoteClass)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, DestKind::LocalPrinter | DestKind::LocalClass)
    }
}

crate::simple_display! {
    DestKind {
        LocalPrinter => "printer",
        LocalClass => "class",
        ImplicitClass => "implicit-class",
        RemotePrinter => "remote-printer",
        RemoteClass => "remote-class",
    }
}

/// Printer processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrinterState {
    Idle,
    Processing,
    Stopped,
}

crate::simple_display! {
    PrinterState {
        Idle => "idle",
        Processing => "processing",
        Stopped => "stopped",
    }
}

/// What to do when a job's filter chain fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Re-queue the job for another attempt.
    #[default]
    RetryJob,
    /// Abort the job, leave the printer running.
    AbortJob,
    /// Stop the printer, re-queue the job.
    StopPrinter,
}

crate::simple_display! {
    ErrorPolicy {
        RetryJob => "retry-job",
        AbortJob => "abort-job",
        StopPrinter => "stop-printer",
    }
}

/// Machine-readable state reason tokens.
///
/// Deltas use `+a,b` to add, `-a,b` to remove, and a bare list to
/// replace. Adding a present token or removing an absent one is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reasons(BTreeSet<String>);

impl Reasons {
    pub fn apply(&mut self, delta: &str) {
        let delta = delta.trim();
        let (op, list) = match delta.chars().next() {
            Some('+') => ('+', &delta[1..]),
            Some('-') => ('-', &delta[1..]),
            _ => ('=', delta),
        };
        let tokens = list
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        match op {
            '+' => self.0.extend(tokens),
            '-' => {
                for t in tokens {
                    self.0.remove(&t);
                }
            }
            _ => self.0 = tokens.collect(),
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl std::fmt::Display for Reasons {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for t in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(t)?;
            first = false;
        }
        Ok(())
    }
}

/// One entry in a destination's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: PrinterState,
    pub at_ms: u64,
    pub message: String,
    pub reasons: Vec<String>,
}

/// Bounded ring of state snapshots; the oldest entry drops on overflow.
#[derive(Debug, Clone)]
pub struct StateRing {
    cap: usize,
    items: VecDeque<StateSnapshot>,
}

impl StateRing {
    pub const DEFAULT_CAP: usize = 32;

    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1), items: VecDeque::new() }
    }

    pub fn push(&mut self, snapshot: StateSnapshot) {
        if self.items.len() == self.cap {
            self.items.pop_front();
        }
        self.items.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateSnapshot> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&StateSnapshot> {
        self.items.back()
    }
}

impl Default for StateRing {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAP)
    }
}

/// A named print target.
///
/// Classes keep their member printers as an ordered name list; jobs and
/// classes reference destinations by name only, never by owning pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    pub kind: DestKind,
    pub state: PrinterState,
    pub accepting: bool,
    #[serde(default)]
    pub state_message: String,
    #[serde(default)]
    pub reasons: Reasons,
    /// Opaque device address with embedded scheme; absent for classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_uri: Option<String>,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub make_model: String,
    /// Banner pages (start, end).
    #[serde(default)]
    pub job_sheets: (String, String),
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub denied_users: Vec<String>,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub op_policy: String,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    /// Member printer names; classes only. A class never contains a class.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub capability: CapabilityRecord,

    // Runtime-only state; reconstructed, never persisted.
    #[serde(skip)]
    pub usage: QuotaLedger,
    #[serde(skip)]
    pub rr_cursor: usize,
    #[serde(skip)]
    pub history: StateRing,
    #[serde(skip)]
    pub current_job: Option<JobId>,
    #[serde(skip)]
    pub last_browse_ms: Option<u64>,
    /// When this destination last went out in a browse datagram. Reset
    /// to zero on state changes so the change is advertised next cycle.
    #[serde(skip)]
    pub last_advertised_ms: u64,
}

impl Destination {
    /// New destinations start stopped and rejecting, like any
    /// freshly-created queue.
    pub fn new(name: impl Into<String>, kind: DestKind) -> Self {
        Self {
            name: name.into(),
            kind,
            state: PrinterState::Stopped,
            accepting: false,
            state_message: String::new(),
            reasons: Reasons::default(),
            device_uri: None,
            info: String::new(),
            location: String::new(),
            make_model: String::new(),
            job_sheets: ("none".to_string(), "none".to_string()),
            allowed_users: Vec::new(),
            denied_users: Vec::new(),
            quota: QuotaConfig::default(),
            op_policy: "default".to_string(),
            error_policy: ErrorPolicy::default(),
            members: Vec::new(),
            capability: CapabilityRecord::default(),
            usage: QuotaLedger::default(),
            rr_cursor: 0,
            history: StateRing::default(),
            current_job: None,
            last_browse_ms: None,
            last_advertised_ms: 0,
        }
    }

    /// Move to a new state, record history, and force the next browse
    /// cycle to advertise the change.
    pub fn record_state(&mut self, state: PrinterState, message: &str, at_ms: u64) {
        self.state = state;
        self.state_message = message.to_string();
        self.history.push(StateSnapshot {
            state,
            at_ms,
            message: message.to_string(),
            reasons: self.reasons.iter().map(str::to_string).collect(),
        });
        self.last_advertised_ms = 0;
    }

    /// Scheme of the device address (`file`, `socket`, `ipp`, ...).
    pub fn device_scheme(&self) -> Option<&str> {
        let uri = self.device_uri.as_deref()?;
        uri.split_once(':').map(|(scheme, _)| scheme)
    }

    /// Whether `user` may submit to this destination. Empty lists mean
    /// unrestricted; deny wins over allow.
    pub fn user_allowed(&self, user: &str) -> bool {
        if self.denied_users.iter().any(|u| u == user) {
            return false;
        }
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|u| u == user)
    }
}

#[cfg(test)]
#[path = "dest_tests.rs"]
mod tests;
