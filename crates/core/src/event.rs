// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events consumed by the dispatcher loop.
//!
//! Sessions, pipeline supervisors, and signal handlers never mutate
//! scheduler state directly from their own tasks; they emit events onto
//! the engine channel and the loop serializes every transition.

use crate::job::JobId;
use serde::{Deserialize, Serialize};

/// One parsed line from a child's status stream.
///
/// Children prefix every stderr line with a severity tag; `PAGE:` and
/// `STATE:` are directives, the rest are log messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StatusDirective {
    Info { message: String },
    Warning { message: String },
    Error { message: String },
    Debug { message: String },
    /// Pages completed; increments the job accumulator and quota usage.
    Page { count: u32 },
    /// Reasons delta for the hosting printer (`+token`, `-token`, list).
    State { delta: String },
}

impl StatusDirective {
    /// Parse one status line. Unprefixed lines are treated as INFO.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        match line.split_once(':') {
            Some(("INFO", rest)) => StatusDirective::Info { message: rest.trim().to_string() },
            Some(("WARNING", rest)) => {
                StatusDirective::Warning { message: rest.trim().to_string() }
            }
            Some(("ERROR", rest)) => StatusDirective::Error { message: rest.trim().to_string() },
            Some(("DEBUG", rest)) => StatusDirective::Debug { message: rest.trim().to_string() },
            Some(("PAGE", rest)) => {
                // "PAGE: <number> <copies>" or "PAGE: total <n>"; every
                // variant boils down to copies-of-one-page increments.
                let mut words = rest.split_whitespace();
                let first = words.next();
                let second = words.next();
                let count = match (first, second) {
                    (Some("total"), Some(n)) => n.parse().unwrap_or(1),
                    (Some(_), Some(copies)) => copies.parse().unwrap_or(1),
                    _ => 1,
                };
                StatusDirective::Page { count }
            }
            Some(("STATE", rest)) => StatusDirective::State { delta: rest.trim().to_string() },
            _ => StatusDirective::Info { message: line.to_string() },
        }
    }
}

/// Events that drive the engine loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A job entered the queue or changed in a way the scheduler cares
    /// about (submit, release, restart).
    #[serde(rename = "job:queued")]
    JobQueued { id: JobId },

    /// A destination's state or accepting flag changed.
    #[serde(rename = "printer:changed")]
    PrinterChanged { name: String },

    /// One supervised child exited.
    #[serde(rename = "pipeline:exit")]
    PipelineExit {
        job: JobId,
        pid: u32,
        /// True for the backend, false for a filter.
        backend: bool,
        code: i32,
    },

    /// A parsed status line from a supervised pipeline.
    #[serde(rename = "pipeline:status")]
    PipelineStatus { job: JobId, directive: StatusDirective },

    /// SIGHUP: re-read configuration.
    #[serde(rename = "reload")]
    Reload,

    /// SIGTERM/SIGINT: graceful shutdown.
    #[serde(rename = "shutdown")]
    Shutdown,
}
