// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler pass: decide which pending jobs start, where, and with
//! which pipeline. Decisions only; the dispatcher executes them.

use crate::classes;
use crate::filters::Stage;
use crate::state::ServiceState;
use spool_core::{ErrorPolicy, JobFile, JobId, JobState, PrinterState, QuotaUsage};
use tracing::{debug, info, warn};

/// One pipeline the dispatcher should launch.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub job: JobId,
    pub printer: String,
    pub file: JobFile,
    pub stages: Vec<Stage>,
    pub device_uri: Option<String>,
    pub owner: String,
    pub title: String,
    pub copies: u32,
}

/// What happened to a job whose pipeline just finished a file.
#[derive(Debug)]
pub enum FileOutcome {
    /// Start the next file's pipeline.
    NextFile(Dispatch),
    /// Whole job done; printer is idle again.
    Completed,
    /// Filter failure handled per error policy.
    FilterFailed(ErrorPolicy),
    /// Backend fault: printer stopped, job re-queued.
    PrinterFault,
    /// Job was canceled mid-flight; nothing more to run.
    Canceled,
}

/// One scheduler pass: walk pending jobs in (priority desc, id asc)
/// order and return the pipelines to start.
pub fn plan(state: &mut ServiceState, now_ms: u64) -> Vec<Dispatch> {
    let mut dispatches = Vec::new();
    if state.shutting_down {
        return dispatches;
    }
    let limits = state.config.limits;
    let retention = state.config.retention;

    for id in state.jobs.pending_in_order() {
        // Jobs started earlier in this pass are already processing and
        // therefore already counted.
        if state.jobs.active_count() >= limits.max_active_jobs {
            break;
        }
        let Some(job) = state.jobs.get(id) else { continue };
        if job.files.is_empty() {
            // Document-less jobs wait for SEND-DOCUMENT.
            continue;
        }
        let target = job.target.clone();
        let owner = job.owner.clone();

        // Resolve the target to a concrete printer.
        let printer_name = match resolve_target(state, &target) {
            Some(name) => name,
            None => {
                debug!(job = %id, %target, "no available printer this pass");
                continue;
            }
        };

        let Some(printer) = state.registry.lookup(&printer_name) else { continue };
        let available = printer.accepting
            && (printer.state == PrinterState::Idle
                || (printer.kind.is_remote() && printer.current_job.is_none()));
        if !available {
            continue;
        }

        // Concurrency caps.
        if limits.max_jobs_per_printer > 0
            && state.jobs.active_for_printer(&printer_name) >= limits.max_jobs_per_printer
        {
            continue;
        }
        if limits.max_jobs_per_user > 0
            && state.jobs.active_for_user(&owner) >= limits.max_jobs_per_user
        {
            continue;
        }

        // Quota gate.
        let job_ref = match state.jobs.get(id) {
            Some(j) => j,
            None => continue,
        };
        let pages = job_ref.expected_pages();
        let kbytes = job_ref.kbytes();
        let over_quota = state
            .registry
            .lookup_mut(&printer_name)
            .map(|p| {
                let quota = p.quota;
                p.usage.would_exceed(&owner, &quota, now_ms, pages, kbytes)
            })
            .unwrap_or(false);
        if over_quota {
            info!(job = %id, printer = %printer_name, "quota exceeded, holding job");
            if let Err(e) =
                state.jobs.set_state(id, JobState::Held, Some("quota-exceeded"), now_ms, &retention)
            {
                warn!(job = %id, error = %e, "failed to hold job");
            }
            continue;
        }

        match start_job(state, id, &printer_name, now_ms) {
            Ok(Some(dispatch)) => dispatches.push(dispatch),
            Ok(None) => {}
            Err(e) => warn!(job = %id, error = %e, "failed to start job"),
        }
    }
    dispatches
}

/// Resolve a submitted target name to a concrete printer name.
///
/// An exact printer match wins; a class asks the class engine for an
/// available member.
fn resolve_target(state: &mut ServiceState, target: &str) -> Option<String> {
    if let Some(dest) = state.registry.lookup_printer(target) {
        return Some(dest.name.clone());
    }
    let class = state.registry.lookup_class(target)?;
    let class_name = class.name.clone();
    classes::pick_available(&mut state.registry, &class_name)
}

/// Mark job and printer processing and build the current file's
/// dispatch. Aborts the job when no conversion path exists.
fn start_job(
    state: &mut ServiceState,
    id: JobId,
    printer_name: &str,
    now_ms: u64,
) -> Result<Option<Dispatch>, crate::jobs::JobError> {
    let retention = state.config.retention;
    let dispatch = match file_dispatch(state, id, printer_name) {
        Ok(d) => d,
        Err(e) => {
            info!(job = %id, error = %e, "aborting job, no conversion path");
            state.jobs.set_state(
                id,
                JobState::Aborted,
                Some("document-format-not-supported"),
                now_ms,
                &retention,
            )?;
            return Ok(None);
        }
    };

    state.jobs.set_state(id, JobState::Processing, None, now_ms, &retention)?;
    if let Some(job) = state.jobs.get_mut(id) {
        job.assigned = Some(printer_name.to_string());
        job.attempts += 1;
    }
    let _ = state.registry.record_state(
        printer_name,
        PrinterState::Processing,
        &format!("printing job {id}"),
        now_ms,
    );
    if let Some(printer) = state.registry.lookup_mut(printer_name) {
        printer.current_job = Some(id);
    }
    info!(job = %id, printer = printer_name, "job dispatched");
    Ok(Some(dispatch))
}

/// Build the dispatch for a job's current file against a printer.
fn file_dispatch(
    state: &mut ServiceState,
    id: JobId,
    printer_name: &str,
) -> Result<Dispatch, crate::filters::FilterError> {
    let not_found = || crate::filters::FilterError::NoPath {
        src: "-".to_string(),
        dest: printer_name.to_string(),
    };
    let job = state.jobs.get(id).ok_or_else(not_found)?;
    let file = job.files.get(job.current_file).cloned().ok_or_else(not_found)?;
    let owner = job.owner.clone();
    let title = job.title.clone();
    let copies = job
        .attrs
        .get("copies")
        .and_then(|a| a.as_integer())
        .map(|v| v.clamp(1, 999) as u32)
        .unwrap_or(1);

    let printer = state.registry.lookup(printer_name).ok_or_else(not_found)?;
    let stages = state.graph.pipeline(&file.mime, printer)?;
    Ok(Dispatch {
        job: id,
        printer: printer_name.to_string(),
        device_uri: printer.device_uri.clone(),
        file,
        stages,
        owner,
        title,
        copies,
    })
}

/// Handle the end of one (job, file) pipeline once every child is
/// reaped. Inspects the sticky accumulator and applies the printer's
/// error policy.
pub fn finish_file(state: &mut ServiceState, id: JobId, now_ms: u64) -> FileOutcome {
    let retention = state.config.retention;
    let Some(job) = state.jobs.get(id) else { return FileOutcome::Canceled };
    let printer_name = match job.assigned.clone() {
        Some(p) => p,
        None => {
            // Job was canceled while the pipeline drained.
            return FileOutcome::Canceled;
        }
    };
    if job.state != JobState::Processing {
        release_printer(state, &printer_name, now_ms);
        return FileOutcome::Canceled;
    }
    let accumulator = job.accumulator;
    let owner = job.owner.clone();
    let more_files = job.current_file + 1 < job.files.len();

    if accumulator.is_clean() {
        if more_files {
            if let Some(job) = state.jobs.get_mut(id) {
                job.current_file += 1;
            }
            match file_dispatch(state, id, &printer_name) {
                Ok(dispatch) => return FileOutcome::NextFile(dispatch),
                Err(e) => {
                    warn!(job = %id, error = %e, "next file has no conversion path, aborting");
                    let _ = state.jobs.set_state(
                        id,
                        JobState::Aborted,
                        Some("document-format-not-supported"),
                        now_ms,
                        &retention,
                    );
                    release_printer(state, &printer_name, now_ms);
                    return FileOutcome::FilterFailed(ErrorPolicy::AbortJob);
                }
            }
        }
        // Whole job done: account quota bytes and free the printer.
        let kbytes = state.jobs.get(id).map(|j| j.kbytes()).unwrap_or(0);
        if let Some(printer) = state.registry.lookup_mut(&printer_name) {
            printer.usage.add(&owner, QuotaUsage { at_ms: now_ms, pages: 0, kbytes });
        }
        if let Err(e) = state.jobs.set_state(
            id,
            JobState::Completed,
            Some("job-completed-successfully"),
            now_ms,
            &retention,
        ) {
            warn!(job = %id, error = %e, "failed to complete job");
        }
        release_printer(state, &printer_name, now_ms);
        info!(job = %id, printer = %printer_name, "job completed");
        return FileOutcome::Completed;
    }

    if accumulator.is_printer_fault() {
        // Backend fault: stop the printer, re-queue the job.
        let _ = state.registry.record_state(
            &printer_name,
            PrinterState::Stopped,
            "backend failed",
            now_ms,
        );
        let _ = state.registry.set_reasons(&printer_name, "+paused");
        if let Some(printer) = state.registry.lookup_mut(&printer_name) {
            printer.current_job = None;
        }
        requeue(state, id, now_ms);
        warn!(job = %id, printer = %printer_name, "backend fault, printer stopped");
        return FileOutcome::PrinterFault;
    }

    // Recoverable filter failure: apply the printer's error policy.
    let policy = state
        .registry
        .lookup(&printer_name)
        .map(|p| p.error_policy)
        .unwrap_or_default();
    match policy {
        ErrorPolicy::RetryJob => {
            requeue(state, id, now_ms);
            release_printer(state, &printer_name, now_ms);
        }
        ErrorPolicy::AbortJob => {
            let _ = state.jobs.set_state(
                id,
                JobState::Aborted,
                Some("job-errors"),
                now_ms,
                &retention,
            );
            release_printer(state, &printer_name, now_ms);
        }
        ErrorPolicy::StopPrinter => {
            let _ = state.registry.record_state(
                &printer_name,
                PrinterState::Stopped,
                "filter failed",
                now_ms,
            );
            let _ = state.registry.set_reasons(&printer_name, "+paused");
            if let Some(printer) = state.registry.lookup_mut(&printer_name) {
                printer.current_job = None;
            }
            requeue(state, id, now_ms);
        }
    }
    warn!(job = %id, printer = %printer_name, policy = %policy, "filter failure");
    FileOutcome::FilterFailed(policy)
}

/// Put a job back in the queue after a failed attempt.
fn requeue(state: &mut ServiceState, id: JobId, now_ms: u64) {
    let retention = state.config.retention;
    if let Err(e) = state.jobs.set_state(id, JobState::Stopped, Some("job-requeued"), now_ms, &retention)
    {
        warn!(job = %id, error = %e, "failed to stop job for requeue");
        return;
    }
    if let Err(e) = state.jobs.set_state(id, JobState::Pending, None, now_ms, &retention) {
        warn!(job = %id, error = %e, "failed to requeue job");
    }
    if let Some(job) = state.jobs.get_mut(id) {
        job.accumulator.reset();
        job.current_file = 0;
    }
}

/// Return a printer to idle after its job ends, unless it was stopped.
fn release_printer(state: &mut ServiceState, name: &str, now_ms: u64) {
    let was_processing = match state.registry.lookup_mut(name) {
        Some(printer) => {
            printer.current_job = None;
            printer.state == PrinterState::Processing
        }
        None => return,
    };
    if was_processing {
        let _ = state.registry.record_state(name, PrinterState::Idle, "", now_ms);
    }
}

/// Cancel a job, releasing its printer and collecting the pids of any
/// running pipeline so the caller can terminate them.
pub fn cancel_job(
    state: &mut ServiceState,
    id: JobId,
    purge: bool,
    now_ms: u64,
) -> Result<Vec<u32>, crate::jobs::JobError> {
    let retention = state.config.retention;
    let printer = state.jobs.get(id).and_then(|j| j.assigned.clone());
    state.jobs.cancel(id, purge, now_ms, &retention)?;
    if let Some(printer) = printer {
        release_printer(state, &printer, now_ms);
    }
    let pids = match state.active.remove(&id) {
        Some(active) => {
            if let Some(fifo) = active.back_fifo {
                let _ = std::fs::remove_file(fifo);
            }
            active.pids
        }
        None => Vec::new(),
    };
    Ok(pids)
}

/// Release held jobs whose hold time elapsed. Returns the released ids.
pub fn release_holds(state: &mut ServiceState, now_ms: u64) -> Vec<JobId> {
    let retention = state.config.retention;
    let due = state.jobs.releasable(now_ms);
    let mut released = Vec::new();
    for id in due {
        match state.jobs.set_state(id, JobState::Pending, Some("hold-elapsed"), now_ms, &retention)
        {
            Ok(()) => {
                if let Some(job) = state.jobs.get_mut(id) {
                    job.hold_until_ms = None;
                }
                released.push(id);
            }
            Err(e) => warn!(job = %id, error = %e, "failed to release held job"),
        }
    }
    released
}

/// Reassignment when a class disappears mid-flight: jobs targeting the
/// class keep running where they are; jobs still queued for it are
/// canceled when no surviving member can take them.
pub fn reassign_orphans(state: &mut ServiceState, deleted: &str, survivors: &[String], now_ms: u64) {
    let retention = state.config.retention;
    let orphaned: Vec<JobId> = state
        .jobs
        .iter()
        .filter(|j| !j.is_terminal() && j.state != JobState::Processing)
        .filter(|j| j.target.eq_ignore_ascii_case(deleted))
        .map(|j| j.id)
        .collect();
    for id in orphaned {
        match survivors.first() {
            Some(member) => {
                if let Some(job) = state.jobs.get_mut(id) {
                    job.target = member.clone();
                    info!(job = %id, target = %member, "reassigned after destination removal");
                }
            }
            None => {
                info!(job = %id, "destination removed, canceling job");
                let _ = state.jobs.set_state(
                    id,
                    JobState::Canceled,
                    Some("destination-removed"),
                    now_ms,
                    &retention,
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "sched_tests.rs"]
mod tests;
