// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request dispatch and job-operation handlers.

mod admin;
mod queries;

use super::ListenCtx;
use crate::auth::{Access, SessionInfo};
use crate::pipeline;
use crate::sched;
use crate::state::ServiceState;
use spool_core::{AttrBag, Attribute, Event, Job, JobId, JobState, MimeType};
use spool_wire::{GroupTag, Operation, Request, Response, StatusCode};
use tracing::warn;

/// Handle one request against the shared state. Every error is a
/// response with a status code; the transport stays healthy.
pub fn handle_request(
    ctx: &ListenCtx,
    request: &Request,
    session: &SessionInfo,
    now_ms: u64,
) -> Response {
    if request.version > spool_wire::PROTOCOL_VERSION {
        return Response::error(StatusCode::VersionNotSupported, "protocol version too new");
    }
    if let Some(refused) = check_access(ctx, request, session) {
        return refused;
    }

    match request.operation {
        Operation::PrintJob => submit_job(ctx, request, session, now_ms, true),
        Operation::ValidateJob => validate_job(ctx, request, session),
        Operation::CreateJob => submit_job(ctx, request, session, now_ms, false),
        Operation::SendDocument => send_document(ctx, request, session, now_ms),
        Operation::CancelJob => cancel_job(ctx, request, session, now_ms),
        Operation::HoldJob => hold_job(ctx, request, session, now_ms),
        Operation::ReleaseJob => release_job(ctx, request, session, now_ms),
        Operation::RestartJob => restart_job(ctx, request, session, now_ms),
        Operation::SetJobAttributes => set_job_attributes(ctx, request, session, now_ms),

        Operation::GetJobAttributes => queries::get_job_attributes(ctx, request, session),
        Operation::GetJobs => queries::get_jobs(ctx, request, session),
        Operation::GetPrinterAttributes => queries::get_printer_attributes(ctx, request),
        Operation::GetPrinters => queries::get_printers(ctx),
        Operation::GetClasses => queries::get_classes(ctx),
        Operation::GetDefault => queries::get_default(ctx),

        Operation::AddPrinter => admin::add_printer(ctx, request, now_ms),
        Operation::AddClass => admin::add_class(ctx, request, now_ms),
        Operation::DeletePrinter => admin::delete_printer(ctx, request, now_ms),
        Operation::DeleteClass => admin::delete_class(ctx, request, now_ms),
        Operation::SetDefault => admin::set_default(ctx, request),
        Operation::EnablePrinter => admin::set_accepting(ctx, request, true),
        Operation::DisablePrinter => admin::set_accepting(ctx, request, false),
        Operation::PausePrinter => admin::pause_printer(ctx, request, now_ms),
        Operation::ResumePrinter => admin::resume_printer(ctx, request, now_ms),
    }
}

/// Consult the access oracle. `None` means proceed.
fn check_access(ctx: &ListenCtx, request: &Request, session: &SessionInfo) -> Option<Response> {
    let resource = request
        .str_attr("printer-name")
        .or_else(|| request.str_attr("class-name"))
        .unwrap_or("");
    match ctx.oracle.classify(session, resource, request.operation) {
        Access::Allow => None,
        Access::Deny => Some(Response::error(StatusCode::Forbidden, "forbidden")),
        Access::NeedCredentials => {
            Some(Response::error(StatusCode::NotAuthenticated, "authentication required"))
        }
    }
}

/// Wake the scheduler about a queued job.
pub(super) fn wake_scheduler(ctx: &ListenCtx, id: JobId) {
    if ctx.events.try_send(Event::JobQueued { id }).is_err() {
        warn!(job = %id, "event queue full, scheduler wake dropped");
    }
}

pub(super) fn wake_printer(ctx: &ListenCtx, name: &str) {
    if ctx.events.try_send(Event::PrinterChanged { name: name.to_string() }).is_err() {
        warn!(printer = name, "event queue full, scheduler wake dropped");
    }
}

/// Attribute view of one job, used by responses and queries.
pub(super) fn job_group(job: &Job) -> AttrBag {
    let mut attrs = AttrBag::new();
    attrs.insert("job-id".into(), Attribute::Integer(job.id.0 as i64));
    attrs.insert("job-state".into(), Attribute::Enum(job.state.to_string()));
    attrs.insert("job-printer".into(), Attribute::name(job.target.clone()));
    attrs.insert("job-originating-user-name".into(), Attribute::name(job.owner.clone()));
    attrs.insert("job-name".into(), Attribute::name(job.title.clone()));
    attrs.insert("job-priority".into(), Attribute::Integer(job.priority as i64));
    attrs.insert("number-of-documents".into(), Attribute::Integer(job.files.len() as i64));
    attrs.insert("job-media-sheets-completed".into(), Attribute::Integer(job.sheets as i64));
    attrs.insert("job-k-octets".into(), Attribute::Integer(job.kbytes() as i64));
    attrs.insert("time-at-creation".into(), Attribute::Date(job.created_at_ms));
    attrs.insert("time-at-state".into(), Attribute::Date(job.state_at_ms));
    if let Some(reason) = job.history.last().and_then(|t| t.reason.clone()) {
        attrs.insert("job-state-reasons".into(), Attribute::Keyword(reason));
    }
    if let Some(hold) = job.hold_until_ms {
        attrs.insert("job-hold-until".into(), Attribute::Date(hold));
    }
    for (name, value) in &job.attrs {
        attrs.entry(name.clone()).or_insert_with(|| value.clone());
    }
    attrs
}

/// Whether this session may operate on the job.
fn may_manage(job: &Job, session: &SessionInfo) -> bool {
    job.owner == session.user || session.is_loopback()
}

/// Validate a submission target. Returns the canonical destination name.
fn check_submission(
    state: &mut ServiceState,
    target: &str,
    user: &str,
) -> Result<String, Response> {
    let Some(dest) = state.registry.lookup(target) else {
        return Err(Response::error(
            StatusCode::NotFound,
            format!("destination \"{target}\" not found"),
        ));
    };
    if !dest.accepting {
        return Err(Response::error(
            StatusCode::NotAccepting,
            format!("destination \"{}\" is not accepting jobs", dest.name),
        ));
    }
    if !dest.user_allowed(user) {
        return Err(Response::error(
            StatusCode::Forbidden,
            format!("user \"{user}\" may not print to \"{}\"", dest.name),
        ));
    }
    Ok(dest.name.clone())
}

fn document_mime(request: &Request) -> Result<MimeType, Response> {
    match request.str_attr("document-format") {
        None => Ok(MimeType::concrete("text", "plain")),
        Some(format) => MimeType::parse(format).map_err(|_| {
            Response::error(
                StatusCode::DocumentFormatNotSupported,
                format!("bad document format {format:?}"),
            )
        }),
    }
}

fn job_response(job: &Job) -> Response {
    Response::ok().with_group(GroupTag::Job, job_group(job))
}

fn require_job_id(request: &Request) -> Result<JobId, Response> {
    request
        .int_attr("job-id")
        .and_then(|v| u32::try_from(v).ok())
        .map(JobId)
        .ok_or_else(|| Response::error(StatusCode::BadRequest, "job-id required"))
}

/// PRINT-JOB and CREATE-JOB. A created job holds until its documents
/// arrive; a printed job queues immediately.
fn submit_job(
    ctx: &ListenCtx,
    request: &Request,
    session: &SessionInfo,
    now_ms: u64,
    with_document: bool,
) -> Response {
    let Some(target) = request.str_attr("printer-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "printer-name required");
    };
    if with_document && request.document.as_deref().map(<[u8]>::is_empty).unwrap_or(true) {
        return Response::error(StatusCode::BadRequest, "no document data");
    }
    let mime = match document_mime(request) {
        Ok(mime) => mime,
        Err(response) => return response,
    };

    let mut state = ctx.state.lock();
    if state.shutting_down {
        return Response::error(StatusCode::Busy, "shutting down");
    }
    let target = match check_submission(&mut state, &target, &session.user) {
        Ok(name) => name,
        Err(response) => return response,
    };

    let priority = request
        .int_attr("job-priority")
        .map(|v| v.clamp(1, 100) as u8)
        .unwrap_or(50);
    let title = request.str_attr("job-name").unwrap_or("untitled").to_string();
    let mut attrs = request.attrs.clone();
    attrs.shift_remove("printer-name");
    attrs.shift_remove("job-name");
    attrs.shift_remove("job-priority");
    attrs.shift_remove("document-format");

    let max_jobs = state.config.limits.max_jobs;
    let retention = state.config.retention;
    let id = match state
        .jobs
        .submit(&target, &session.user, priority, &title, attrs, now_ms, max_jobs)
    {
        Ok(id) => id,
        Err(crate::jobs::JobError::QueueFull) => {
            return Response::error(StatusCode::Busy, "too many jobs")
        }
        Err(e) => {
            warn!(error = %e, "submit failed");
            return Response::error(StatusCode::InternalError, "failed to queue job");
        }
    };

    if with_document {
        let document = request.document.as_deref().unwrap_or_default();
        if let Err(e) = state.jobs.attach_document(id, document, mime) {
            warn!(job = %id, error = %e, "failed to store document");
            let _ = state.jobs.purge(id);
            return Response::error(StatusCode::InternalError, "failed to store document");
        }
    } else {
        // Fileless job: hold until SEND-DOCUMENT finishes the data.
        if let Err(e) =
            state.jobs.set_state(id, JobState::Held, Some("job-data-incomplete"), now_ms, &retention)
        {
            warn!(job = %id, error = %e, "failed to hold created job");
        }
    }

    let response = state.jobs.get(id).map(job_response).unwrap_or_else(Response::ok);
    drop(state);
    if with_document {
        wake_scheduler(ctx, id);
    }
    response
}

/// VALIDATE-JOB: would the submission be accepted?
fn validate_job(ctx: &ListenCtx, request: &Request, session: &SessionInfo) -> Response {
    let Some(target) = request.str_attr("printer-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "printer-name required");
    };
    let mime = match document_mime(request) {
        Ok(mime) => mime,
        Err(response) => return response,
    };
    let mut guard = ctx.state.lock();
    let state = &mut *guard;
    let target = match check_submission(state, &target, &session.user) {
        Ok(name) => name,
        Err(response) => return response,
    };
    // A job for a class is printable if any member could take it.
    let printable = if mime.is_raw() {
        true
    } else {
        let candidates: Vec<String> = match state.registry.lookup(&target) {
            Some(d) if d.kind.is_class() => d.members.clone(),
            Some(d) => vec![d.name.clone()],
            None => Vec::new(),
        };
        candidates.iter().any(|name| {
            let Some(printer) = state.registry.lookup(name) else { return false };
            state.graph.pipeline(&mime, printer).is_ok()
        })
    };
    if printable {
        Response::ok()
    } else {
        Response::error(
            StatusCode::DocumentFormatNotSupported,
            format!("no conversion path for {mime}"),
        )
    }
}

/// SEND-DOCUMENT: attach data to a created job; the last document
/// releases it to the queue.
fn send_document(
    ctx: &ListenCtx,
    request: &Request,
    session: &SessionInfo,
    now_ms: u64,
) -> Response {
    let id = match require_job_id(request) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Some(document) = request.document.as_deref() else {
        return Response::error(StatusCode::BadRequest, "no document data");
    };
    let mime = match document_mime(request) {
        Ok(mime) => mime,
        Err(response) => return response,
    };
    let last = request
        .attrs
        .get("last-document")
        .and_then(Attribute::as_bool)
        .unwrap_or(true);

    let mut state = ctx.state.lock();
    let Some(job) = state.jobs.get(id) else {
        return Response::error(StatusCode::NotFound, format!("job {id} not found"));
    };
    if !may_manage(job, session) {
        return Response::error(StatusCode::Forbidden, "not your job");
    }
    let retention = state.config.retention;
    // Created jobs sit held while their documents stream in.
    if state.jobs.get(id).map(|j| j.state) == Some(JobState::Held) {
        if let Err(e) = state.jobs.set_state(id, JobState::Pending, None, now_ms, &retention) {
            warn!(job = %id, error = %e, "failed to unhold for attach");
        }
    }
    if let Err(e) = state.jobs.attach_document(id, document, mime) {
        warn!(job = %id, error = %e, "attach failed");
        return Response::error(StatusCode::BadRequest, format!("cannot attach: {e}"));
    }
    if !last {
        if let Err(e) = state
            .jobs
            .set_state(id, JobState::Held, Some("job-data-incomplete"), now_ms, &retention)
        {
            warn!(job = %id, error = %e, "failed to re-hold job");
        }
    }
    let response = state.jobs.get(id).map(job_response).unwrap_or_else(Response::ok);
    drop(state);
    if last {
        wake_scheduler(ctx, id);
    }
    response
}

/// CANCEL-JOB, with optional purge. Terminates any running pipeline.
fn cancel_job(ctx: &ListenCtx, request: &Request, session: &SessionInfo, now_ms: u64) -> Response {
    let id = match require_job_id(request) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let purge = request.attrs.get("purge-job").and_then(Attribute::as_bool).unwrap_or(false);

    let mut state = ctx.state.lock();
    let Some(job) = state.jobs.get(id) else {
        return Response::error(StatusCode::NotFound, format!("job {id} not found"));
    };
    if !may_manage(job, session) {
        return Response::error(StatusCode::Forbidden, "not your job");
    }
    let printer = job.assigned.clone();
    let pids = match sched::cancel_job(&mut state, id, purge, now_ms) {
        Ok(pids) => pids,
        Err(e) => {
            warn!(job = %id, error = %e, "cancel failed");
            return Response::error(StatusCode::InternalError, "cancel failed");
        }
    };
    let response = state.jobs.get(id).map(job_response).unwrap_or_else(Response::ok);
    drop(state);

    if !pids.is_empty() {
        tokio::spawn(pipeline::terminate(pids, pipeline::KILL_GRACE));
    }
    if let Some(printer) = printer {
        wake_printer(ctx, &printer);
    }
    response
}

/// HOLD-JOB with optional hold-until.
fn hold_job(ctx: &ListenCtx, request: &Request, session: &SessionInfo, now_ms: u64) -> Response {
    let id = match require_job_id(request) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let hold_until = request.int_attr("job-hold-until").and_then(|v| u64::try_from(v).ok());

    let mut state = ctx.state.lock();
    let Some(job) = state.jobs.get(id) else {
        return Response::error(StatusCode::NotFound, format!("job {id} not found"));
    };
    if !may_manage(job, session) {
        return Response::error(StatusCode::Forbidden, "not your job");
    }
    let retention = state.config.retention;
    if let Err(e) =
        state.jobs.set_state(id, JobState::Held, Some("job-hold-until-specified"), now_ms, &retention)
    {
        return Response::error(StatusCode::BadRequest, format!("cannot hold: {e}"));
    }
    if let Some(job) = state.jobs.get_mut(id) {
        job.hold_until_ms = hold_until;
    }
    state.jobs.get(id).map(job_response).unwrap_or_else(Response::ok)
}

/// RELEASE-JOB: held → pending.
fn release_job(ctx: &ListenCtx, request: &Request, session: &SessionInfo, now_ms: u64) -> Response {
    let id = match require_job_id(request) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let mut state = ctx.state.lock();
    let Some(job) = state.jobs.get(id) else {
        return Response::error(StatusCode::NotFound, format!("job {id} not found"));
    };
    if !may_manage(job, session) {
        return Response::error(StatusCode::Forbidden, "not your job");
    }
    let retention = state.config.retention;
    if let Err(e) = state.jobs.set_state(id, JobState::Pending, None, now_ms, &retention) {
        return Response::error(StatusCode::BadRequest, format!("cannot release: {e}"));
    }
    if let Some(job) = state.jobs.get_mut(id) {
        job.hold_until_ms = None;
    }
    let response = state.jobs.get(id).map(job_response).unwrap_or_else(Response::ok);
    drop(state);
    wake_scheduler(ctx, id);
    response
}

/// RESTART-JOB: completed → pending.
fn restart_job(ctx: &ListenCtx, request: &Request, session: &SessionInfo, now_ms: u64) -> Response {
    let id = match require_job_id(request) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let mut state = ctx.state.lock();
    let Some(job) = state.jobs.get(id) else {
        return Response::error(StatusCode::NotFound, format!("job {id} not found"));
    };
    if !may_manage(job, session) {
        return Response::error(StatusCode::Forbidden, "not your job");
    }
    if let Err(e) = state.jobs.restart(id, now_ms) {
        return Response::error(StatusCode::BadRequest, format!("cannot restart: {e}"));
    }
    let response = state.jobs.get(id).map(job_response).unwrap_or_else(Response::ok);
    drop(state);
    wake_scheduler(ctx, id);
    response
}

/// SET-JOB-ATTRIBUTES: priority and hold-until, pending/held jobs only.
fn set_job_attributes(
    ctx: &ListenCtx,
    request: &Request,
    session: &SessionInfo,
    _now_ms: u64,
) -> Response {
    let id = match require_job_id(request) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let mut state = ctx.state.lock();
    let Some(job) = state.jobs.get(id) else {
        return Response::error(StatusCode::NotFound, format!("job {id} not found"));
    };
    if !may_manage(job, session) {
        return Response::error(StatusCode::Forbidden, "not your job");
    }
    if !matches!(job.state, JobState::Pending | JobState::Held) {
        return Response::error(
            StatusCode::BadRequest,
            format!("job is {}, attributes are frozen", job.state),
        );
    }
    let priority = request.int_attr("job-priority");
    let hold_until = request.int_attr("job-hold-until").and_then(|v| u64::try_from(v).ok());
    if let Some(job) = state.jobs.get_mut(id) {
        if let Some(priority) = priority {
            job.priority = priority.clamp(1, 100) as u8;
        }
        if let Some(hold) = hold_until {
            job.hold_until_ms = Some(hold);
        }
        let snapshot = job.clone();
        if let Err(e) = state.jobs.persist(&snapshot) {
            warn!(job = %id, error = %e, "failed to persist attribute change");
        }
    }
    let response = state.jobs.get(id).map(job_response).unwrap_or_else(Response::ok);
    drop(state);
    wake_scheduler(ctx, id);
    response
}
