// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only queries: jobs, destinations, defaults.

use super::{job_group, require_job_id, ListenCtx};
use crate::auth::SessionInfo;
use crate::registry::derived_attributes;
use spool_core::Attribute;
use spool_wire::{GroupTag, Request, Response, StatusCode};

const DEFAULT_JOB_LIMIT: usize = 500;

pub(super) fn get_job_attributes(
    ctx: &ListenCtx,
    request: &Request,
    _session: &SessionInfo,
) -> Response {
    let id = match require_job_id(request) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let state = ctx.state.lock();
    match state.jobs.get(id) {
        Some(job) => Response::ok().with_group(GroupTag::Job, job_group(job)),
        None => Response::error(StatusCode::NotFound, format!("job {id} not found")),
    }
}

/// GET-JOBS with which/destination/owner filters and a result cap.
pub(super) fn get_jobs(ctx: &ListenCtx, request: &Request, session: &SessionInfo) -> Response {
    let which = request.str_attr("which-jobs").unwrap_or("not-completed");
    let completed = which == "completed";
    let destination = request.str_attr("printer-name").map(str::to_lowercase);
    let my_jobs = request.attrs.get("my-jobs").and_then(Attribute::as_bool).unwrap_or(false);
    let limit = request
        .int_attr("limit")
        .and_then(|v| usize::try_from(v).ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_JOB_LIMIT);

    let state = ctx.state.lock();
    let mut response = Response::ok();
    let mut count = 0;
    for job in state.jobs.iter() {
        if job.is_terminal() != completed {
            continue;
        }
        if let Some(dest) = &destination {
            let targets_dest = job.target.to_lowercase() == *dest
                || job.assigned.as_deref().map(str::to_lowercase) == Some(dest.clone());
            if !targets_dest {
                continue;
            }
        }
        if my_jobs && job.owner != session.user {
            continue;
        }
        response.push_group(GroupTag::Job, job_group(job));
        count += 1;
        if count >= limit {
            break;
        }
    }
    response
}

pub(super) fn get_printer_attributes(ctx: &ListenCtx, request: &Request) -> Response {
    let Some(name) = request.str_attr("printer-name") else {
        return Response::error(StatusCode::BadRequest, "printer-name required");
    };
    let mut state = ctx.state.lock();
    // When a printer and a class share the name, the explicit record
    // (printer, then explicit class) wins over discovery artifacts.
    match state.registry.lookup(name) {
        Some(dest) => Response::ok().with_group(GroupTag::Printer, derived_attributes(dest)),
        None => Response::error(StatusCode::NotFound, format!("destination \"{name}\" not found")),
    }
}

pub(super) fn get_printers(ctx: &ListenCtx) -> Response {
    let state = ctx.state.lock();
    let mut response = Response::ok();
    for dest in state.registry.iter().filter(|d| d.kind.is_printer()) {
        response.push_group(GroupTag::Printer, derived_attributes(dest));
    }
    response
}

pub(super) fn get_classes(ctx: &ListenCtx) -> Response {
    let state = ctx.state.lock();
    let mut response = Response::ok();
    for dest in state.registry.iter().filter(|d| d.kind.is_class()) {
        response.push_group(GroupTag::Printer, derived_attributes(dest));
    }
    response
}

pub(super) fn get_default(ctx: &ListenCtx) -> Response {
    let mut state = ctx.state.lock();
    match state.effective_default() {
        Some(name) => {
            let mut attrs = spool_core::AttrBag::new();
            attrs.insert("printer-name".into(), Attribute::name(name));
            Response::ok().with_group(GroupTag::Printer, attrs)
        }
        None => Response::error(StatusCode::NotFound, "no default destination"),
    }
}
