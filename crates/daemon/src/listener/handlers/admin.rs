// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Destination administration: create, modify, delete, enable, pause.

use super::{wake_printer, ListenCtx};
use crate::classes;
use crate::sched;
use spool_core::{Attribute, CapabilityRecord, PrinterState, QuotaConfig};
use spool_wire::{Request, Response, StatusCode};
use tracing::{info, warn};

/// ADD-PRINTER creates or modifies. Only the supplied attributes change.
pub(super) fn add_printer(ctx: &ListenCtx, request: &Request, now_ms: u64) -> Response {
    let Some(name) = request.str_attr("printer-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "printer-name required");
    };
    if name.is_empty() || name.contains(['/', '@', '#']) {
        return Response::error(StatusCode::BadRequest, format!("bad printer name {name:?}"));
    }

    let mut state = ctx.state.lock();
    let created = if state.registry.lookup_printer(&name).is_none() {
        if let Err(e) = state.registry.create_printer(&name) {
            return Response::error(StatusCode::InternalError, e.to_string());
        }
        true
    } else {
        false
    };

    if let Some(record) = request.str_attr("capability-record") {
        match CapabilityRecord::from_toml(record) {
            Ok(record) => {
                if let Err(e) = state.registry.set_capabilities(&name, record) {
                    warn!(printer = %name, error = %e, "capability update failed");
                }
            }
            Err(e) => {
                return Response::error(
                    StatusCode::BadRequest,
                    format!("bad capability record: {e}"),
                )
            }
        }
    }

    {
        let Some(dest) = state.registry.lookup_printer_mut(&name) else {
            return Response::error(StatusCode::InternalError, "printer vanished");
        };
        if let Some(uri) = request.str_attr("device-uri") {
            dest.device_uri = Some(uri.to_string());
        }
        if let Some(info) = request.str_attr("printer-info") {
            dest.info = info.to_string();
        }
        if let Some(location) = request.str_attr("printer-location") {
            dest.location = location.to_string();
        }
        if let Some(model) = request.str_attr("printer-make-and-model") {
            dest.make_model = model.to_string();
        }
        if let Some(policy) = request.str_attr("printer-error-policy") {
            match serde_json::from_value(serde_json::Value::String(policy.to_string())) {
                Ok(policy) => dest.error_policy = policy,
                Err(_) => {
                    return Response::error(
                        StatusCode::AttributesOrValues,
                        format!("unknown error policy {policy:?}"),
                    )
                }
            }
        }
        if let Some(policy) = request.str_attr("printer-op-policy") {
            dest.op_policy = policy.to_string();
        }
        if let Some(sheets) = request.str_attr("job-sheets-default") {
            let mut parts = sheets.splitn(2, ',');
            dest.job_sheets = (
                parts.next().unwrap_or("none").to_string(),
                parts.next().unwrap_or("none").to_string(),
            );
        }
        if let Some(allow) = request.str_attr("requesting-user-name-allowed") {
            dest.allowed_users = split_users(allow);
            dest.denied_users.clear();
        }
        if let Some(deny) = request.str_attr("requesting-user-name-denied") {
            dest.denied_users = split_users(deny);
            dest.allowed_users.clear();
        }
        let quota = QuotaConfig {
            period_secs: request
                .int_attr("job-quota-period")
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(dest.quota.period_secs),
            page_limit: request
                .int_attr("job-page-limit")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(dest.quota.page_limit),
            k_limit: request
                .int_attr("job-k-limit")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(dest.quota.k_limit),
        };
        dest.quota = quota;
        if request.attrs.get("enabled").and_then(Attribute::as_bool) == Some(true) {
            dest.accepting = true;
            if dest.state == PrinterState::Stopped {
                dest.state = PrinterState::Idle;
            }
        }
    }
    state.registry.mark_dirty();
    state.rebuild_graph();
    state.persist_catalog_if_dirty();
    drop(state);

    info!(printer = %name, created, "printer configured");
    wake_printer(ctx, &name);
    Response::ok()
}

fn split_users(list: &str) -> Vec<String> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// ADD-CLASS creates the class as needed and edits membership.
pub(super) fn add_class(ctx: &ListenCtx, request: &Request, _now_ms: u64) -> Response {
    let Some(name) = request.str_attr("class-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "class-name required");
    };

    let mut state = ctx.state.lock();
    if state.registry.lookup_class(&name).is_none() {
        if let Err(e) = state.registry.create_class(&name) {
            return Response::error(StatusCode::InternalError, e.to_string());
        }
    }
    if let Some(member) = request.str_attr("add-member").map(str::to_string) {
        if let Err(e) = classes::add_member(&mut state.registry, &name, &member) {
            return Response::error(StatusCode::BadRequest, e.to_string());
        }
    }
    if let Some(member) = request.str_attr("remove-member").map(str::to_string) {
        if let Err(e) = classes::remove_member(&mut state.registry, &name, &member) {
            return Response::error(StatusCode::BadRequest, e.to_string());
        }
    }
    if let Some(info) = request.str_attr("printer-info") {
        if let Some(class) = state.registry.lookup_class_mut(&name) {
            class.info = info.to_string();
        }
    }
    if request.attrs.get("enabled").and_then(Attribute::as_bool) == Some(true) {
        if let Some(class) = state.registry.lookup_class_mut(&name) {
            class.accepting = true;
            if class.state == PrinterState::Stopped {
                class.state = PrinterState::Idle;
            }
        }
    }
    state.registry.mark_dirty();
    state.persist_catalog_if_dirty();
    drop(state);
    wake_printer(ctx, &name);
    Response::ok()
}

/// DELETE-PRINTER cancels its jobs, fixes classes, persists.
pub(super) fn delete_printer(ctx: &ListenCtx, request: &Request, now_ms: u64) -> Response {
    let Some(name) = request.str_attr("printer-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "printer-name required");
    };

    let mut state = ctx.state.lock();
    // Cancel whatever is queued for or running on this printer.
    let affected: Vec<spool_core::JobId> = state
        .jobs
        .iter()
        .filter(|j| !j.is_terminal())
        .filter(|j| {
            j.target.eq_ignore_ascii_case(&name)
                || j.assigned.as_deref().map(|a| a.eq_ignore_ascii_case(&name)).unwrap_or(false)
        })
        .map(|j| j.id)
        .collect();
    let mut doomed_pids = Vec::new();
    for id in affected {
        match sched::cancel_job(&mut state, id, false, now_ms) {
            Ok(pids) => doomed_pids.extend(pids),
            Err(e) => warn!(job = %id, error = %e, "cancel during delete failed"),
        }
    }

    let outcome = match state.registry.delete(&name, false) {
        Ok(outcome) => outcome,
        Err(e) => return Response::error(StatusCode::NotFound, e.to_string()),
    };
    // Jobs queued on classes this deletion emptied follow the
    // destination-removed policy.
    for class in &outcome.emptied_classes {
        sched::reassign_orphans(&mut state, class, &[], now_ms);
    }
    if state.default_dest.as_deref().map(|d| d.eq_ignore_ascii_case(&name)).unwrap_or(false) {
        state.default_dest = None;
        state.persist_default();
    }
    state.rebuild_graph();
    state.persist_catalog_if_dirty();
    drop(state);

    if !doomed_pids.is_empty() {
        tokio::spawn(crate::pipeline::terminate(doomed_pids, crate::pipeline::KILL_GRACE));
    }
    info!(printer = %name, "printer deleted");
    Response::ok()
}

/// DELETE-CLASS re-targets queued jobs to surviving members.
pub(super) fn delete_class(ctx: &ListenCtx, request: &Request, now_ms: u64) -> Response {
    let Some(name) = request.str_attr("class-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "class-name required");
    };
    let mut state = ctx.state.lock();
    let members = match state.registry.lookup_class(&name) {
        Some(class) => class.members.clone(),
        None => return Response::error(StatusCode::NotFound, format!("class \"{name}\" not found")),
    };
    if let Err(e) = state.registry.delete(&name, true) {
        return Response::error(StatusCode::NotFound, e.to_string());
    }
    sched::reassign_orphans(&mut state, &name, &members, now_ms);
    state.persist_catalog_if_dirty();
    drop(state);
    info!(class = %name, "class deleted");
    wake_scheduler_for_members(ctx, &members);
    Response::ok()
}

fn wake_scheduler_for_members(ctx: &ListenCtx, members: &[String]) {
    for member in members {
        wake_printer(ctx, member);
    }
}

pub(super) fn set_default(ctx: &ListenCtx, request: &Request) -> Response {
    let Some(name) = request.str_attr("printer-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "printer-name required");
    };
    let mut state = ctx.state.lock();
    if state.registry.lookup(&name).is_none() {
        return Response::error(StatusCode::NotFound, format!("destination \"{name}\" not found"));
    }
    state.default_dest = Some(name.clone());
    state.persist_default();
    info!(dest = %name, "default destination set");
    Response::ok()
}

/// ENABLE-PRINTER / DISABLE-PRINTER toggle accepting. Disabling leaves
/// in-flight jobs alone.
pub(super) fn set_accepting(ctx: &ListenCtx, request: &Request, accepting: bool) -> Response {
    let Some(name) = request.str_attr("printer-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "printer-name required");
    };
    let mut state = ctx.state.lock();
    if let Err(e) = state.registry.set_accepting(&name, accepting) {
        return Response::error(StatusCode::NotFound, e.to_string());
    }
    classes::update_implicit_accepting(&mut state.registry);
    state.persist_catalog_if_dirty();
    drop(state);
    if accepting {
        wake_printer(ctx, &name);
    }
    Response::ok()
}

/// PAUSE-PRINTER forces stopped.
pub(super) fn pause_printer(ctx: &ListenCtx, request: &Request, now_ms: u64) -> Response {
    let Some(name) = request.str_attr("printer-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "printer-name required");
    };
    let message = request.str_attr("printer-state-message").unwrap_or("Paused");
    let mut state = ctx.state.lock();
    if let Err(e) = state.registry.record_state(&name, PrinterState::Stopped, message, now_ms) {
        return Response::error(StatusCode::NotFound, e.to_string());
    }
    let _ = state.registry.set_reasons(&name, "+paused");
    state.persist_catalog_if_dirty();
    Response::ok()
}

/// RESUME-PRINTER returns a stopped printer to idle and re-evaluates
/// the queue.
pub(super) fn resume_printer(ctx: &ListenCtx, request: &Request, now_ms: u64) -> Response {
    let Some(name) = request.str_attr("printer-name").map(str::to_string) else {
        return Response::error(StatusCode::BadRequest, "printer-name required");
    };
    let mut state = ctx.state.lock();
    let current = match state.registry.lookup(&name) {
        Some(dest) => dest.state,
        None => {
            return Response::error(StatusCode::NotFound, format!("destination \"{name}\" not found"))
        }
    };
    if current == PrinterState::Stopped {
        if let Err(e) = state.registry.record_state(&name, PrinterState::Idle, "", now_ms) {
            return Response::error(StatusCode::NotFound, e.to_string());
        }
    }
    let _ = state.registry.set_reasons(&name, "-paused");
    state.persist_catalog_if_dirty();
    drop(state);
    wake_printer(ctx, &name);
    Response::ok()
}
