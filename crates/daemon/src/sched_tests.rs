// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::Config;
use crate::jobs::JobStore;
use crate::registry::Registry;
use spool_core::{AttrBag, Attribute, CapabilityRecord, MimeType, QuotaConfig};

fn test_state() -> (tempfile::TempDir, ServiceState) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        state_dir: dir.path().join("state"),
        spool_dir: dir.path().join("spool"),
        ..Config::default()
    };
    let jobs = JobStore::new(config.jobs_dir()).unwrap();
    let state = ServiceState::new(config, Registry::new(), jobs);
    (dir, state)
}

fn add_printer(state: &mut ServiceState, name: &str) {
    state.registry.create_printer(name).unwrap();
    {
        let p = state.registry.lookup_printer_mut(name).unwrap();
        p.state = PrinterState::Idle;
        p.accepting = true;
        p.device_uri = Some(format!("file:/tmp/{name}.out"));
        p.capability = CapabilityRecord {
            input_formats: vec!["text/plain".to_string()],
            ..CapabilityRecord::default()
        };
    }
    state.rebuild_graph();
}

fn submit_text_job(state: &mut ServiceState, target: &str, owner: &str) -> JobId {
    let id = state
        .jobs
        .submit(target, owner, 50, "t", AttrBag::new(), 1_000, 0)
        .unwrap();
    state
        .jobs
        .attach_document(id, b"hello", MimeType::concrete("text", "plain"))
        .unwrap();
    id
}

#[test]
fn plan_dispatches_a_ready_job() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    let id = submit_text_job(&mut state, "laser", "alice");

    let dispatches = plan(&mut state, 2_000);
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].job, id);
    assert_eq!(dispatches[0].printer, "laser");
    assert!(dispatches[0].stages.is_empty(), "text/plain is directly accepted");

    assert_eq!(state.jobs.get(id).unwrap().state, JobState::Processing);
    assert_eq!(state.jobs.get(id).unwrap().assigned.as_deref(), Some("laser"));
    let printer = state.registry.lookup("laser").unwrap();
    assert_eq!(printer.state, PrinterState::Processing);
    assert_eq!(printer.current_job, Some(id));
}

#[test]
fn fileless_jobs_wait_for_documents() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    let id = state.jobs.submit("laser", "alice", 50, "t", AttrBag::new(), 1_000, 0).unwrap();

    assert!(plan(&mut state, 2_000).is_empty());
    assert_eq!(state.jobs.get(id).unwrap().state, JobState::Pending);
}

#[test]
fn stopped_or_rejecting_printers_get_nothing() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    submit_text_job(&mut state, "laser", "alice");

    state.registry.lookup_printer_mut("laser").unwrap().accepting = false;
    assert!(plan(&mut state, 2_000).is_empty());

    state.registry.lookup_printer_mut("laser").unwrap().accepting = true;
    state.registry.lookup_printer_mut("laser").unwrap().state = PrinterState::Stopped;
    assert!(plan(&mut state, 2_000).is_empty());
}

#[test]
fn higher_priority_jobs_dispatch_first() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    let _low = submit_text_job(&mut state, "laser", "alice");
    let high = {
        let id = state.jobs.submit("laser", "bob", 50, "t", AttrBag::new(), 1_000, 0).unwrap();
        state.jobs.get_mut(id).unwrap().priority = 90;
        state
            .jobs
            .attach_document(id, b"x", MimeType::concrete("text", "plain"))
            .unwrap();
        id
    };

    let dispatches = plan(&mut state, 2_000);
    // One printer, one slot: only the high-priority job starts.
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].job, high);
}

#[test]
fn class_targets_spread_round_robin() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "p1");
    add_printer(&mut state, "p2");
    state.registry.create_class("grp").unwrap();
    crate::classes::add_member(&mut state.registry, "grp", "p1").unwrap();
    crate::classes::add_member(&mut state.registry, "grp", "p2").unwrap();

    for _ in 0..4 {
        submit_text_job(&mut state, "grp", "alice");
    }
    let dispatches = plan(&mut state, 2_000);
    // Two members, one slot each this pass.
    assert_eq!(dispatches.len(), 2);
    let printers: Vec<&str> = dispatches.iter().map(|d| d.printer.as_str()).collect();
    assert!(printers.contains(&"p1"));
    assert!(printers.contains(&"p2"));
}

#[test]
fn quota_exceeded_holds_the_job() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "meter");
    {
        let p = state.registry.lookup_printer_mut("meter").unwrap();
        p.quota = QuotaConfig { period_secs: 3600, page_limit: 10, k_limit: 0 };
        p.usage.add("bob", spool_core::QuotaUsage { at_ms: 1_000, pages: 9, kbytes: 0 });
    }
    let id = {
        let id = state.jobs.submit("meter", "bob", 50, "t", AttrBag::new(), 1_000, 0).unwrap();
        state.jobs.get_mut(id).unwrap().attrs.insert(
            "job-pages".to_string(),
            Attribute::Integer(5),
        );
        state
            .jobs
            .attach_document(id, b"x", MimeType::concrete("text", "plain"))
            .unwrap();
        id
    };

    assert!(plan(&mut state, 2_000).is_empty());
    let job = state.jobs.get(id).unwrap();
    assert_eq!(job.state, JobState::Held);
    assert_eq!(job.history.last().unwrap().reason.as_deref(), Some("quota-exceeded"));
}

#[test]
fn unconvertible_document_aborts_the_job() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    let id = {
        let id = state.jobs.submit("laser", "alice", 50, "t", AttrBag::new(), 1_000, 0).unwrap();
        state
            .jobs
            .attach_document(id, b"x", MimeType::concrete("video", "mp4"))
            .unwrap();
        id
    };

    assert!(plan(&mut state, 2_000).is_empty());
    let job = state.jobs.get(id).unwrap();
    assert_eq!(job.state, JobState::Aborted);
    assert_eq!(
        job.history.last().unwrap().reason.as_deref(),
        Some("document-format-not-supported")
    );
}

#[test]
fn raw_documents_dispatch_with_no_stages() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    let id = {
        let id = state.jobs.submit("laser", "alice", 50, "t", AttrBag::new(), 1_000, 0).unwrap();
        state.jobs.attach_document(id, b"\x1b%raw", MimeType::Raw).unwrap();
        id
    };

    let dispatches = plan(&mut state, 2_000);
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].job, id);
    assert!(dispatches[0].stages.is_empty());
}

#[test]
fn active_job_cap_limits_dispatches() {
    let (_tmp, mut state) = test_state();
    state.config.limits.max_active_jobs = 1;
    add_printer(&mut state, "p1");
    add_printer(&mut state, "p2");
    submit_text_job(&mut state, "p1", "alice");
    submit_text_job(&mut state, "p2", "alice");

    assert_eq!(plan(&mut state, 2_000).len(), 1);
}

#[test]
fn single_pass_fills_every_free_slot() {
    let (_tmp, mut state) = test_state();
    state.config.limits.max_active_jobs = 2;
    add_printer(&mut state, "p1");
    add_printer(&mut state, "p2");
    submit_text_job(&mut state, "p1", "alice");
    submit_text_job(&mut state, "p2", "alice");

    // Two free slots, two idle printers: one pass starts both jobs.
    assert_eq!(plan(&mut state, 2_000).len(), 2);
    assert_eq!(state.jobs.active_count(), 2);
}

#[test]
fn finish_file_completes_single_file_job() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    let id = submit_text_job(&mut state, "laser", "alice");
    plan(&mut state, 2_000);

    let outcome = finish_file(&mut state, id, 3_000);
    assert!(matches!(outcome, FileOutcome::Completed));
    assert_eq!(state.jobs.get(id).unwrap().state, JobState::Completed);
    let printer = state.registry.lookup("laser").unwrap();
    assert_eq!(printer.state, PrinterState::Idle);
    assert_eq!(printer.current_job, None);
}

#[test]
fn finish_file_advances_to_next_file() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    let id = submit_text_job(&mut state, "laser", "alice");
    state
        .jobs
        .attach_document(id, b"second", MimeType::concrete("text", "plain"))
        .unwrap();
    plan(&mut state, 2_000);

    let outcome = finish_file(&mut state, id, 3_000);
    let FileOutcome::NextFile(dispatch) = outcome else {
        panic!("expected next file, got {outcome:?}");
    };
    assert_eq!(dispatch.job, id);
    assert_eq!(state.jobs.get(id).unwrap().current_file, 1);
    assert_eq!(state.jobs.get(id).unwrap().state, JobState::Processing);
    // Printer still busy with the same job.
    assert_eq!(state.registry.lookup("laser").unwrap().state, PrinterState::Processing);
}

#[test]
fn filter_failure_retries_by_default() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    let id = submit_text_job(&mut state, "laser", "alice");
    plan(&mut state, 2_000);

    state.jobs.get_mut(id).unwrap().accumulator.record_filter(1);
    let outcome = finish_file(&mut state, id, 3_000);
    assert!(matches!(outcome, FileOutcome::FilterFailed(ErrorPolicy::RetryJob)));
    let job = state.jobs.get(id).unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert!(job.accumulator.is_clean(), "accumulator resets for the retry");
    assert_eq!(state.registry.lookup("laser").unwrap().state, PrinterState::Idle);
}

#[test]
fn filter_failure_abort_policy_aborts() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    state.registry.lookup_printer_mut("laser").unwrap().error_policy = ErrorPolicy::AbortJob;
    let id = submit_text_job(&mut state, "laser", "alice");
    plan(&mut state, 2_000);

    state.jobs.get_mut(id).unwrap().accumulator.record_filter(2);
    finish_file(&mut state, id, 3_000);
    assert_eq!(state.jobs.get(id).unwrap().state, JobState::Aborted);
}

#[test]
fn backend_fault_stops_printer_and_requeues() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "bad");
    let id = submit_text_job(&mut state, "bad", "alice");
    plan(&mut state, 2_000);

    state.jobs.get_mut(id).unwrap().accumulator.record_backend(1);
    let outcome = finish_file(&mut state, id, 3_000);
    assert!(matches!(outcome, FileOutcome::PrinterFault));

    let job = state.jobs.get(id).unwrap();
    assert_eq!(job.state, JobState::Pending, "job re-queued");
    let printer = state.registry.lookup("bad").unwrap();
    assert_eq!(printer.state, PrinterState::Stopped);
    assert!(!printer.reasons.is_empty());

    // Stopped printer: further submissions queue but do not dispatch.
    submit_text_job(&mut state, "bad", "alice");
    assert!(plan(&mut state, 4_000).is_empty());
}

#[test]
fn release_holds_returns_elapsed_jobs_to_pending() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "laser");
    let id = submit_text_job(&mut state, "laser", "alice");
    let retention = state.config.retention;
    state
        .jobs
        .set_state(id, JobState::Held, Some("job-hold-until-specified"), 1_000, &retention)
        .unwrap();
    state.jobs.get_mut(id).unwrap().hold_until_ms = Some(5_000);

    assert!(release_holds(&mut state, 4_000).is_empty());
    assert_eq!(release_holds(&mut state, 6_000), vec![id]);
    assert_eq!(state.jobs.get(id).unwrap().state, JobState::Pending);
}

#[test]
fn reassign_orphans_moves_or_cancels() {
    let (_tmp, mut state) = test_state();
    add_printer(&mut state, "p1");
    let id = submit_text_job(&mut state, "grp", "alice");
    reassign_orphans(&mut state, "grp", &["p1".to_string()], 2_000);
    assert_eq!(state.jobs.get(id).unwrap().target, "p1");

    let id2 = submit_text_job(&mut state, "gone", "alice");
    reassign_orphans(&mut state, "gone", &[], 2_000);
    let job = state.jobs.get(id2).unwrap();
    assert_eq!(job.state, JobState::Canceled);
    assert_eq!(job.history.last().unwrap().reason.as_deref(), Some("destination-removed"));
}
