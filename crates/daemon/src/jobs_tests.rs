// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use spool_core::Attribute;

fn store() -> (tempfile::TempDir, JobStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = JobStore::new(dir.path().join("jobs")).unwrap();
    (dir, store)
}

fn submit(store: &mut JobStore, target: &str, owner: &str, priority: u8) -> JobId {
    store.submit(target, owner, priority, "t", AttrBag::new(), 1_000, 0).unwrap()
}

const KEEP_NOTHING: Retention = Retention { job_history: true, job_files: false, history_secs: 60 };
const KEEP_FILES: Retention = Retention { job_history: true, job_files: true, history_secs: 60 };

#[test]
fn ids_are_monotonic_and_unique() {
    let (_tmp, mut store) = store();
    let a = submit(&mut store, "laser", "alice", 50);
    let b = submit(&mut store, "laser", "alice", 50);
    let c = submit(&mut store, "other", "bob", 90);
    assert!(a < b && b < c);
}

#[test]
fn submit_persists_a_record() {
    let (_tmp, mut store) = store();
    let id = submit(&mut store, "laser", "alice", 50);
    assert!(store.record_path(id).exists());
}

#[test]
fn attach_document_writes_file_with_0600() {
    let (_tmp, mut store) = store();
    let id = submit(&mut store, "laser", "alice", 50);
    store
        .attach_document(id, b"Hello", MimeType::concrete("text", "plain"))
        .unwrap();

    let job = store.get(id).unwrap();
    assert_eq!(job.files.len(), 1);
    assert_eq!(job.files[0].kbytes, 1);
    let mode = fs::metadata(&job.files[0].path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
    assert_eq!(fs::read(&job.files[0].path).unwrap(), b"Hello");
}

#[test]
fn attach_after_pending_is_refused() {
    let (_tmp, mut store) = store();
    let id = submit(&mut store, "laser", "alice", 50);
    store.set_state(id, JobState::Processing, None, 2_000, &KEEP_FILES).unwrap();
    let err = store
        .attach_document(id, b"late", MimeType::concrete("text", "plain"))
        .unwrap_err();
    assert!(matches!(err, JobError::Transition(TransitionError::FilesFrozen(_))));
}

#[test]
fn pending_order_is_priority_desc_then_id_asc() {
    let (_tmp, mut store) = store();
    let low = submit(&mut store, "laser", "alice", 10);
    let high_a = submit(&mut store, "laser", "alice", 90);
    let high_b = submit(&mut store, "laser", "alice", 90);
    assert_eq!(store.pending_in_order(), vec![high_a, high_b, low]);
}

#[test]
fn terminal_transition_deletes_files_unless_kept() {
    let (_tmp, mut store) = store();
    let id = submit(&mut store, "laser", "alice", 50);
    store.attach_document(id, b"x", MimeType::concrete("text", "plain")).unwrap();
    let doc = store.get(id).unwrap().files[0].path.clone();

    store.set_state(id, JobState::Processing, None, 2_000, &KEEP_NOTHING).unwrap();
    store.set_state(id, JobState::Completed, None, 3_000, &KEEP_NOTHING).unwrap();
    assert!(!doc.exists(), "completed job files deleted when keep_files=false");
    assert!(store.record_path(id).exists(), "record survives for history");
}

#[test]
fn cancel_with_purge_removes_everything() {
    let (_tmp, mut store) = store();
    let id = submit(&mut store, "laser", "alice", 50);
    store.attach_document(id, b"x", MimeType::concrete("text", "plain")).unwrap();
    let doc = store.get(id).unwrap().files[0].path.clone();

    store.cancel(id, true, 2_000, &KEEP_FILES).unwrap();
    assert!(store.get(id).is_none());
    assert!(!doc.exists());
    assert!(!store.record_path(id).exists());
}

#[test]
fn cancel_terminal_job_is_a_no_op_transition() {
    let (_tmp, mut store) = store();
    let id = submit(&mut store, "laser", "alice", 50);
    store.cancel(id, false, 2_000, &KEEP_FILES).unwrap();
    // Canceling again must not error.
    store.cancel(id, false, 3_000, &KEEP_FILES).unwrap();
    assert_eq!(store.get(id).unwrap().state, JobState::Canceled);
}

#[test]
fn queue_full_of_live_jobs_refuses() {
    let (_tmp, mut store) = store();
    for _ in 0..3 {
        store.submit("laser", "alice", 50, "t", AttrBag::new(), 1_000, 3).unwrap();
    }
    let err = store.submit("laser", "alice", 50, "t", AttrBag::new(), 1_000, 3).unwrap_err();
    assert!(matches!(err, JobError::QueueFull));
}

#[test]
fn queue_full_evicts_oldest_terminal() {
    let (_tmp, mut store) = store();
    let first = store.submit("laser", "alice", 50, "t", AttrBag::new(), 1_000, 2).unwrap();
    store.submit("laser", "alice", 50, "t", AttrBag::new(), 1_000, 2).unwrap();
    store.cancel(first, false, 2_000, &KEEP_FILES).unwrap();

    let third = store.submit("laser", "alice", 50, "t", AttrBag::new(), 3_000, 2).unwrap();
    assert!(store.get(first).is_none(), "terminal job evicted");
    assert!(store.get(third).is_some());
}

#[test]
fn load_all_rehydrates_non_terminal_to_pending() {
    let dir = tempfile::tempdir().unwrap();
    let jobs_dir = dir.path().join("jobs");
    let (processing, done) = {
        let mut store = JobStore::new(jobs_dir.clone()).unwrap();
        let a = store.submit("laser", "alice", 50, "t", AttrBag::new(), 1_000, 0).unwrap();
        let b = store.submit("laser", "bob", 50, "t", AttrBag::new(), 1_000, 0).unwrap();
        store.set_state(a, JobState::Processing, None, 2_000, &KEEP_FILES).unwrap();
        {
            let job = store.get_mut(a).unwrap();
            job.assigned = Some("laser".to_string());
            let snapshot = job.clone();
            store.persist(&snapshot).unwrap();
        }
        store.set_state(b, JobState::Processing, None, 2_000, &KEEP_FILES).unwrap();
        store.set_state(b, JobState::Completed, None, 3_000, &KEEP_FILES).unwrap();
        (a, b)
    };

    let store = JobStore::load_all(jobs_dir, 10_000).unwrap();
    let revived = store.get(processing).unwrap();
    assert_eq!(revived.state, JobState::Pending);
    assert_eq!(revived.assigned, None);
    let finished = store.get(done).unwrap();
    assert_eq!(finished.state, JobState::Completed);
}

#[test]
fn load_all_resumes_id_sequence_from_max() {
    let dir = tempfile::tempdir().unwrap();
    let jobs_dir = dir.path().join("jobs");
    {
        let mut store = JobStore::new(jobs_dir.clone()).unwrap();
        for _ in 0..3 {
            store.submit("laser", "alice", 50, "t", AttrBag::new(), 1_000, 0).unwrap();
        }
    }
    let mut store = JobStore::load_all(jobs_dir, 2_000).unwrap();
    let next = store.submit("laser", "alice", 50, "t", AttrBag::new(), 2_000, 0).unwrap();
    assert_eq!(next, JobId(4));
}

#[test]
fn expire_prunes_old_terminal_jobs() {
    let (_tmp, mut store) = store();
    let id = submit(&mut store, "laser", "alice", 50);
    store.cancel(id, false, 1_000, &KEEP_FILES).unwrap();

    // Inside the window: kept.
    store.expire(30_000, &KEEP_NOTHING);
    assert!(store.get(id).is_some());

    // Past the 60 s window: pruned.
    store.expire(1_000 + 61_000, &KEEP_NOTHING);
    assert!(store.get(id).is_none());
}

#[test]
fn releasable_finds_elapsed_holds() {
    let (_tmp, mut store) = store();
    let id = submit(&mut store, "laser", "alice", 50);
    store.set_state(id, JobState::Held, Some("job-hold-until-specified"), 1_000, &KEEP_FILES).unwrap();
    store.get_mut(id).unwrap().hold_until_ms = Some(5_000);

    assert!(store.releasable(4_000).is_empty());
    assert_eq!(store.releasable(5_000), vec![id]);

    // A hold with no deadline never auto-releases.
    let id2 = submit(&mut store, "laser", "alice", 50);
    store.set_state(id2, JobState::Held, None, 1_000, &KEEP_FILES).unwrap();
    assert_eq!(store.releasable(100_000), vec![id]);
}

#[test]
fn counters_track_processing_jobs() {
    let (_tmp, mut store) = store();
    let a = submit(&mut store, "laser", "alice", 50);
    let b = submit(&mut store, "laser", "bob", 50);
    submit(&mut store, "laser", "alice", 50);

    store.set_state(a, JobState::Processing, None, 2_000, &KEEP_FILES).unwrap();
    store.get_mut(a).unwrap().assigned = Some("laser".to_string());
    store.set_state(b, JobState::Processing, None, 2_000, &KEEP_FILES).unwrap();
    store.get_mut(b).unwrap().assigned = Some("inkjet".to_string());

    assert_eq!(store.active_count(), 2);
    assert_eq!(store.active_for_user("alice"), 1);
    assert_eq!(store.active_for_printer("laser"), 1);
    assert_eq!(store.active_for_printer("inkjet"), 1);
}

#[test]
fn attrs_roundtrip_through_the_record() {
    let (_tmp, mut store) = store();
    let mut attrs = AttrBag::new();
    attrs.insert("copies".to_string(), Attribute::Integer(3));
    let id = store.submit("laser", "alice", 50, "report", attrs, 1_000, 0).unwrap();

    let bytes = fs::read(store.record_path(id)).unwrap();
    let job: spool_core::Job = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(job.title, "report");
    assert_eq!(job.attrs.get("copies").and_then(Attribute::as_integer), Some(3));
}
