// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::filters::Stage;
use spool_core::{JobFile, MimeType};

fn dispatch(job: u32, input: &Path, device_uri: Option<&str>, stages: Vec<Stage>) -> Dispatch {
    Dispatch {
        job: JobId(job),
        printer: "laser".to_string(),
        file: JobFile {
            path: input.to_path_buf(),
            mime: MimeType::concrete("text", "plain"),
            kbytes: 1,
        },
        stages,
        device_uri: device_uri.map(str::to_string),
        owner: "alice".to_string(),
        title: "hello".to_string(),
        copies: 1,
    }
}

#[test]
fn build_request_materializes_env_and_args() {
    let config = Config {
        filter_dir: "/opt/filters".into(),
        backend_dir: "/opt/backends".into(),
        filter_nice: 5,
        classification: Some("confidential".to_string()),
        ..Config::default()
    };
    let d = dispatch(7, Path::new("/spool/d00007-001"), Some("socket://host:9100"), vec![
        Stage { program: "texttops".to_string(), cost: 10, nice: 10, file_args: false },
    ]);
    let request = build_request(&d, &config, Some(Path::new("/spool/tmp/backchannel-7")));

    assert_eq!(request.stages.len(), 1);
    assert_eq!(request.stages[0].program, PathBuf::from("/opt/filters/texttops"));
    assert_eq!(request.stages[0].nice, 15, "edge nice plus configured base");
    assert_eq!(request.stages[0].args, vec!["7", "alice", "hello", "1"]);

    let Sink::Backend(backend) = &request.sink else {
        panic!("expected backend sink, got {:?}", request.sink);
    };
    assert_eq!(backend.program, PathBuf::from("/opt/backends/socket"));
    assert_eq!(backend.args[0], "socket://host:9100");

    let env: std::collections::HashMap<_, _> = request.env.iter().cloned().collect();
    assert_eq!(env.get("SPOOL_JOB_ID").map(String::as_str), Some("7"));
    assert_eq!(env.get("SPOOL_PRINTER").map(String::as_str), Some("laser"));
    assert_eq!(env.get("SPOOL_CONTENT_TYPE").map(String::as_str), Some("text/plain"));
    assert_eq!(env.get("SPOOL_CLASSIFICATION").map(String::as_str), Some("confidential"));
    assert_eq!(
        env.get("SPOOL_BACKCHANNEL").map(String::as_str),
        Some("/spool/tmp/backchannel-7")
    );
    assert!(env.contains_key("PATH"));
}

#[test]
fn file_device_uses_the_file_sink() {
    let config = Config::default();
    let d = dispatch(1, Path::new("/in"), Some("file:/tmp/out"), vec![]);
    let request = build_request(&d, &config, None);
    assert!(matches!(request.sink, Sink::File(ref p) if p == Path::new("/tmp/out")));
}

#[test]
fn missing_device_discards_output() {
    let config = Config::default();
    let d = dispatch(1, Path::new("/in"), None, vec![]);
    let request = build_request(&d, &config, None);
    assert!(matches!(request.sink, Sink::Discard));
}

async fn drain_until_exits(
    rx: &mut mpsc::Receiver<Event>,
    expected: usize,
) -> (Vec<(u32, bool, i32)>, Vec<StatusDirective>) {
    let mut exits = Vec::new();
    let mut statuses = Vec::new();
    while exits.len() < expected {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(Event::PipelineExit { pid, backend, code, .. })) => {
                exits.push((pid, backend, code))
            }
            Ok(Some(Event::PipelineStatus { directive, .. })) => statuses.push(directive),
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
    (exits, statuses)
}

#[tokio::test]
async fn raw_copy_to_file_sink_emits_one_virtual_exit() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::write(&input, b"Hello").unwrap();
    let out = dir.path().join("out");

    let request = PipelineRequest {
        job: JobId(1),
        printer: "laser".to_string(),
        input: input.clone(),
        stages: vec![],
        sink: Sink::File(out.clone()),
        env: vec![],
    };
    let (tx, mut rx) = mpsc::channel(16);
    let launched = launch(request, tx).await.unwrap();
    assert_eq!(launched.child_count, 1);
    assert!(launched.pids.is_empty());

    let (exits, _) = drain_until_exits(&mut rx, 1).await;
    assert_eq!(exits, vec![(0, true, 0)]);
    assert_eq!(std::fs::read(&out).unwrap(), b"Hello");
}

#[tokio::test]
async fn filter_chain_streams_into_file_sink() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::write(&input, b"hello pipeline").unwrap();
    let out = dir.path().join("out");

    // Two /bin/cat stages exercise the stdout → stdin wiring.
    let request = PipelineRequest {
        job: JobId(2),
        printer: "laser".to_string(),
        input: input.clone(),
        stages: vec![
            SpawnSpec { program: "/bin/cat".into(), args: vec![], nice: 0, file_args: false },
            SpawnSpec { program: "/bin/cat".into(), args: vec![], nice: 0, file_args: false },
        ],
        sink: Sink::File(out.clone()),
        env: vec![],
    };
    let (tx, mut rx) = mpsc::channel(16);
    let launched = launch(request, tx).await.unwrap();
    assert_eq!(launched.child_count, 3, "two filters plus the file writer");
    assert_eq!(launched.pids.len(), 2);
    assert_eq!(launched.backend_pid, None);

    let (exits, _) = drain_until_exits(&mut rx, 3).await;
    assert!(exits.iter().all(|(_, _, code)| *code == 0));
    assert_eq!(std::fs::read(&out).unwrap(), b"hello pipeline");
}

#[tokio::test]
async fn failing_stage_reports_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::write(&input, b"x").unwrap();

    let request = PipelineRequest {
        job: JobId(3),
        printer: "laser".to_string(),
        input,
        stages: vec![SpawnSpec {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "echo 'ERROR: boom' >&2; exit 3".into()],
            nice: 0,
            file_args: false,
        }],
        sink: Sink::Discard,
        env: vec![],
    };
    let (tx, mut rx) = mpsc::channel(16);
    let launched = launch(request, tx).await.unwrap();
    assert_eq!(launched.child_count, 1);

    let (exits, statuses) = drain_until_exits(&mut rx, 1).await;
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].2, 3);
    assert!(!exits[0].1, "a filter exit is not a backend exit");
    assert!(statuses
        .iter()
        .any(|s| matches!(s, StatusDirective::Error { message } if message == "boom")));
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::write(&input, b"x").unwrap();

    let request = PipelineRequest {
        job: JobId(4),
        printer: "laser".to_string(),
        input,
        stages: vec![SpawnSpec {
            program: "/nonexistent/filter".into(),
            args: vec![],
            nice: 0,
            file_args: false,
        }],
        sink: Sink::Discard,
        env: vec![],
    };
    let (tx, _rx) = mpsc::channel(16);
    let err = launch(request, tx).await.unwrap_err();
    assert!(matches!(err, PipelineError::Spawn { .. }));
}

#[tokio::test]
async fn terminate_kills_a_stubborn_child() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::write(&input, b"x").unwrap();

    let request = PipelineRequest {
        job: JobId(5),
        printer: "laser".to_string(),
        input,
        stages: vec![SpawnSpec {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "sleep 60".into()],
            nice: 0,
            file_args: false,
        }],
        sink: Sink::Discard,
        env: vec![],
    };
    let (tx, mut rx) = mpsc::channel(16);
    let launched = launch(request, tx).await.unwrap();

    terminate(launched.pids.clone(), Duration::from_millis(50)).await;
    let (exits, _) = drain_until_exits(&mut rx, 1).await;
    assert_eq!(exits.len(), 1);
    assert_ne!(exits[0].2, 0, "signal death reads as failure");
}

#[test]
fn back_fifo_is_created_0600_and_recreatable() {
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir().unwrap();
    let path = create_back_fifo(dir.path(), JobId(9)).unwrap();
    let meta = std::fs::metadata(&path).unwrap();
    assert!(meta.file_type().is_fifo());
    assert_eq!(meta.permissions().mode() & 0o777, 0o600);

    // Creating again over a stale FIFO succeeds.
    let again = create_back_fifo(dir.path(), JobId(9)).unwrap();
    assert_eq!(path, again);
}
