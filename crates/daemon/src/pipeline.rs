// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline supervisor: spawn the filter chain and backend for one
//! (job, file) pair, wire the pipes, and feed exits and status lines
//! back to the engine loop.
//!
//! Layout: file → filter₁ → … → filterₙ → backend (or directly into a
//! `file:` target). Every child's stderr merges into the job's status
//! stream. The back-channel is a job-scoped FIFO advertised through
//! `SPOOL_BACKCHANNEL`.

use crate::config::Config;
use crate::sched::Dispatch;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use spool_core::{Event, JobId, StatusDirective};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Grace between SIGTERM and SIGKILL when canceling.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to open input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pipeline i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One process to start.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub nice: i32,
    /// Takes the input path as an argument instead of stdin.
    pub file_args: bool,
}

/// Where the last stage's output goes.
#[derive(Debug, Clone)]
pub enum Sink {
    /// `file:` device; the supervisor writes the target itself.
    File(PathBuf),
    /// Device backend process, selected by URI scheme.
    Backend(SpawnSpec),
    /// No device address (e.g. a validation run).
    Discard,
}

/// A fully materialized pipeline, ready to launch.
#[derive(Debug)]
pub struct PipelineRequest {
    pub job: JobId,
    pub printer: String,
    pub input: PathBuf,
    pub stages: Vec<SpawnSpec>,
    pub sink: Sink,
    pub env: Vec<(String, String)>,
}

/// What launch() started, for the dispatcher's bookkeeping.
#[derive(Debug)]
pub struct LaunchedPipeline {
    pub pids: Vec<u32>,
    pub backend_pid: Option<u32>,
    /// Exit events the dispatcher must collect before the file is done
    /// (includes the virtual writer for `file:` sinks).
    pub child_count: usize,
}

/// Materialize command templates for a dispatch.
pub fn build_request(
    dispatch: &Dispatch,
    config: &Config,
    back_fifo: Option<&Path>,
) -> PipelineRequest {
    let job = dispatch.job;
    let common_args = vec![
        job.to_string(),
        dispatch.owner.clone(),
        dispatch.title.clone(),
        dispatch.copies.to_string(),
    ];

    let mut env = vec![
        ("PATH".to_string(), "/usr/bin:/bin".to_string()),
        ("SPOOL_JOB_ID".to_string(), job.to_string()),
        ("SPOOL_USER".to_string(), dispatch.owner.clone()),
        ("SPOOL_TITLE".to_string(), dispatch.title.clone()),
        ("SPOOL_PRINTER".to_string(), dispatch.printer.clone()),
        ("SPOOL_CONTENT_TYPE".to_string(), dispatch.file.mime.to_string()),
        ("CHARSET".to_string(), "utf-8".to_string()),
    ];
    if let Some(banner) = &config.classification {
        env.push(("SPOOL_CLASSIFICATION".to_string(), banner.clone()));
    }
    if let Some(fifo) = back_fifo {
        env.push(("SPOOL_BACKCHANNEL".to_string(), fifo.display().to_string()));
    }

    let stages = dispatch
        .stages
        .iter()
        .map(|stage| SpawnSpec {
            program: config.filter_dir.join(&stage.program),
            args: common_args.clone(),
            nice: stage.nice + config.filter_nice,
            file_args: stage.file_args,
        })
        .collect();

    let sink = match &dispatch.device_uri {
        None => Sink::Discard,
        Some(uri) => match uri.split_once(':') {
            Some(("file", path)) => Sink::File(PathBuf::from(path)),
            Some((scheme, _)) => {
                let mut args = vec![uri.clone()];
                args.extend(common_args.clone());
                Sink::Backend(SpawnSpec {
                    program: config.backend_dir.join(scheme),
                    args,
                    nice: config.filter_nice,
                    file_args: false,
                })
            }
            None => Sink::Discard,
        },
    };

    PipelineRequest {
        job,
        printer: dispatch.printer.clone(),
        input: dispatch.file.path.clone(),
        stages,
        sink,
        env,
    }
}

/// Create the job's back-channel FIFO, 0600, under the spool temp dir.
pub fn create_back_fifo(spool_dir: &Path, job: JobId) -> std::io::Result<PathBuf> {
    let dir = spool_dir.join("tmp");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("backchannel-{job}"));
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    nix::unistd::mkfifo(&path, nix::sys::stat::Mode::S_IRUSR | nix::sys::stat::Mode::S_IWUSR)
        .map_err(std::io::Error::from)?;
    Ok(path)
}

/// Launch every process of the pipeline, then hand the status stream
/// and exit observations to the engine via `events`.
pub async fn launch(
    request: PipelineRequest,
    events: mpsc::Sender<Event>,
) -> Result<LaunchedPipeline, PipelineError> {
    let job = request.job;
    let mut pids = Vec::new();
    let mut child_count = 0;
    let mut prev_stdout: Option<tokio::process::ChildStdout> = None;

    let open_input = || {
        std::fs::File::open(&request.input)
            .map_err(|source| PipelineError::Input { path: request.input.clone(), source })
    };

    for (i, stage) in request.stages.iter().enumerate() {
        let mut cmd = Command::new(&stage.program);
        cmd.args(&stage.args)
            .env_clear()
            .envs(request.env.iter().cloned())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if i == 0 {
            // Only the first stage can take the document as a file
            // argument; later stages always stream.
            if stage.file_args {
                cmd.arg(&request.input);
                cmd.stdin(Stdio::null());
            } else {
                cmd.stdin(Stdio::from(open_input()?));
            }
        } else {
            let stdout = prev_stdout.take().ok_or_else(|| PipelineError::Spawn {
                program: stage.program.display().to_string(),
                source: std::io::Error::other("previous stage has no stdout"),
            })?;
            let stdio: Stdio = stdout.try_into()?;
            cmd.stdin(stdio);
        }

        let mut child = cmd.spawn().map_err(|source| PipelineError::Spawn {
            program: stage.program.display().to_string(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);
        renice(pid, stage.nice);
        pids.push(pid);
        child_count += 1;
        prev_stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            watch_stderr(job, stderr, events.clone());
        }
        watch_exit(job, child, pid, false, events.clone());
        debug!(job = %job, program = %stage.program.display(), pid, "filter started");
    }

    let mut backend_pid = None;
    match request.sink {
        Sink::Backend(spec) => {
            let mut cmd = Command::new(&spec.program);
            cmd.args(&spec.args)
                .env_clear()
                .envs(request.env.iter().cloned())
                .stdout(Stdio::null())
                .stderr(Stdio::piped());
            match prev_stdout.take() {
                Some(stdout) => {
                    let stdio: Stdio = stdout.try_into()?;
                    cmd.stdin(stdio);
                }
                None => {
                    cmd.stdin(Stdio::from(open_input()?));
                }
            }
            let mut child = cmd.spawn().map_err(|source| PipelineError::Spawn {
                program: spec.program.display().to_string(),
                source,
            })?;
            let pid = child.id().unwrap_or(0);
            renice(pid, spec.nice);
            pids.push(pid);
            backend_pid = Some(pid);
            child_count += 1;
            if let Some(stderr) = child.stderr.take() {
                watch_stderr(job, stderr, events.clone());
            }
            watch_exit(job, child, pid, true, events.clone());
            debug!(job = %job, program = %spec.program.display(), pid, "backend started");
        }
        Sink::File(path) => {
            // The supervisor writes file: targets itself; the writer
            // counts as one virtual child so completion waits for it.
            child_count += 1;
            let input = request.input.clone();
            let events = events.clone();
            match prev_stdout.take() {
                Some(mut stdout) => {
                    tokio::spawn(async move {
                        let code = match write_stream_to(&mut stdout, &path).await {
                            Ok(_) => 0,
                            Err(e) => {
                                warn!(job = %job, error = %e, "file sink write failed");
                                1
                            }
                        };
                        let _ = events
                            .send(Event::PipelineExit { job, pid: 0, backend: true, code })
                            .await;
                    });
                }
                None => {
                    tokio::spawn(async move {
                        let code = match tokio::fs::copy(&input, &path).await {
                            Ok(_) => 0,
                            Err(e) => {
                                warn!(job = %job, error = %e, "file sink copy failed");
                                1
                            }
                        };
                        let _ = events
                            .send(Event::PipelineExit { job, pid: 0, backend: true, code })
                            .await;
                    });
                }
            }
        }
        Sink::Discard => {
            if let Some(mut stdout) = prev_stdout.take() {
                tokio::spawn(async move {
                    let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
                });
            }
        }
    }

    Ok(LaunchedPipeline { pids, backend_pid, child_count })
}

async fn write_stream_to(
    stream: &mut tokio::process::ChildStdout,
    path: &Path,
) -> std::io::Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let n = tokio::io::copy(stream, &mut file).await?;
    file.sync_all().await?;
    Ok(n)
}

/// Merge one child's stderr into the job status stream, line-oriented.
fn watch_stderr(
    job: JobId,
    stderr: tokio::process::ChildStderr,
    events: mpsc::Sender<Event>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let directive = StatusDirective::parse(&line);
            if events.send(Event::PipelineStatus { job, directive }).await.is_err() {
                break;
            }
        }
    });
}

/// Observe one child's exit and report it to the engine.
fn watch_exit(
    job: JobId,
    mut child: tokio::process::Child,
    pid: u32,
    backend: bool,
    events: mpsc::Sender<Event>,
) {
    tokio::spawn(async move {
        let code = match child.wait().await {
            // Signal deaths count as failures; canceled jobs ignore them.
            Ok(status) => status.code().unwrap_or(1),
            Err(e) => {
                warn!(job = %job, pid, error = %e, "wait failed");
                1
            }
        };
        let _ = events.send(Event::PipelineExit { job, pid, backend, code }).await;
    });
}

/// Ask every child to stop, escalating to SIGKILL after the grace.
pub async fn terminate(pids: Vec<u32>, grace: Duration) {
    for pid in &pids {
        if *pid == 0 {
            continue;
        }
        let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGTERM);
    }
    tokio::time::sleep(grace).await;
    for pid in &pids {
        if *pid == 0 {
            continue;
        }
        // Long gone children make this a harmless ESRCH.
        let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGKILL);
    }
}

/// Lower a child's scheduling priority per its edge metadata. The
/// supervisor renices from outside the child; failures only warn.
fn renice(pid: u32, nice: i32) {
    if nice == 0 || pid == 0 {
        return;
    }
    use nix::sys::resource::{setpriority, PriorityWhich};
    if let Err(e) = setpriority(PriorityWhich::Process(Pid::from_raw(pid as i32)), nice) {
        warn!(pid, nice, error = %e, "failed to renice child");
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
