// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine loop: the single logical thread that serializes every state
//! transition.
//!
//! One `select!` per iteration over the event channel, the browse
//! socket, signal streams, and a 1-second tick. Sessions and pipeline
//! watchers run as cooperative tasks that only ever talk to the loop
//! through the event channel; nothing here blocks while the state lock
//! is held.

use crate::browse;
use crate::classes;
use crate::config::Config;
use crate::pipeline;
use crate::sched::{self, Dispatch, FileOutcome};
use crate::state::{ActivePipeline, SharedState};
use spool_core::{Clock, Event, JobId, StatusDirective};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the engine event channel.
const EVENT_QUEUE: usize = 256;

pub struct Engine<C: Clock> {
    state: SharedState,
    clock: C,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    browse_socket: Option<UdpSocket>,
    /// Cancelled on shutdown so listeners stop accepting.
    pub shutdown: CancellationToken,
    /// Tells the listener to drain sessions and re-bind after a
    /// successful configuration reload.
    reload_tx: Option<mpsc::Sender<()>>,
}

impl<C: Clock> Engine<C> {
    pub fn new(state: SharedState, clock: C) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self {
            state,
            clock,
            events_tx,
            events_rx,
            browse_socket: None,
            shutdown: CancellationToken::new(),
            reload_tx: None,
        }
    }

    /// Channel the listener watches for reload drain-and-rebind cycles.
    pub fn reload_signal(&mut self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        self.reload_tx = Some(tx);
        rx
    }

    /// Handle for sessions and supervisors to feed the loop.
    pub fn events(&self) -> mpsc::Sender<Event> {
        self.events_tx.clone()
    }

    /// Wait for the next event and handle it. Returns false once every
    /// sender is gone. For embedders driving the loop manually; the
    /// daemon uses [`Engine::run`].
    pub async fn pump_one(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Bind the browse socket per configuration. Browse errors are not
    /// fatal; the daemon runs without discovery.
    pub async fn bind_browse(&mut self) {
        let (enabled, port) = {
            let state = self.state.lock();
            (state.config.browse.enabled, state.config.browse.port)
        };
        if !enabled {
            return;
        }
        match UdpSocket::bind(("0.0.0.0", port)).await {
            Ok(socket) => {
                if let Err(e) = socket.set_broadcast(true) {
                    warn!(error = %e, "failed to enable broadcast");
                }
                info!(port, "browse socket bound");
                self.browse_socket = Some(socket);
            }
            Err(e) => {
                warn!(port, error = %e, "failed to bind browse socket, browsing off");
            }
        }
    }

    /// Run until shutdown completes. Readiness-wait errors from signal
    /// interruption are absorbed by the runtime; anything else logs.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(s) => Some(s),
            Err(e) => {
                error!(error = %e, "failed to install SIGHUP handler");
                None
            }
        };
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    None
                }
            };
        let mut buf = [0u8; 1540];

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                }
                _ = tick.tick() => {
                    self.on_tick().await;
                }
                result = recv_datagram(self.browse_socket.as_ref(), &mut buf) => {
                    if let Some((len, source)) = result {
                        self.on_browse_packet(&buf[..len], source).await;
                    }
                }
                _ = recv_signal(&mut sighup) => {
                    self.handle_event(Event::Reload).await;
                }
                _ = recv_signal(&mut sigterm) => {
                    self.handle_event(Event::Shutdown).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    self.handle_event(Event::Shutdown).await;
                }
            }

            let done = {
                let state = self.state.lock();
                state.shutting_down && state.active.is_empty()
            };
            if done {
                info!("all pipelines drained, engine stopping");
                break;
            }
        }
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::JobQueued { .. } | Event::PrinterChanged { .. } => {
                self.schedule_pass().await;
            }
            Event::PipelineExit { job, pid, backend, code } => {
                self.on_child_exit(job, pid, backend, code).await;
            }
            Event::PipelineStatus { job, directive } => {
                self.on_status(job, directive);
            }
            Event::Reload => {
                if self.reload() {
                    // First pass after reload, once the new limits and
                    // graph are in.
                    self.schedule_pass().await;
                }
            }
            Event::Shutdown => {
                info!("shutdown requested, draining pipelines");
                self.state.lock().shutting_down = true;
                self.shutdown.cancel();
            }
        }
    }

    /// One scheduler pass plus the launches it decided on.
    pub async fn schedule_pass(&mut self) {
        let now = self.clock.epoch_ms();
        let dispatches = {
            let mut state = self.state.lock();
            sched::plan(&mut state, now)
        };
        for dispatch in dispatches {
            self.launch_dispatch(dispatch).await;
        }
    }

    async fn launch_dispatch(&mut self, dispatch: Dispatch) {
        let job = dispatch.job;
        let (request, fifo) = {
            let mut state = self.state.lock();
            // Multi-file jobs keep one back-channel for their lifetime.
            let fifo = match state.active.get(&job).and_then(|a| a.back_fifo.clone()) {
                Some(fifo) => Some(fifo),
                None => match pipeline::create_back_fifo(&state.config.spool_dir, job) {
                    Ok(fifo) => Some(fifo),
                    Err(e) => {
                        warn!(job = %job, error = %e, "no back-channel for this job");
                        None
                    }
                },
            };
            (pipeline::build_request(&dispatch, &state.config, fifo.as_deref()), fifo)
        };

        match pipeline::launch(request, self.events_tx.clone()).await {
            Ok(launched) => {
                let mut state = self.state.lock();
                state.active.insert(
                    job,
                    ActivePipeline {
                        printer: dispatch.printer.clone(),
                        pids: launched.pids,
                        backend_pid: launched.backend_pid,
                        live: launched.child_count,
                        back_fifo: fifo,
                    },
                );
                debug!(job = %job, printer = %dispatch.printer, "pipeline launched");
            }
            Err(e) => {
                warn!(job = %job, error = %e, "pipeline launch failed");
                let now = self.clock.epoch_ms();
                let mut state = self.state.lock();
                if let Some(j) = state.jobs.get_mut(job) {
                    j.accumulator.record_filter(1);
                }
                if let Some(fifo) = fifo {
                    let _ = std::fs::remove_file(fifo);
                }
                state.active.remove(&job);
                let _ = sched::finish_file(&mut state, job, now);
            }
        }
    }

    async fn on_child_exit(&mut self, job: JobId, pid: u32, backend: bool, code: i32) {
        let now = self.clock.epoch_ms();
        let finished = {
            let mut state = self.state.lock();
            if let Some(j) = state.jobs.get_mut(job) {
                if backend {
                    j.accumulator.record_backend(code);
                } else {
                    j.accumulator.record_filter(code);
                }
            }
            let Some(active) = state.active.get_mut(&job) else {
                // Canceled and reaped already.
                return;
            };
            debug!(job = %job, pid, backend, code, "child exited");
            active.live = active.live.saturating_sub(1);
            if active.live > 0 {
                return;
            }
            let fifo = state.active.remove(&job).and_then(|a| a.back_fifo);
            let outcome = sched::finish_file(&mut state, job, now);
            match &outcome {
                FileOutcome::NextFile(_) => {
                    // Job continues; the back-channel stays.
                    if let Some(fifo) = fifo {
                        state.active.entry(job).or_default().back_fifo = Some(fifo);
                    }
                }
                _ => {
                    if let Some(fifo) = fifo {
                        let _ = std::fs::remove_file(fifo);
                    }
                }
            }
            outcome
        };

        match finished {
            FileOutcome::NextFile(dispatch) => {
                self.launch_dispatch(dispatch).await;
            }
            FileOutcome::Completed
            | FileOutcome::FilterFailed(_)
            | FileOutcome::PrinterFault
            | FileOutcome::Canceled => {
                // A printer or queue slot freed up.
                self.schedule_pass().await;
            }
        }
    }

    fn on_status(&mut self, job: JobId, directive: StatusDirective) {
        let now = self.clock.epoch_ms();
        let mut state = self.state.lock();
        match directive {
            StatusDirective::Page { count } => {
                let owner_printer = state.jobs.get_mut(job).map(|j| {
                    j.sheets += count;
                    (j.owner.clone(), j.assigned.clone())
                });
                if let Some((owner, Some(printer))) = owner_printer {
                    if let Some(dest) = state.registry.lookup_mut(&printer) {
                        dest.usage.add(
                            &owner,
                            spool_core::QuotaUsage { at_ms: now, pages: count, kbytes: 0 },
                        );
                    }
                }
            }
            StatusDirective::State { delta } => {
                if let Some(printer) = state.jobs.get(job).and_then(|j| j.assigned.clone()) {
                    if let Err(e) = state.registry.set_reasons(&printer, &delta) {
                        warn!(job = %job, error = %e, "STATE directive for unknown printer");
                    }
                }
            }
            StatusDirective::Error { message } => {
                warn!(job = %job, "{message}");
                if let Some(printer) = state.jobs.get(job).and_then(|j| j.assigned.clone()) {
                    if let Some(dest) = state.registry.lookup_mut(&printer) {
                        dest.state_message = message;
                    }
                }
            }
            StatusDirective::Warning { message } => warn!(job = %job, "{message}"),
            StatusDirective::Info { message } => info!(job = %job, "{message}"),
            StatusDirective::Debug { message } => debug!(job = %job, "{message}"),
        }
    }

    /// SIGHUP: re-read configuration; a broken file keeps the old one.
    ///
    /// On success the listener is told to close non-idle sessions, drop
    /// its sockets until sessions drain, and re-open against the new
    /// endpoints. Returns whether the new configuration took.
    fn reload(&mut self) -> bool {
        let path = crate::env::config_path()
            .unwrap_or_else(|| std::path::PathBuf::from("/etc/spool/spoold.toml"));
        match Config::load(&path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration reloaded");
                {
                    let mut state = self.state.lock();
                    state.config = config;
                    state.rebuild_graph();
                }
                if let Some(tx) = &self.reload_tx {
                    let _ = tx.try_send(());
                }
                true
            }
            Err(e) => {
                error!(error = %e, "reload failed, keeping previous configuration");
                false
            }
        }
    }

    async fn on_tick(&mut self) {
        let now = self.clock.epoch_ms();
        let released = {
            let mut state = self.state.lock();
            let released = sched::release_holds(&mut state, now);
            let retention = state.config.retention;
            state.jobs.expire(now, &retention);
            state.persist_catalog_if_dirty();
            released
        };
        if !released.is_empty() {
            self.schedule_pass().await;
        }
        self.browse_tick(now).await;
    }

    /// Outbound advertisements, inbound aging.
    async fn browse_tick(&mut self, now: u64) {
        let Some(socket) = self.browse_socket.as_ref() else { return };
        let (packets, addresses, port) = {
            let mut state = self.state.lock();
            let packets = browse::outbound(&mut state, now);
            if browse::age_remote(&mut state, now) {
                classes::update_implicit_accepting(&mut state.registry);
            }
            (packets, state.config.browse.addresses.clone(), state.config.browse.port)
        };
        for packet in &packets {
            for address in &addresses {
                let target: String = if address.contains(':') {
                    address.clone()
                } else {
                    format!("{address}:{port}")
                };
                if let Err(e) = socket.send_to(packet.as_bytes(), &target).await {
                    warn!(%target, error = %e, "browse send failed");
                }
            }
        }
    }

    async fn on_browse_packet(&mut self, packet: &[u8], source: std::net::SocketAddr) {
        let text = String::from_utf8_lossy(packet).to_string();
        let source_ip = source.ip().to_string();
        let relays = {
            let state = self.state.lock();
            if !browse::acl_allows(&state.config.browse, &source_ip) {
                return;
            }
            browse::relay_targets(&state.config.browse, &source_ip)
        };
        // Relay the raw packet before parsing, as received.
        if let Some(socket) = self.browse_socket.as_ref() {
            for target in relays {
                if let Err(e) = socket.send_to(packet, &target).await {
                    warn!(%target, error = %e, "browse relay failed");
                }
            }
        }
        let now = self.clock.epoch_ms();
        let mut state = self.state.lock();
        browse::ingest(&mut state, &source_ip, &text, now);
    }
}

async fn recv_datagram(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> Option<(usize, std::net::SocketAddr)> {
    match socket {
        Some(socket) => match socket.recv_from(buf).await {
            Ok((len, source)) => Some((len, source)),
            Err(e) => {
                warn!(error = %e, "browse recv failed");
                None
            }
        },
        None => std::future::pending().await,
    }
}

async fn recv_signal(stream: &mut Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending().await,
    }
}
