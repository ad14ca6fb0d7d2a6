// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener: accepts client connections and runs one cooperative task
//! per session.
//!
//! Sessions speak strict request/response over the framed protocol.
//! A global session cap pauses accepting entirely (the listener drops
//! out of the readiness set); a per-host cap refuses just that host.

mod handlers;

pub use handlers::handle_request;

use crate::auth::{AccessOracle, SessionInfo};
use crate::state::SharedState;
use parking_lot::Mutex;
use spool_core::{Clock, Event, SystemClock};
use spool_wire::{ProtocolError, Response, StatusCode};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared context for all request handlers.
pub struct ListenCtx {
    pub state: SharedState,
    pub events: mpsc::Sender<Event>,
    pub oracle: Arc<dyn AccessOracle>,
    pub sessions: Mutex<SessionCounts>,
    /// Signaled when a session closes, so a capped listener resumes.
    pub released: Notify,
    /// Token sessions watch; a reload drains them by swapping it out
    /// and cancelling the old one.
    drain: Mutex<CancellationToken>,
}

#[derive(Debug, Default)]
pub struct SessionCounts {
    pub total: usize,
    pub per_host: HashMap<IpAddr, usize>,
}

impl ListenCtx {
    pub fn new(
        state: SharedState,
        events: mpsc::Sender<Event>,
        oracle: Arc<dyn AccessOracle>,
    ) -> Self {
        Self {
            state,
            events,
            oracle,
            sessions: Mutex::new(SessionCounts::default()),
            released: Notify::new(),
            drain: Mutex::new(CancellationToken::new()),
        }
    }

    /// The drain token current sessions are bound to.
    pub fn session_token(&self) -> CancellationToken {
        self.drain.lock().clone()
    }

    /// Start draining: idle sessions close immediately, sessions with a
    /// request in flight close after answering it. Sessions accepted
    /// after this get a fresh token.
    pub fn begin_drain(&self) {
        let mut guard = self.drain.lock();
        let old = std::mem::replace(&mut *guard, CancellationToken::new());
        old.cancel();
    }

    /// Wait until every session is gone, or shutdown preempts.
    pub async fn drained(&self, shutdown: &CancellationToken) {
        loop {
            if self.sessions.lock().total == 0 {
                return;
            }
            tokio::select! {
                _ = self.released.notified() => {}
                // Re-check periodically so a release racing the wait
                // registration cannot strand us.
                _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }

    fn try_admit(&self, host: IpAddr, max_total: usize, max_per_host: usize) -> bool {
        let mut counts = self.sessions.lock();
        if counts.total >= max_total {
            return false;
        }
        let host_count = counts.per_host.entry(host).or_insert(0);
        if max_per_host > 0 && *host_count >= max_per_host {
            return false;
        }
        *host_count += 1;
        counts.total += 1;
        true
    }

    fn release(&self, host: IpAddr) {
        let mut counts = self.sessions.lock();
        counts.total = counts.total.saturating_sub(1);
        if let Some(count) = counts.per_host.get_mut(&host) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.per_host.remove(&host);
            }
        }
        self.released.notify_waiters();
    }
}

/// Accept loop over the configured endpoints.
pub struct Listener {
    listeners: Vec<TcpListener>,
    /// Endpoints currently bound; kept for the reload fallback.
    addresses: Vec<String>,
    ctx: Arc<ListenCtx>,
    shutdown: CancellationToken,
    /// Signaled by the engine after a successful configuration reload.
    reload: mpsc::Receiver<()>,
}

impl Listener {
    /// Bind every configured endpoint. Failing to bind any endpoint at
    /// startup is fatal.
    pub async fn bind(
        addresses: &[String],
        ctx: Arc<ListenCtx>,
        shutdown: CancellationToken,
        reload: mpsc::Receiver<()>,
    ) -> std::io::Result<Self> {
        let listeners = bind_all(addresses).await?;
        Ok(Self { listeners, addresses: addresses.to_vec(), ctx, shutdown, reload })
    }

    /// Run until shutdown. One spawned accept loop per endpoint; each
    /// reload signal drops the listeners, drains sessions, and re-binds
    /// the endpoints from the reloaded configuration.
    pub async fn run(mut self) {
        loop {
            let cycle = CancellationToken::new();
            let mut tasks = Vec::new();
            for listener in std::mem::take(&mut self.listeners) {
                let ctx = Arc::clone(&self.ctx);
                tasks.push(tokio::spawn(accept_loop(listener, ctx, cycle.clone())));
            }

            let reloading = tokio::select! {
                _ = self.shutdown.cancelled() => false,
                signal = self.reload.recv() => signal.is_some(),
            };
            // Drop the listening sockets before anything else; nothing
            // new is accepted while sessions drain.
            cycle.cancel();
            for task in tasks {
                let _ = task.await;
            }
            if !reloading {
                return;
            }

            info!("reload: listeners dropped, draining sessions");
            self.ctx.begin_drain();
            self.ctx.drained(&self.shutdown).await;
            if self.shutdown.is_cancelled() {
                return;
            }

            // Sessions are gone; re-open against the reloaded endpoints,
            // falling back to the previous ones if they no longer bind.
            let addresses = self.ctx.state.lock().config.listen.clone();
            match bind_all(&addresses).await {
                Ok(listeners) => {
                    self.listeners = listeners;
                    self.addresses = addresses;
                }
                Err(e) => {
                    error!(error = %e, "reload: cannot bind new endpoints, re-binding previous");
                    match bind_all(&self.addresses).await {
                        Ok(listeners) => self.listeners = listeners,
                        Err(e) => {
                            error!(error = %e, "reload: previous endpoints lost as well, listener stopping");
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn bind_all(addresses: &[String]) -> std::io::Result<Vec<TcpListener>> {
    let mut listeners = Vec::new();
    for address in addresses {
        let listener = TcpListener::bind(address).await?;
        info!(%address, "listening");
        listeners.push(listener);
    }
    Ok(listeners)
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ListenCtx>, cycle: CancellationToken) {
    loop {
        // At the global cap the listener leaves the readiness set until
        // a session closes.
        loop {
            let at_cap = {
                let max = ctx.state.lock().config.limits.max_clients;
                ctx.sessions.lock().total >= max
            };
            if !at_cap {
                break;
            }
            debug!("session cap reached, pausing accept");
            tokio::select! {
                _ = ctx.released.notified() => {}
                _ = cycle.cancelled() => return,
            }
        }

        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = cycle.cancelled() => return,
        };
        match accepted {
            Ok((stream, peer)) => {
                let (max_total, max_per_host, shutting_down) = {
                    let state = ctx.state.lock();
                    (
                        state.config.limits.max_clients,
                        state.config.limits.max_clients_per_host,
                        state.shutting_down,
                    )
                };
                if shutting_down {
                    return;
                }
                if !ctx.try_admit(peer.ip(), max_total, max_per_host) {
                    debug!(%peer, "refusing session over cap");
                    continue;
                }
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    let host = peer.ip();
                    handle_session(stream, peer, &ctx).await;
                    ctx.release(host);
                });
            }
            Err(e) => error!(error = %e, "accept failed"),
        }
    }
}

/// Serve one session: strict FIFO request/response until the peer
/// closes, the idle timeout fires, or the transport breaks.
async fn handle_session(stream: TcpStream, peer: std::net::SocketAddr, ctx: &Arc<ListenCtx>) {
    let clock = SystemClock;
    let idle = {
        let state = ctx.state.lock();
        std::time::Duration::from_secs(state.config.session_idle_secs)
    };
    let (mut reader, mut writer) = stream.into_split();
    let drain = ctx.session_token();
    debug!(%peer, "session opened");

    loop {
        let request = tokio::select! {
            // Reload drain: an idle session closes on the spot.
            _ = drain.cancelled() => {
                debug!(%peer, "idle session closed for reload");
                break;
            }
            result = spool_wire::read_request(&mut reader, idle) => match result {
                Ok(request) => request,
                Err(ProtocolError::ConnectionClosed) => {
                    debug!(%peer, "peer closed session");
                    break;
                }
                Err(ProtocolError::Timeout) => {
                    debug!(%peer, "session idle timeout");
                    break;
                }
                Err(ProtocolError::Decode(e)) => {
                    // Codec error: report and keep the session.
                    warn!(%peer, error = %e, "malformed request");
                    let response =
                        Response::error(StatusCode::BadRequest, "malformed request");
                    if spool_wire::write_response(&mut writer, &response, idle).await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    // Transport error: close without ceremony.
                    warn!(%peer, error = %e, "transport error");
                    break;
                }
            },
        };

        let session = SessionInfo {
            remote_host: peer.to_string(),
            user: request.user.clone(),
            authenticated: false,
        };
        debug!(%peer, operation = %request.operation, user = %session.user, "request");
        let response = handlers::handle_request(ctx, &request, &session, clock.epoch_ms());

        if let Err(e) = spool_wire::write_response(&mut writer, &response, idle).await {
            warn!(%peer, error = %e, "failed to write response");
            break;
        }

        // A session caught mid-request by a reload drains right after
        // answering it, never mid-handling.
        if drain.is_cancelled() {
            debug!(%peer, "session drained after reload");
            break;
        }
    }
    debug!(%peer, "session closed");
}

#[cfg(test)]
#[path = "../listener_tests.rs"]
mod tests;
