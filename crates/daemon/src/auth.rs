// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access-control seam.
//!
//! The daemon never evaluates credentials itself; it asks an oracle to
//! classify (session, resource, operation) and acts on the verdict.

use spool_wire::Operation;

/// Verdict of the access oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
    /// Refusal that credentials might cure; the client is challenged.
    NeedCredentials,
}

/// Facts about the requesting session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Peer address as text.
    pub remote_host: String,
    /// Claimed identity token.
    pub user: String,
    /// Whether the transport authenticated the peer.
    pub authenticated: bool,
}

impl SessionInfo {
    pub fn is_loopback(&self) -> bool {
        self.remote_host
            .parse::<std::net::SocketAddr>()
            .map(|a| a.ip().is_loopback())
            .unwrap_or(self.remote_host == "localhost")
    }
}

pub trait AccessOracle: Send + Sync {
    /// Classify one request against one resource.
    fn classify(&self, session: &SessionInfo, resource: &str, operation: Operation) -> Access;
}

/// Standard policy: management operations are restricted to loopback or
/// authenticated sessions; everything else is open. Per-destination
/// allow/deny user lists are enforced separately at submission.
#[derive(Debug, Default)]
pub struct StandardOracle;

impl AccessOracle for StandardOracle {
    fn classify(&self, session: &SessionInfo, _resource: &str, operation: Operation) -> Access {
        if !operation.is_admin() {
            return Access::Allow;
        }
        if session.is_loopback() || session.authenticated {
            Access::Allow
        } else {
            Access::NeedCredentials
        }
    }
}

/// Unconditional allow, for tests.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AccessOracle for AllowAll {
    fn classify(&self, _session: &SessionInfo, _resource: &str, _operation: Operation) -> Access {
        Access::Allow
    }
}
