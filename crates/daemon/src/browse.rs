// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browse engine: periodic outbound advertisements and ingestion of
//! peer printer records.
//!
//! Record format, one destination per datagram:
//! `<type-hex> <state-hex> <uri> "<location>" "<info>" "<make-model>"`

use crate::classes;
use crate::config::{AclOrder, BrowseConfig};
use crate::state::ServiceState;
use spool_core::{DestKind, Destination, PrinterState};
use tracing::{debug, info, warn};

pub const TYPE_CLASS: u32 = 0x1;
pub const TYPE_REMOTE: u32 = 0x2;
pub const TYPE_COLOR: u32 = 0x8;
pub const TYPE_DUPLEX: u32 = 0x10;
pub const TYPE_LARGE: u32 = 0x200;

const STATE_IDLE: u32 = 3;
const STATE_PROCESSING: u32 = 4;
const STATE_STOPPED: u32 = 5;

/// One parsed advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseRecord {
    pub type_bits: u32,
    pub state_code: u32,
    pub uri: String,
    pub location: String,
    pub info: String,
    pub make_model: String,
}

impl BrowseRecord {
    pub fn render(&self) -> String {
        format!(
            "{:x} {:x} {} \"{}\" \"{}\" \"{}\"\n",
            self.type_bits, self.state_code, self.uri, self.location, self.info, self.make_model
        )
    }

    /// Parse a datagram. Garbled packets return `None`.
    pub fn parse(packet: &str) -> Option<Self> {
        let mut words = packet.split_whitespace();
        let type_bits = u32::from_str_radix(words.next()?, 16).ok()?;
        let state_code = u32::from_str_radix(words.next()?, 16).ok()?;
        let uri = words.next()?.to_string();

        // The three quoted strings; absent quotes leave them empty.
        let mut quoted = packet.split('"');
        let _before = quoted.next()?;
        let location = quoted.next().unwrap_or("").to_string();
        let _sep = quoted.next();
        let info = quoted.next().unwrap_or("").to_string();
        let _sep = quoted.next();
        let make_model = quoted.next().unwrap_or("").to_string();

        Some(Self { type_bits, state_code, uri, location, info, make_model })
    }

    pub fn is_class(&self) -> bool {
        self.type_bits & TYPE_CLASS != 0
    }
}

fn state_code(state: PrinterState) -> u32 {
    match state {
        PrinterState::Idle => STATE_IDLE,
        PrinterState::Processing => STATE_PROCESSING,
        PrinterState::Stopped => STATE_STOPPED,
    }
}

fn state_from_code(code: u32) -> PrinterState {
    match code {
        STATE_PROCESSING => PrinterState::Processing,
        STATE_STOPPED => PrinterState::Stopped,
        _ => PrinterState::Idle,
    }
}

/// `scheme://host[:port]/resource` → (host, resource).
fn split_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.split_once("://")?.1;
    let (authority, resource) = match rest.split_once('/') {
        Some((a, r)) => (a, format!("/{r}")),
        None => (rest, String::from("/")),
    };
    let host = authority.split(':').next().unwrap_or(authority);
    Some((host.to_string(), resource))
}

/// Build the advertisements due this cycle and stamp them sent.
///
/// Every local destination re-advertises each interval; a state change
/// zeroes its stamp so the change goes out in the very next sweep.
pub fn outbound(state: &mut ServiceState, now_ms: u64) -> Vec<String> {
    let browse = state.config.browse.clone();
    if !browse.enabled {
        return Vec::new();
    }
    let server = state.config.server_name.clone();
    let port = state
        .config
        .listen
        .first()
        .and_then(|l| l.rsplit(':').next())
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(6631);
    let interval_ms = browse.interval_secs * 1000;

    let due: Vec<String> = state
        .registry
        .iter()
        .filter(|d| d.kind.is_local())
        .filter(|d| {
            d.last_advertised_ms == 0 || now_ms.saturating_sub(d.last_advertised_ms) >= interval_ms
        })
        .map(|d| d.name.clone())
        .collect();

    let mut packets = Vec::new();
    for name in due {
        let Some(dest) = state.registry.lookup_mut(&name) else { continue };
        let resource =
            if dest.kind.is_class() { format!("/classes/{name}") } else { format!("/printers/{name}") };
        let mut type_bits = TYPE_REMOTE;
        if dest.kind.is_class() {
            type_bits |= TYPE_CLASS;
        }
        if dest.capability.color {
            type_bits |= TYPE_COLOR;
        }
        if dest.capability.duplex {
            type_bits |= TYPE_DUPLEX;
        }
        if dest.capability.has_large_pages() {
            type_bits |= TYPE_LARGE;
        }
        let record = BrowseRecord {
            type_bits,
            state_code: state_code(dest.state),
            uri: format!("ipp://{server}:{port}{resource}"),
            location: dest.location.clone(),
            info: dest.info.clone(),
            make_model: dest.make_model.clone(),
        };
        dest.last_advertised_ms = now_ms;
        packets.push(record.render());
    }
    packets
}

/// Delete remote destinations that stopped advertising. Returns true
/// when anything was removed (implicit classes are rebuilt then).
pub fn age_remote(state: &mut ServiceState, now_ms: u64) -> bool {
    let timeout_ms = state.config.browse.timeout_secs * 1000;
    let stale: Vec<(String, bool)> = state
        .registry
        .iter()
        .filter(|d| d.kind.is_remote())
        .filter(|d| {
            d.last_browse_ms.map(|t| now_ms.saturating_sub(t) > timeout_ms).unwrap_or(true)
        })
        .map(|d| (d.name.clone(), d.kind.is_class()))
        .collect();
    if stale.is_empty() {
        return false;
    }
    for (name, is_class) in &stale {
        info!(dest = %name, "remote destination timed out, deleting");
        let _ = state.registry.delete(name, *is_class);
    }
    if state.config.browse.implicit_classes {
        classes::rebuild_implicit(&mut state.registry);
    }
    true
}

/// Whether the browse ACL admits a source. Localhost always passes.
pub fn acl_allows(config: &BrowseConfig, source: &str) -> bool {
    if source == "127.0.0.1" || source.eq_ignore_ascii_case("localhost") || source == "::1" {
        return true;
    }
    let matches = |patterns: &[String]| {
        patterns.iter().any(|p| p == "all" || source.starts_with(p.as_str()))
    };
    match config.order {
        // Deny first, allow overrides.
        AclOrder::DenyAllow => {
            let mut allowed = !matches(&config.deny);
            if matches(&config.allow) {
                allowed = true;
            }
            // No lists at all admits everyone.
            if config.allow.is_empty() && config.deny.is_empty() {
                allowed = true;
            }
            allowed
        }
        // Allow first, deny overrides.
        AclOrder::AllowDeny => {
            let mut allowed = matches(&config.allow) || config.allow.is_empty();
            if matches(&config.deny) {
                allowed = false;
            }
            allowed
        }
    }
}

/// Addresses a packet should be relayed to, per the relay rules.
pub fn relay_targets(config: &BrowseConfig, source: &str) -> Vec<String> {
    config
        .relays
        .iter()
        .filter(|r| r.from == "all" || source.starts_with(r.from.as_str()))
        .map(|r| r.to.clone())
        .collect()
}

/// Ingest one inbound advertisement.
///
/// Applies the ACL, drops our own packets, synthesizes or refreshes the
/// `<leaf>@<shorthost>` destination, and rebuilds implicit classes.
pub fn ingest(state: &mut ServiceState, source: &str, packet: &str, now_ms: u64) {
    if !acl_allows(&state.config.browse, source) {
        debug!(source, "browse packet refused by ACL");
        return;
    }
    let Some(record) = BrowseRecord::parse(packet) else {
        warn!(source, packet, "garbled browse packet");
        return;
    };
    let Some((mut host, resource)) = split_uri(&record.uri) else {
        warn!(source, uri = %record.uri, "browse packet with unparseable uri");
        return;
    };
    let server_name = state.config.server_name.clone();
    if host.eq_ignore_ascii_case(&server_name) {
        // Our own advertisement came back.
        return;
    }

    // Strip a trailing domain shared with ours so LAN peers show short.
    if let (Some(host_dot), Some(server_dot)) = (host.find('.'), server_name.find('.')) {
        if host[host_dot..].eq_ignore_ascii_case(&server_name[server_dot..]) {
            host.truncate(host_dot);
        }
    }

    let (leaf, kind) = if record.is_class() {
        match resource.strip_prefix("/classes/") {
            Some(leaf) => (leaf.to_string(), DestKind::RemoteClass),
            None => return,
        }
    } else {
        match resource.strip_prefix("/printers/") {
            Some(leaf) => (leaf.to_string(), DestKind::RemotePrinter),
            None => return,
        }
    };
    if leaf.is_empty() {
        return;
    }
    let name = format!("{leaf}@{host}");

    let exists = if kind == DestKind::RemoteClass {
        state.registry.lookup_class(&name).is_some()
    } else {
        state.registry.lookup_printer(&name).is_some()
    };
    if !exists {
        debug!(dest = %name, "new remote destination from browse");
        let mut dest = Destination::new(&name, kind);
        dest.location = "Location Unknown".to_string();
        dest.info = "No Information Available".to_string();
        dest.make_model = match kind {
            DestKind::RemoteClass => format!("Remote Class on {host}"),
            _ => format!("Remote Printer on {host}"),
        };
        let _ = state.registry.insert(dest);
    }

    let Some(dest) = state.registry.lookup_mut(&name) else { return };
    dest.device_uri = Some(record.uri.clone());
    dest.state = state_from_code(record.state_code);
    dest.accepting = record.state_code != STATE_STOPPED;
    dest.last_browse_ms = Some(now_ms);
    if !record.location.is_empty() {
        dest.location = record.location.clone();
    }
    if !record.info.is_empty() {
        dest.info = record.info.clone();
    }
    if !record.make_model.is_empty() {
        dest.make_model = record.make_model.clone();
    }

    if state.config.browse.implicit_classes {
        classes::rebuild_implicit(&mut state.registry);
        classes::update_implicit_accepting(&mut state.registry);
    }
}

#[cfg(test)]
#[path = "browse_tests.rs"]
mod tests;
