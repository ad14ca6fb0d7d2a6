// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Class engine: explicit membership, round-robin selection, and
//! implicit classes synthesized from same-named peers.

use crate::registry::{Registry, RegistryError};
use spool_core::{CapabilityRecord, DestKind, Destination, PrinterState};
use tracing::{debug, info};

/// Add a local printer to a local class. Classes never contain classes.
pub fn add_member(
    registry: &mut Registry,
    class_name: &str,
    printer_name: &str,
) -> Result<(), RegistryError> {
    let printer = registry
        .lookup_printer(printer_name)
        .ok_or_else(|| RegistryError::NotFound(printer_name.to_string()))?;
    if printer.kind != DestKind::LocalPrinter {
        return Err(RegistryError::NotALocalPrinter(printer_name.to_string()));
    }
    let member = printer.name.clone();

    let added = {
        let class = registry
            .lookup_class_mut(class_name)
            .ok_or_else(|| RegistryError::NotFound(class_name.to_string()))?;
        if class.kind != DestKind::LocalClass {
            return Err(RegistryError::NotAClass(class_name.to_string()));
        }
        if class.members.iter().any(|m| m.eq_ignore_ascii_case(&member)) {
            false
        } else {
            class.members.push(member);
            true
        }
    };
    if added {
        registry.mark_dirty();
    }
    Ok(())
}

/// Remove a printer from a class; a class with no members left is
/// destroyed.
pub fn remove_member(
    registry: &mut Registry,
    class_name: &str,
    printer_name: &str,
) -> Result<(), RegistryError> {
    let now_empty = {
        let class = registry
            .lookup_class_mut(class_name)
            .ok_or_else(|| RegistryError::NotFound(class_name.to_string()))?;
        class.members.retain(|m| !m.eq_ignore_ascii_case(printer_name));
        class.members.is_empty()
    };
    registry.mark_dirty();
    if now_empty {
        info!(class = class_name, "class has no members left, deleting");
        registry.delete(class_name, true)?;
    }
    Ok(())
}

/// Pick an available member printer, round-robin.
///
/// The scan starts one past the last pick and wraps once; the first
/// member that is accepting and either idle or (remote and job-less)
/// wins and the cursor advances to it.
pub fn pick_available(registry: &mut Registry, class_name: &str) -> Option<String> {
    let (members, cursor) = {
        let class = registry.lookup_class(class_name)?;
        (class.members.clone(), class.rr_cursor)
    };
    if members.is_empty() {
        return None;
    }

    let n = members.len();
    for step in 1..=n {
        let i = (cursor + step) % n;
        let available = registry
            .lookup_printer(&members[i])
            .map(|p| {
                p.accepting
                    && (p.state == PrinterState::Idle
                        || (p.kind.is_remote() && p.current_job.is_none()))
            })
            .unwrap_or(false);
        if available {
            let picked = members[i].clone();
            if let Some(class) = registry.lookup_class_mut(class_name) {
                class.rr_cursor = i;
            }
            debug!(class = class_name, printer = %picked, "round-robin pick");
            return Some(picked);
        }
    }
    None
}

/// Merge member capabilities for an explicit class: color and duplex
/// are intersections, page sizes the union.
pub fn merged_capability(registry: &mut Registry, class_name: &str) -> Option<CapabilityRecord> {
    let members = registry.lookup_class(class_name)?.members.clone();
    let mut merged: Option<CapabilityRecord> = None;
    for member in &members {
        let Some(printer) = registry.lookup_printer(member) else {
            continue;
        };
        let caps = &printer.capability;
        match merged.as_mut() {
            None => merged = Some(caps.clone()),
            Some(m) => {
                m.color &= caps.color;
                m.duplex &= caps.duplex;
                for size in &caps.page_sizes {
                    if !m.page_sizes.contains(size) {
                        m.page_sizes.push(size.clone());
                    }
                }
                for format in &caps.input_formats {
                    if !m.input_formats.contains(format) {
                        m.input_formats.push(format.clone());
                    }
                }
            }
        }
    }
    merged
}

/// Leafname of a remote destination name (`laser@hostA` → `laser`).
fn leafname(name: &str) -> &str {
    name.split('@').next().unwrap_or(name)
}

/// Rebuild every implicit class from the current set of remote printers.
///
/// Remote printers are scanned in name order; contiguous groups sharing
/// a leafname with at least two members form an implicit class. When a
/// local destination already owns the bare name the class is named
/// `Any<name>` instead. Existing implicit classes not regenerated are
/// dropped; they are never persisted and always derivable.
pub fn rebuild_implicit(registry: &mut Registry) {
    // Group remote printers by leafname, in catalog order.
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for dest in registry.iter() {
        if dest.kind != DestKind::RemotePrinter {
            continue;
        }
        let leaf = leafname(&dest.name).to_string();
        match groups.last_mut() {
            Some((last_leaf, members)) if last_leaf.eq_ignore_ascii_case(&leaf) => {
                members.push(dest.name.clone())
            }
            _ => groups.push((leaf, vec![dest.name.clone()])),
        }
    }

    let mut wanted: Vec<(String, Vec<String>)> = Vec::new();
    for (leaf, members) in groups {
        if members.len() < 2 {
            continue;
        }
        let local_owns_name = registry
            .lookup(&leaf)
            .map(|d| d.kind != DestKind::ImplicitClass)
            .unwrap_or(false);
        let class_name = if local_owns_name { format!("Any{leaf}") } else { leaf };
        wanted.push((class_name, members));
    }

    // Drop implicit classes that no longer correspond to a peer group.
    let stale: Vec<String> = registry
        .iter()
        .filter(|d| d.kind == DestKind::ImplicitClass)
        .filter(|d| !wanted.iter().any(|(name, _)| name.eq_ignore_ascii_case(&d.name)))
        .map(|d| d.name.clone())
        .collect();
    for name in stale {
        debug!(class = %name, "dropping stale implicit class");
        let _ = registry.delete(&name, true);
    }

    for (name, members) in wanted {
        let accepting = members
            .iter()
            .any(|m| registry.lookup_printer(m).map(|p| p.accepting).unwrap_or(false));
        let updated = match registry.lookup_class_mut(&name) {
            Some(class) if class.kind == DestKind::ImplicitClass => {
                class.members = members.clone();
                class.accepting = accepting;
                true
            }
            _ => false,
        };
        if !updated {
            let mut class = Destination::new(&name, DestKind::ImplicitClass);
            class.state = PrinterState::Idle;
            class.accepting = accepting;
            class.members = members;
            let _ = registry.insert(class);
        }
    }
}

/// Recompute the accepting flag of every implicit class (OR over
/// members). Called after member state updates.
pub fn update_implicit_accepting(registry: &mut Registry) {
    let classes: Vec<(String, Vec<String>)> = registry
        .iter()
        .filter(|d| d.kind == DestKind::ImplicitClass)
        .map(|d| (d.name.clone(), d.members.clone()))
        .collect();
    for (name, members) in classes {
        let accepting = members
            .iter()
            .any(|m| registry.lookup_printer(m).map(|p| p.accepting).unwrap_or(false));
        if let Some(class) = registry.lookup_class_mut(&name) {
            class.accepting = accepting;
        }
    }
}

#[cfg(test)]
#[path = "classes_tests.rs"]
mod tests;
