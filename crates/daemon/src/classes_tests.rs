// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use spool_core::CapabilityRecord;

fn idle_printer(registry: &mut Registry, name: &str) {
    registry.create_printer(name).unwrap();
    let p = registry.lookup_printer_mut(name).unwrap();
    p.state = PrinterState::Idle;
    p.accepting = true;
}

fn class_of(registry: &mut Registry, name: &str, members: &[&str]) {
    registry.create_class(name).unwrap();
    for m in members {
        add_member(registry, name, m).unwrap();
    }
}

#[test]
fn add_member_requires_local_printer() {
    let mut registry = Registry::new();
    idle_printer(&mut registry, "p1");
    registry.insert(spool_core::Destination::new("r1@peer", DestKind::RemotePrinter)).unwrap();
    registry.create_class("grp").unwrap();

    add_member(&mut registry, "grp", "p1").unwrap();
    assert_eq!(
        add_member(&mut registry, "grp", "r1@peer").unwrap_err(),
        RegistryError::NotALocalPrinter("r1@peer".to_string())
    );
    assert_eq!(
        add_member(&mut registry, "grp", "ghost").unwrap_err(),
        RegistryError::NotFound("ghost".to_string())
    );
}

#[test]
fn add_member_is_idempotent() {
    let mut registry = Registry::new();
    idle_printer(&mut registry, "p1");
    class_of(&mut registry, "grp", &["p1", "p1"]);
    assert_eq!(registry.lookup_class("grp").unwrap().members.len(), 1);
}

#[test]
fn classes_never_contain_classes() {
    let mut registry = Registry::new();
    registry.create_class("inner").unwrap();
    registry.create_class("outer").unwrap();
    // The class "inner" is not a local printer, so it cannot be a member.
    assert!(add_member(&mut registry, "outer", "inner").is_err());
}

#[test]
fn remove_last_member_destroys_class() {
    let mut registry = Registry::new();
    idle_printer(&mut registry, "p1");
    class_of(&mut registry, "grp", &["p1"]);

    remove_member(&mut registry, "grp", "p1").unwrap();
    assert!(registry.lookup_class("grp").is_none());
}

#[test]
fn round_robin_alternates_between_idle_members() {
    let mut registry = Registry::new();
    idle_printer(&mut registry, "p1");
    idle_printer(&mut registry, "p2");
    class_of(&mut registry, "grp", &["p1", "p2"]);

    // Fairness: across 2N picks each of N members is chosen N times,
    // alternating, as long as everyone stays idle.
    let picks: Vec<String> =
        (0..4).map(|_| pick_available(&mut registry, "grp").unwrap()).collect();
    assert_eq!(picks, vec!["p2", "p1", "p2", "p1"]);
}

#[test]
fn pick_skips_busy_and_rejecting_members() {
    let mut registry = Registry::new();
    idle_printer(&mut registry, "p1");
    idle_printer(&mut registry, "p2");
    idle_printer(&mut registry, "p3");
    class_of(&mut registry, "grp", &["p1", "p2", "p3"]);

    registry.lookup_printer_mut("p2").unwrap().state = PrinterState::Processing;
    registry.lookup_printer_mut("p3").unwrap().accepting = false;

    assert_eq!(pick_available(&mut registry, "grp").as_deref(), Some("p1"));
    assert_eq!(pick_available(&mut registry, "grp").as_deref(), Some("p1"));
}

#[test]
fn pick_returns_none_when_no_member_qualifies() {
    let mut registry = Registry::new();
    idle_printer(&mut registry, "p1");
    class_of(&mut registry, "grp", &["p1"]);
    registry.lookup_printer_mut("p1").unwrap().state = PrinterState::Stopped;
    assert_eq!(pick_available(&mut registry, "grp"), None);
}

#[test]
fn remote_jobless_members_qualify() {
    let mut registry = Registry::new();
    let mut remote = spool_core::Destination::new("laser@peer", DestKind::RemotePrinter);
    remote.state = PrinterState::Processing;
    remote.accepting = true;
    registry.insert(remote).unwrap();

    let mut class = spool_core::Destination::new("grp", DestKind::ImplicitClass);
    class.members = vec!["laser@peer".to_string()];
    class.accepting = true;
    registry.insert(class).unwrap();

    // Busy state but no local job record: remote printers still qualify.
    assert_eq!(pick_available(&mut registry, "grp").as_deref(), Some("laser@peer"));

    registry.lookup_printer_mut("laser@peer").unwrap().current_job =
        Some(spool_core::JobId(7));
    assert_eq!(pick_available(&mut registry, "grp"), None);
}

fn remote(registry: &mut Registry, name: &str, accepting: bool) {
    let mut dest = spool_core::Destination::new(name, DestKind::RemotePrinter);
    dest.state = PrinterState::Idle;
    dest.accepting = accepting;
    registry.insert(dest).unwrap();
}

#[test]
fn implicit_class_forms_from_two_same_named_peers() {
    let mut registry = Registry::new();
    remote(&mut registry, "laser@hosta", true);
    remote(&mut registry, "laser@hostb", false);
    rebuild_implicit(&mut registry);

    let class = registry.lookup_class("laser").unwrap();
    assert_eq!(class.kind, DestKind::ImplicitClass);
    assert_eq!(class.members, vec!["laser@hosta".to_string(), "laser@hostb".to_string()]);
    // Accepting is the OR over members.
    assert!(class.accepting);
}

#[test]
fn implicit_class_gets_any_prefix_when_local_owns_the_name() {
    let mut registry = Registry::new();
    idle_printer(&mut registry, "pr");
    remote(&mut registry, "pr@hosta", true);
    remote(&mut registry, "pr@hostb", true);
    rebuild_implicit(&mut registry);

    assert!(registry.lookup_class("pr").is_none());
    let class = registry.lookup_class("Anypr").unwrap();
    assert_eq!(class.members.len(), 2);
}

#[test]
fn lone_peer_forms_no_class() {
    let mut registry = Registry::new();
    remote(&mut registry, "laser@hosta", true);
    rebuild_implicit(&mut registry);
    assert!(registry.lookup_class("laser").is_none());
}

#[test]
fn stale_implicit_class_is_dropped_on_rebuild() {
    let mut registry = Registry::new();
    remote(&mut registry, "laser@hosta", true);
    remote(&mut registry, "laser@hostb", true);
    rebuild_implicit(&mut registry);
    assert!(registry.lookup_class("laser").is_some());

    registry.delete("laser@hostb", false).unwrap();
    rebuild_implicit(&mut registry);
    assert!(registry.lookup_class("laser").is_none());
}

#[test]
fn implicit_accepting_follows_members() {
    let mut registry = Registry::new();
    remote(&mut registry, "laser@hosta", false);
    remote(&mut registry, "laser@hostb", false);
    rebuild_implicit(&mut registry);
    assert!(!registry.lookup_class("laser").unwrap().accepting);

    registry.lookup_printer_mut("laser@hosta").unwrap().accepting = true;
    update_implicit_accepting(&mut registry);
    assert!(registry.lookup_class("laser").unwrap().accepting);
}

#[test]
fn merged_capability_intersects_and_unions() {
    let mut registry = Registry::new();
    idle_printer(&mut registry, "p1");
    idle_printer(&mut registry, "p2");
    registry
        .set_capabilities(
            "p1",
            CapabilityRecord {
                color: true,
                duplex: true,
                page_sizes: vec!["A4".to_string()],
                ..CapabilityRecord::default()
            },
        )
        .unwrap();
    registry
        .set_capabilities(
            "p2",
            CapabilityRecord {
                color: false,
                duplex: true,
                page_sizes: vec!["A3".to_string()],
                ..CapabilityRecord::default()
            },
        )
        .unwrap();
    class_of(&mut registry, "grp", &["p1", "p2"]);

    let merged = merged_capability(&mut registry, "grp").unwrap();
    assert!(!merged.color, "color requires every member to support it");
    assert!(merged.duplex);
    assert_eq!(merged.page_sizes, vec!["A4".to_string(), "A3".to_string()]);
}
