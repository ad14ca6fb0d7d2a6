// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn empty_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spoold.toml");
    std::fs::write(&path, "").unwrap();
    let config = Config::load(&path).unwrap();
    assert_eq!(config.listen, vec!["127.0.0.1:6631".to_string()]);
    assert!(config.browse.enabled);
    assert_eq!(config.browse.interval_secs, 30);
}

#[test]
fn fields_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spoold.toml");
    std::fs::write(
        &path,
        r#"
server_name = "printhost"
listen = ["0.0.0.0:6631", "0.0.0.0:6640"]
filter_nice = 10

[limits]
max_active_jobs = 4
max_jobs_per_printer = 2

[browse]
interval_secs = 5
timeout_secs = 60
allow = ["192.0.2."]
order = "allow-deny"

[[convert]]
source = "text/plain"
dest = "application/postscript"
cost = 50
program = "texttops"
"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.server_name, "printhost");
    assert_eq!(config.listen.len(), 2);
    assert_eq!(config.filter_nice, 10);
    assert_eq!(config.limits.max_jobs_per_printer, 2);
    assert_eq!(config.browse.timeout_secs, 60);
    assert_eq!(config.browse.order, AclOrder::AllowDeny);
    assert_eq!(config.converters.len(), 1);
    assert_eq!(config.converters[0].program, "texttops");
}

#[test]
fn malformed_config_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spoold.toml");
    std::fs::write(&path, "listen = 12").unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn missing_config_is_an_io_error() {
    let err = Config::load(Path::new("/nonexistent/spoold.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn limits_clamp_to_a_third_of_the_fd_budget() {
    let mut limits = Limits { max_clients: 1000, max_active_jobs: 1000, ..Limits::default() };
    limits.clamp_to_fd_budget(300);
    assert_eq!(limits.max_clients, 100);
    assert_eq!(limits.max_active_jobs, 100);

    // Small budgets still leave room for one of each.
    let mut tiny = Limits::default();
    tiny.clamp_to_fd_budget(2);
    assert_eq!(tiny.max_clients, 1);
    assert_eq!(tiny.max_active_jobs, 1);
}

#[test]
fn paths_derive_from_roots() {
    let config = Config::default();
    assert!(config.jobs_dir().ends_with("jobs"));
    assert!(config.printers_path().ends_with("printers.json"));
    assert!(config.default_dest_path().ends_with("default-dest"));
}
