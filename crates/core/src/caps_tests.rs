// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const LASER_TOML: &str = r#"
make_model = "Example LaserWriter 2000"
color = false
duplex = true
page_sizes = ["Letter", "Legal", "A4"]
resolutions = [{ x = 600, y = 600 }]
input_formats = ["application/postscript"]

[[filter]]
source = "text/plain"
cost = 50
program = "texttops"

[[filter]]
source = "image/*"
cost = 100
program = "imagetops"
nice = 10
file_args = true
"#;

#[test]
fn parses_full_record() {
    let rec = CapabilityRecord::from_toml(LASER_TOML).unwrap();
    assert_eq!(rec.make_model, "Example LaserWriter 2000");
    assert!(rec.duplex);
    assert!(!rec.color);
    assert_eq!(rec.page_sizes.len(), 3);
    assert_eq!(rec.resolutions, vec![Resolution { x: 600, y: 600 }]);
    assert_eq!(rec.filters.len(), 2);
    assert_eq!(rec.filters[0].program, "texttops");
    assert_eq!(rec.filters[0].nice, 0);
    assert!(rec.filters[1].file_args);
}

#[test]
fn empty_record_defaults() {
    let rec = CapabilityRecord::from_toml("").unwrap();
    assert!(rec.input_formats.is_empty());
    assert!(rec.filters.is_empty());
    assert!(!rec.has_large_pages());
}

#[test]
fn large_pages_detected() {
    let rec = CapabilityRecord::from_toml("page_sizes = [\"A3\"]").unwrap();
    assert!(rec.has_large_pages());
}

#[test]
fn load_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("laser.toml");
    std::fs::write(&path, LASER_TOML).unwrap();
    let rec = CapabilityRecord::load(&path).unwrap();
    assert_eq!(rec.filters.len(), 2);
}

#[test]
fn load_missing_file_is_io_error() {
    let err = CapabilityRecord::load(Path::new("/nonexistent/caps.toml")).unwrap_err();
    assert!(matches!(err, CapabilityError::Io(_)));
}
