// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted state: the destination catalog and the default marker.
//!
//! Everything writes to a temporary name and renames into place, so a
//! crash never leaves a half-written catalog. Readers tolerate missing
//! or unparseable legacy content by starting empty.

use crate::registry::Registry;
use spool_core::Destination;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io { path: path.to_path_buf(), source }
}

/// Write `bytes` to `path` atomically (tmp-then-rename), mode 0600.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
        file.set_permissions(fs::Permissions::from_mode(0o600)).map_err(|e| io_err(&tmp, e))?;
        file.write_all(bytes).map_err(|e| io_err(&tmp, e))?;
        file.sync_all().map_err(|e| io_err(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Persist every local destination (printers and explicit classes).
/// Remote and implicit destinations are always rederived, never stored.
pub fn save_destinations(path: &Path, registry: &Registry) -> Result<(), StorageError> {
    let locals: Vec<&Destination> = registry.iter().filter(|d| d.kind.is_local()).collect();
    let bytes = serde_json::to_vec_pretty(&locals)?;
    atomic_write(path, &bytes)
}

/// Load the persisted catalog. Missing or corrupt files start empty.
pub fn load_destinations(path: &Path) -> Vec<Destination> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable destination catalog");
            return Vec::new();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(dests) => dests,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unparseable destination catalog, starting empty");
            Vec::new()
        }
    }
}

/// Persist the default destination marker.
pub fn save_default(path: &Path, name: Option<&str>) -> Result<(), StorageError> {
    match name {
        Some(name) => atomic_write(path, format!("{name}\n").as_bytes()),
        None => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(path, e)),
        },
    }
}

pub fn load_default(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let name = text.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
