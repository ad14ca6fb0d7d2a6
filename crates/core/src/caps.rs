// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parsed device capability records.
//!
//! The device description parser is an external collaborator; the daemon
//! consumes its output as this record: enumerated option groups, page
//! sizes, and filter declarations. Records load from TOML description
//! files handed to ADD-PRINTER.

use crate::attr::Resolution;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("failed to read capability record: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse capability record: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A converter declared by the device description: documents of the
/// source pattern are fed through `program` to reach the device format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDecl {
    /// Source MIME type; the sub type may be `*`.
    pub source: String,
    /// Relative filtering cost.
    pub cost: u32,
    /// Converter program name, resolved against the server's filter dir.
    pub program: String,
    /// Process scheduling priority hint for the spawned converter.
    #[serde(default)]
    pub nice: i32,
    /// Whether the program takes the input as a file-name argument
    /// instead of streamed stdin.
    #[serde(default)]
    pub file_args: bool,
}

/// Capabilities derived from one device description file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    #[serde(default)]
    pub make_model: String,
    #[serde(default)]
    pub color: bool,
    #[serde(default)]
    pub duplex: bool,
    #[serde(default)]
    pub page_sizes: Vec<String>,
    #[serde(default)]
    pub resolutions: Vec<Resolution>,
    #[serde(default)]
    pub finishings: Vec<String>,
    #[serde(default)]
    pub output_bins: Vec<String>,
    /// MIME types the device accepts directly, without conversion.
    #[serde(default)]
    pub input_formats: Vec<String>,
    /// Converter chain declarations (device-specific filters).
    #[serde(default, rename = "filter")]
    pub filters: Vec<FilterDecl>,
}

impl CapabilityRecord {
    pub fn load(path: &Path) -> Result<Self, CapabilityError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn from_toml(text: &str) -> Result<Self, CapabilityError> {
        Ok(toml::from_str(text)?)
    }

    /// Whether the record advertises any large page size.
    ///
    /// Used for class capability merging: a class containing any
    /// large-format printer advertises large format.
    pub fn has_large_pages(&self) -> bool {
        self.page_sizes.iter().any(|s| {
            let folded = s.to_ascii_lowercase();
            folded.contains("a3") || folded.contains("tabloid") || folded.contains("a2")
        })
    }
}

#[cfg(test)]
#[path = "caps_tests.rs"]
mod tests;
