// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MIME types for job documents and filter declarations.
//!
//! The raw passthrough type is its own variant so filter lookup never
//! special-cases a magic string.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The wire spelling of the raw passthrough type.
pub const RAW_MIME: &str = "application/vnd.cups-raw";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MimeTypeParseError {
    #[error("invalid MIME type: {0:?}")]
    Invalid(String),
}

/// A document type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MimeType {
    /// Raw device data; always passes straight to the backend.
    Raw,
    Concrete { super_type: String, sub_type: String },
}

impl MimeType {
    /// Parse `super/sub`, folding to lowercase. The raw spelling maps to
    /// [`MimeType::Raw`].
    pub fn parse(s: &str) -> Result<Self, MimeTypeParseError> {
        let folded = s.trim().to_ascii_lowercase();
        if folded == RAW_MIME {
            return Ok(MimeType::Raw);
        }
        match folded.split_once('/') {
            Some((sup, sub)) if !sup.is_empty() && !sub.is_empty() && !sub.contains('/') => {
                Ok(MimeType::Concrete { super_type: sup.to_string(), sub_type: sub.to_string() })
            }
            _ => Err(MimeTypeParseError::Invalid(s.to_string())),
        }
    }

    pub fn concrete(super_type: &str, sub_type: &str) -> Self {
        MimeType::Concrete {
            super_type: super_type.to_ascii_lowercase(),
            sub_type: sub_type.to_ascii_lowercase(),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, MimeType::Raw)
    }
}

impl std::fmt::Display for MimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MimeType::Raw => f.write_str(RAW_MIME),
            MimeType::Concrete { super_type, sub_type } => {
                write!(f, "{super_type}/{sub_type}")
            }
        }
    }
}

impl Serialize for MimeType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MimeType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        MimeType::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A filter-declaration source pattern; the sub type may be a wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePattern {
    pub super_type: String,
    /// `None` means `*`, matching any sub type of the super type.
    pub sub_type: Option<String>,
}

impl MimePattern {
    pub fn parse(s: &str) -> Result<Self, MimeTypeParseError> {
        let folded = s.trim().to_ascii_lowercase();
        match folded.split_once('/') {
            Some((sup, "*")) if !sup.is_empty() => {
                Ok(MimePattern { super_type: sup.to_string(), sub_type: None })
            }
            Some((sup, sub)) if !sup.is_empty() && !sub.is_empty() => {
                Ok(MimePattern { super_type: sup.to_string(), sub_type: Some(sub.to_string()) })
            }
            _ => Err(MimeTypeParseError::Invalid(s.to_string())),
        }
    }

    pub fn matches(&self, t: &MimeType) -> bool {
        match t {
            MimeType::Raw => false,
            MimeType::Concrete { super_type, sub_type } => {
                self.super_type == *super_type
                    && self.sub_type.as_ref().map_or(true, |s| s == sub_type)
            }
        }
    }
}

#[cfg(test)]
#[path = "mime_tests.rs"]
mod tests;
