// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use spool_core::attr::{AttrBag, Attribute};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// A framed request: operation code, named attributes, and an optional
/// trailing document blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub version: u32,
    pub operation: Operation,
    /// Requesting user identity token.
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub attrs: AttrBag,
    /// Document bytes, base64 on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::framing::base64_opt"
    )]
    pub document: Option<Vec<u8>>,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

impl Request {
    pub fn new(operation: Operation, user: &str) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            operation,
            user: user.to_string(),
            attrs: AttrBag::new(),
            document: None,
        }
    }

    pub fn with_attr(mut self, name: &str, value: Attribute) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    pub fn with_document(mut self, bytes: Vec<u8>) -> Self {
        self.document = Some(bytes);
        self
    }

    /// Named attribute as a string, when present and string-like.
    pub fn str_attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(Attribute::as_str)
    }

    pub fn int_attr(&self, name: &str) -> Option<i64> {
        self.attrs.get(name).and_then(Attribute::as_integer)
    }
}
