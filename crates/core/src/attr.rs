// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed attribute values for job options, destination capabilities, and
//! protocol attribute groups.
//!
//! Dispatch on the value tag is an exhaustive match over one tagged
//! variant; renderers and comparators never inspect strings to decide a
//! type.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered name → value bag. Declaration order is preserved so responses
/// render attributes in the order they were added.
pub type AttrBag = IndexMap<String, Attribute>;

/// A dots-per-inch resolution pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: u32,
    pub y: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}dpi", self.x, self.y)
    }
}

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "value", rename_all = "kebab-case")]
pub enum Attribute {
    Integer(i64),
    Boolean(bool),
    /// Enumerated token (e.g. a state code rendered as its keyword).
    Enum(String),
    Range {
        lower: i64,
        upper: i64,
    },
    Resolution(Resolution),
    /// UTC epoch milliseconds.
    Date(u64),
    Text(String),
    /// Name, optionally tagged with a natural language.
    Name {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Keyword(String),
    Collection(IndexMap<String, Attribute>),
    Set(Vec<Attribute>),
}

impl Attribute {
    pub fn name(name: impl Into<String>) -> Self {
        Attribute::Name { name: name.into(), language: None }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Attribute::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Textual payload of string-like variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Text(s) | Attribute::Enum(s) | Attribute::Keyword(s) => Some(s),
            Attribute::Name { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Render for logs and state messages. Sets render comma-separated.
    pub fn render(&self) -> String {
        match self {
            Attribute::Integer(v) => v.to_string(),
            Attribute::Boolean(v) => if *v { "true" } else { "false" }.to_string(),
            Attribute::Enum(s) | Attribute::Keyword(s) | Attribute::Text(s) => s.clone(),
            Attribute::Range { lower, upper } => format!("{lower}-{upper}"),
            Attribute::Resolution(r) => r.to_string(),
            Attribute::Date(ms) => ms.to_string(),
            Attribute::Name { name, .. } => name.clone(),
            Attribute::Collection(map) => {
                let inner: Vec<String> =
                    map.iter().map(|(k, v)| format!("{}={}", k, v.render())).collect();
                format!("{{{}}}", inner.join(" "))
            }
            Attribute::Set(items) => {
                items.iter().map(Attribute::render).collect::<Vec<_>>().join(",")
            }
        }
    }
}

#[cfg(test)]
#[path = "attr_tests.rs"]
mod tests;
