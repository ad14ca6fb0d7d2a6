// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::status::StatusCode;
use serde::{Deserialize, Serialize};
use spool_core::attr::{AttrBag, Attribute};

/// Which group an attribute set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupTag {
    Operation,
    Job,
    Printer,
    /// Echoes attributes the server did not understand.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrGroup {
    pub tag: GroupTag,
    pub attrs: AttrBag,
}

/// A framed response.
///
/// Every response carries the fixed operation-group header (charset,
/// natural language) plus the status; error responses may add a short
/// message and a detail message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub groups: Vec<AttrGroup>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        let mut header = AttrBag::new();
        header.insert("attributes-charset".to_string(), Attribute::Keyword("utf-8".to_string()));
        header.insert(
            "attributes-natural-language".to_string(),
            Attribute::Keyword("en".to_string()),
        );
        Self {
            status,
            message: None,
            detail: None,
            groups: vec![AttrGroup { tag: GroupTag::Operation, attrs: header }],
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response.message = Some(message.into());
        response
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn push_group(&mut self, tag: GroupTag, attrs: AttrBag) -> &mut Self {
        self.groups.push(AttrGroup { tag, attrs });
        self
    }

    pub fn with_group(mut self, tag: GroupTag, attrs: AttrBag) -> Self {
        self.push_group(tag, attrs);
        self
    }

    /// First group with the given tag.
    pub fn group(&self, tag: GroupTag) -> Option<&AttrBag> {
        self.groups.iter().find(|g| g.tag == tag).map(|g| &g.attrs)
    }

    /// All groups with the given tag (GET-JOBS returns one per job).
    pub fn groups_tagged(&self, tag: GroupTag) -> impl Iterator<Item = &AttrBag> {
        self.groups.iter().filter(move |g| g.tag == tag).map(|g| &g.attrs)
    }
}
