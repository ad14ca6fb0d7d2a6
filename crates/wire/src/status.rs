// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Response status codes. Client errors map to the destination/codec
/// error taxonomy; server errors to resource problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusCode {
    Ok,
    /// Request carried attributes the server ignored; the unsupported
    /// group echoes them.
    OkIgnoredAttributes,
    BadRequest,
    Forbidden,
    /// Credentials may help; the client should retry authenticated.
    NotAuthenticated,
    NotFound,
    AlreadyExists,
    /// Destination exists but is not accepting jobs.
    NotAccepting,
    /// No conversion path from the document type to the destination.
    DocumentFormatNotSupported,
    AttributesOrValues,
    VersionNotSupported,
    Busy,
    InternalError,
}

impl StatusCode {
    pub fn is_error(&self) -> bool {
        !matches!(self, StatusCode::Ok | StatusCode::OkIgnoredAttributes)
    }
}

spool_core::simple_display! {
    StatusCode {
        Ok => "successful-ok",
        OkIgnoredAttributes => "successful-ok-ignored-attributes",
        BadRequest => "client-error-bad-request",
        Forbidden => "client-error-forbidden",
        NotAuthenticated => "client-error-not-authenticated",
        NotFound => "client-error-not-found",
        AlreadyExists => "client-error-already-exists",
        NotAccepting => "client-error-not-accepting-jobs",
        DocumentFormatNotSupported => "client-error-document-format-not-supported",
        AttributesOrValues => "client-error-attributes-or-values",
        VersionNotSupported => "server-error-version-not-supported",
        Busy => "server-error-busy",
        InternalError => "server-error-internal-error",
    }
}
