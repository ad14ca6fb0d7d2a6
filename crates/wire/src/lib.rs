// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! spool-wire: the RPC protocol between clients and the scheduler.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.
//! Document bytes travel base64-encoded inside the payload.

mod framing;
mod operation;
mod request;
mod response;
mod status;

pub use framing::{
    decode, encode, read_message, read_request, write_message, write_response, ProtocolError,
    MAX_FRAME,
};
pub use operation::Operation;
pub use request::{Request, PROTOCOL_VERSION};
pub use response::{AttrGroup, GroupTag, Response};
pub use status::StatusCode;

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
