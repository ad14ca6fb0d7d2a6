// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection to the scheduler.

use anyhow::{bail, Context, Result};
use spool_wire::{Request, Response};
use std::time::Duration;
use tokio::net::TcpStream;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Client {
    stream: TcpStream,
    user: String,
}

impl Client {
    /// Connect to `host:port` (the `SPOOL_SERVER` default applies).
    pub async fn connect(server: &str) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("cannot connect to scheduler at {server}"))?;
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        Ok(Self { stream, user })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// One request/response exchange. Error statuses become errors with
    /// the server's message.
    pub async fn send(&mut self, mut request: Request) -> Result<Response> {
        request.user = self.user.clone();
        spool_wire::write_message(&mut self.stream, &request)
            .await
            .context("failed to send request")?;
        let response: Response =
            tokio::time::timeout(REQUEST_TIMEOUT, spool_wire::read_message(&mut self.stream))
                .await
                .context("timed out waiting for the scheduler")?
                .context("failed to read response")?;
        if response.status.is_error() {
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| response.status.to_string());
            match &response.detail {
                Some(detail) => bail!("{message} ({detail})"),
                None => bail!("{message}"),
            }
        }
        Ok(response)
    }

    /// Like [`Client::send`], but a not-found status returns `None`
    /// instead of failing (used for delete fallbacks).
    pub async fn send_allow_missing(&mut self, mut request: Request) -> Result<Option<Response>> {
        request.user = self.user.clone();
        spool_wire::write_message(&mut self.stream, &request)
            .await
            .context("failed to send request")?;
        let response: Response =
            tokio::time::timeout(REQUEST_TIMEOUT, spool_wire::read_message(&mut self.stream))
                .await
                .context("timed out waiting for the scheduler")?
                .context("failed to read response")?;
        if response.status == spool_wire::StatusCode::NotFound {
            return Ok(None);
        }
        if response.status.is_error() {
            let message =
                response.message.clone().unwrap_or_else(|| response.status.to_string());
            bail!("{message}");
        }
        Ok(Some(response))
    }
}
