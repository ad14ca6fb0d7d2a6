// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Loaded from `spoold.toml`; every field has a workable default so an
//! empty file yields a runnable daemon. At reload a parse failure keeps
//! the previous configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Browse ACL evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AclOrder {
    /// Deny list first, allow list overrides.
    #[default]
    DenyAllow,
    /// Allow list first, deny list overrides.
    AllowDeny,
}

/// One browse relay rule: packets whose source matches `from` are
/// re-sent unchanged to `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseRelay {
    pub from: String,
    pub to: String,
}

/// Peer discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseConfig {
    pub enabled: bool,
    /// Well-known inbound port.
    pub port: u16,
    /// Seconds between outbound advertisement sweeps.
    pub interval_secs: u64,
    /// Remote destinations older than this are deleted.
    pub timeout_secs: u64,
    /// Broadcast addresses advertisements go to.
    pub addresses: Vec<String>,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub order: AclOrder,
    pub relays: Vec<BrowseRelay>,
    /// Synthesize classes from same-named peers.
    pub implicit_classes: bool,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 6632,
            interval_secs: 30,
            timeout_secs: 300,
            addresses: vec!["255.255.255.255".to_string()],
            allow: Vec::new(),
            deny: Vec::new(),
            order: AclOrder::default(),
            relays: Vec::new(),
            implicit_classes: true,
        }
    }
}

/// Concurrency and resource caps.
///
/// Pipelines consume several descriptors each, so the active-job and
/// client caps are both clamped to a third of the descriptor budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_clients: usize,
    pub max_clients_per_host: usize,
    /// Total jobs kept in the queue, active or terminal.
    pub max_jobs: usize,
    pub max_active_jobs: usize,
    pub max_jobs_per_user: usize,
    pub max_jobs_per_printer: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_clients: 100,
            max_clients_per_host: 10,
            max_jobs: 500,
            max_active_jobs: 50,
            max_jobs_per_user: 0,
            max_jobs_per_printer: 1,
        }
    }
}

impl Limits {
    /// Clamp the caps to the process descriptor budget.
    pub fn clamp_to_fd_budget(&mut self, max_fds: usize) {
        let third = (max_fds / 3).max(1);
        self.max_clients = self.max_clients.min(third);
        self.max_active_jobs = self.max_active_jobs.min(third);
    }
}

/// Global converter declaration (type-to-type edge in the filter graph).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertRule {
    /// Source MIME type; sub type may be `*`.
    pub source: String,
    /// Destination MIME type.
    pub dest: String,
    pub cost: u32,
    pub program: String,
    #[serde(default)]
    pub nice: i32,
    #[serde(default)]
    pub file_args: bool,
}

/// Job retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    /// Keep terminal job records at all.
    pub job_history: bool,
    /// Keep document files of terminal jobs.
    pub job_files: bool,
    /// Seconds a terminal record survives before pruning.
    pub history_secs: u64,
}

impl Default for Retention {
    fn default() -> Self {
        Self { job_history: true, job_files: false, history_secs: 86_400 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name peers see in browse URIs; defaults to the hostname.
    pub server_name: String,
    /// TCP listener endpoints.
    pub listen: Vec<String>,
    /// State root: destination catalog, default marker.
    pub state_dir: PathBuf,
    /// Spool root: job records and document files.
    pub spool_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Directory holding converter executables.
    pub filter_dir: PathBuf,
    /// Directory holding backend executables, one per scheme.
    pub backend_dir: PathBuf,
    /// Base nice added to every pipeline child.
    pub filter_nice: i32,
    /// Classification banner exposed to children, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    /// Seconds a session may sit idle before it is closed.
    pub session_idle_secs: u64,
    pub limits: Limits,
    pub browse: BrowseConfig,
    pub retention: Retention,
    /// Global type-to-type converters.
    #[serde(rename = "convert")]
    pub converters: Vec<ConvertRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: hostname(),
            listen: vec!["127.0.0.1:6631".to_string()],
            state_dir: PathBuf::from("/var/lib/spool"),
            spool_dir: PathBuf::from("/var/spool/spool"),
            log_dir: PathBuf::from("/var/log/spool"),
            filter_dir: PathBuf::from("/usr/lib/spool/filter"),
            backend_dir: PathBuf::from("/usr/lib/spool/backend"),
            filter_nice: 0,
            classification: None,
            session_idle_secs: 60,
            limits: Limits::default(),
            browse: BrowseConfig::default(),
            retention: Retention::default(),
            converters: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let mut config: Config = toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.apply_env_overrides();
        config.limits.clamp_to_fd_budget(fd_limit());
        Ok(config)
    }

    /// Defaults plus environment overrides; used when no config exists.
    pub fn fallback() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.limits.clamp_to_fd_budget(fd_limit());
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(dir) = crate::env::state_dir_override() {
            self.spool_dir = dir.join("spool");
            self.state_dir = dir;
        }
        if let Some(dir) = crate::env::log_dir_override() {
            self.log_dir = dir;
        }
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.spool_dir.join("jobs")
    }

    pub fn printers_path(&self) -> PathBuf {
        self.state_dir.join("printers.json")
    }

    pub fn default_dest_path(&self) -> PathBuf {
        self.state_dir.join("default-dest")
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Soft RLIMIT_NOFILE, the descriptor budget everything is clamped to.
pub fn fd_limit() -> usize {
    use nix::sys::resource::{getrlimit, Resource};
    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, _hard)) => soft as usize,
        Err(_) => 256,
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
