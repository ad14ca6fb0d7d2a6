// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-destination print quotas.
//!
//! Usage accumulates in a sliding window per user; the scheduler refuses
//! work that would push a user over the destination's page or byte caps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Quota settings for one destination. Zero limits mean unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Window length in seconds.
    pub period_secs: u64,
    /// Pages allowed per user per window; 0 = unlimited.
    pub page_limit: u32,
    /// Kilobytes allowed per user per window; 0 = unlimited.
    pub k_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        // One-day window, no caps.
        Self { period_secs: 86_400, page_limit: 0, k_limit: 0 }
    }
}

impl QuotaConfig {
    pub fn is_unlimited(&self) -> bool {
        self.page_limit == 0 && self.k_limit == 0
    }
}

/// One accounted unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub at_ms: u64,
    pub pages: u32,
    pub kbytes: u32,
}

/// Windowed per-user usage counters for one destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaLedger {
    entries: HashMap<String, Vec<QuotaUsage>>,
}

impl QuotaLedger {
    /// Record completed or accepted work for a user.
    pub fn add(&mut self, user: &str, usage: QuotaUsage) {
        self.entries.entry(user.to_string()).or_default().push(usage);
    }

    /// Current (pages, kbytes) inside the window ending at `now_ms`.
    /// Entries that have aged out of the window are dropped.
    pub fn usage(&mut self, user: &str, config: &QuotaConfig, now_ms: u64) -> (u32, u32) {
        let floor = now_ms.saturating_sub(config.period_secs * 1000);
        let Some(entries) = self.entries.get_mut(user) else {
            return (0, 0);
        };
        entries.retain(|e| e.at_ms >= floor);
        let pages = entries.iter().map(|e| e.pages).sum();
        let kbytes = entries.iter().map(|e| e.kbytes).sum();
        (pages, kbytes)
    }

    /// Whether adding `pages`/`kbytes` for `user` would exceed the caps.
    pub fn would_exceed(
        &mut self,
        user: &str,
        config: &QuotaConfig,
        now_ms: u64,
        pages: u32,
        kbytes: u32,
    ) -> bool {
        if config.is_unlimited() {
            return false;
        }
        let (used_pages, used_kbytes) = self.usage(user, config, now_ms);
        if config.page_limit > 0 && used_pages + pages > config.page_limit {
            return true;
        }
        config.k_limit > 0 && used_kbytes + kbytes > config.k_limit
    }
}

#[cfg(test)]
#[path = "quota_tests.rs"]
mod tests;
