// SPDX-License-Identifier: MIT
//! Run counters, owned by the polling engine and logged at shutdown.

use serde::Serialize;

/// Lifetime counters for one engine run. No persistence — resets with the
/// process.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    /// Completed scan passes.
    pub scans: u64,
    /// Pages fetched from the portal.
    pub pages_loaded: u64,
    /// Captchas accepted by the portal.
    pub captchas_solved: u64,
    /// Captchas rejected by the portal or unsolved.
    pub captchas_failed: u64,
    /// Cooldowns entered.
    pub cooldowns: u64,
    /// Day links seen across all scans.
    pub slots_found: u64,
    /// Sessions created after poisoning or age-out.
    pub rebirths: u64,
    /// Transient I/O failures (network, page load).
    pub transient_errors: u64,
    /// Heartbeat probe failures.
    pub heartbeat_failures: u64,
}

impl RunStats {
    pub fn log_summary(&self) {
        tracing::info!(
            scans = self.scans,
            pages = self.pages_loaded,
            captchas_solved = self.captchas_solved,
            captchas_failed = self.captchas_failed,
            cooldowns = self.cooldowns,
            slots_found = self.slots_found,
            rebirths = self.rebirths,
            transient_errors = self.transient_errors,
            heartbeat_failures = self.heartbeat_failures,
            "run summary"
        );
    }
}
