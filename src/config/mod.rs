// SPDX-License-Identifier: MIT
//! Configuration: TOML file + CLI/env overrides, loaded once at startup and
//! immutable thereafter (`Arc<BotConfig>`).
//!
//! Validation is fatal — the engine must not run with undefined thresholds.
//! The escalation defaults (5 failures / 120 s) and session age bound
//! (2700 s) are operator-tuned policy carried over from field experience
//! with the target portal, not derived limits.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 2700;
const DEFAULT_CAPTCHA_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 120;
const DEFAULT_MAX_CAPTCHA_ATTEMPTS: u32 = 5;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 300;
const DEFAULT_TRANSIENT_ALERT_THRESHOLD: u32 = 10;

// ── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Calendar entry URL for the target portal. Required.
    pub base_url: String,
    /// HTTP timeout for page fetches.
    pub timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Polling cadence (`[schedule]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// First hour (0–23) of the golden-hour window.
    pub golden_hour_start: u32,
    /// Hour the window closes (exclusive). Equal to `golden_hour_start`
    /// disables the window.
    pub golden_hour_end: u32,
    /// Polling interval inside the golden hour.
    pub golden_interval_secs: u64,
    /// Interval during the 15-minute warmup before the window opens.
    pub warmup_interval_secs: u64,
    /// Interval during the final 30 seconds before the window opens.
    pub ready_interval_ms: u64,
    /// Minute marks the patrol cadence aligns to.
    pub alignment_marks: Vec<u32>,
    /// Month offsets to scan, in priority order (not calendar order).
    pub month_priority: Vec<u32>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            golden_hour_start: 2,
            golden_hour_end: 3,
            golden_interval_secs: 30,
            warmup_interval_secs: 60,
            ready_interval_ms: 500,
            alignment_marks: vec![0, 20, 40],
            month_priority: vec![4, 5, 2, 3],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Forced-renewal bound on session lifetime.
    pub max_age_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: DEFAULT_SESSION_MAX_AGE_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EscalationSection {
    pub captcha_failure_threshold: u32,
    pub cooldown_secs: u64,
    /// Solve attempts per gate page before giving the target up.
    pub max_captcha_attempts: u32,
}

impl Default for EscalationSection {
    fn default() -> Self {
        Self {
            captcha_failure_threshold: DEFAULT_CAPTCHA_FAILURE_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            max_captcha_attempts: DEFAULT_MAX_CAPTCHA_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Probe cadence during idle waits.
    pub interval_secs: u64,
    /// When set, poison the session after this many consecutive heartbeat
    /// failures. Unset (default) means heartbeat failures never poison —
    /// only content-based gate detection does.
    pub poison_after_failures: Option<u32>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            poison_after_failures: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Extra gate markers checked after the built-in structural rules.
    pub extra_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consecutive transient errors before the operator is alerted once.
    pub transient_error_alert_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transient_error_alert_threshold: DEFAULT_TRANSIENT_ALERT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifySection {
    /// Optional webhook endpoint; unset means log-only notifications.
    pub webhook_url: Option<String>,
}

/// OCR captcha solver endpoint (`[solver]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SolverSection {
    /// Image-to-text task endpoint. Required to run the engine.
    pub api_url: Option<String>,
    /// API credential passed as `clientKey`.
    pub client_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SolverSection {
    fn default() -> Self {
        Self {
            api_url: None,
            client_key: None,
            timeout_secs: 30,
        }
    }
}

// ── BotConfig ────────────────────────────────────────────────────────────────

/// Complete, validated configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfig {
    pub portal: PortalConfig,
    pub schedule: ScheduleConfig,
    pub session: SessionConfig,
    pub escalation: EscalationSection,
    pub heartbeat: HeartbeatConfig,
    pub health: HealthConfig,
    pub engine: EngineConfig,
    pub notify: NotifySection,
    pub solver: SolverSection,
}

impl BotConfig {
    /// Load from a TOML file (all sections optional), then validate.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BotError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: BotConfig = toml::from_str(&contents)
            .map_err(|e| BotError::Config(format!("invalid TOML in {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus a base URL — enough to run without a file.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            portal: PortalConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.portal.base_url.is_empty() {
            return Err(BotError::Config("portal.base_url is required".into()));
        }
        if self.escalation.captcha_failure_threshold == 0 {
            return Err(BotError::Config(
                "escalation.captcha_failure_threshold must be at least 1".into(),
            ));
        }
        if self.escalation.max_captcha_attempts == 0 {
            return Err(BotError::Config(
                "escalation.max_captcha_attempts must be at least 1".into(),
            ));
        }
        if self.session.max_age_secs == 0 {
            return Err(BotError::Config("session.max_age_secs must be positive".into()));
        }
        if self.schedule.month_priority.is_empty() {
            return Err(BotError::Config("schedule.month_priority must be non-empty".into()));
        }
        if self.schedule.alignment_marks.is_empty() {
            return Err(BotError::Config("schedule.alignment_marks must be non-empty".into()));
        }
        if let Some(&mark) = self.schedule.alignment_marks.iter().find(|&&m| m > 59) {
            return Err(BotError::Config(format!(
                "schedule.alignment_marks: {mark} is not a minute within the hour"
            )));
        }
        if self.schedule.golden_hour_start > 23 || self.schedule.golden_hour_end > 24 {
            return Err(BotError::Config("schedule golden hour bounds out of range".into()));
        }
        if self.schedule.golden_hour_start > self.schedule.golden_hour_end {
            return Err(BotError::Config(
                "schedule.golden_hour_start must not exceed golden_hour_end".into(),
            ));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.escalation.cooldown_secs)
    }
}
