// SPDX-License-Identifier: MIT
//! Anti-ban escalation controller.
//!
//! Tracks consecutive captcha failures and enforces a cooldown once the
//! streak reaches the configured threshold — a hard behavioral brake that
//! mimics human back-off under repeated verification prompts.
//!
//! # State machine
//!
//! ```text
//! count=0 ──failure──► 1 ──► 2 ──► 3 ──► 4 ──failure──► Cooldown, count=0
//!    ▲                                                        │
//!    └────────────────── any success ◄────────────────────────┘
//! ```
//!
//! Only captcha-specific failures (OCR mismatch, portal rejection) count.
//! Transient I/O errors never reach this controller — see [`crate::error`].
//! Nothing persists across process restarts.

use std::time::Duration;

use tracing::{debug, warn};

/// Binary classification of a captcha-gated action, derived from whether the
/// portal accepted the solved text — never from solver confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaOutcome {
    Success,
    Failure,
}

/// What the engine should do after recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    /// Keep going.
    Continue,
    /// Stop all scanning for the given duration.
    Cooldown(Duration),
}

/// Configuration for the escalation controller.
///
/// The defaults (5 failures, 120 s) are operator-tuned policy, not a proven
/// safe bound against the portal's actual rate limiting.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Consecutive captcha failures that trigger a cooldown.
    pub failure_threshold: u32,
    /// Enforced pause once the threshold is reached.
    pub cooldown: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(120),
        }
    }
}

/// Pure counter state machine over captcha outcomes.
#[derive(Debug)]
pub struct EscalationController {
    config: EscalationConfig,
    consecutive_failures: u32,
}

impl EscalationController {
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    /// Record a captcha outcome and decide whether to continue or cool down.
    ///
    /// A success resets the streak. The failure that reaches the threshold
    /// returns `Cooldown` exactly once and resets the counter, so the next
    /// streak starts fresh after the pause.
    pub fn record_outcome(&mut self, outcome: CaptchaOutcome) -> EscalationDecision {
        match outcome {
            CaptchaOutcome::Success => {
                if self.consecutive_failures > 0 {
                    debug!(
                        streak = self.consecutive_failures,
                        "captcha success — failure streak reset"
                    );
                }
                self.consecutive_failures = 0;
                EscalationDecision::Continue
            }
            CaptchaOutcome::Failure => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        threshold = self.config.failure_threshold,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "consecutive captcha failures reached threshold — entering cooldown"
                    );
                    self.consecutive_failures = 0;
                    EscalationDecision::Cooldown(self.config.cooldown)
                } else {
                    debug!(
                        streak = self.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "captcha failure recorded"
                    );
                    EscalationDecision::Continue
                }
            }
        }
    }

    /// Current failure streak (for status reporting).
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
