// SPDX-License-Identifier: MIT
//! Error taxonomy for the polling engine.
//!
//! The split matters operationally: transient I/O failures are retried with
//! the engine's normal backoff and never feed the anti-ban counter, while a
//! rejected captcha is exactly what the counter exists to track.

use crate::health::GateReason;

/// Errors surfaced by the engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Network timeout, page load failure, connection reset. Retried with
    /// normal backoff; never counted toward captcha escalation.
    #[error("transient I/O error: {0}")]
    Transient(String),

    /// The portal silently demoted our session (gate marker detected).
    /// Recovered locally by re-authentication.
    #[error("session poisoned: {0}")]
    SessionPoisoned(GateReason),

    /// The portal rejected a solved captcha, or the solver produced no
    /// answer. Fed to the escalation controller.
    #[error("captcha rejected by portal")]
    CaptchaRejected,

    /// Missing or invalid configuration. Fatal at startup — the engine must
    /// not run with undefined thresholds.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BotError {
    /// `true` for failures that increment the captcha failure counter.
    pub fn is_captcha_failure(&self) -> bool {
        matches!(self, BotError::CaptchaRejected)
    }

    /// `true` for failures the engine retries without escalation.
    pub fn is_transient(&self) -> bool {
        matches!(self, BotError::Transient(_))
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        BotError::Transient(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
