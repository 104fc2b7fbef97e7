// SPDX-License-Identifier: MIT
//! Authenticated browsing session state.
//!
//! A `Session` is plain data owned exclusively by the polling engine; the
//! health monitor and escalation controller only ever borrow it. The engine
//! enforces the one hard invariant: a `Poisoned` session never submits a
//! booking or captcha action until re-login replaces it.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::health::GateReason;

/// Trust state of a session, from the portal's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Usable for gated actions.
    Active,
    /// The portal has silently demoted this session; only re-login helps.
    Poisoned(GateReason),
    /// Freshly re-authenticated after a poisoning or age-out.
    Reborn,
}

/// One authenticated browsing context against the target portal.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    /// Upper bound on session lifetime before forced renewal.
    pub max_age_secs: u64,
}

impl Session {
    /// New session fresh off a login.
    pub fn new(max_age_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Active,
            created_at: now,
            last_heartbeat_at: now,
            max_age_secs,
        }
    }

    /// Replacement session created after poisoning or expiry.
    pub fn reborn(max_age_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            state: SessionState::Reborn,
            ..Self::new(max_age_secs, now)
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Age exceeded `max_age_secs` — force renewal even if otherwise healthy.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now).num_seconds() >= self.max_age_secs as i64
    }

    pub fn is_poisoned(&self) -> bool {
        matches!(self.state, SessionState::Poisoned(_))
    }

    /// Usable for captcha-gated actions.
    pub fn is_usable(&self) -> bool {
        matches!(self.state, SessionState::Active | SessionState::Reborn)
    }

    /// Mark the session untrusted. Idempotent; the first reason wins.
    pub fn poison(&mut self, reason: GateReason) {
        if !self.is_poisoned() {
            self.state = SessionState::Poisoned(reason);
        }
    }

    /// Record a successful heartbeat.
    pub fn touch_heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_at = now;
    }
}
