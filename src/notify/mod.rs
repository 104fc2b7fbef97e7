// SPDX-License-Identifier: MIT
//! Operator notification channel.
//!
//! The engine reports state changes worth a human's attention: cooldown
//! entry/exit, session poisoning/recovery, slot discovery, and persistent
//! transient-error streaks (to distinguish "site is down" from normal
//! backoff). Delivery is fire-and-forget — a failed notification never
//! stalls the polling loop.

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

/// Event kinds surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    /// Escalation threshold reached; scanning paused for `secs`.
    CooldownEntered { secs: u64 },
    CooldownEnded,
    /// Gate marker detected; re-authentication pending.
    SessionPoisoned { reason: String },
    SessionRecovered,
    /// Day links discovered on a calendar page.
    SlotFound { month: String, count: usize },
    /// Consecutive transient errors exceeded the alert bound.
    TransientErrorStreak { count: u32 },
}

impl NotifyEvent {
    /// Stable event name for structured payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            NotifyEvent::CooldownEntered { .. } => "cooldown_entered",
            NotifyEvent::CooldownEnded => "cooldown_ended",
            NotifyEvent::SessionPoisoned { .. } => "session_poisoned",
            NotifyEvent::SessionRecovered => "session_recovered",
            NotifyEvent::SlotFound { .. } => "slot_found",
            NotifyEvent::TransientErrorStreak { .. } => "transient_error_streak",
        }
    }

    fn message(&self) -> String {
        match self {
            NotifyEvent::CooldownEntered { secs } => {
                format!("captcha failure threshold reached — cooling down for {secs}s")
            }
            NotifyEvent::CooldownEnded => "cooldown elapsed — resuming scans".to_string(),
            NotifyEvent::SessionPoisoned { reason } => {
                format!("session poisoned ({reason}) — re-authenticating")
            }
            NotifyEvent::SessionRecovered => "session recovered".to_string(),
            NotifyEvent::SlotFound { month, count } => {
                format!("{count} day(s) available in month {month}")
            }
            NotifyEvent::TransientErrorStreak { count } => {
                format!("{count} consecutive network failures — portal may be down")
            }
        }
    }
}

/// Notification sink. Implementations must not block the caller on delivery
/// failure.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotifyEvent);
}

// ── Log notifier ─────────────────────────────────────────────────────────────

/// Default sink: structured tracing events only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotifyEvent) {
        match &event {
            NotifyEvent::SlotFound { .. } => {
                info!(kind = event.kind(), "{}", event.message());
            }
            NotifyEvent::CooldownEnded | NotifyEvent::SessionRecovered => {
                info!(kind = event.kind(), "{}", event.message());
            }
            _ => {
                warn!(kind = event.kind(), "{}", event.message());
            }
        }
    }
}

// ── Webhook notifier ─────────────────────────────────────────────────────────

/// POSTs a small JSON payload to a configured URL, and logs locally as well.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: NotifyEvent) {
        LogNotifier.notify(event.clone()).await;

        let payload = json!({
            "kind": event.kind(),
            "message": event.message(),
            "at": chrono::Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.client.post(&self.url).json(&payload).send().await {
            error!(err = %e, kind = event.kind(), "webhook notification failed");
        }
    }
}
