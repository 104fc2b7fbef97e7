// SPDX-License-Identifier: MIT
//! Session health monitor — a pure classifier over fetched page content.
//!
//! `check_health` scans page markup for the known gate markers the portal
//! interposes when it stops trusting a session: the month-captcha gate, the
//! booking-captcha gate, a generic error banner, and a handful of free-text
//! heuristics as a fallback when structural selectors are unavailable.
//! Ordered rules, structural first; first match wins. No I/O, no retries —
//! the caller decides what a poisoned verdict means.
//!
//! `classify_page` answers the separate question "what is this calendar page
//! showing?" with the same priority discipline: slots first, because a page
//! can simultaneously contain slot links and stale captcha markup.

pub mod heartbeat;

use once_cell::sync::Lazy;
use regex::Regex;

// ── Gate markers ─────────────────────────────────────────────────────────────

/// Structural marker for the month-calendar captcha gate.
pub const MONTH_GATE_MARKER: &str = "appointment_captcha_month";
/// Structural marker for the booking-form captcha gate.
pub const BOOKING_GATE_MARKER: &str = "appointment_newAppointmentForm_captchaText";
/// Structural marker for the portal's generic error banner.
pub const ERROR_BANNER_MARKER: &str = "global-error";

/// Free-text fallback heuristics, matched case-insensitively as whole words.
static TEXT_HEURISTICS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(captcha|verification|validating)\b").unwrap());

/// Why a session was classified as poisoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateReason {
    /// `#appointment_captcha_month` present — the calendar is gated.
    MonthGate,
    /// `#appointment_newAppointmentForm_captchaText` present outside a
    /// booking flow — the form is gated.
    BookingGate,
    /// `div.global-error` banner present.
    ErrorBanner,
    /// Free-text heuristic hit ("captcha", "verification", "validating").
    TextHeuristic(String),
    /// Operator-configured extra marker.
    Custom(String),
    /// Consecutive heartbeat failures exceeded the opt-in poison policy.
    HeartbeatLoss,
}

impl std::fmt::Display for GateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateReason::MonthGate => write!(f, "month gate"),
            GateReason::BookingGate => write!(f, "booking gate"),
            GateReason::ErrorBanner => write!(f, "error banner"),
            GateReason::TextHeuristic(word) => write!(f, "text heuristic: {word}"),
            GateReason::Custom(marker) => write!(f, "custom marker: {marker}"),
            GateReason::HeartbeatLoss => write!(f, "heartbeat loss"),
        }
    }
}

/// Verdict of a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    Poisoned(GateReason),
}

// ── Monitor ──────────────────────────────────────────────────────────────────

/// One ordered matcher rule.
#[derive(Debug, Clone)]
struct GateRule {
    marker: String,
    reason: GateReason,
}

/// Gate-marker classifier with an extendable, ordered rule table.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    rules: Vec<GateRule>,
    text_fallback: bool,
}

impl HealthMonitor {
    /// Built-in rules plus operator-configured `extra_markers`, in order:
    /// structural selectors first, custom markers next, free text last.
    pub fn new(extra_markers: &[String]) -> Self {
        let mut rules = vec![
            GateRule {
                marker: MONTH_GATE_MARKER.to_string(),
                reason: GateReason::MonthGate,
            },
            GateRule {
                marker: BOOKING_GATE_MARKER.to_string(),
                reason: GateReason::BookingGate,
            },
            GateRule {
                marker: ERROR_BANNER_MARKER.to_string(),
                reason: GateReason::ErrorBanner,
            },
        ];
        for marker in extra_markers {
            rules.push(GateRule {
                marker: marker.clone(),
                reason: GateReason::Custom(marker.clone()),
            });
        }
        Self {
            rules,
            text_fallback: true,
        }
    }

    /// Classify already-fetched page content. Deterministic and total: any
    /// marker match returns `Poisoned`, otherwise `Healthy`.
    pub fn check_health(&self, page: &str) -> HealthVerdict {
        for rule in &self.rules {
            if page.contains(&rule.marker) {
                return HealthVerdict::Poisoned(rule.reason.clone());
            }
        }
        if self.text_fallback {
            if let Some(m) = TEXT_HEURISTICS.find(page) {
                return HealthVerdict::Poisoned(GateReason::TextHeuristic(
                    m.as_str().to_lowercase(),
                ));
            }
        }
        HealthVerdict::Healthy
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(&[])
    }
}

// ── Page state analysis ──────────────────────────────────────────────────────

/// What a fetched calendar page is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    /// Day links present — slots are bookable right now.
    SlotsFound(usize),
    /// The month has no appointments.
    EmptyCalendar,
    /// The portal rejected the previously-submitted captcha text.
    WrongCode,
    /// A captcha gate is interposed before the calendar.
    CaptchaGate,
    Unknown,
}

static DAY_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"appointment_showDay").unwrap());

/// Classify a calendar page, most important state first.
///
/// Slot links win over everything; an empty-calendar phrase wins over stale
/// captcha markup; a wrong-code banner wins over the gate itself.
pub fn classify_page(page: &str) -> PageState {
    let slots = DAY_LINK.find_iter(page).count();
    if slots > 0 {
        return PageState::SlotsFound(slots);
    }

    let lower = page.to_lowercase();
    // "no appointments" also catches the portal's truncated variants of the
    // full sentence.
    if lower.contains("no appointments") || lower.contains("keine termine") {
        return PageState::EmptyCalendar;
    }
    if lower.contains("entered text was wrong") {
        return PageState::WrongCode;
    }
    if page.contains(MONTH_GATE_MARKER) || lower.contains("captchatext") {
        return PageState::CaptchaGate;
    }
    PageState::Unknown
}
