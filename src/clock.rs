// SPDX-License-Identifier: MIT
//! Wall-clock alignment and polling cadence.
//!
//! The portal is believed to release slots on predictable wall-clock marks
//! (`:00`, `:20`, `:40`) and during a nightly "golden hour" window. Patrol
//! sleeps therefore align to the next minute mark rather than using a fixed
//! interval, and the interval tightens sharply as the golden hour approaches:
//!
//! ```text
//! Patrol ──► Warmup (last 15 min) ──► PreAttack (last 30 s) ──► Attack
//! ```

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};

use crate::config::ScheduleConfig;

/// Seconds shaved off an aligned sleep so the engine wakes slightly before
/// the mark.
const READINESS_BUFFER_SECS: i64 = 5;

/// Floor for aligned sleeps; anything shorter would hammer the portal.
const MIN_ALIGNED_SLEEP_SECS: u64 = 10;

// ── Phases ───────────────────────────────────────────────────────────────────

/// Cadence phase derived from the current hour and the golden-hour window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Normal patrol — sleep until the next aligned minute mark.
    Patrol,
    /// Final 15 minutes before the golden hour opens.
    Warmup,
    /// Final 30 seconds before the golden hour opens.
    PreAttack,
    /// Inside the golden hour window.
    Attack,
}

impl Phase {
    /// Classify `now` against the configured golden-hour window
    /// (`[start_hour, end_hour)`).
    pub fn of(now: DateTime<Utc>, cfg: &ScheduleConfig) -> Phase {
        let hour = now.hour();
        if cfg.golden_hour_start == cfg.golden_hour_end {
            // Degenerate window: golden hour disabled.
            return Phase::Patrol;
        }
        if hour >= cfg.golden_hour_start && hour < cfg.golden_hour_end {
            return Phase::Attack;
        }
        // The hour immediately before the window opens.
        let pre_hour = cfg.golden_hour_start.checked_sub(1).unwrap_or(23);
        if hour == pre_hour {
            if now.minute() == 59 && now.second() >= 30 {
                return Phase::PreAttack;
            }
            if now.minute() >= 45 {
                return Phase::Warmup;
            }
        }
        Phase::Patrol
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Patrol => write!(f, "patrol"),
            Phase::Warmup => write!(f, "warmup"),
            Phase::PreAttack => write!(f, "pre_attack"),
            Phase::Attack => write!(f, "attack"),
        }
    }
}

// ── Boundary alignment ───────────────────────────────────────────────────────

/// Smallest aligned time strictly after `now` for the given minute marks.
///
/// Marks are minute values within the hour (e.g. `[0, 20, 40]`). When `now`
/// is past the last mark of the hour, the result rolls into the first mark
/// of the next hour. Re-invoking at a returned boundary yields the *next*
/// boundary, never the same one.
pub fn next_aligned_boundary(now: DateTime<Utc>, marks: &[u32]) -> DateTime<Utc> {
    debug_assert!(!marks.is_empty(), "alignment marks must be non-empty");

    let mut sorted: Vec<u32> = marks.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let top_of_hour = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);

    for &mark in &sorted {
        let candidate = top_of_hour + chrono::Duration::minutes(mark as i64);
        if candidate > now {
            return candidate;
        }
    }
    // Past every mark this hour — first mark of the next hour.
    top_of_hour
        + chrono::Duration::hours(1)
        + chrono::Duration::minutes(sorted[0] as i64)
}

/// Sleep duration until the next polling attempt.
///
/// - Attack: the short golden-hour interval (default 30 s).
/// - PreAttack: sub-second ready interval.
/// - Warmup: short fixed interval.
/// - Patrol: time until the next aligned mark, minus a small readiness
///   buffer, clamped to a 10 s floor.
pub fn sleep_interval(now: DateTime<Utc>, cfg: &ScheduleConfig) -> Duration {
    match Phase::of(now, cfg) {
        Phase::Attack => Duration::from_secs(cfg.golden_interval_secs),
        Phase::PreAttack => Duration::from_millis(cfg.ready_interval_ms),
        Phase::Warmup => Duration::from_secs(cfg.warmup_interval_secs),
        Phase::Patrol => {
            let boundary = next_aligned_boundary(now, &cfg.alignment_marks);
            let until = (boundary - now).num_seconds() - READINESS_BUFFER_SECS;
            Duration::from_secs((until.max(0) as u64).max(MIN_ALIGNED_SLEEP_SECS))
        }
    }
}
