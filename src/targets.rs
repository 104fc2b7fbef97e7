// SPDX-License-Identifier: MIT
//! Priority-ordered queue of appointment months to scan.
//!
//! The scan order is operational policy, not calendar order: the default
//! `[4, 5, 2, 3]` scans four and five months out before the nearer months,
//! because that is where fresh releases land. One pass always covers the
//! full list in priority rank — no randomization, no skipping.

use chrono::{DateTime, Datelike, Utc};

// ── Targets ──────────────────────────────────────────────────────────────────

/// One appointment month to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthTarget {
    /// Months ahead of today (the priority-list entry that produced this).
    pub offset: u32,
    /// Calendar anchor for the portal's `dateStr` parameter, pinned to the
    /// 15th so the request lands mid-month: `DD.MM.YYYY`.
    pub date_str: String,
}

/// Ordered sequence of months to poll, defined by a fixed priority list.
#[derive(Debug, Clone)]
pub struct TargetQueue {
    priority: Vec<u32>,
}

impl TargetQueue {
    pub fn new(priority: Vec<u32>) -> Self {
        Self { priority }
    }

    /// Number of targets in one pass.
    pub fn len(&self) -> usize {
        self.priority.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty()
    }

    /// Build one full scan pass, in priority order, anchored at `today`.
    ///
    /// Offsets are resolved as `today + offset * 30 days`, matching how the
    /// portal's calendar pages are addressed.
    pub fn plan(&self, today: DateTime<Utc>) -> Vec<MonthTarget> {
        self.priority
            .iter()
            .map(|&offset| {
                let anchor = today + chrono::Duration::days(30 * offset as i64);
                MonthTarget {
                    offset,
                    date_str: format!("15.{:02}.{}", anchor.month(), anchor.year()),
                }
            })
            .collect()
    }
}
