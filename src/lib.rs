// SPDX-License-Identifier: MIT
//! slotwatch — appointment-slot polling with session health and anti-ban
//! scheduling.
//!
//! The core is [`engine::PollingEngine`]: a single-worker loop that scans a
//! bot-defensive portal's calendar months in a fixed priority order, aligned
//! to wall-clock marks, backing off into a cooldown when the portal pushes
//! repeated captchas back. Everything stateful lives in an explicit context
//! owned by the loop — no process-wide singletons, so several independent
//! engines (different portals) can share a process.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod health;
pub mod notify;
pub mod portal;
pub mod session;
pub mod solver;
pub mod stats;
pub mod targets;
