// SPDX-License-Identifier: MIT
//! Session keep-alive probe.
//!
//! A low-frequency background task that fires a minimal request against the
//! portal so the server-side session does not expire during long idle waits
//! between polling passes. Heartbeat failures are recorded and reported but
//! never poison the session by themselves — only content-based gate
//! detection does that (unless the operator opts in via
//! `heartbeat.poison_after_failures`).
//!
//! The probe takes the shared gate lock for the duration of each request so
//! it can never interleave with a captcha submission.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::portal::PortalSession;

/// Rolling heartbeat outcome, read by the engine each loop iteration.
#[derive(Debug, Default, Clone)]
pub struct HeartbeatState {
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
}

pub type SharedHeartbeat = Arc<RwLock<HeartbeatState>>;

pub fn new_shared_heartbeat() -> SharedHeartbeat {
    Arc::new(RwLock::new(HeartbeatState::default()))
}

/// Background task: probe every `interval_secs` until shutdown.
///
/// `gate` is the mutual-exclusion lock shared with the polling engine; only
/// one outstanding gated action against the session at a time.
pub async fn run_heartbeat(
    portal: Arc<dyn PortalSession>,
    gate: Arc<Mutex<()>>,
    state: SharedHeartbeat,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs, "heartbeat probe started");
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    // The immediate first tick would race the engine's login.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    debug!("heartbeat probe stopping");
                    return;
                }
            }
        }

        let result = {
            let _guard = gate.lock().await;
            portal.submit_heartbeat().await
        };

        let mut st = state.write().await;
        match result {
            Ok(()) => {
                if st.consecutive_failures > 0 {
                    info!(
                        after_failures = st.consecutive_failures,
                        "heartbeat recovered"
                    );
                }
                st.consecutive_failures = 0;
                st.last_success_at = Some(Utc::now());
                debug!("heartbeat ok");
            }
            Err(e) => {
                st.consecutive_failures += 1;
                st.total_failures += 1;
                // Network-level only — reported, never fatal here.
                warn!(
                    err = %e,
                    streak = st.consecutive_failures,
                    "heartbeat failed"
                );
            }
        }
    }
}
