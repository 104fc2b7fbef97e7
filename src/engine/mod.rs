// SPDX-License-Identifier: MIT
//! Scheduling/polling engine — the orchestrator.
//!
//! Composes the health monitor, escalation controller, target queue and
//! clock alignment into a single-worker attempt loop:
//!
//! ```text
//! Idle ──► Scanning ──(gate detected)──► Recovering ──► Idle
//! ```
//!
//! with an orthogonal `Normal ──(threshold failures)──► Cooldown ──► Normal`
//! machine that pre-empts scanning regardless of session health.
//!
//! Ownership: the engine exclusively owns the `Session`, the escalation
//! counter and the target queue. The heartbeat task is the only other task
//! and shares nothing but the portal handle behind the gate mutex.
//! Cancellation is checked at every sleep boundary and before every gated
//! action, never mid-captcha-submission.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::clock;
use crate::config::BotConfig;
use crate::error::{BotError, Result};
use crate::escalation::{
    CaptchaOutcome, EscalationConfig, EscalationController, EscalationDecision,
};
use crate::health::heartbeat::SharedHeartbeat;
use crate::health::{classify_page, GateReason, HealthMonitor, HealthVerdict, PageState};
use crate::notify::{Notifier, NotifyEvent};
use crate::portal::{CaptchaSolver, PortalSession};
use crate::session::Session;
use crate::stats::RunStats;
use crate::targets::{MonthTarget, TargetQueue};

// ── Actions ──────────────────────────────────────────────────────────────────

/// What the engine decides to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Enforced anti-ban pause; pre-empts everything else.
    Cooldown(Duration),
    /// Session is missing, poisoned or aged out — re-authenticate first.
    Recover(String),
    /// One full priority-ordered scan pass.
    Scan(Vec<MonthTarget>),
}

/// Outcome of one scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// All targets visited (slots may or may not have been seen).
    Completed,
    /// Gate marker detected — pass aborted, recovery required.
    Aborted,
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct PollingEngine {
    config: Arc<BotConfig>,
    portal: Arc<dyn PortalSession>,
    solver: Arc<dyn CaptchaSolver>,
    notifier: Arc<dyn Notifier>,
    monitor: HealthMonitor,
    targets: TargetQueue,
    escalation: EscalationController,
    session: Option<Session>,
    /// Mutual exclusion for gated actions, shared with the heartbeat task.
    gate: Arc<Mutex<()>>,
    heartbeat: SharedHeartbeat,
    pending_cooldown: Option<Duration>,
    /// `true` once any session has existed; later logins count as rebirths.
    had_prior_session: bool,
    transient_streak: u32,
    streak_alerted: bool,
    dry_run: bool,
    pub stats: RunStats,
}

impl PollingEngine {
    pub fn new(
        config: Arc<BotConfig>,
        portal: Arc<dyn PortalSession>,
        solver: Arc<dyn CaptchaSolver>,
        notifier: Arc<dyn Notifier>,
        heartbeat: SharedHeartbeat,
    ) -> Self {
        let monitor = HealthMonitor::new(&config.health.extra_markers);
        let targets = TargetQueue::new(config.schedule.month_priority.clone());
        let escalation = EscalationController::new(EscalationConfig {
            failure_threshold: config.escalation.captcha_failure_threshold,
            cooldown: config.cooldown(),
        });
        Self {
            config,
            portal,
            solver,
            notifier,
            monitor,
            targets,
            escalation,
            session: None,
            gate: Arc::new(Mutex::new(())),
            heartbeat,
            pending_cooldown: None,
            had_prior_session: false,
            transient_streak: 0,
            streak_alerted: false,
            dry_run: false,
            stats: RunStats::default(),
        }
    }

    /// Skip booking-side effects; discovery and notification still run.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Gate mutex shared with the heartbeat task.
    pub fn gate(&self) -> Arc<Mutex<()>> {
        self.gate.clone()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Decide the next step. Priority: cooldown, then recovery, then a scan.
    pub fn next_action(&self) -> Action {
        if let Some(d) = self.pending_cooldown {
            return Action::Cooldown(d);
        }
        let now = Utc::now();
        match &self.session {
            None => Action::Recover("no session".to_string()),
            Some(s) if s.is_poisoned() => Action::Recover(format!("session poisoned: {:?}", s.state)),
            Some(s) if s.is_expired(now) => {
                Action::Recover(format!("session aged out after {}s", s.age(now).num_seconds()))
            }
            Some(_) => Action::Scan(self.targets.plan(now)),
        }
    }

    /// Apply heartbeat bookkeeping: touch the session on success, and — only
    /// when the operator opted in — poison it after N consecutive failures.
    pub async fn apply_heartbeat_state(&mut self) {
        let hb = self.heartbeat.read().await.clone();
        self.stats.heartbeat_failures = hb.total_failures;

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(at) = hb.last_success_at {
            if at > session.last_heartbeat_at {
                session.touch_heartbeat(at);
            }
        }
        if let Some(limit) = self.config.heartbeat.poison_after_failures {
            if hb.consecutive_failures >= limit && session.is_usable() {
                warn!(
                    streak = hb.consecutive_failures,
                    limit, "heartbeat loss exceeded poison policy"
                );
                session.poison(GateReason::HeartbeatLoss);
                self.notifier
                    .notify(NotifyEvent::SessionPoisoned {
                        reason: GateReason::HeartbeatLoss.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Run the attempt loop until `shutdown` flips to `true`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            months = ?self.config.schedule.month_priority,
            marks = ?self.config.schedule.alignment_marks,
            dry_run = self.dry_run,
            "polling engine started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.apply_heartbeat_state().await;

            match self.next_action() {
                Action::Cooldown(d) => {
                    self.notifier
                        .notify(NotifyEvent::CooldownEntered { secs: d.as_secs() })
                        .await;
                    if sleep_or_shutdown(d, &mut shutdown).await {
                        break;
                    }
                    self.pending_cooldown = None;
                    self.notifier.notify(NotifyEvent::CooldownEnded).await;
                    continue;
                }
                Action::Recover(reason) => {
                    info!(%reason, "recovering session");
                    match self.recover_once(&mut shutdown).await {
                        // Usable session — scan right away.
                        Ok(true) => continue,
                        Ok(false) if self.pending_cooldown.is_some() => continue,
                        // Gate not passed (or shutdown) — back off below.
                        Ok(false) => {}
                        Err(e) => self.note_transient(&e).await,
                    }
                }
                Action::Scan(plan) => {
                    if self.scan_pass(&plan, &mut shutdown).await == PassOutcome::Aborted {
                        // Poisoned mid-pass — recover before any further
                        // gated action, not after the next sleep.
                        continue;
                    }
                }
            }

            let interval = clock::sleep_interval(Utc::now(), &self.config.schedule);
            if sleep_or_shutdown(interval, &mut shutdown).await {
                break;
            }
        }

        info!("polling engine stopped");
        self.stats.log_summary();
    }

    // ── Recovery ─────────────────────────────────────────────────────────────

    /// Re-authenticate and pass the entry gate if one is interposed.
    ///
    /// Returns `Ok(true)` when a usable session is in place, `Ok(false)` when
    /// recovery was pre-empted (cooldown triggered, shutdown requested, or
    /// solve attempts exhausted). Transient errors bubble up.
    pub async fn recover_once(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<bool> {
        self.session = None;
        let reborn = self.had_prior_session;

        let mut page = {
            let _guard = self.gate.lock().await;
            self.portal.perform_login().await?
        };
        self.note_io_success();
        self.stats.pages_loaded += 1;

        for attempt in 1..=self.config.escalation.max_captcha_attempts {
            match classify_page(&page) {
                PageState::CaptchaGate | PageState::WrongCode => {
                    if *shutdown.borrow() {
                        return Ok(false);
                    }
                    page = match self.solve_gate(&page, attempt).await? {
                        Some(next_page) => next_page,
                        // Cooldown triggered — abandon recovery for now.
                        None => return Ok(false),
                    };
                }
                _ => break,
            }
        }

        // Still gated after all attempts — give up this round.
        if matches!(
            classify_page(&page),
            PageState::CaptchaGate | PageState::WrongCode
        ) {
            warn!(
                attempts = self.config.escalation.max_captcha_attempts,
                "entry gate not passed — will retry after backoff"
            );
            return Ok(false);
        }

        let now = Utc::now();
        let max_age = self.config.session.max_age_secs;
        let session = if reborn {
            self.stats.rebirths += 1;
            Session::reborn(max_age, now)
        } else {
            Session::new(max_age, now)
        };
        info!(session_id = %session.id, reborn, "session established");
        self.session = Some(session);
        self.had_prior_session = true;
        if reborn {
            self.notifier.notify(NotifyEvent::SessionRecovered).await;
        }
        Ok(true)
    }

    /// Solve and submit one captcha challenge under the gate lock.
    ///
    /// Returns the resulting page on `Some`, or `None` when the escalation
    /// controller ordered a cooldown.
    async fn solve_gate(&mut self, page: &str, attempt: u32) -> Result<Option<String>> {
        let outcome;
        let result_page;

        let answer = match self.portal.extract_captcha_image(page) {
            Ok(image) => match self.solver.solve(&image).await {
                Ok(text) => Some(text),
                Err(e) if e.is_captcha_failure() => None,
                Err(e) => return Err(e),
            },
            Err(e) if e.is_captcha_failure() => None,
            Err(e) => return Err(e),
        };

        match answer {
            Some(text) => {
                // Mid-submission is the one place cancellation must not
                // interrupt; the gate lock also excludes the heartbeat.
                let _guard = self.gate.lock().await;
                let resp = self.portal.submit_captcha(&text).await?;
                outcome = match classify_page(&resp) {
                    PageState::WrongCode | PageState::CaptchaGate => CaptchaOutcome::Failure,
                    _ => CaptchaOutcome::Success,
                };
                result_page = resp;
            }
            None => {
                // Solver produced nothing — counts as a captcha failure, and
                // the stale gate page is all we have to show for it.
                outcome = CaptchaOutcome::Failure;
                result_page = page.to_string();
            }
        }
        self.note_io_success();

        match outcome {
            CaptchaOutcome::Success => {
                self.stats.captchas_solved += 1;
                self.escalation.record_outcome(CaptchaOutcome::Success);
                Ok(Some(result_page))
            }
            CaptchaOutcome::Failure => {
                self.stats.captchas_failed += 1;
                warn!(attempt, "captcha rejected by portal");
                match self.escalation.record_outcome(CaptchaOutcome::Failure) {
                    EscalationDecision::Continue => Ok(Some(result_page)),
                    EscalationDecision::Cooldown(d) => {
                        self.stats.cooldowns += 1;
                        self.pending_cooldown = Some(d);
                        Ok(None)
                    }
                }
            }
        }
    }

    // ── Scanning ─────────────────────────────────────────────────────────────

    /// One full priority-ordered pass over the target queue.
    ///
    /// Aborts immediately when a gate marker is detected — remaining targets
    /// are never scanned on a poisoned session.
    pub async fn scan_pass(
        &mut self,
        plan: &[MonthTarget],
        shutdown: &mut watch::Receiver<bool>,
    ) -> PassOutcome {
        for target in plan {
            if *shutdown.borrow() {
                return PassOutcome::Completed;
            }

            let page = match self.portal.fetch_month_page(target).await {
                Ok(p) => p,
                Err(e) => {
                    self.note_transient(&e).await;
                    continue;
                }
            };
            self.note_io_success();
            self.stats.pages_loaded += 1;

            if let HealthVerdict::Poisoned(reason) = self.monitor.check_health(&page) {
                warn!(month_offset = target.offset, %reason, "gate detected — aborting pass");
                if let Some(session) = self.session.as_mut() {
                    session.poison(reason.clone());
                }
                self.notifier
                    .notify(NotifyEvent::SessionPoisoned {
                        reason: reason.to_string(),
                    })
                    .await;
                return PassOutcome::Aborted;
            }

            match classify_page(&page) {
                PageState::SlotsFound(count) => {
                    self.stats.slots_found += count as u64;
                    info!(
                        month_offset = target.offset,
                        date = %target.date_str,
                        count,
                        "appointment days available"
                    );
                    self.notifier
                        .notify(NotifyEvent::SlotFound {
                            month: target.date_str.clone(),
                            count,
                        })
                        .await;
                    if self.dry_run {
                        info!("dry run — stopping short of booking");
                    }
                    // Booking hand-off is outside the core loop; the pass
                    // ends at discovery either way.
                    self.stats.scans += 1;
                    return PassOutcome::Completed;
                }
                PageState::EmptyCalendar => {}
                // check_health fires on gate markup before we get here;
                // anything else is an unrecognized layout worth a log line.
                other => {
                    tracing::debug!(month_offset = target.offset, state = ?other, "unrecognized page");
                }
            }
        }
        self.stats.scans += 1;
        PassOutcome::Completed
    }

    // ── Transient-error streak tracking ──────────────────────────────────────

    async fn note_transient(&mut self, err: &BotError) {
        self.stats.transient_errors += 1;
        self.transient_streak += 1;
        warn!(err = %err, streak = self.transient_streak, "transient error");
        if self.transient_streak >= self.config.engine.transient_error_alert_threshold
            && !self.streak_alerted
        {
            // Once per streak — distinguishes "site is down" from backoff.
            self.streak_alerted = true;
            self.notifier
                .notify(NotifyEvent::TransientErrorStreak {
                    count: self.transient_streak,
                })
                .await;
        }
    }

    fn note_io_success(&mut self) {
        self.transient_streak = 0;
        self.streak_alerted = false;
    }
}

/// Cancellable pause: returns `true` when shutdown was requested.
async fn sleep_or_shutdown(d: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(d) => false,
        // A dropped sender also ends the run.
        res = shutdown.changed() => res.is_err() || *shutdown.borrow(),
    }
}
