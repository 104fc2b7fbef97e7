//! End-to-end engine behavior through fake collaborators: gate detection
//! aborts a pass, recovery drives the escalation controller, and the
//! cooldown pre-empts scanning.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use slotwatch::config::BotConfig;
use slotwatch::engine::{Action, PassOutcome, PollingEngine};
use slotwatch::error::{BotError, Result};
use slotwatch::health::heartbeat::{new_shared_heartbeat, SharedHeartbeat};
use slotwatch::notify::{Notifier, NotifyEvent};
use slotwatch::health::GateReason;
use slotwatch::portal::{CaptchaSolver, PortalSession};
use slotwatch::session::SessionState;
use slotwatch::targets::MonthTarget;

// ── Fakes ────────────────────────────────────────────────────────────────────

const CLEAN_PAGE: &str = "<html><body>Unfortunately, there are no appointments available</body></html>";
const GATE_PAGE: &str = r#"<form id="appointment_captcha_month">
  <div style="background:white url('data:image/jpg;base64,aGkh')"></div>
</form>"#;
const SLOTS_PAGE: &str = r#"<a class="arrow" href="x?appointment_showDay=1">Appointments are available</a>"#;

/// Scripted portal: month pages served per offset, login and captcha
/// responses replayed from queues.
struct FakePortal {
    /// Pages keyed by month offset; missing offsets serve a clean page.
    month_pages: Mutex<Vec<(u32, String)>>,
    fetched_offsets: Mutex<Vec<u32>>,
    login_pages: Mutex<Vec<String>>,
    captcha_responses: Mutex<Vec<String>>,
    captcha_submissions: Mutex<u32>,
    /// Upcoming month fetches that fail at the network level.
    fail_fetches: Mutex<u32>,
}

impl FakePortal {
    fn new() -> Self {
        Self {
            month_pages: Mutex::new(Vec::new()),
            fetched_offsets: Mutex::new(Vec::new()),
            login_pages: Mutex::new(vec![CLEAN_PAGE.to_string()]),
            captcha_responses: Mutex::new(Vec::new()),
            captcha_submissions: Mutex::new(0),
            fail_fetches: Mutex::new(0),
        }
    }

    /// Make the next `n` month fetches fail with a transient error.
    fn fail_next_fetches(&self, n: u32) {
        *self.fail_fetches.lock().unwrap() = n;
    }

    fn serve_month(&self, offset: u32, page: &str) {
        self.month_pages.lock().unwrap().push((offset, page.to_string()));
    }

    fn set_login_pages(&self, pages: Vec<&str>) {
        *self.login_pages.lock().unwrap() = pages.into_iter().map(String::from).collect();
    }

    fn set_captcha_responses(&self, pages: Vec<&str>) {
        *self.captcha_responses.lock().unwrap() =
            pages.into_iter().map(String::from).collect();
    }

    fn fetched(&self) -> Vec<u32> {
        self.fetched_offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortalSession for FakePortal {
    async fn fetch_month_page(&self, target: &MonthTarget) -> Result<String> {
        {
            let mut remaining = self.fail_fetches.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BotError::Transient("connection reset".to_string()));
            }
        }
        self.fetched_offsets.lock().unwrap().push(target.offset);
        let pages = self.month_pages.lock().unwrap();
        Ok(pages
            .iter()
            .find(|(o, _)| *o == target.offset)
            .map(|(_, p)| p.clone())
            .unwrap_or_else(|| CLEAN_PAGE.to_string()))
    }

    async fn submit_heartbeat(&self) -> Result<()> {
        Ok(())
    }

    async fn perform_login(&self) -> Result<String> {
        let mut pages = self.login_pages.lock().unwrap();
        if pages.is_empty() {
            return Ok(CLEAN_PAGE.to_string());
        }
        Ok(pages.remove(0))
    }

    fn extract_captcha_image(&self, page: &str) -> Result<Vec<u8>> {
        if page.contains("base64,") {
            Ok(vec![1, 2, 3])
        } else {
            Err(BotError::CaptchaRejected)
        }
    }

    async fn submit_captcha(&self, _answer: &str) -> Result<String> {
        *self.captcha_submissions.lock().unwrap() += 1;
        let mut responses = self.captcha_responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(CLEAN_PAGE.to_string());
        }
        Ok(responses.remove(0))
    }
}

struct FixedSolver;

#[async_trait]
impl CaptchaSolver for FixedSolver {
    async fn solve(&self, _image: &[u8]) -> Result<String> {
        Ok("abc123".to_string())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingNotifier {
    fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
    }

    fn count(&self, kind: &str) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: NotifyEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn engine_with_parts(
    config: BotConfig,
    portal: Arc<FakePortal>,
    notifier: Arc<RecordingNotifier>,
    heartbeat: SharedHeartbeat,
) -> PollingEngine {
    PollingEngine::new(Arc::new(config), portal, Arc::new(FixedSolver), notifier, heartbeat)
}

fn engine_with(
    portal: Arc<FakePortal>,
    notifier: Arc<RecordingNotifier>,
) -> PollingEngine {
    engine_with_parts(
        BotConfig::with_base_url("https://portal.example/x"),
        portal,
        notifier,
        new_shared_heartbeat(),
    )
}

fn shutdown_rx() -> tokio::sync::watch::Receiver<bool> {
    let (tx, rx) = tokio::sync::watch::channel(false);
    // Keep the sender alive for the duration of the test.
    std::mem::forget(tx);
    rx
}

// ── Scan plan ordering ───────────────────────────────────────────────────────

#[tokio::test]
async fn scan_plan_follows_priority_order() {
    let portal = Arc::new(FakePortal::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut engine = engine_with(portal.clone(), notifier);
    let mut rx = shutdown_rx();

    assert!(engine.recover_once(&mut rx).await.unwrap());
    let Action::Scan(plan) = engine.next_action() else {
        panic!("expected a scan after recovery");
    };
    let offsets: Vec<u32> = plan.iter().map(|t| t.offset).collect();
    assert_eq!(offsets, vec![4, 5, 2, 3]);

    engine.scan_pass(&plan, &mut rx).await;
    assert_eq!(portal.fetched(), vec![4, 5, 2, 3], "no skipping, no reordering");
}

// ── Gate detection aborts the pass ───────────────────────────────────────────

#[tokio::test]
async fn month_gate_aborts_pass_and_requests_recovery() {
    let portal = Arc::new(FakePortal::new());
    portal.serve_month(4, GATE_PAGE);
    let notifier = Arc::new(RecordingNotifier::default());
    let mut engine = engine_with(portal.clone(), notifier.clone());
    let mut rx = shutdown_rx();

    assert!(engine.recover_once(&mut rx).await.unwrap());
    let Action::Scan(plan) = engine.next_action() else {
        panic!("expected a scan");
    };

    let outcome = engine.scan_pass(&plan, &mut rx).await;
    assert_eq!(outcome, PassOutcome::Aborted);
    // First target only — a poisoned session never scans the rest.
    assert_eq!(portal.fetched(), vec![4]);
    assert!(notifier.kinds().contains(&"session_poisoned"));

    // The engine's next decision is recovery, not another scan.
    assert!(matches!(engine.next_action(), Action::Recover(_)));
}

// ── Slot discovery notifies and ends the pass ────────────────────────────────

#[tokio::test]
async fn slot_discovery_notifies_operator() {
    let portal = Arc::new(FakePortal::new());
    portal.serve_month(5, SLOTS_PAGE);
    let notifier = Arc::new(RecordingNotifier::default());
    let mut engine = engine_with(portal.clone(), notifier.clone());
    let mut rx = shutdown_rx();

    assert!(engine.recover_once(&mut rx).await.unwrap());
    let Action::Scan(plan) = engine.next_action() else {
        panic!("expected a scan");
    };
    let outcome = engine.scan_pass(&plan, &mut rx).await;

    assert_eq!(outcome, PassOutcome::Completed);
    // Pass stops at discovery: offsets 4 then 5, never 2 or 3.
    assert_eq!(portal.fetched(), vec![4, 5]);
    assert!(notifier.kinds().contains(&"slot_found"));
    assert_eq!(engine.stats.slots_found, 1);
}

// ── Fifth rejection triggers the cooldown ────────────────────────────────────

#[tokio::test]
async fn five_captcha_rejections_enter_cooldown() {
    let portal = Arc::new(FakePortal::new());
    // Login lands on a gate; every submitted answer bounces back to it.
    portal.set_login_pages(vec![GATE_PAGE]);
    portal.set_captcha_responses(vec![
        GATE_PAGE, GATE_PAGE, GATE_PAGE, GATE_PAGE, GATE_PAGE,
    ]);
    let notifier = Arc::new(RecordingNotifier::default());
    let mut engine = engine_with(portal.clone(), notifier.clone());
    let mut rx = shutdown_rx();

    let recovered = engine.recover_once(&mut rx).await.unwrap();
    assert!(!recovered, "recovery must yield to the cooldown");
    assert_eq!(*portal.captcha_submissions.lock().unwrap(), 5);
    assert_eq!(engine.stats.captchas_failed, 5);
    assert_eq!(engine.stats.cooldowns, 1);

    match engine.next_action() {
        Action::Cooldown(d) => assert_eq!(d.as_secs(), 120),
        other => panic!("cooldown must pre-empt everything, got {other:?}"),
    }
}

// ── Recovery through a solvable gate ─────────────────────────────────────────

#[tokio::test]
async fn recovery_passes_gate_and_reports_rebirth() {
    let portal = Arc::new(FakePortal::new());
    // First login is clean; second login (after poisoning) hits a gate that
    // clears on the first solve.
    portal.set_login_pages(vec![CLEAN_PAGE, GATE_PAGE]);
    portal.set_captcha_responses(vec![CLEAN_PAGE]);
    portal.serve_month(4, GATE_PAGE);
    let notifier = Arc::new(RecordingNotifier::default());
    let mut engine = engine_with(portal.clone(), notifier.clone());
    let mut rx = shutdown_rx();

    assert!(engine.recover_once(&mut rx).await.unwrap());
    let Action::Scan(plan) = engine.next_action() else {
        panic!("expected a scan");
    };
    assert_eq!(engine.scan_pass(&plan, &mut rx).await, PassOutcome::Aborted);

    // Second recovery: gate solved, session reborn.
    assert!(engine.recover_once(&mut rx).await.unwrap());
    assert_eq!(engine.stats.rebirths, 1);
    assert_eq!(engine.stats.captchas_solved, 1);
    assert!(notifier.kinds().contains(&"session_recovered"));
    assert!(engine.session().unwrap().is_usable());
}

// ── Transient-error streak alerting ──────────────────────────────────────────

#[tokio::test]
async fn transient_streak_alerts_once_then_resets_on_success() {
    let portal = Arc::new(FakePortal::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut config = BotConfig::with_base_url("https://portal.example/x");
    config.engine.transient_error_alert_threshold = 3;
    let mut engine =
        engine_with_parts(config, portal.clone(), notifier.clone(), new_shared_heartbeat());
    let mut rx = shutdown_rx();

    assert!(engine.recover_once(&mut rx).await.unwrap());
    let Action::Scan(plan) = engine.next_action() else {
        panic!("expected a scan");
    };

    // All four fetches of the pass fail: the threshold is crossed at the
    // third, and the fourth must not re-alert within the same streak.
    portal.fail_next_fetches(4);
    assert_eq!(engine.scan_pass(&plan, &mut rx).await, PassOutcome::Completed);
    assert_eq!(notifier.count("transient_error_streak"), 1);
    assert_eq!(engine.stats.transient_errors, 4);

    // A clean pass resets the streak.
    engine.scan_pass(&plan, &mut rx).await;

    // Below the threshold after a reset: no new alert.
    portal.fail_next_fetches(2);
    engine.scan_pass(&plan, &mut rx).await;
    assert_eq!(notifier.count("transient_error_streak"), 1);

    // A fresh streak crossing the threshold alerts again.
    portal.fail_next_fetches(3);
    engine.scan_pass(&plan, &mut rx).await;
    assert_eq!(notifier.count("transient_error_streak"), 2);
}

// ── Heartbeat-loss poison policy ─────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_failures_never_poison_by_default() {
    let portal = Arc::new(FakePortal::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let heartbeat = new_shared_heartbeat();
    let mut engine = engine_with_parts(
        BotConfig::with_base_url("https://portal.example/x"),
        portal,
        notifier.clone(),
        heartbeat.clone(),
    );
    let mut rx = shutdown_rx();
    assert!(engine.recover_once(&mut rx).await.unwrap());

    {
        let mut hb = heartbeat.write().await;
        hb.consecutive_failures = 50;
        hb.total_failures = 50;
    }
    engine.apply_heartbeat_state().await;

    assert!(engine.session().unwrap().is_usable());
    assert!(!notifier.kinds().contains(&"session_poisoned"));
    // Failures are still surfaced through the run counters.
    assert_eq!(engine.stats.heartbeat_failures, 50);
}

#[tokio::test]
async fn heartbeat_failures_poison_when_opted_in() {
    let portal = Arc::new(FakePortal::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let heartbeat = new_shared_heartbeat();
    let mut config = BotConfig::with_base_url("https://portal.example/x");
    config.heartbeat.poison_after_failures = Some(3);
    let mut engine = engine_with_parts(config, portal, notifier.clone(), heartbeat.clone());
    let mut rx = shutdown_rx();
    assert!(engine.recover_once(&mut rx).await.unwrap());

    // One failure short of the policy: still trusted.
    heartbeat.write().await.consecutive_failures = 2;
    engine.apply_heartbeat_state().await;
    assert!(engine.session().unwrap().is_usable());

    heartbeat.write().await.consecutive_failures = 3;
    engine.apply_heartbeat_state().await;

    let session = engine.session().unwrap();
    assert!(session.is_poisoned());
    assert_eq!(
        session.state,
        SessionState::Poisoned(GateReason::HeartbeatLoss)
    );
    assert!(notifier.kinds().contains(&"session_poisoned"));
    assert!(matches!(engine.next_action(), Action::Recover(_)));
}
