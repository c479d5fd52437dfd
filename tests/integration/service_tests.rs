//! Terminal service end to end: the boot sequence and the run loop.

use crate::mock_hw::*;

use tagmaster::app::events::AppEvent;
use tagmaster::app::ports::{ProvisioningOutcome, storage_keys as keys};
use tagmaster::app::scan::ScanOutcome;
use tagmaster::app::service::{BootOutcome, HaltReason, TerminalService, TerminalState};
use tagmaster::config::TerminalConfig;
use tagmaster::error::{AuthError, HardwareError, NetworkError};
use tagmaster::scheduler::TaskId;

fn service() -> TerminalService {
    TerminalService::new(config(), identity())
}

fn service_with(cfg: TerminalConfig) -> TerminalService {
    TerminalService::new(cfg, identity())
}

/// Booted service over a cached session.
fn running() -> (Harness, TerminalService) {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "tok-1", 1_900_000_000);
    let mut svc = service();
    assert_eq!(svc.boot(&mut h.ports()), BootOutcome::Ready);
    (h, svc)
}

// ── Boot ──────────────────────────────────────────────────────

#[test]
fn cached_session_boots_without_login() {
    let (h, svc) = running();

    assert_eq!(svc.state(), TerminalState::Running);
    assert_eq!(h.logins(), 0);
    assert_eq!(h.display.lines()[0].0, "Booting...");
    assert_eq!(h.display.last(), Some(("Terminal Ready".into(), SERIAL.into())));
    assert!(h.events.contains(&AppEvent::SessionRestored { device_id: "dev-1".into() }));
    assert!(h.events.contains(&AppEvent::Started { serial: SERIAL.into() }));
    assert_eq!(h.display.battery, vec![80]);
}

#[test]
fn missing_session_logs_in_at_boot() {
    let mut h = Harness::new();
    h.transport.reply(LOGIN, Ok(grant("dev-7", "tok-7", 1_900_000_000)));
    let mut svc = service();

    assert_eq!(svc.boot(&mut h.ports()), BootOutcome::Ready);
    assert_eq!(h.logins(), 1);
    assert_eq!(svc.session().session().unwrap().device_id(), "dev-7");
    assert!(h.events.contains(&AppEvent::LoginSucceeded { device_id: "dev-7".into() }));
}

#[test]
fn bad_credentials_show_attempts_and_halt_without_retry() {
    let mut h = Harness::new();
    h.transport.reply(
        LOGIN,
        Ok(json(401, r#"{"error":"Invalid credentials","attemptsRemaining":2}"#)),
    );
    let mut svc = service();

    let outcome = svc.boot(&mut h.ports());

    let rejected = AuthError::InvalidCredentials { attempts_remaining: Some(2) };
    assert_eq!(outcome, BootOutcome::Halted(HaltReason::AuthRejected(rejected)));
    assert_eq!(svc.state(), TerminalState::Halted(HaltReason::AuthRejected(rejected)));
    assert_eq!(h.logins(), 1);
    assert!(h.display.lines().iter().any(|(_, b)| b.contains('2')));
    assert!(!h.ops().iter().any(|op| matches!(op, Op::Delayed(_))));
    assert_eq!(h.system.restarts, 0);
}

#[test]
fn attempt_count_sent_as_text_still_shows_bad_credentials() {
    let mut h = Harness::new();
    h.transport.reply(
        LOGIN,
        Ok(json(401, r#"{"error":"Invalid credentials","attemptsRemaining":"2"}"#)),
    );
    let mut svc = service();

    let outcome = svc.boot(&mut h.ports());

    let rejected = AuthError::InvalidCredentials { attempts_remaining: Some(2) };
    assert_eq!(outcome, BootOutcome::Halted(HaltReason::AuthRejected(rejected)));
    assert_eq!(h.logins(), 1);
    assert_eq!(
        h.display.last(),
        Some(("Bad credentials".into(), "2 attempts left".into()))
    );
}

#[test]
fn lock_with_a_date_string_halts_as_rejected() {
    let mut h = Harness::new();
    h.transport.reply(
        LOGIN,
        Ok(json(423, r#"{"error":"Device locked","lockedUntil":"2026-10-14T12:00:00Z"}"#)),
    );
    let mut svc = service();

    let outcome = svc.boot(&mut h.ports());

    let locked = AuthError::DeviceLocked { locked_until: None };
    assert_eq!(outcome, BootOutcome::Halted(HaltReason::AuthRejected(locked)));
    assert_eq!(h.logins(), 1);
    assert_eq!(h.display.last(), Some(("Device locked".into(), "Try later".into())));
}

#[test]
fn unknown_device_halts_immediately() {
    let mut h = Harness::new();
    h.transport.reply(LOGIN, Ok(json(404, r#"{"error":"Device not found"}"#)));
    let mut svc = service();

    let outcome = svc.boot(&mut h.ports());

    assert_eq!(
        outcome,
        BootOutcome::Halted(HaltReason::AuthRejected(AuthError::DeviceNotFound))
    );
    assert_eq!(h.logins(), 1);
}

#[test]
fn transient_boot_login_failures_are_retried_then_halt() {
    let mut h = Harness::new();
    for _ in 0..3 {
        h.transport.reply(LOGIN, Err(NetworkError::Timeout));
    }
    let cfg = config();
    let mut svc = service();

    let outcome = svc.boot(&mut h.ports());

    let last = AuthError::Network(NetworkError::Timeout);
    assert_eq!(outcome, BootOutcome::Halted(HaltReason::AuthUnavailable(last)));
    assert_eq!(h.logins(), usize::from(cfg.boot_login_attempts));
    let delays = h
        .ops()
        .iter()
        .filter(|op| **op == Op::Delayed(cfg.boot_login_retry_delay_ms))
        .count();
    assert_eq!(delays, usize::from(cfg.boot_login_attempts) - 1);
    assert_eq!(h.display.last(), Some(("Auth failed".into(), "Service required".into())));
}

#[test]
fn transient_failure_then_success_boots() {
    let mut h = Harness::new();
    h.transport.reply(LOGIN, Ok(json(503, "Service Unavailable")));
    h.transport.reply(LOGIN, Ok(grant("dev-1", "tok-1", 1_900_000_000)));
    let mut svc = service();

    assert_eq!(svc.boot(&mut h.ports()), BootOutcome::Ready);
    assert_eq!(h.logins(), 2);
    assert!(h.events.contains(&AppEvent::LoginFailed(AuthError::Status(503))));
}

#[test]
fn provisioning_timeouts_restart_until_the_limit_then_halt() {
    let mut h = Harness::new();
    h.network.connected = false;
    let limit = config().max_provisioning_restarts;

    for boot in 1..=limit {
        let mut svc = service();
        assert_eq!(svc.boot(&mut h.ports()), BootOutcome::Restarting, "boot {boot}");
        assert_eq!(h.storage.u64(keys::BOOT_FAILURES), Some(u64::from(boot)));
        assert_eq!(h.system.restarts, u32::from(boot));
    }

    let mut svc = service();
    assert_eq!(svc.boot(&mut h.ports()), BootOutcome::Halted(HaltReason::NoNetwork));
    assert_eq!(h.system.restarts, u32::from(limit));
    assert_eq!(h.storage.u64(keys::BOOT_FAILURES), Some(0));
    assert_eq!(h.display.last(), Some(("No network".into(), "Service required".into())));
    assert!(h.events.contains(&AppEvent::Halted(HaltReason::NoNetwork)));
    assert!(h.network.ap_names.iter().all(|n| n == SERIAL));
}

#[test]
fn connecting_clears_the_failure_count() {
    let mut h = Harness::new();
    h.network.connected = false;
    h.network.outcomes.push_back(ProvisioningOutcome::Connected);
    h.storage.seed_u64(keys::BOOT_FAILURES, 2);
    h.transport.reply(LOGIN, Ok(grant("dev-1", "tok-1", 1_900_000_000)));
    let mut svc = service();

    assert_eq!(svc.boot(&mut h.ports()), BootOutcome::Ready);
    assert_eq!(h.storage.u64(keys::BOOT_FAILURES), Some(0));
    assert!(h.display.showed("WiFi Setup"));
}

#[test]
fn new_credentials_restart_and_clear_the_count() {
    let mut h = Harness::new();
    h.network.connected = false;
    h.network.outcomes.push_back(ProvisioningOutcome::RestartRequired);
    h.storage.seed_u64(keys::BOOT_FAILURES, 2);
    let mut svc = service();

    assert_eq!(svc.boot(&mut h.ports()), BootOutcome::Restarting);
    assert_eq!(svc.state(), TerminalState::Restarting);
    assert_eq!(h.system.restarts, 1);
    assert_eq!(h.storage.u64(keys::BOOT_FAILURES), Some(0));
    assert_eq!(h.logins(), 0);
}

// ── Run loop ──────────────────────────────────────────────────

#[test]
fn nothing_is_due_on_the_first_tick() {
    let (mut h, mut svc) = running();
    svc.tick(&mut h.ports());
    assert!(h.sent_to(HEARTBEAT).is_empty());
    assert!(h.sent_to(COMMANDS).is_empty());
    assert_eq!(h.scanner.read_count, 1);
}

#[test]
fn due_tasks_run_with_the_bearer_token() {
    let (mut h, mut svc) = running();
    h.clock.advance(u64::from(config().heartbeat_interval_ms));

    svc.tick(&mut h.ports());

    let beats = h.sent_to(HEARTBEAT);
    assert_eq!(beats.len(), 1);
    let Op::Sent { bearer, body: Some(body), .. } = &beats[0] else { unreachable!() };
    assert_eq!(bearer.as_deref(), Some("tok-1"));
    let v: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(v["device_id"], "dev-1");
    assert_eq!(v["device_type"], "master");
    assert!(h.events.contains(&AppEvent::HeartbeatSent));
    assert_eq!(h.sent_to(COMMANDS).len(), 1);
    assert_eq!(h.display.battery.len(), 2);
    assert!(h.display.animation_steps >= 1);
}

#[test]
fn failed_task_is_reported_and_the_loop_continues() {
    let (mut h, mut svc) = running();
    h.transport.reply(HEARTBEAT, Err(NetworkError::Timeout));
    h.clock.advance(u64::from(config().heartbeat_interval_ms));

    svc.tick(&mut h.ports());

    assert!(h.events.contains(&AppEvent::TaskFailed {
        task: TaskId::Heartbeat,
        error: NetworkError::Timeout.into(),
    }));
    assert_eq!(svc.state(), TerminalState::Running);
    assert_eq!(h.sent_to(COMMANDS).len(), 1);
}

#[test]
fn reset_command_stops_the_loop() {
    let (mut h, mut svc) = running();
    h.transport.reply(
        COMMANDS,
        Ok(json(200, r#"{"commands":[{"id":"c1","action":"reset-network"}]}"#)),
    );
    h.scanner.present("04A1B2C3");
    h.clock.advance(u64::from(config().command_poll_interval_ms));

    svc.tick(&mut h.ports());

    assert_eq!(svc.state(), TerminalState::Restarting);
    assert_eq!(h.system.restarts, 1);
    assert!(h.events.contains(&AppEvent::Restarting));
    assert_eq!(h.scanner.read_count, 0, "no scan after a restart request");

    let sent = h.ops().len();
    h.clock.advance(600_000);
    svc.tick(&mut h.ports());
    assert_eq!(h.ops().len(), sent);
}

#[test]
fn scanned_tag_is_reported() {
    let (mut h, mut svc) = running();
    h.scanner.present("04A1B2C3");
    h.transport.reply(
        SCAN,
        Ok(json(200, r#"{"customer":{"name":"Jane","balance":500}}"#)),
    );

    svc.tick(&mut h.ports());

    assert!(h.events.contains(&AppEvent::ScanReported {
        tag: "04A1B2C3".into(),
        outcome: ScanOutcome::KnownCustomer {
            name: "Jane".into(),
            balance: "500".into()
        },
    }));
    assert_eq!(h.display.last().unwrap().0, "Jane");
}

#[test]
fn scanner_fault_does_not_stop_the_loop() {
    let (mut h, mut svc) = running();
    h.scanner.reads.push_back(Err(HardwareError::BusFault));
    h.scanner.reads.push_back(Err(HardwareError::BusFault));

    svc.tick(&mut h.ports());
    svc.tick(&mut h.ports());

    assert_eq!(svc.state(), TerminalState::Running);
    assert_eq!(h.scanner.read_count, 2);
}

#[test]
fn battery_fault_is_tolerated() {
    let mut h = Harness::new();
    h.storage.seed_session("dev-1", "tok-1", 1_900_000_000);
    h.power.reading = Err(HardwareError::SensorUnavailable);
    let mut svc = service();

    assert_eq!(svc.boot(&mut h.ports()), BootOutcome::Ready);
    assert!(h.display.battery.is_empty());
}

#[test]
fn lost_link_suspends_tasks_until_restored() {
    let (mut h, mut svc) = running();
    h.network.connected = false;
    h.network.outcomes.push_back(ProvisioningOutcome::Connected);
    h.clock.advance(u64::from(config().heartbeat_interval_ms));

    svc.tick(&mut h.ports());

    assert!(h.events.contains(&AppEvent::ConnectivityLost));
    assert!(h.events.contains(&AppEvent::ConnectivityRestored));
    assert!(h.display.showed("WiFi Setup"));
    assert!(h.display.showed("WiFi OK"));
    assert!(svc.scheduler().network_enabled());
    assert_eq!(h.sent_to(HEARTBEAT).len(), 1);
    assert_eq!(svc.state(), TerminalState::Running);
}

#[test]
fn unrecoverable_link_restarts() {
    let (mut h, mut svc) = running();
    h.network.connected = false;
    h.clock.advance(u64::from(config().heartbeat_interval_ms));

    svc.tick(&mut h.ports());

    assert_eq!(svc.state(), TerminalState::Restarting);
    assert_eq!(h.system.restarts, 1);
    assert!(h.sent_to(HEARTBEAT).is_empty());
}

#[test]
fn halted_service_never_ticks() {
    let mut h = Harness::new();
    h.transport.reply(LOGIN, Ok(json(403, r#"{"error":"Device locked"}"#)));
    let mut svc = service_with(config());
    assert!(matches!(svc.boot(&mut h.ports()), BootOutcome::Halted(_)));

    let before = h.ops().len();
    h.scanner.present("04A1B2C3");
    h.clock.advance(600_000);
    svc.tick(&mut h.ports());

    assert_eq!(h.ops().len(), before);
    assert_eq!(h.scanner.read_count, 0);
}

#[test]
fn heartbeat_credential_failure_relogs_once() {
    let (mut h, mut svc) = running();
    h.transport.reply(HEARTBEAT, Ok(json(401, "")));
    h.transport.reply(LOGIN, Ok(grant("dev-1", "tok-2", 1_900_000_000)));
    h.clock.advance(u64::from(config().heartbeat_interval_ms));

    svc.tick(&mut h.ports());

    assert_eq!(h.logins(), 1);
    assert!(h.events.contains(&AppEvent::HeartbeatSent));
    assert_eq!(svc.session().session().unwrap().token(), "tok-2");
}

/// Running service whose cached token is already inside the refresh margin.
fn running_with_expiring_token() -> (Harness, TerminalService) {
    let (h, svc) = running();
    h.clock.epoch.set(Some(1_900_000_000));
    (h, svc)
}

#[test]
fn locked_device_is_not_hammered_with_logins() {
    let (mut h, mut svc) = running_with_expiring_token();
    for _ in 0..20 {
        h.transport.reply(
            LOGIN,
            Ok(json(423, r#"{"error":"Device locked","locked_until":1900009999}"#)),
        );
    }

    for _ in 0..60 {
        h.clock.advance(1_000);
        svc.tick(&mut h.ports());
    }

    assert_eq!(h.logins(), 1);
    assert!(h.sent_to(COMMANDS).is_empty());
    assert!(h.events.contains(&AppEvent::TaskFailed {
        task: TaskId::CommandPoll,
        error: AuthError::DeviceLocked { locked_until: Some(1_900_009_999) }.into(),
    }));
    assert_eq!(svc.state(), TerminalState::Running);
}

#[test]
fn rejection_without_expiry_waits_the_configured_backoff() {
    let (mut h, mut svc) = running_with_expiring_token();
    for _ in 0..20 {
        h.transport.reply(LOGIN, Ok(json(429, r#"{"error":"Too many attempts"}"#)));
    }
    let backoff_ticks = config().login_backoff_ms / 1_000;

    for _ in 0..(backoff_ticks * 2) {
        h.clock.advance(1_000);
        svc.tick(&mut h.ports());
    }

    assert_eq!(h.logins(), 2);
}
