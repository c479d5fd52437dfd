//! Terminal service: the hexagonal core.
//!
//! [`TerminalService`] owns the session manager, command dispatcher, scan
//! pipeline, and scheduler.  All I/O flows through [`Ports`] injected at each
//! call, making the whole boot sequence and run loop testable with mock
//! adapters.
//!
//! One [`tick`](TerminalService::tick) runs, in order:
//!
//! 1. the display animation step, when due;
//! 2. the connectivity check (blocking provisioning if the link is down);
//! 3. every due periodic task;
//! 4. one scanner read, reporting a tag if one is present.

use core::fmt;
use log::{info, warn};

use super::commands::CommandDispatcher;
use super::events::AppEvent;
use super::ports::{
    HttpRequest, Ports, ProvisioningOutcome, SchedulerDelegate, storage_keys as keys,
};
use super::scan::{ScanPipeline, ScanResult};
use super::session::{DeviceIdentity, SessionManager};
use super::wire::{self, HeartbeatRequest};
use crate::config::TerminalConfig;
use crate::error::AuthError;
use crate::scheduler::{PeriodicTask, Scheduler, TaskId};

// ───────────────────────────────────────────────────────────────
// Lifecycle types
// ───────────────────────────────────────────────────────────────

/// Why the device parked itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Provisioning kept timing out.
    NoNetwork,
    /// Backend explicitly refused this device.
    AuthRejected(AuthError),
    /// Every boot login attempt failed without a definitive answer.
    AuthUnavailable(AuthError),
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNetwork => write!(f, "no network after repeated provisioning timeouts"),
            Self::AuthRejected(e) => write!(f, "login rejected: {e}"),
            Self::AuthUnavailable(e) => write!(f, "login unavailable: {e}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Booting,
    Running,
    /// A restart was requested; nothing else runs.
    Restarting,
    Halted(HaltReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    Ready,
    Restarting,
    Halted(HaltReason),
}

// ───────────────────────────────────────────────────────────────
// TerminalService
// ───────────────────────────────────────────────────────────────

pub struct TerminalService {
    config: TerminalConfig,
    session: SessionManager,
    dispatcher: CommandDispatcher,
    scan: ScanPipeline,
    scheduler: Scheduler,
    animation: PeriodicTask,
    state: TerminalState,
    scanner_fault_reported: bool,
    power: PowerReadout,
}

impl TerminalService {
    pub fn new(config: TerminalConfig, identity: DeviceIdentity) -> Self {
        Self {
            session: SessionManager::new(identity, &config),
            dispatcher: CommandDispatcher::new(&config),
            scan: ScanPipeline::new(&config),
            scheduler: Scheduler::new(&config),
            animation: PeriodicTask::new(u64::from(config.animation_step_ms)),
            state: TerminalState::Booting,
            scanner_fault_reported: false,
            power: PowerReadout::default(),
            config,
        }
    }

    pub fn state(&self) -> TerminalState {
        self.state
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn scan(&self) -> &ScanPipeline {
        &self.scan
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ── Boot ──────────────────────────────────────────────────

    /// Cache → connectivity → session.  Only a failure here can halt.
    pub fn boot(&mut self, ports: &mut Ports<'_>) -> BootOutcome {
        info!("TerminalService: booting ({})", self.session.identity().serial());
        ports.display.show_lines("Booting...", "");

        if self.session.restore(ports.storage) {
            if let Some(s) = self.session.session() {
                ports.events.emit(&AppEvent::SessionRestored {
                    device_id: s.device_id().to_owned(),
                });
            }
        }
        self.power.refresh(ports);

        if !ports.network.is_connected() {
            if let Some(outcome) = self.connect_at_boot(ports) {
                return outcome;
            }
        }

        if !self.session.has_fresh_session(ports.clock.epoch_secs()) {
            if let Err(reason) = self.boot_login(ports) {
                return self.halt(reason, ports);
            }
        }

        ports.display.show_lines("Terminal Ready", self.session.identity().serial());
        self.state = TerminalState::Running;
        ports.events.emit(&AppEvent::Started {
            serial: self.session.identity().serial().to_owned(),
        });
        BootOutcome::Ready
    }

    /// `None` when connected; otherwise the outcome boot ends with.
    fn connect_at_boot(&mut self, ports: &mut Ports<'_>) -> Option<BootOutcome> {
        let ap_name = self.session.identity().serial().to_owned();
        ports.display.show_lines("WiFi Setup", &ap_name);

        let outcome = ports.network.obtain_connectivity(&ap_name, &mut *ports.storage);
        let failures = match outcome {
            ProvisioningOutcome::Connected | ProvisioningOutcome::RestartRequired => 0,
            ProvisioningOutcome::TimedOut => ports
                .storage
                .get_u64(keys::BOOT_FAILURES)
                .ok()
                .flatten()
                .unwrap_or(0)
                .saturating_add(1),
        };
        let give_up = failures > u64::from(self.config.max_provisioning_restarts);
        let recorded = if give_up { 0 } else { failures };
        if let Err(e) = ports.storage.put_u64(keys::BOOT_FAILURES, recorded) {
            warn!("TerminalService: could not record boot failures: {}", e);
        }

        match outcome {
            ProvisioningOutcome::Connected => {
                ports.events.emit(&AppEvent::ConnectivityRestored);
                None
            }
            ProvisioningOutcome::TimedOut if give_up => {
                Some(self.halt(HaltReason::NoNetwork, ports))
            }
            ProvisioningOutcome::TimedOut | ProvisioningOutcome::RestartRequired => {
                Some(self.restart(ports))
            }
        }
    }

    /// Bounded login attempts.  Explicit rejections are not retried.
    fn boot_login(&mut self, ports: &mut Ports<'_>) -> Result<(), HaltReason> {
        let attempts = self.config.boot_login_attempts.max(1);
        let mut last = AuthError::Other;

        for attempt in 1..=attempts {
            match self.session.login(&mut ports.uplink()) {
                Ok(()) => {
                    if let Some(s) = self.session.session() {
                        ports.events.emit(&AppEvent::LoginSucceeded {
                            device_id: s.device_id().to_owned(),
                        });
                    }
                    ports.display.show_lines("Login OK", "");
                    return Ok(());
                }
                Err(e) => {
                    ports.events.emit(&AppEvent::LoginFailed(e));
                    let (top, bottom) = auth_notice(&e);
                    ports.display.show_lines(top, &bottom);
                    if e.is_rejection() {
                        return Err(HaltReason::AuthRejected(e));
                    }
                    warn!("TerminalService: boot login {}/{} failed", attempt, attempts);
                    last = e;
                    if attempt < attempts {
                        ports.system.delay_ms(self.config.boot_login_retry_delay_ms);
                    }
                }
            }
        }
        Err(HaltReason::AuthUnavailable(last))
    }

    fn halt(&mut self, reason: HaltReason, ports: &mut Ports<'_>) -> BootOutcome {
        match reason {
            HaltReason::AuthRejected(e) => {
                let (top, bottom) = auth_notice(&e);
                ports.display.show_lines(top, &bottom);
            }
            HaltReason::AuthUnavailable(_) => ports.display.show_lines("Auth failed", "Service required"),
            HaltReason::NoNetwork => ports.display.show_lines("No network", "Service required"),
        }
        self.state = TerminalState::Halted(reason);
        ports.events.emit(&AppEvent::Halted(reason));
        BootOutcome::Halted(reason)
    }

    fn restart(&mut self, ports: &mut Ports<'_>) -> BootOutcome {
        self.state = TerminalState::Restarting;
        ports.events.emit(&AppEvent::Restarting);
        ports.system.restart();
        BootOutcome::Restarting
    }

    // ── Run loop ──────────────────────────────────────────────

    /// One cooperative run-loop iteration.  Does nothing unless running.
    pub fn tick(&mut self, ports: &mut Ports<'_>) {
        if self.state != TerminalState::Running {
            return;
        }

        if self.animation.fire_if_due(ports.clock.monotonic_ms()) {
            ports.display.advance_scroll_animation();
        }

        if !ports.network.is_connected() && !self.restore_connectivity(ports) {
            return;
        }

        let now = ports.clock.monotonic_ms();
        let mut runner = TaskRunner {
            config: &self.config,
            session: &mut self.session,
            dispatcher: &mut self.dispatcher,
            scan: &mut self.scan,
            power: &mut self.power,
            ports: &mut *ports,
            restarting: false,
        };
        self.scheduler.tick(now, &mut runner);
        if runner.restarting {
            self.state = TerminalState::Restarting;
            return;
        }

        self.poll_scanner(ports);
    }

    /// Suspend network tasks and block in provisioning.  `false` means the
    /// device is restarting.
    fn restore_connectivity(&mut self, ports: &mut Ports<'_>) -> bool {
        warn!("TerminalService: connectivity lost");
        ports.events.emit(&AppEvent::ConnectivityLost);
        self.scheduler.set_network_enabled(false);

        let ap_name = self.session.identity().serial().to_owned();
        ports.display.show_lines("WiFi Setup", &ap_name);
        match ports.network.obtain_connectivity(&ap_name, &mut *ports.storage) {
            ProvisioningOutcome::Connected => {
                self.scheduler.set_network_enabled(true);
                ports.events.emit(&AppEvent::ConnectivityRestored);
                ports.display.show_lines("WiFi OK", "");
                true
            }
            ProvisioningOutcome::RestartRequired | ProvisioningOutcome::TimedOut => {
                self.restart(ports);
                false
            }
        }
    }

    fn poll_scanner(&mut self, ports: &mut Ports<'_>) {
        let tag = match ports.scanner.read_tag() {
            Ok(Some(tag)) => tag,
            Ok(None) => return,
            Err(e) => {
                if !self.scanner_fault_reported {
                    warn!("TerminalService: scanner degraded: {}", e);
                    self.scanner_fault_reported = true;
                }
                return;
            }
        };

        match self.scan.report(&tag, &mut self.session, ports) {
            ScanResult::Debounced => {}
            ScanResult::Reported(outcome) => ports.events.emit(&AppEvent::ScanReported {
                tag: tag.as_str().to_owned(),
                outcome,
            }),
            ScanResult::Failed(error) => ports.events.emit(&AppEvent::ScanFailed {
                tag: tag.as_str().to_owned(),
                error,
            }),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Periodic task runner (scheduler delegate)
// ───────────────────────────────────────────────────────────────

struct TaskRunner<'r, 'a> {
    config: &'r TerminalConfig,
    session: &'r mut SessionManager,
    dispatcher: &'r mut CommandDispatcher,
    scan: &'r mut ScanPipeline,
    power: &'r mut PowerReadout,
    ports: &'r mut Ports<'a>,
    restarting: bool,
}

impl SchedulerDelegate for TaskRunner<'_, '_> {
    fn on_task_due(&mut self, task: TaskId) {
        if self.restarting {
            return;
        }
        match task {
            TaskId::Heartbeat => self.heartbeat(),
            TaskId::CommandPoll => self.poll_commands(),
            TaskId::BatteryRefresh => self.power.refresh(self.ports),
        }
    }
}

impl TaskRunner<'_, '_> {
    fn heartbeat(&mut self) {
        let url = self.config.endpoint(&self.config.heartbeat_path);
        let config = self.config;
        let result = self.session.send_authenticated(&mut self.ports.uplink(), |s| {
            let body = wire::encode(&HeartbeatRequest {
                device_id: s.device_id(),
                device_type: &config.device_class,
                firmware_version: &config.firmware_version,
            });
            HttpRequest::post_json(url.clone(), body, config.request_timeout_ms)
        });
        match result {
            Ok(_) => self.ports.events.emit(&AppEvent::HeartbeatSent),
            Err(error) => self.ports.events.emit(&AppEvent::TaskFailed {
                task: TaskId::Heartbeat,
                error,
            }),
        }
    }

    fn poll_commands(&mut self) {
        match self
            .dispatcher
            .poll_and_dispatch(self.session, self.scan, self.ports)
        {
            Ok(report) => {
                for action in &report.unsupported {
                    self.ports.events.emit(&AppEvent::CommandUnsupported {
                        action: action.clone(),
                    });
                }
                if report.received > 0 {
                    self.ports.events.emit(&AppEvent::CommandsDispatched {
                        received: report.received,
                        acked: report.acked.len(),
                    });
                }
                if report.restarting {
                    self.ports.events.emit(&AppEvent::Restarting);
                    self.restarting = true;
                }
            }
            Err(error) => self.ports.events.emit(&AppEvent::TaskFailed {
                task: TaskId::CommandPoll,
                error,
            }),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Battery gauge
// ───────────────────────────────────────────────────────────────

/// Last shown battery level and whether a sensor fault was logged.
#[derive(Debug, Default)]
struct PowerReadout {
    last_percent: Option<u8>,
    fault_reported: bool,
}

impl PowerReadout {
    fn refresh(&mut self, ports: &mut Ports<'_>) {
        match ports.power.read_battery_percent() {
            Ok(pct) => {
                ports.display.show_battery_level(pct);
                if self.last_percent != Some(pct) {
                    ports.events.emit(&AppEvent::BatteryLevel(pct));
                    self.last_percent = Some(pct);
                }
            }
            Err(e) => {
                if !self.fault_reported {
                    warn!("TerminalService: battery gauge degraded: {}", e);
                    self.fault_reported = true;
                }
            }
        }
    }
}

/// Two display lines describing a login failure.
pub fn auth_notice(e: &AuthError) -> (&'static str, String) {
    match e {
        AuthError::InvalidCredentials {
            attempts_remaining: Some(n),
        } => ("Bad credentials", format!("{} attempts left", n)),
        AuthError::InvalidCredentials { attempts_remaining: None } => {
            ("Bad credentials", String::new())
        }
        AuthError::DeviceNotFound => ("Unknown device", String::from("Contact admin")),
        AuthError::DeviceLocked { .. } => ("Device locked", String::from("Try later")),
        AuthError::NotRegistered => ("Not registered", String::from("Contact admin")),
        AuthError::Network(_) => ("Login failed", String::from("No backend")),
        AuthError::Malformed | AuthError::Status(_) | AuthError::IncompleteGrant => {
            ("Login failed", String::from("Bad response"))
        }
        AuthError::Other => ("Login failed", String::new()),
    }
}
