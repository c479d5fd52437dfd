//! Remote command dispatcher.
//!
//! ```text
//!   Idle ──poll──▶ Polling ──commands──▶ Dispatching(cmd) ──▶ Acking ──▶ Idle
//!                     │                         ▲                 │
//!                     └──error──▶ Idle          └──next command───┘
//! ```
//!
//! Every received command gets exactly one ack attempt, in received order.
//! A disruptive command is acked before it runs, so the backend never
//! re-delivers a command the device already acted on.

use log::{info, warn};

use super::ports::{HttpRequest, Ports, storage_keys as keys};
use super::scan::ScanPipeline;
use super::session::SessionManager;
use super::wire::{self, AckRequest};
use crate::config::TerminalConfig;
use crate::error::Error;

// ───────────────────────────────────────────────────────────────
// Command model
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    /// Forget WiFi credentials and restart into provisioning.
    ResetNetwork,
    /// Arm the scan prompt for the next tag.
    StartScan,
    /// Anything else; acked and ignored.
    Unsupported(String),
}

impl CommandAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "reset-network" | "reset_network" | "start_wifi_manager" => Self::ResetNetwork,
            "start-scan" | "start_scan" => Self::StartScan,
            other => Self::Unsupported(other.to_owned()),
        }
    }
}

/// A decoded remote command.  Transient: never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: String,
    pub action: CommandAction,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Polling,
    Dispatching,
    Acking,
}

/// What one poll did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub received: usize,
    /// Ids whose ack the backend accepted.
    pub acked: Vec<String>,
    /// Ids whose single ack attempt failed.
    pub ack_failed: Vec<String>,
    pub unsupported: Vec<String>,
    pub scan_armed: bool,
    pub restarting: bool,
}

// ───────────────────────────────────────────────────────────────
// Dispatcher
// ───────────────────────────────────────────────────────────────

pub struct CommandDispatcher {
    state: DispatcherState,
    poll_url: String,
    ack_url: String,
    request_timeout_ms: u32,
    reset_notice_ms: u32,
}

impl CommandDispatcher {
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            state: DispatcherState::Idle,
            poll_url: config.endpoint(&config.commands_path),
            ack_url: config.endpoint(&config.commands_ack_path),
            request_timeout_ms: config.request_timeout_ms,
            reset_notice_ms: config.reset_notice_ms,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Fetch pending commands and run them in order.
    ///
    /// A failed poll processes nothing; the next scheduled poll retries.
    pub fn poll_and_dispatch(
        &mut self,
        session: &mut SessionManager,
        scan: &mut ScanPipeline,
        ports: &mut Ports<'_>,
    ) -> Result<DispatchReport, Error> {
        self.state = DispatcherState::Polling;
        let commands = self.fetch(session, ports);
        let commands = match commands {
            Ok(c) => c,
            Err(e) => {
                self.state = DispatcherState::Idle;
                return Err(e);
            }
        };

        let mut report = DispatchReport {
            received: commands.len(),
            ..Default::default()
        };
        if !commands.is_empty() {
            info!("Commands: received {}", commands.len());
        }

        for cmd in commands {
            self.state = DispatcherState::Dispatching;
            let acked = self.ack(session, ports, &cmd.id);
            if acked {
                report.acked.push(cmd.id.clone());
            } else {
                report.ack_failed.push(cmd.id.clone());
            }

            match cmd.action {
                CommandAction::ResetNetwork if !acked => {
                    warn!("Commands: reset-network {} not acked, deferring to redelivery", cmd.id);
                }
                CommandAction::ResetNetwork => {
                    self.reset_network(ports);
                    report.restarting = true;
                    // Nothing after a restart request runs.
                    break;
                }
                CommandAction::StartScan => {
                    scan.arm_prompt(ports.clock.monotonic_ms());
                    ports.display.show_lines("Tap card", "to scan");
                    report.scan_armed = true;
                }
                CommandAction::Unsupported(action) => {
                    warn!("Commands: unsupported action '{}' ({})", action, cmd.id);
                    report.unsupported.push(action);
                }
            }
        }

        self.state = DispatcherState::Idle;
        Ok(report)
    }

    fn fetch(
        &self,
        session: &mut SessionManager,
        ports: &mut Ports<'_>,
    ) -> Result<Vec<Command>, Error> {
        let base = &self.poll_url;
        let timeout = self.request_timeout_ms;
        let response = session.send_authenticated(&mut ports.uplink(), |s| {
            HttpRequest::get(
                format!("{}?{}", base, device_query(s.device_id())),
                timeout,
            )
        })?;
        Ok(wire::decode_commands(&response.body)?)
    }

    /// One ack attempt.  `true` when the backend accepted it.
    fn ack(&mut self, session: &mut SessionManager, ports: &mut Ports<'_>, id: &str) -> bool {
        self.state = DispatcherState::Acking;
        let body = wire::encode(&AckRequest { command_id: id });
        let url = &self.ack_url;
        let timeout = self.request_timeout_ms;
        match session.send_authenticated(&mut ports.uplink(), |_| {
            HttpRequest::post_json(url.clone(), body.clone(), timeout)
        }) {
            Ok(_) => {
                info!("Commands: acked {}", id);
                true
            }
            Err(e) => {
                warn!("Commands: ack {} failed: {}", id, e);
                false
            }
        }
    }

    /// Notice, forget credentials, restart.  Runs only after the ack.
    fn reset_network(&mut self, ports: &mut Ports<'_>) {
        info!("Commands: network reset requested");
        ports.display.show_lines("Network reset", "Restarting...");
        ports.system.delay_ms(self.reset_notice_ms);
        for key in [keys::WIFI_SSID, keys::WIFI_PASS] {
            if let Err(e) = ports.storage.remove(key) {
                warn!("Commands: could not clear {}: {}", key, e);
            }
        }
        ports.system.restart();
    }
}

/// `device_id=<id>` with the id form-encoded.
fn device_query(device_id: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("device_id", device_id)
        .finish()
}
