//! Scan pipeline: tag identifier → debounced, authenticated backend report.
//!
//! ```text
//!   tag ──▶ debounce ──drop──▶ (nothing)
//!              │
//!              ▼
//!       "Card UID:" ──▶ send_authenticated ──fail──▶ "Send failed"
//!                              │
//!                              ▼
//!          customer │ registered │ acknowledged  ──▶ display
//! ```

use log::{info, warn};

use super::ports::{HttpRequest, Ports, TagId};
use super::session::SessionManager;
use super::wire::{self, ScanReport};
use crate::config::TerminalConfig;
use crate::error::Error;

/// What the backend made of a reported tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Tag belongs to a customer.
    KnownCustomer { name: String, balance: String },
    /// First sighting; the backend queued the tag for onboarding.
    Registered,
    /// Accepted without further detail.
    Acknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// Same tag inside the debounce window; nothing was sent or shown.
    Debounced,
    Reported(ScanOutcome),
    Failed(Error),
}

// ───────────────────────────────────────────────────────────────
// Debounce
// ───────────────────────────────────────────────────────────────

/// Drops repeats of the last admitted tag inside a window.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u64,
    last: Option<(TagId, u64)>,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last: None,
        }
    }

    /// `true` if `tag` may be reported at `now_ms`; admission is recorded.
    pub fn admit(&mut self, tag: &TagId, now_ms: u64) -> bool {
        if let Some((last_tag, at)) = &self.last {
            if last_tag == tag && now_ms.saturating_sub(*at) < self.window_ms {
                return false;
            }
        }
        self.last = Some((tag.clone(), now_ms));
        true
    }
}

// ───────────────────────────────────────────────────────────────
// Pipeline
// ───────────────────────────────────────────────────────────────

pub struct ScanPipeline {
    debounce: Debouncer,
    /// Monotonic deadline of the armed "tap card" prompt.
    prompt_until_ms: Option<u64>,
    prompt_window_ms: u64,
    report_url: String,
    request_timeout_ms: u32,
}

impl ScanPipeline {
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            debounce: Debouncer::new(u64::from(config.scan_debounce_ms)),
            prompt_until_ms: None,
            prompt_window_ms: u64::from(config.scan_prompt_window_ms),
            report_url: config.endpoint(&config.scan_report_path),
            request_timeout_ms: config.request_timeout_ms,
        }
    }

    /// Expect a tag within the prompt window.  No blocking wait.
    pub fn arm_prompt(&mut self, now_ms: u64) {
        self.prompt_until_ms = Some(now_ms.saturating_add(self.prompt_window_ms));
    }

    pub fn prompt_armed(&self, now_ms: u64) -> bool {
        self.prompt_until_ms.is_some_and(|until| now_ms < until)
    }

    /// Consume the prompt flag; `true` if it was armed and unexpired.
    fn take_prompt(&mut self, now_ms: u64) -> bool {
        let armed = self.prompt_armed(now_ms);
        self.prompt_until_ms = None;
        armed
    }

    /// Report one scanned tag and render the result.
    pub fn report(
        &mut self,
        tag: &TagId,
        session: &mut SessionManager,
        ports: &mut Ports<'_>,
    ) -> ScanResult {
        let now = ports.clock.monotonic_ms();
        if !self.debounce.admit(tag, now) {
            return ScanResult::Debounced;
        }

        let heading = if self.take_prompt(now) { "Card read" } else { "Card UID:" };
        ports.display.show_lines(heading, tag);
        info!("Scan: tag {}", tag);

        let url = &self.report_url;
        let timeout = self.request_timeout_ms;
        let sent = session.send_authenticated(&mut ports.uplink(), |s| {
            let body = wire::encode(&ScanReport {
                rfid_uid: tag,
                master_device_id: s.device_id(),
            });
            HttpRequest::post_json(url.clone(), body, timeout)
        });

        match sent {
            Ok(response) => {
                let outcome = wire::decode_scan_reply(&response.body);
                render(&outcome, tag, ports);
                ScanResult::Reported(outcome)
            }
            Err(e) => {
                warn!("Scan: report for {} failed: {}", tag, e);
                ports.display.show_lines("Send failed", "Try again");
                ScanResult::Failed(e)
            }
        }
    }
}

fn render(outcome: &ScanOutcome, tag: &str, ports: &mut Ports<'_>) {
    match outcome {
        ScanOutcome::KnownCustomer { name, balance } => {
            ports.display.show_lines(name, &format!("Bal: {}", balance));
        }
        ScanOutcome::Registered => ports.display.show_lines("Card registered", "for onboarding"),
        ScanOutcome::Acknowledged => ports.display.show_lines("Card sent", tag),
    }
}
