//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::app::scan::ScanOutcome;

/// Adapter that logs every [`AppEvent`] to the serial console.
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started { serial } => info!("START | serial={}", serial),
            AppEvent::SessionRestored { device_id } => {
                info!("AUTH  | restored | device_id={}", device_id);
            }
            AppEvent::LoginSucceeded { device_id } => {
                info!("AUTH  | login ok | device_id={}", device_id);
            }
            AppEvent::LoginFailed(e) => warn!("AUTH  | login failed | {}", e),
            AppEvent::HeartbeatSent => info!("BEAT  | ok"),
            AppEvent::TaskFailed { task, error } => {
                warn!("TASK  | {} failed | {}", task.label(), error);
            }
            AppEvent::CommandsDispatched { received, acked } => {
                info!("CMD   | received={} acked={}", received, acked);
            }
            AppEvent::CommandUnsupported { action } => {
                warn!("CMD   | unsupported action '{}'", action);
            }
            AppEvent::ScanReported { tag, outcome } => match outcome {
                ScanOutcome::KnownCustomer { name, balance } => {
                    info!("SCAN  | {} | customer={} balance={}", tag, name, balance);
                }
                ScanOutcome::Registered => info!("SCAN  | {} | registered", tag),
                ScanOutcome::Acknowledged => info!("SCAN  | {} | sent", tag),
            },
            AppEvent::ScanFailed { tag, error } => warn!("SCAN  | {} | failed | {}", tag, error),
            AppEvent::BatteryLevel(pct) => info!("POWER | battery={}%", pct),
            AppEvent::ConnectivityLost => warn!("NET   | link lost"),
            AppEvent::ConnectivityRestored => info!("NET   | link up"),
            AppEvent::Restarting => warn!("SYS   | restarting"),
            AppEvent::Halted(reason) => error!("SYS   | halted | {}", reason),
        }
    }
}
