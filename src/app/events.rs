//! Outbound application events.
//!
//! The [`TerminalService`](super::service::TerminalService) emits these
//! through the [`EventSink`](super::ports::EventSink) port.  Adapters on the
//! other side decide what to do with them (serial log, test recorder).

use super::scan::ScanOutcome;
use super::service::HaltReason;
use crate::error::{AuthError, Error};
use crate::scheduler::TaskId;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Boot finished; periodic tasks are running.
    Started { serial: String },

    /// Cached session loaded from storage.
    SessionRestored { device_id: String },

    LoginSucceeded { device_id: String },

    LoginFailed(AuthError),

    HeartbeatSent,

    /// A periodic task failed and will retry on its next interval.
    TaskFailed { task: TaskId, error: Error },

    /// One poll dispatched commands.
    CommandsDispatched { received: usize, acked: usize },

    CommandUnsupported { action: String },

    ScanReported { tag: String, outcome: ScanOutcome },

    ScanFailed { tag: String, error: Error },

    BatteryLevel(u8),

    ConnectivityLost,

    ConnectivityRestored,

    /// Device is about to restart.
    Restarting,

    /// Fatal boot failure; device parked.
    Halted(HaltReason),
}
