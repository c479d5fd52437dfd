//! Cooperative periodic-task scheduler.
//!
//! Single-threaded and non-preemptive: the run loop calls [`Scheduler::tick`]
//! once per iteration, and every due task runs to completion inside that
//! call.  The scheduler notifies a [`SchedulerDelegate`] rather than running
//! tasks itself, so it knows nothing about the backend, the display, or the
//! session.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  run loop (one tick)                         │
//! │                                                              │
//! │   ┌───────────┐   ┌─────────────┐   ┌────────────────┐       │
//! │   │ Heartbeat │   │ CommandPoll │   │ BatteryRefresh │       │
//! │   │  (network)│   │  (network)  │   │    (local)     │       │
//! │   └─────┬─────┘   └──────┬──────┘   └───────┬────────┘       │
//! │         │  due?          │  due?            │  due?          │
//! │         ▼                ▼                  ▼                │
//! │   ┌────────────────────────────────────────────────────┐     │
//! │   │              SchedulerDelegate                     │     │
//! │   │        (TerminalService task runner)               │     │
//! │   └────────────────────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::app::ports::SchedulerDelegate;
use crate::config::TerminalConfig;
use log::info;

// ═══════════════════════════════════════════════════════════════
//  Task types
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    Heartbeat,
    CommandPoll,
    BatteryRefresh,
}

impl TaskId {
    pub fn label(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::CommandPoll => "command-poll",
            Self::BatteryRefresh => "battery-refresh",
        }
    }

    /// Network tasks are suspended while connectivity is being restored.
    pub fn needs_network(self) -> bool {
        matches!(self, Self::Heartbeat | Self::CommandPoll)
    }
}

/// Fires when `now - last_fired >= interval`; firing sets `last_fired = now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTask {
    interval_ms: u64,
    last_fired_ms: u64,
}

impl PeriodicTask {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_fired_ms: 0,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last_fired_ms(&self) -> u64 {
        self.last_fired_ms
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_fired_ms) >= self.interval_ms
    }

    /// Fire at most once for this `now_ms`.
    pub fn fire_if_due(&mut self, now_ms: u64) -> bool {
        if !self.is_due(now_ms) {
            return false;
        }
        self.last_fired_ms = now_ms;
        true
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

const TASK_COUNT: usize = 3;

pub struct Scheduler {
    /// Fixed firing order: heartbeat, command poll, battery refresh.
    tasks: [(TaskId, PeriodicTask); TASK_COUNT],
    network_enabled: bool,
}

impl Scheduler {
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            tasks: [
                (
                    TaskId::Heartbeat,
                    PeriodicTask::new(u64::from(config.heartbeat_interval_ms)),
                ),
                (
                    TaskId::CommandPoll,
                    PeriodicTask::new(u64::from(config.command_poll_interval_ms)),
                ),
                (
                    TaskId::BatteryRefresh,
                    PeriodicTask::new(u64::from(config.battery_interval_ms)),
                ),
            ],
            network_enabled: true,
        }
    }

    /// Suspend or resume the network tasks.
    pub fn set_network_enabled(&mut self, enabled: bool) {
        if self.network_enabled != enabled {
            info!(
                "Scheduler: network tasks {}",
                if enabled { "resumed" } else { "suspended" }
            );
        }
        self.network_enabled = enabled;
    }

    pub fn network_enabled(&self) -> bool {
        self.network_enabled
    }

    pub fn task(&self, id: TaskId) -> Option<&PeriodicTask> {
        self.tasks.iter().find(|(t, _)| *t == id).map(|(_, task)| task)
    }

    /// Run every due task once, in order.  Returns how many fired.
    ///
    /// A suspended task is not marked fired, so it runs on the first tick
    /// after it is resumed.
    pub fn tick(&mut self, now_ms: u64, delegate: &mut dyn SchedulerDelegate) -> usize {
        let mut fired = 0;
        for (id, task) in &mut self.tasks {
            if id.needs_network() && !self.network_enabled {
                continue;
            }
            if task.fire_if_due(now_ms) {
                delegate.on_task_due(*id);
                fired += 1;
            }
        }
        fired
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
