//! Terminal configuration parameters
//!
//! All tunable parameters for the Tagmaster terminal: backend endpoints,
//! task intervals, and session/boot policy.
//! Values can be overridden via NVS (non-volatile storage).

use serde::{Deserialize, Serialize};

/// Core terminal configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalConfig {
    // --- Backend ---
    /// Scheme + host (+ port) of the backend, no trailing slash
    pub api_base: String,
    pub login_path: String,
    pub heartbeat_path: String,
    pub commands_path: String,
    pub commands_ack_path: String,
    pub scan_report_path: String,
    /// Device class sent at login and in heartbeats
    pub device_class: String,
    pub firmware_version: String,
    /// Upper bound for each backend call (milliseconds)
    pub request_timeout_ms: u32,

    // --- Periodic tasks (milliseconds) ---
    pub heartbeat_interval_ms: u32,
    pub command_poll_interval_ms: u32,
    pub battery_interval_ms: u32,
    pub animation_step_ms: u32,

    // --- Scanning ---
    /// Same tag is not reported again within this window
    pub scan_debounce_ms: u32,
    /// How long a `start-scan` command keeps the prompt armed
    pub scan_prompt_window_ms: u32,

    // --- Session ---
    /// Re-login this many seconds before the token expires
    pub token_refresh_margin_secs: u32,
    pub boot_login_attempts: u8,
    pub boot_login_retry_delay_ms: u32,
    /// After a login rejection at runtime, no new login before this long
    /// (unless the backend names the lock expiry)
    pub login_backoff_ms: u32,

    // --- Connectivity ---
    pub wifi_connect_timeout_ms: u32,
    /// Portal gives up and restarts after this long
    pub provisioning_timeout_ms: u32,
    /// Consecutive portal timeouts tolerated before halting
    pub max_provisioning_restarts: u8,

    // --- Run loop ---
    /// Pause between the reset notice and the restart
    pub reset_notice_ms: u32,
    pub loop_idle_ms: u32,
    pub watchdog_timeout_ms: u32,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            // Backend
            api_base: "https://api.tagmaster.io".into(),
            login_path: "/api/device/login".into(),
            heartbeat_path: "/api/device/heartbeat".into(),
            commands_path: "/api/master/commands".into(),
            commands_ack_path: "/api/master/commands/ack".into(),
            scan_report_path: "/api/master/new-rfid".into(),
            device_class: "master".into(),
            firmware_version: env!("CARGO_PKG_VERSION").into(),
            request_timeout_ms: 10_000,

            // Periodic tasks
            heartbeat_interval_ms: 60_000, // 1/min
            command_poll_interval_ms: 5_000,
            battery_interval_ms: 5_000,
            animation_step_ms: 400,

            // Scanning
            scan_debounce_ms: 3_000,
            scan_prompt_window_ms: 30_000,

            // Session
            token_refresh_margin_secs: 3_600, // 1 h
            boot_login_attempts: 3,
            boot_login_retry_delay_ms: 2_000,
            login_backoff_ms: 60_000,

            // Connectivity
            wifi_connect_timeout_ms: 15_000,
            provisioning_timeout_ms: 180_000, // 3 min
            max_provisioning_restarts: 3,

            // Run loop
            reset_notice_ms: 1_500,
            loop_idle_ms: 20,
            watchdog_timeout_ms: 30_000,
        }
    }
}

impl TerminalConfig {
    /// Absolute URL for one of the configured paths.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}
