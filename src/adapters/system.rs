//! System control adapter: restart and blocking delays.
//!
//! Implements [`SystemPort`].  Delays longer than a watchdog slice feed the
//! task watchdog while they wait.

use log::warn;

use crate::app::ports::SystemPort;
use crate::drivers::watchdog::feed_current_task;

/// Longest sleep between watchdog feeds.
const FEED_SLICE_MS: u32 = 1_000;

#[derive(Debug, Default)]
pub struct EspSystem {
    /// Host builds count restarts instead of rebooting.
    #[cfg(not(target_os = "espidf"))]
    restarts: u32,
}

impl EspSystem {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}

impl SystemPort for EspSystem {
    fn restart(&mut self) {
        warn!("System: restarting");
        #[cfg(target_os = "espidf")]
        // SAFETY: esp_restart never returns.
        unsafe {
            esp_idf_svc::sys::esp_restart();
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.restarts += 1;
        }
    }

    fn delay_ms(&mut self, ms: u32) {
        let mut remaining = ms;
        while remaining > 0 {
            let slice = remaining.min(FEED_SLICE_MS);
            std::thread::sleep(std::time::Duration::from_millis(u64::from(slice)));
            feed_current_task();
            remaining -= slice;
        }
    }
}
