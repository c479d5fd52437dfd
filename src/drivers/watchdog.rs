//! Task Watchdog Timer (TWDT) driver.
//!
//! Resets the device if the main loop stalls for longer than the configured
//! timeout.  The run loop feeds it once per iteration; blocking waits inside
//! adapters (WiFi join, provisioning portal) call [`feed_current_task`].

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::info;

pub struct Watchdog {
    timeout_ms: u32,
    #[cfg(target_os = "espidf")]
    subscribed: bool,
}

impl Watchdog {
    /// Configure the TWDT and subscribe the current task.
    pub fn new(timeout_ms: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            let cfg = esp_task_wdt_config_t {
                timeout_ms,
                idle_core_mask: 0,
                trigger_panic: true,
            };
            // SAFETY: plain FFI calls with a valid config pointer; the null
            // handle subscribes the calling task.
            let ret = unsafe { esp_task_wdt_reconfigure(&cfg) };
            if ret != ESP_OK as esp_err_t {
                log::warn!("Watchdog: reconfigure returned {} (may already be configured)", ret);
            }

            let ret = unsafe { esp_task_wdt_add(core::ptr::null_mut()) };
            let subscribed = ret == ESP_OK as esp_err_t;
            if subscribed {
                info!("Watchdog: subscribed ({} ms timeout, panic on trigger)", timeout_ms);
            } else {
                log::warn!("Watchdog: failed to subscribe ({})", ret);
            }

            Self { timeout_ms, subscribed }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("Watchdog(sim): no-op ({} ms)", timeout_ms);
            Self { timeout_ms }
        }
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            feed_current_task();
        }
    }
}

/// Reset the TWDT for the calling task.  Harmless if it is not subscribed.
pub fn feed_current_task() {
    #[cfg(target_os = "espidf")]
    // SAFETY: no arguments; returns an error code for unsubscribed tasks.
    unsafe {
        esp_task_wdt_reset();
    }
}
