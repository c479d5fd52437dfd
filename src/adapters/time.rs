//! ESP32 clock adapter.
//!
//! Implements [`ClockPort`].
//!
//! - **`target_os = "espidf"`**: monotonic time from `esp_timer_get_time()`,
//!   wall-clock time from `gettimeofday()` once SNTP has set it.
//! - **`not(target_os = "espidf")`**: `std::time::Instant` and
//!   `SystemTime`, with an optional pinned epoch for tests.

use crate::app::ports::ClockPort;

/// Anything earlier than 2020-01-01 means the RTC was never set.
const EPOCH_2020: u64 = 1_577_836_800;

pub struct Esp32Clock {
    #[cfg(target_os = "espidf")]
    _sntp: Option<esp_idf_svc::sntp::EspSntp<'static>>,
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
    #[cfg(not(target_os = "espidf"))]
    pinned_epoch: Option<u64>,
}

impl Esp32Clock {
    /// Start SNTP in the background.  Failure leaves the wall clock unset,
    /// which the session layer tolerates.
    #[cfg(target_os = "espidf")]
    pub fn with_sntp() -> Self {
        let sntp = match esp_idf_svc::sntp::EspSntp::new_default() {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("Clock: SNTP unavailable: {:?}", e);
                None
            }
        };
        Self { _sntp: sntp }
    }

    /// Host clock following the system wall clock.
    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
            pinned_epoch: None,
        }
    }

    /// Host clock reporting a fixed wall-clock value (`None` = never synced).
    #[cfg(not(target_os = "espidf"))]
    pub fn with_epoch(epoch_secs: Option<u64>) -> Self {
        Self {
            start: std::time::Instant::now(),
            pinned_epoch: Some(epoch_secs.unwrap_or(0)),
        }
    }

    #[cfg(target_os = "espidf")]
    fn raw_epoch(&self) -> u64 {
        let mut tv = esp_idf_svc::sys::timeval { tv_sec: 0, tv_usec: 0 };
        // SAFETY: valid out-pointer, null timezone.
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return 0;
        }
        u64::try_from(tv.tv_sec).unwrap_or(0)
    }

    #[cfg(not(target_os = "espidf"))]
    fn raw_epoch(&self) -> u64 {
        self.pinned_epoch.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        })
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for Esp32Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for Esp32Clock {
    #[cfg(target_os = "espidf")]
    fn monotonic_ms(&self) -> u64 {
        // SAFETY: reads the high-resolution timer; no preconditions.
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn monotonic_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn epoch_secs(&self) -> Option<u64> {
        let secs = self.raw_epoch();
        (secs >= EPOCH_2020).then_some(secs)
    }
}
