//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ TerminalService (domain)
//! ```
//!
//! Driven adapters (transport, storage, display, scanner, radio) implement
//! these traits.  The [`TerminalService`](super::service::TerminalService)
//! receives them bundled in [`Ports`] at every call, so the domain core
//! never touches hardware directly and never owns an adapter.
//!
//! ## Security notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **StoragePort** holds the bearer token and WiFi password; on ESP32 the
//!   NVS partition should be encrypted in production.
//! - **Transport** implementations MUST honour `timeout_ms`.

use crate::config::TerminalConfig;
use crate::error::{HardwareError, NetworkError};

/// Upper-case hex UID of a scanned tag (up to 10 UID bytes).
pub type TagId = heapless::String<20>;

// ───────────────────────────────────────────────────────────────
// Transport port (domain → backend)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One synchronous backend call.  `body`, when present, is JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: Option<String>,
    pub timeout_ms: u32,
}

impl HttpRequest {
    pub fn get(url: String, timeout_ms: u32) -> Self {
        Self {
            method: Method::Get,
            url,
            bearer: None,
            body: None,
            timeout_ms,
        }
    }

    pub fn post_json(url: String, body: String, timeout_ms: u32) -> Self {
        Self {
            method: Method::Post,
            url,
            bearer: None,
            body: Some(body),
            timeout_ms,
        }
    }

    pub fn with_bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_owned());
        self
    }
}

/// Status and raw body of a completed call.  Any status is a completed call;
/// only a transport failure is an `Err` at this boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text; invalid UTF-8 yields an empty string.
    pub fn text(&self) -> &str {
        core::str::from_utf8(&self.body).unwrap_or_default()
    }
}

/// Thin request/response primitive.  Owns no state beyond the call.
pub trait Transport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Well-known keys in the terminal's storage namespace.
///
/// NVS keys are limited to 15 bytes.
pub mod storage_keys {
    pub const DEVICE_ID: &str = "deviceId";
    pub const COMPANY_ID: &str = "companyId";
    pub const TOKEN: &str = "deviceJWT";
    /// Written last and removed first; its presence marks a complete session.
    pub const TOKEN_EXPIRY: &str = "tokenExp";
    pub const WIFI_SSID: &str = "wifi_ssid";
    pub const WIFI_PASS: &str = "wifi_pass";
    pub const DEVICE_SERIAL: &str = "dev_serial";
    pub const DEVICE_SECRET: &str = "dev_secret";
    pub const BOOT_FAILURES: &str = "boot_fail";
}

/// Named scalar fields in persistent storage.
///
/// Missing keys are not errors: `get_*` returns `Ok(None)`.
pub trait StoragePort {
    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn put_str(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn get_u64(&self, key: &str) -> Result<Option<u64>, StorageError>;
    fn put_u64(&mut self, key: &str, value: u64) -> Result<(), StorageError>;
    /// Returns `Ok(())` even if the key didn't exist.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists terminal configuration.
///
/// # Security
///
/// Implementations MUST validate config values before persisting.
/// Invalid values are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Returns [`TerminalConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<TerminalConfig, ConfigError>;

    fn save(&self, config: &TerminalConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

pub trait ClockPort {
    /// Milliseconds since boot.
    fn monotonic_ms(&self) -> u64;

    /// Wall-clock seconds since the Unix epoch, `None` until synced.
    fn epoch_secs(&self) -> Option<u64>;
}

// ───────────────────────────────────────────────────────────────
// Display port (domain → 16x2 character panel)
// ───────────────────────────────────────────────────────────────

pub trait DisplayPort {
    fn show_lines(&mut self, top: &str, bottom: &str);

    /// 0–100.
    fn show_battery_level(&mut self, percent: u8);

    /// One animation step (marquee scroll, gauge blink).
    fn advance_scroll_animation(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Scanner and power ports (hardware → domain)
// ───────────────────────────────────────────────────────────────

pub trait ScannerPort {
    /// Non-blocking.  `Ok(None)` when no tag is in the field.
    fn read_tag(&mut self) -> Result<Option<TagId>, HardwareError>;
}

pub trait PowerSensorPort {
    fn read_battery_percent(&mut self) -> Result<u8, HardwareError>;
}

// ───────────────────────────────────────────────────────────────
// Network port (station link + provisioning portal)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// Station link is up.
    Connected,
    /// New credentials were stored; a restart applies them.
    RestartRequired,
    /// Nobody configured the device in time.
    TimedOut,
}

pub trait NetworkPort {
    fn is_connected(&self) -> bool;

    /// Blocks until connected or until provisioning gives up.
    ///
    /// Stored credentials are read from (and portal results written to)
    /// `storage` under [`storage_keys::WIFI_SSID`] / [`storage_keys::WIFI_PASS`].
    /// `ap_name` names the fallback access point.
    fn obtain_connectivity(
        &mut self,
        ap_name: &str,
        storage: &mut dyn StoragePort,
    ) -> ProvisioningOutcome;
}

// ───────────────────────────────────────────────────────────────
// System port
// ───────────────────────────────────────────────────────────────

pub trait SystemPort {
    /// Reboot.  Does not return on hardware.
    fn restart(&mut self);

    /// Blocking pause, used for boot retries and user-visible notices.
    fn delay_ms(&mut self, ms: u32);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the tasks it drives)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the scheduler invokes when a periodic task is due.
pub trait SchedulerDelegate {
    fn on_task_due(&mut self, task: crate::scheduler::TaskId);
}

// ───────────────────────────────────────────────────────────────
// Port bundles
// ───────────────────────────────────────────────────────────────

/// Everything the terminal service talks to, borrowed for one call.
pub struct Ports<'a> {
    pub transport: &'a mut dyn Transport,
    pub storage: &'a mut dyn StoragePort,
    pub clock: &'a dyn ClockPort,
    pub display: &'a mut dyn DisplayPort,
    pub scanner: &'a mut dyn ScannerPort,
    pub power: &'a mut dyn PowerSensorPort,
    pub network: &'a mut dyn NetworkPort,
    pub system: &'a mut dyn SystemPort,
    pub events: &'a mut dyn EventSink,
}

impl Ports<'_> {
    /// Reborrow the subset needed for backend calls.
    pub fn uplink(&mut self) -> Uplink<'_> {
        Uplink {
            transport: &mut *self.transport,
            storage: &mut *self.storage,
            clock: self.clock,
        }
    }
}

/// The ports a backend call touches: the wire, the session cache, the clock.
pub struct Uplink<'a> {
    pub transport: &'a mut dyn Transport,
    pub storage: &'a mut dyn StoragePort,
    pub clock: &'a dyn ClockPort,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Storage partition is full.
    Full,
    /// Key longer than the backend allows.
    InvalidKey,
    /// Stored value has the wrong type or encoding.
    TypeMismatch,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "storage full"),
            Self::InvalidKey => write!(f, "invalid key"),
            Self::TypeMismatch => write!(f, "stored value has wrong type"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
