//! Unified error types for the Tagmaster firmware.
//!
//! A single `Error` enum that every backend-facing subsystem converts into.
//! Four classes, each with its own propagation rule:
//!
//! | Class      | Handling                                                 |
//! |------------|----------------------------------------------------------|
//! | `Network`  | transient; absorbed by the task, retried next interval  |
//! | `Auth`     | escalated to the session manager (re-login)             |
//! | `Protocol` | surfaced as a failed call, never partially applied      |
//! | `Hardware` | peripheral degraded, logged, the loop keeps running     |
//!
//! All variants are `Copy` so results can be handed across the scheduler
//! and event sink without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible backend or peripheral operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The backend could not be reached or the call timed out.
    Network(NetworkError),
    /// The session could not be established or was rejected.
    Auth(AuthError),
    /// The backend answered with something we could not accept.
    Protocol(ProtocolError),
    /// A local peripheral failed.
    Hardware(HardwareError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "network: {e}"),
            Self::Auth(e) => write!(f, "auth: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Hardware(e) => write!(f, "hardware: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Network errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// No route to the backend (DNS, connect refused, TLS handshake).
    Unreachable,
    /// The request did not complete within its timeout.
    Timeout,
    /// The station link is down.
    NotConnected,
    /// Read or write failed mid-request.
    Io,
    /// URL scheme the transport cannot speak.
    UnsupportedScheme,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "backend unreachable"),
            Self::Timeout => write!(f, "request timed out"),
            Self::NotConnected => write!(f, "network not connected"),
            Self::Io => write!(f, "I/O error"),
            Self::UnsupportedScheme => write!(f, "unsupported URL scheme"),
        }
    }
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Self::Network(e)
    }
}

// ---------------------------------------------------------------------------
// Authentication errors
// ---------------------------------------------------------------------------

/// Why a login did not yield a usable session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// The login call never got an answer.
    Network(NetworkError),
    /// The answer was not a recognisable login document.
    Malformed,
    /// Backend rejected the device secret.
    InvalidCredentials { attempts_remaining: Option<u32> },
    /// Backend does not know this serial.
    DeviceNotFound,
    /// Too many failures; locked until the given epoch second, if known.
    DeviceLocked { locked_until: Option<u64> },
    /// Device exists but has not been registered to a company yet.
    NotRegistered,
    /// Explicit backend error we have no specific handling for.
    Other,
    /// Non-2xx status without a parseable error body.
    Status(u16),
    /// A grant arrived with one or more empty fields.
    IncompleteGrant,
}

impl AuthError {
    /// Explicit rejections will not go away by asking again.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials { .. }
                | Self::DeviceNotFound
                | Self::DeviceLocked { .. }
                | Self::NotRegistered
        )
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "login call failed: {e}"),
            Self::Malformed => write!(f, "malformed login response"),
            Self::InvalidCredentials {
                attempts_remaining: Some(n),
            } => write!(f, "invalid credentials ({n} attempts remaining)"),
            Self::InvalidCredentials { attempts_remaining: None } => {
                write!(f, "invalid credentials")
            }
            Self::DeviceNotFound => write!(f, "device not found"),
            Self::DeviceLocked {
                locked_until: Some(t),
            } => write!(f, "device locked until {t}"),
            Self::DeviceLocked { locked_until: None } => write!(f, "device locked"),
            Self::NotRegistered => write!(f, "device not registered"),
            Self::Other => write!(f, "login rejected"),
            Self::Status(code) => write!(f, "login returned HTTP {code}"),
            Self::IncompleteGrant => write!(f, "login grant incomplete"),
        }
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Body is not valid JSON or does not match the schema.
    MalformedBody,
    /// Non-2xx status on an authenticated call.
    UnexpectedStatus(u16),
    /// A required field is present but empty.
    MissingField(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedBody => write!(f, "malformed response body"),
            Self::UnexpectedStatus(code) => write!(f, "unexpected HTTP {code}"),
            Self::MissingField(name) => write!(f, "missing field '{name}'"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Hardware errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    /// RFID transceiver missing or not answering with a known version.
    ScannerUnavailable,
    /// SPI/I2C transfer failed.
    BusFault,
    /// ADC read failed.
    SensorUnavailable,
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScannerUnavailable => write!(f, "RFID scanner unavailable"),
            Self::BusFault => write!(f, "bus transfer failed"),
            Self::SensorUnavailable => write!(f, "sensor unavailable"),
        }
    }
}

impl From<HardwareError> for Error {
    fn from(e: HardwareError) -> Self {
        Self::Hardware(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
