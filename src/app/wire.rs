//! Backend wire schema.
//!
//! Every backend document has a typed request or reply struct here.  Decoding
//! is all-or-nothing: a reply either maps onto a complete domain value or is
//! rejected, never half-applied.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::commands::{Command, CommandAction};
use super::ports::HttpResponse;
use super::scan::ScanOutcome;
use crate::error::{AuthError, ProtocolError};

// ── Requests ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub device_serial: &'a str,
    pub device_type: &'a str,
    pub device_secret: &'a str,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatRequest<'a> {
    pub device_id: &'a str,
    pub device_type: &'a str,
    pub firmware_version: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AckRequest<'a> {
    pub command_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ScanReport<'a> {
    pub rfid_uid: &'a str,
    pub master_device_id: &'a str,
}

/// JSON-encode a request struct.  Our request types cannot fail to encode.
pub fn encode<T: Serialize>(request: &T) -> String {
    serde_json::to_string(request).unwrap_or_default()
}

// ── Login ─────────────────────────────────────────────────────

/// Successful login document.  Missing fields decode as empty and are
/// rejected by [`decode_login`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginGrant {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub company_id: String,
    #[serde(default, alias = "jwt")]
    pub token: String,
    #[serde(
        default,
        alias = "expires_at",
        alias = "tokenExpiresAt",
        deserialize_with = "lenient_u64"
    )]
    pub token_expires_at: u64,
}

/// Rejection document.  Every field is optional and type-tolerant so an
/// odd `code` or `lockedUntil` cannot hide the rejection itself.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, deserialize_with = "lenient_text")]
    error: String,
    #[serde(default, deserialize_with = "lenient_opt_text")]
    code: Option<String>,
    #[serde(default, alias = "attemptsRemaining", deserialize_with = "lenient_opt_u64")]
    attempts_remaining: Option<u64>,
    /// Epoch seconds.  Date strings are not interpreted.
    #[serde(default, alias = "lockedUntil", deserialize_with = "lenient_opt_u64")]
    locked_until: Option<u64>,
}

/// Turn a login reply into a grant or a specific rejection.
pub fn decode_login(response: &HttpResponse) -> Result<LoginGrant, AuthError> {
    if let Ok(err) = serde_json::from_slice::<ErrorBody>(&response.body) {
        if !err.error.trim().is_empty() {
            return Err(classify_rejection(&err));
        }
    }
    if !response.is_success() {
        return Err(AuthError::Status(response.status));
    }
    let grant: LoginGrant =
        serde_json::from_slice(&response.body).map_err(|_| AuthError::Malformed)?;
    if grant.device_id.is_empty()
        || grant.company_id.is_empty()
        || grant.token.is_empty()
        || grant.token_expires_at == 0
    {
        return Err(AuthError::IncompleteGrant);
    }
    Ok(grant)
}

fn classify_rejection(err: &ErrorBody) -> AuthError {
    let invalid = AuthError::InvalidCredentials {
        attempts_remaining: err
            .attempts_remaining
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
    };
    let locked = AuthError::DeviceLocked {
        locked_until: err.locked_until,
    };

    match err.code.as_deref() {
        Some("invalid_credentials") => return invalid,
        Some("device_not_found") => return AuthError::DeviceNotFound,
        Some("device_locked" | "rate_limited") => return locked,
        Some("device_not_registered" | "pending_registration") => {
            return AuthError::NotRegistered;
        }
        _ => {}
    }

    let msg = err.error.to_ascii_lowercase();
    if msg.contains("invalid credential") {
        invalid
    } else if msg.contains("not found") {
        AuthError::DeviceNotFound
    } else if msg.contains("locked") || msg.contains("too many") {
        locked
    } else if msg.contains("not registered") || msg.contains("pending") {
        AuthError::NotRegistered
    } else if err.attempts_remaining.is_some() {
        invalid
    } else if err.locked_until.is_some() {
        locked
    } else {
        AuthError::Other
    }
}

// ── Commands ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CommandList {
    #[serde(default)]
    commands: Vec<WireCommand>,
}

#[derive(Debug, Deserialize)]
struct WireCommand {
    #[serde(deserialize_with = "id_string")]
    id: String,
    action: String,
    #[serde(default)]
    payload: Option<Value>,
}

/// Decode a poll reply.  One bad entry rejects the whole batch.
pub fn decode_commands(body: &[u8]) -> Result<Vec<Command>, ProtocolError> {
    let list: CommandList =
        serde_json::from_slice(body).map_err(|_| ProtocolError::MalformedBody)?;
    list.commands
        .into_iter()
        .map(|c| {
            if c.id.is_empty() {
                return Err(ProtocolError::MissingField("id"));
            }
            if c.action.is_empty() {
                return Err(ProtocolError::MissingField("action"));
            }
            Ok(Command {
                id: c.id,
                action: CommandAction::parse(&c.action),
                payload: c.payload,
            })
        })
        .collect()
}

// ── Scan reply ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ScanReply {
    #[serde(default)]
    customer: Option<CustomerBody>,
    #[serde(default)]
    success: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CustomerBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    balance: Option<Value>,
}

/// Classify a 2xx scan reply.  Anything unrecognised is a plain acknowledgment.
pub fn decode_scan_reply(body: &[u8]) -> ScanOutcome {
    let Ok(reply) = serde_json::from_slice::<ScanReply>(body) else {
        return ScanOutcome::Acknowledged;
    };
    if let Some(customer) = reply.customer.filter(|c| !c.name.is_empty()) {
        let balance = match customer.balance {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s,
            _ => String::from("-"),
        };
        return ScanOutcome::KnownCustomer {
            name: customer.name,
            balance,
        };
    }
    if reply.success == Some(true) {
        return ScanOutcome::Registered;
    }
    ScanOutcome::Acknowledged
}

// ── Field helpers ─────────────────────────────────────────────

/// Accept `"42"` and `42` alike.
fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("command id must be a string or number")),
    }
}

/// Epoch seconds as a number or a numeric string; anything else is 0.
fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Text, or the `message` of an error object; anything else is empty.
fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        },
        _ => String::new(),
    })
}

fn lenient_opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    })
}

/// A number or a numeric string; anything else is absent.
fn lenient_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
