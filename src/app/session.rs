//! Session manager: device identity, bearer token, and re-authentication.
//!
//! ## Lifecycle
//!
//! ```text
//!   restore() ──▶ [cached Session?] ──no──▶ login()
//!                        │                     │
//!                       yes                  grant ──▶ persist()
//!                        ▼                     ▼
//!              ensure_authenticated() ◀── Session
//!                        │
//!                 authenticated call ──fail──▶ on_authenticated_call_failed()
//!                                                   │
//!                                   credential failure? ──▶ one re-login ──▶ RetryOnce
//! ```
//!
//! The session is all-or-nothing: [`Session`] can only be built from four
//! non-empty fields, and the manager holds `Option<Session>`.  A failed login
//! never touches the held value.

use core::fmt;
use log::{debug, info, warn};

use super::ports::{
    HttpRequest, HttpResponse, StorageError, StoragePort, Uplink, storage_keys as keys,
};
use super::wire::{self, LoginGrant, LoginRequest};
use crate::config::TerminalConfig;
use crate::error::{AuthError, Error, NetworkError, ProtocolError};

// ───────────────────────────────────────────────────────────────
// Device identity
// ───────────────────────────────────────────────────────────────

/// Fixed per-unit credentials.  The secret only leaves the device inside
/// the login payload.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    serial: String,
    secret: String,
    device_class: String,
}

impl DeviceIdentity {
    pub fn new(serial: &str, secret: &str, device_class: &str) -> Self {
        Self {
            serial: serial.to_owned(),
            secret: secret.to_owned(),
            device_class: device_class.to_owned(),
        }
    }

    /// Provisioned serial/secret from storage, falling back to the
    /// MAC-derived serial and the build-time secret.
    pub fn resolve(
        storage: &dyn StoragePort,
        fallback_serial: &str,
        device_class: &str,
    ) -> Self {
        let stored = |key| storage.get_str(key).ok().flatten().filter(|v| !v.is_empty());
        let serial = stored(keys::DEVICE_SERIAL).unwrap_or_else(|| fallback_serial.to_owned());
        let secret = stored(keys::DEVICE_SECRET)
            .or_else(|| option_env!("TAGMASTER_DEVICE_SECRET").map(str::to_owned))
            .unwrap_or_default();
        if secret.is_empty() {
            warn!("Identity: no device secret provisioned for {}", serial);
        }
        Self {
            serial,
            secret,
            device_class: device_class.to_owned(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn device_class(&self) -> &str {
        &self.device_class
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("serial", &self.serial)
            .field("secret", &"<redacted>")
            .field("device_class", &self.device_class)
            .finish()
    }
}

// ───────────────────────────────────────────────────────────────
// Session
// ───────────────────────────────────────────────────────────────

/// An authenticated session.  Always complete.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    device_id: String,
    company_id: String,
    token: String,
    token_expires_at: u64,
}

impl Session {
    /// `None` unless every field is populated.
    pub fn new(device_id: String, company_id: String, token: String, token_expires_at: u64) -> Option<Self> {
        if device_id.is_empty() || company_id.is_empty() || token.is_empty() || token_expires_at == 0 {
            return None;
        }
        Some(Self {
            device_id,
            company_id,
            token,
            token_expires_at,
        })
    }

    fn from_grant(grant: LoginGrant) -> Option<Self> {
        Self::new(grant.device_id, grant.company_id, grant.token, grant.token_expires_at)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_expires_at(&self) -> u64 {
        self.token_expires_at
    }

    /// Usable for at least `margin_secs` more.  Without a wall clock the
    /// token is trusted until the backend says otherwise.
    pub fn is_fresh(&self, now_epoch_secs: Option<u64>, margin_secs: u64) -> bool {
        match now_epoch_secs {
            Some(now) => now.saturating_add(margin_secs) < self.token_expires_at,
            None => true,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("company_id", &self.company_id)
            .field("token", &"<redacted>")
            .field("token_expires_at", &self.token_expires_at)
            .finish()
    }
}

// ───────────────────────────────────────────────────────────────
// Failure classification
// ───────────────────────────────────────────────────────────────

/// How an authenticated call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The request never completed.
    Network(NetworkError),
    /// The backend answered with a non-2xx status.
    Rejected(HttpResponse),
}

impl CallFailure {
    pub fn into_error(self) -> Error {
        match self {
            Self::Network(e) => Error::Network(e),
            Self::Rejected(resp) if is_credential_failure(&resp) => {
                Error::Auth(AuthError::Status(resp.status))
            }
            Self::Rejected(resp) => Error::Protocol(ProtocolError::UnexpectedStatus(resp.status)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// A fresh session is in place; send the call once more.
    RetryOnce,
    /// Report the failure; do not retry.
    GiveUp,
}

const TOKEN_FAILURE_MARKERS: &[&str] = &[
    "invalid token",
    "invalid_token",
    "token expired",
    "jwt expired",
    "expired",
    "unauthorized",
];

/// 401/403, or a body that names the token as the problem.
pub fn is_credential_failure(resp: &HttpResponse) -> bool {
    if matches!(resp.status, 401 | 403) {
        return true;
    }
    let body = resp.text().to_ascii_lowercase();
    TOKEN_FAILURE_MARKERS.iter().any(|m| body.contains(m))
}

// ───────────────────────────────────────────────────────────────
// Session manager
// ───────────────────────────────────────────────────────────────

/// A recent login rejection and the monotonic time before which the gate
/// will not ask again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoginBackoff {
    error: AuthError,
    until_ms: u64,
}

pub struct SessionManager {
    identity: DeviceIdentity,
    session: Option<Session>,
    login_url: String,
    request_timeout_ms: u32,
    refresh_margin_secs: u64,
    login_backoff_ms: u64,
    backoff: Option<LoginBackoff>,
    /// Login calls sent since boot.
    login_attempts: u32,
}

impl SessionManager {
    pub fn new(identity: DeviceIdentity, config: &TerminalConfig) -> Self {
        Self {
            identity,
            session: None,
            login_url: config.endpoint(&config.login_path),
            request_timeout_ms: config.request_timeout_ms,
            refresh_margin_secs: u64::from(config.token_refresh_margin_secs),
            login_backoff_ms: u64::from(config.login_backoff_ms),
            backoff: None,
            login_attempts: 0,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn login_attempts(&self) -> u32 {
        self.login_attempts
    }

    /// Monotonic time before which the gate will not log in, if blocked.
    pub fn login_blocked_until(&self) -> Option<u64> {
        self.backoff.map(|b| b.until_ms)
    }

    /// Held session that is not about to expire.
    pub fn has_fresh_session(&self, now_epoch_secs: Option<u64>) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.is_fresh(now_epoch_secs, self.refresh_margin_secs))
    }

    // ── Cache ─────────────────────────────────────────────────

    /// Load the cached session.  Any missing field means no session.
    pub fn restore(&mut self, storage: &dyn StoragePort) -> bool {
        let text = |key| storage.get_str(key).ok().flatten().unwrap_or_default();
        let expiry = storage.get_u64(keys::TOKEN_EXPIRY).ok().flatten().unwrap_or(0);
        match Session::new(text(keys::DEVICE_ID), text(keys::COMPANY_ID), text(keys::TOKEN), expiry) {
            Some(s) => {
                info!("Session: restored cached session (device_id={})", s.device_id());
                self.session = Some(s);
                true
            }
            None => {
                info!("Session: no complete cached session");
                false
            }
        }
    }

    fn persist(storage: &mut dyn StoragePort, s: &Session) -> Result<(), StorageError> {
        storage.remove(keys::TOKEN_EXPIRY)?;
        storage.put_str(keys::DEVICE_ID, &s.device_id)?;
        storage.put_str(keys::COMPANY_ID, &s.company_id)?;
        storage.put_str(keys::TOKEN, &s.token)?;
        storage.put_u64(keys::TOKEN_EXPIRY, s.token_expires_at)
    }

    // ── Login ─────────────────────────────────────────────────

    /// Exchange identity for a fresh session.  On any failure the held
    /// session is left exactly as it was.
    pub fn login(&mut self, link: &mut Uplink<'_>) -> Result<(), AuthError> {
        let body = wire::encode(&LoginRequest {
            device_serial: &self.identity.serial,
            device_type: &self.identity.device_class,
            device_secret: &self.identity.secret,
        });
        let request = HttpRequest::post_json(self.login_url.clone(), body, self.request_timeout_ms);

        self.login_attempts = self.login_attempts.saturating_add(1);
        let response = link.transport.send(&request).map_err(AuthError::Network)?;
        let session = match wire::decode_login(&response)
            .and_then(|grant| Session::from_grant(grant).ok_or(AuthError::IncompleteGrant))
        {
            Ok(session) => session,
            Err(e) => {
                warn!("Session: login failed: {}", e);
                if e.is_rejection() {
                    self.backoff = Some(self.backoff_for(e, link));
                }
                return Err(e);
            }
        };

        if let Err(e) = Self::persist(link.storage, &session) {
            warn!("Session: could not persist session ({}), keeping it in memory", e);
        }
        info!(
            "Session: login OK (device_id={}, expires_at={})",
            session.device_id(),
            session.token_expires_at()
        );
        self.session = Some(session);
        self.backoff = None;
        Ok(())
    }

    fn backoff_for(&self, error: AuthError, link: &Uplink<'_>) -> LoginBackoff {
        let now_ms = link.clock.monotonic_ms();
        let lock_ms = match (error, link.clock.epoch_secs()) {
            (AuthError::DeviceLocked { locked_until: Some(until) }, Some(now)) if until > now => {
                Some((until - now).saturating_mul(1_000))
            }
            _ => None,
        };
        let wait_ms = lock_ms.unwrap_or(self.login_backoff_ms);
        info!("Session: no new login for {} ms", wait_ms);
        LoginBackoff {
            error,
            until_ms: now_ms.saturating_add(wait_ms),
        }
    }

    /// Login unless a recent rejection is still in force.
    fn login_unless_blocked(&mut self, link: &mut Uplink<'_>) -> Result<(), AuthError> {
        if let Some(b) = self.backoff {
            if link.clock.monotonic_ms() < b.until_ms {
                debug!("Session: login suppressed after rejection ({})", b.error);
                return Err(b.error);
            }
        }
        self.login(link)
    }

    /// Gate for every authenticated call.  Fast path when the held token is
    /// fresh; otherwise logs in.
    pub fn ensure_authenticated(&mut self, link: &mut Uplink<'_>) -> Result<(), AuthError> {
        self.gate(link).map(|_| ())
    }

    /// Returns `true` if the gate had to log in.
    fn gate(&mut self, link: &mut Uplink<'_>) -> Result<bool, AuthError> {
        if self.has_fresh_session(link.clock.epoch_secs()) {
            return Ok(false);
        }
        if self.session.is_some() && self.backoff.is_none() {
            info!("Session: token within refresh margin, logging in again");
        }
        self.login_unless_blocked(link).map(|()| true)
    }

    /// Decide what to do after an authenticated call failed.  A credential
    /// failure triggers exactly one re-login.
    pub fn on_authenticated_call_failed(
        &mut self,
        failure: &CallFailure,
        link: &mut Uplink<'_>,
    ) -> FailureVerdict {
        match failure {
            CallFailure::Network(e) => {
                warn!("Session: call failed in transit ({}), not re-authenticating", e);
                FailureVerdict::GiveUp
            }
            CallFailure::Rejected(resp) if is_credential_failure(resp) => {
                warn!("Session: backend rejected token (HTTP {}), re-authenticating", resp.status);
                match self.login_unless_blocked(link) {
                    Ok(()) => FailureVerdict::RetryOnce,
                    Err(_) => FailureVerdict::GiveUp,
                }
            }
            CallFailure::Rejected(resp) => {
                warn!("Session: call rejected with HTTP {}", resp.status);
                FailureVerdict::GiveUp
            }
        }
    }

    /// Gate, send, and retry once after a successful re-login.
    ///
    /// `build` is called once per send so a retry carries the new token.
    /// If the gate itself just logged in, a credential failure is reported
    /// without logging in a second time.
    pub fn send_authenticated(
        &mut self,
        link: &mut Uplink<'_>,
        build: impl Fn(&Session) -> HttpRequest,
    ) -> Result<HttpResponse, Error> {
        let just_logged_in = self.gate(link)?;

        let failure = match self.send_once(link, &build) {
            Ok(resp) => return Ok(resp),
            Err(f) => f,
        };
        if just_logged_in {
            return Err(failure.into_error());
        }
        match self.on_authenticated_call_failed(&failure, link) {
            FailureVerdict::RetryOnce => self.send_once(link, &build).map_err(CallFailure::into_error),
            FailureVerdict::GiveUp => Err(failure.into_error()),
        }
    }

    fn send_once(
        &self,
        link: &mut Uplink<'_>,
        build: &impl Fn(&Session) -> HttpRequest,
    ) -> Result<HttpResponse, CallFailure> {
        let Some(session) = self.session.as_ref() else {
            return Err(CallFailure::Network(NetworkError::NotConnected));
        };
        let request = build(session).with_bearer(session.token());
        let response = link.transport.send(&request).map_err(CallFailure::Network)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(CallFailure::Rejected(response))
        }
    }
}
