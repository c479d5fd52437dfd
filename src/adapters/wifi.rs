//! WiFi station adapter with access-point provisioning fallback.
//!
//! Implements [`NetworkPort`].  `obtain_connectivity` first joins the
//! network stored under `wifi_ssid` / `wifi_pass`; if that fails (or nothing
//! is stored) it opens an open access point named after the device and
//! serves a credentials form until someone submits it or the portal times
//! out.  Submitted credentials are validated, persisted, and answered with
//! [`ProvisioningOutcome::RestartRequired`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `BlockingWifi<EspWifi>` plus an
//!   `EspHttpServer` for the portal form.
//! - **all other targets**: a scripted link for host-side tests.

use core::fmt;
use log::{error, info, warn};

use super::utils::is_printable_ascii;
use crate::app::ports::{NetworkPort, ProvisioningOutcome, StoragePort, storage_keys as keys};

#[cfg(target_os = "espidf")]
use super::utils::form_value;
#[cfg(target_os = "espidf")]
use crate::drivers::watchdog::feed_current_task;
#[cfg(target_os = "espidf")]
use esp_idf_svc::{
    http::{Method, server::EspHttpServer},
    io::{Read, Write},
    wifi::{
        AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
        EspWifi,
    },
};
#[cfg(target_os = "espidf")]
use std::sync::{Arc, Mutex};
#[cfg(target_os = "espidf")]
use std::time::{Duration, Instant};

// ───────────────────────────────────────────────────────────────
// Errors and validation
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    InvalidSsid,
    InvalidPassword,
    ConnectionFailed,
    PortalUnavailable,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
            Self::PortalUnavailable => write!(f, "provisioning portal could not start"),
        }
    }
}

pub fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 || !is_printable_ascii(password) {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

fn stored_credentials(storage: &dyn StoragePort) -> Option<(String, String)> {
    let ssid = storage.get_str(keys::WIFI_SSID).ok().flatten()?;
    if ssid.is_empty() {
        return None;
    }
    let pass = storage.get_str(keys::WIFI_PASS).ok().flatten().unwrap_or_default();
    Some((ssid, pass))
}

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Disconnected,
    Connecting,
    Connected,
    /// Access point and credentials form are up.
    Portal,
}

/// Scripted stand-in for the radio on host builds.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimLink {
    /// The SSID/password pair the simulated network accepts.
    pub network: Option<(String, String)>,
    /// What the next portal session receives, if anything.
    pub portal_submission: Option<(String, String)>,
    pub join_attempts: u32,
    pub portal_sessions: u32,
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    state: WifiState,
    #[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
    connect_timeout_ms: u32,
    #[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
    portal_timeout_ms: u32,
    #[cfg(target_os = "espidf")]
    wifi: BlockingWifi<EspWifi<'static>>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimLink,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(
        wifi: BlockingWifi<EspWifi<'static>>,
        connect_timeout_ms: u32,
        portal_timeout_ms: u32,
    ) -> Self {
        Self {
            state: WifiState::Disconnected,
            connect_timeout_ms,
            portal_timeout_ms,
            wifi,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn simulated(sim: SimLink, connect_timeout_ms: u32, portal_timeout_ms: u32) -> Self {
        Self {
            state: WifiState::Disconnected,
            connect_timeout_ms,
            portal_timeout_ms,
            sim,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim(&self) -> &SimLink {
        &self.sim
    }

    /// Simulate the access point dropping the station.
    #[cfg(not(target_os = "espidf"))]
    pub fn drop_link(&mut self) {
        warn!("WiFi(sim): link dropped");
        self.state = WifiState::Disconnected;
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    fn join(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        info!("WiFi: connecting to '{}'", ssid);
        self.state = WifiState::Connecting;
        match self.platform_join(ssid, password) {
            Ok(()) => {
                self.state = WifiState::Connected;
                info!("WiFi: connected");
                Ok(())
            }
            Err(e) => {
                self.state = WifiState::Disconnected;
                Err(e)
            }
        }
    }

    /// `Ok(None)` when the portal timed out without a valid submission.
    fn provision(&mut self, ap_name: &str) -> Result<Option<(String, String)>, ConnectivityError> {
        info!("WiFi: starting provisioning portal '{}'", ap_name);
        self.state = WifiState::Portal;
        let submitted = self.platform_portal(ap_name);
        self.state = WifiState::Disconnected;
        let creds = submitted?;
        Ok(creds.filter(|(ssid, pass)| {
            let ok = validate_ssid(ssid).is_ok() && validate_password(pass).is_ok();
            if !ok {
                warn!("WiFi: portal submission rejected");
            }
            ok
        }))
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_join(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| ConnectivityError::InvalidSsid)?,
            password: password
                .try_into()
                .map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });

        let result = (|| -> anyhow::Result<()> {
            self.wifi.set_configuration(&config)?;
            if !self.wifi.is_started()? {
                self.wifi.start()?;
            }
            self.wifi.wifi_mut().connect()?;
            let deadline = Instant::now() + Duration::from_millis(u64::from(self.connect_timeout_ms));
            while !self.wifi.is_up()? {
                if Instant::now() >= deadline {
                    anyhow::bail!("timed out after {} ms", self.connect_timeout_ms);
                }
                feed_current_task();
                std::thread::sleep(Duration::from_millis(250));
            }
            Ok(())
        })();

        result.map_err(|e| {
            error!("WiFi: join failed: {:?}", e);
            let _ = self.wifi.disconnect();
            ConnectivityError::ConnectionFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_join(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        self.sim.join_attempts += 1;
        match &self.sim.network {
            Some((s, p)) if s == ssid && p == password => Ok(()),
            _ => {
                warn!("WiFi(sim): '{}' not reachable", ssid);
                Err(ConnectivityError::ConnectionFailed)
            }
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_portal(&mut self, ap_name: &str) -> Result<Option<(String, String)>, ConnectivityError> {
        const FORM: &str = "<html><body><h3>TagMaster WiFi setup</h3>\
            <form method='post' action='/save'>\
            SSID <input name='ssid'><br>Password <input name='pass' type='password'><br>\
            <input type='submit' value='Save'></form></body></html>";

        let ap = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: ap_name.try_into().map_err(|_| ConnectivityError::PortalUnavailable)?,
            auth_method: AuthMethod::None,
            ..Default::default()
        });
        let submission: Arc<Mutex<Option<(String, String)>>> = Arc::new(Mutex::new(None));

        let result = (|| -> anyhow::Result<Option<(String, String)>> {
            if self.wifi.is_started()? {
                self.wifi.stop()?;
            }
            self.wifi.set_configuration(&ap)?;
            self.wifi.start()?;

            let mut server = EspHttpServer::new(&esp_idf_svc::http::server::Configuration::default())?;
            server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
                req.into_ok_response()?.write_all(FORM.as_bytes())?;
                Ok(())
            })?;
            let slot = submission.clone();
            server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
                let mut buf = [0u8; 256];
                let mut len = 0;
                while len < buf.len() {
                    let n = req.read(&mut buf[len..])?;
                    if n == 0 {
                        break;
                    }
                    len += n;
                }
                let body = core::str::from_utf8(&buf[..len]).unwrap_or_default();
                let ssid = form_value(body, "ssid").unwrap_or_default();
                let pass = form_value(body, "pass").unwrap_or_default();
                let accepted = validate_ssid(&ssid).is_ok() && validate_password(&pass).is_ok();
                if accepted {
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some((ssid, pass));
                    }
                }
                let reply: &[u8] = if accepted {
                    b"Saved. The terminal restarts now."
                } else {
                    b"Invalid SSID or password."
                };
                req.into_ok_response()?.write_all(reply)?;
                Ok(())
            })?;

            let deadline = Instant::now() + Duration::from_millis(u64::from(self.portal_timeout_ms));
            loop {
                if let Some(creds) = submission.lock().ok().and_then(|mut g| g.take()) {
                    // Let the reply reach the browser before the AP goes down.
                    std::thread::sleep(Duration::from_millis(500));
                    return Ok(Some(creds));
                }
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                feed_current_task();
                std::thread::sleep(Duration::from_millis(250));
            }
        })();

        let _ = self.wifi.stop();
        result.map_err(|e| {
            error!("WiFi: portal failed: {:?}", e);
            ConnectivityError::PortalUnavailable
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_portal(&mut self, ap_name: &str) -> Result<Option<(String, String)>, ConnectivityError> {
        self.sim.portal_sessions += 1;
        let submission = self.sim.portal_submission.take();
        if submission.is_none() {
            info!("WiFi(sim): portal '{}' timed out", ap_name);
        }
        Ok(submission)
    }

    #[cfg(target_os = "espidf")]
    fn platform_is_connected(&self) -> bool {
        self.state == WifiState::Connected && self.wifi.is_connected().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_is_connected(&self) -> bool {
        self.state == WifiState::Connected
    }
}

// ───────────────────────────────────────────────────────────────
// NetworkPort
// ───────────────────────────────────────────────────────────────

impl NetworkPort for WifiAdapter {
    fn is_connected(&self) -> bool {
        self.platform_is_connected()
    }

    fn obtain_connectivity(
        &mut self,
        ap_name: &str,
        storage: &mut dyn StoragePort,
    ) -> ProvisioningOutcome {
        match stored_credentials(storage) {
            Some((ssid, pass)) => match self.join(&ssid, &pass) {
                Ok(()) => return ProvisioningOutcome::Connected,
                Err(e) => warn!("WiFi: stored network unusable: {}", e),
            },
            None => info!("WiFi: no stored credentials"),
        }

        match self.provision(ap_name) {
            Ok(Some((ssid, pass))) => {
                let saved = storage
                    .put_str(keys::WIFI_SSID, &ssid)
                    .and_then(|()| storage.put_str(keys::WIFI_PASS, &pass));
                match saved {
                    Ok(()) => {
                        info!("WiFi: credentials for '{}' stored", ssid);
                        ProvisioningOutcome::RestartRequired
                    }
                    Err(e) => {
                        error!("WiFi: storing credentials failed: {}", e);
                        ProvisioningOutcome::TimedOut
                    }
                }
            }
            Ok(None) => ProvisioningOutcome::TimedOut,
            Err(e) => {
                error!("WiFi: {}", e);
                ProvisioningOutcome::TimedOut
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
