//! HTTP transport adapter.
//!
//! Implements [`Transport`]: one blocking request/response exchange per
//! call, with the deadline carried by the request.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspHttpConnection` wrapped in the
//!   `embedded-svc` blocking client, HTTPS verified against the ESP-IDF
//!   certificate bundle.
//! - **all other targets**: a `ureq` agent for simulation against a local
//!   backend.  Built without TLS, so `https://` is refused.

use log::{debug, warn};

use crate::app::ports::{HttpRequest, HttpResponse, Method, Transport};
use crate::error::NetworkError;

/// Upper bound on a buffered response body.
const MAX_BODY_BYTES: usize = 16 * 1024;

#[cfg(target_os = "espidf")]
use embedded_svc::http::client::Client;
#[cfg(target_os = "espidf")]
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
#[cfg(target_os = "espidf")]
use esp_idf_svc::io::{Read, Write};

#[cfg(not(target_os = "espidf"))]
use std::io::Read;
#[cfg(not(target_os = "espidf"))]
use std::time::Duration;

pub struct HttpTransport {
    user_agent: String,
    #[cfg(not(target_os = "espidf"))]
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(firmware_version: &str) -> Self {
        Self {
            user_agent: format!("TagMaster/{}", firmware_version),
            #[cfg(not(target_os = "espidf"))]
            agent: ureq::AgentBuilder::new().redirects(0).build(),
        }
    }

    fn headers<'r>(&'r self, request: &'r HttpRequest, bearer: &'r str) -> Vec<(&'r str, &'r str)> {
        let mut headers = vec![("User-Agent", self.user_agent.as_str()), ("Accept", "application/json")];
        if request.body.is_some() {
            headers.push(("Content-Type", "application/json"));
        }
        if request.bearer.is_some() {
            headers.push(("Authorization", bearer));
        }
        headers
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        debug!(
            "HTTP: {} {}",
            match request.method {
                Method::Get => "GET",
                Method::Post => "POST",
            },
            request.url
        );
        let result = self.platform_send(request);
        if let Err(e) = &result {
            warn!("HTTP: {} failed: {}", request.url, e);
        }
        result
    }
}

// ── ESP-IDF ──────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl HttpTransport {
    fn platform_send(&mut self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let config = Configuration {
            timeout: Some(std::time::Duration::from_millis(u64::from(request.timeout_ms))),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&config).map_err(|_| NetworkError::Unreachable)?;
        let mut client = Client::wrap(connection);

        let bearer = request
            .bearer
            .as_deref()
            .map(|t| format!("Bearer {}", t))
            .unwrap_or_default();
        let body = request.body.as_deref().unwrap_or_default();
        let length = body.len().to_string();
        let mut headers = self.headers(request, &bearer);
        if request.body.is_some() {
            headers.push(("Content-Length", length.as_str()));
        }

        let method = match request.method {
            Method::Get => embedded_svc::http::Method::Get,
            Method::Post => embedded_svc::http::Method::Post,
        };
        let mut outgoing = client
            .request(method, &request.url, &headers)
            .map_err(|_| NetworkError::Unreachable)?;
        if !body.is_empty() {
            outgoing.write_all(body.as_bytes()).map_err(|_| NetworkError::Io)?;
            outgoing.flush().map_err(|_| NetworkError::Io)?;
        }
        let mut response = outgoing.submit().map_err(|_| NetworkError::Timeout)?;
        let status = response.status();

        let mut collected = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let n = response.read(&mut chunk).map_err(|_| NetworkError::Io)?;
            if n == 0 {
                break;
            }
            let room = MAX_BODY_BYTES.saturating_sub(collected.len());
            collected.extend_from_slice(&chunk[..n.min(room)]);
            if room < n {
                warn!("HTTP: response body truncated at {} bytes", MAX_BODY_BYTES);
                break;
            }
        }
        Ok(HttpResponse::new(status, collected))
    }
}

// ── Host simulation ──────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl HttpTransport {
    fn platform_send(&mut self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        if !request.url.starts_with("http://") {
            return Err(NetworkError::UnsupportedScheme);
        }
        let bearer = request
            .bearer
            .as_deref()
            .map(|t| format!("Bearer {}", t))
            .unwrap_or_default();
        let method = match request.method {
            Method::Get => "GET",
            Method::Post => "POST",
        };

        let mut outgoing = self
            .agent
            .request(method, &request.url)
            .timeout(Duration::from_millis(u64::from(request.timeout_ms.max(1))));
        for (name, value) in self.headers(request, &bearer) {
            outgoing = outgoing.set(name, value);
        }

        let result = match request.body.as_deref() {
            Some(body) => outgoing.send_string(body),
            None => outgoing.call(),
        };
        let response = match result {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(t)) => return Err(map_transport(&t)),
        };

        let status = response.status();
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY_BYTES as u64)
            .read_to_end(&mut body)
            .map_err(|e| map_io(&e))?;
        Ok(HttpResponse::new(status, body))
    }
}

#[cfg(not(target_os = "espidf"))]
fn map_transport(t: &ureq::Transport) -> NetworkError {
    use ureq::ErrorKind;
    match t.kind() {
        ErrorKind::UnknownScheme => NetworkError::UnsupportedScheme,
        ErrorKind::InvalidUrl | ErrorKind::Dns | ErrorKind::ConnectionFailed => {
            NetworkError::Unreachable
        }
        _ => std::error::Error::source(t)
            .and_then(|src| src.downcast_ref::<std::io::Error>())
            .map_or(NetworkError::Io, map_io),
    }
}

#[cfg(not(target_os = "espidf"))]
fn map_io(e: &std::io::Error) -> NetworkError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => NetworkError::Timeout,
        ErrorKind::ConnectionRefused | ErrorKind::AddrNotAvailable => NetworkError::Unreachable,
        ErrorKind::NotConnected => NetworkError::NotConnected,
        _ => NetworkError::Io,
    }
}
