//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the terminal.
//!
//! - Every key lives in the single `tagmaster` namespace.
//! - Strings and integers use the native NVS typed entries so the session
//!   keys stay readable with `nvs_partition_tool`.
//! - The configuration is one postcard blob under `syscfg`, range-checked
//!   before it is written.
//! - ESP-IDF NVS commits are atomic per `nvs_commit()`.

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::TerminalConfig;
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

const NAMESPACE: &str = "tagmaster";
const CONFIG_KEY: &str = "syscfg";
/// NVS key names are at most 15 bytes.
const MAX_KEY_LEN: usize = 15;

#[allow(dead_code)]
const MAX_BLOB_SIZE: usize = 2000;

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Str(String),
    U64(u64),
    Blob(Vec<u8>),
}

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Entry>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is erased
    /// and re-initialised automatically.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES as esp_err_t
                || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as esp_err_t
            {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK as esp_err_t {
                    return Err(ConfigError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK as esp_err_t {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK as esp_err_t {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    /// Nul-terminated copy of `key` for the C API.
    fn c_key(key: &str) -> Result<[u8; MAX_KEY_LEN + 1], StorageError> {
        let bytes = key.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_KEY_LEN || bytes.contains(&0) {
            return Err(StorageError::InvalidKey);
        }
        let mut buf = [0u8; MAX_KEY_LEN + 1];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    /// Open the namespace, run `f` with the handle, then close it.
    #[cfg(target_os = "espidf")]
    fn with_handle<F, T>(write: bool, f: F) -> Result<T, esp_err_t>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, esp_err_t>,
    {
        let mut ns_buf = [0u8; 16];
        ns_buf[..NAMESPACE.len()].copy_from_slice(NAMESPACE.as_bytes());

        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns_buf.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK as esp_err_t {
            return Err(ret);
        }

        let result = f(handle);
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(target_os = "espidf")]
    fn commit(handle: nvs_handle_t) -> Result<(), esp_err_t> {
        let ret = unsafe { nvs_commit(handle) };
        if ret != ESP_OK as esp_err_t {
            return Err(ret);
        }
        Ok(())
    }

    /// `Ok(None)` for a missing entry or an unopened namespace.
    #[cfg(target_os = "espidf")]
    fn read_entry<T>(
        key: &str,
        read: impl FnOnce(nvs_handle_t, *const core::ffi::c_char) -> Result<T, esp_err_t>,
    ) -> Result<Option<T>, StorageError> {
        let k = Self::c_key(key)?;
        match Self::with_handle(false, |h| read(h, k.as_ptr() as *const _)) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND as esp_err_t => Ok(None),
            Err(e) if e == ESP_ERR_NVS_TYPE_MISMATCH as esp_err_t => Err(StorageError::TypeMismatch),
            Err(e) => {
                warn!("NvsAdapter: read '{}' failed ({})", key, e);
                Err(StorageError::IoError)
            }
        }
    }

    #[cfg(target_os = "espidf")]
    fn write_entry(
        key: &str,
        write: impl FnOnce(nvs_handle_t, *const core::ffi::c_char) -> esp_err_t,
    ) -> Result<(), StorageError> {
        let k = Self::c_key(key)?;
        let result = Self::with_handle(true, |h| {
            let ret = write(h, k.as_ptr() as *const _);
            if ret != ESP_OK as esp_err_t {
                return Err(ret);
            }
            Self::commit(h)
        });
        result.map_err(|e| {
            warn!("NvsAdapter: write '{}' failed ({})", key, e);
            if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE as esp_err_t {
                StorageError::Full
            } else {
                StorageError::IoError
            }
        })
    }
}

/// Range checks applied before a config is persisted.
pub fn validate_config(cfg: &TerminalConfig) -> Result<(), ConfigError> {
    let base = cfg.api_base.trim();
    if base.is_empty() {
        return Err(ConfigError::ValidationFailed("api_base must not be empty"));
    }
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ConfigError::ValidationFailed(
            "api_base must use http:// or https://",
        ));
    }
    let paths = [
        &cfg.login_path,
        &cfg.heartbeat_path,
        &cfg.commands_path,
        &cfg.commands_ack_path,
        &cfg.scan_report_path,
    ];
    if paths.iter().any(|p| !p.starts_with('/')) {
        return Err(ConfigError::ValidationFailed("endpoint paths must start with '/'"));
    }
    let intervals = [
        cfg.login_backoff_ms,
        cfg.heartbeat_interval_ms,
        cfg.command_poll_interval_ms,
        cfg.battery_interval_ms,
        cfg.animation_step_ms,
    ];
    if intervals.contains(&0) {
        return Err(ConfigError::ValidationFailed("task intervals must be non-zero"));
    }
    if !(1_000..=60_000).contains(&cfg.request_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "request_timeout_ms must be 1000–60000",
        ));
    }
    if !(1..=10).contains(&cfg.boot_login_attempts) {
        return Err(ConfigError::ValidationFailed(
            "boot_login_attempts must be 1–10",
        ));
    }
    if cfg.scan_debounce_ms > 60_000 {
        return Err(ConfigError::ValidationFailed(
            "scan_debounce_ms must be at most 60000",
        ));
    }
    if cfg.watchdog_timeout_ms <= cfg.request_timeout_ms {
        return Err(ConfigError::ValidationFailed(
            "watchdog_timeout_ms must exceed request_timeout_ms",
        ));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<TerminalConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        {
            match self.store.borrow().get(CONFIG_KEY) {
                Some(Entry::Blob(bytes)) => {
                    let cfg: TerminalConfig =
                        postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
                    info!("NvsAdapter: loaded config from store");
                    Ok(cfg)
                }
                Some(_) => Err(ConfigError::Corrupted),
                None => {
                    info!("NvsAdapter: no stored config, using defaults");
                    Ok(TerminalConfig::default())
                }
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let blob = Self::read_entry(CONFIG_KEY, |handle, key| {
                let mut size: usize = 0;
                let ret = unsafe { nvs_get_blob(handle, key, core::ptr::null_mut(), &mut size) };
                if ret != ESP_OK as esp_err_t {
                    return Err(ret);
                }
                if size == 0 || size > MAX_BLOB_SIZE {
                    return Err(ESP_ERR_NVS_INVALID_LENGTH as esp_err_t);
                }
                let mut buf = vec![0u8; size];
                let ret =
                    unsafe { nvs_get_blob(handle, key, buf.as_mut_ptr() as *mut _, &mut size) };
                if ret != ESP_OK as esp_err_t {
                    return Err(ret);
                }
                Ok(buf)
            });

            match blob {
                Ok(Some(bytes)) => {
                    let cfg: TerminalConfig =
                        postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                    info!("NvsAdapter: loaded config from NVS ({} bytes)", bytes.len());
                    Ok(cfg)
                }
                Ok(None) => {
                    info!("NvsAdapter: no stored config, using defaults");
                    Ok(TerminalConfig::default())
                }
                Err(e) => {
                    warn!("NvsAdapter: config read error {}, using defaults", e);
                    Ok(TerminalConfig::default())
                }
            }
        }
    }

    fn save(&self, config: &TerminalConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .borrow_mut()
                .insert(CONFIG_KEY.to_owned(), Entry::Blob(bytes));
            info!("NvsAdapter: config saved (simulation)");
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::write_entry(CONFIG_KEY, |handle, key| unsafe {
                nvs_set_blob(handle, key, bytes.as_ptr() as *const _, bytes.len())
            })
            .map_err(|_| ConfigError::IoError)?;
            info!("NvsAdapter: config saved to NVS ({} bytes)", bytes.len());
            Ok(())
        }
    }
}

impl StoragePort for NvsAdapter {
    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError> {
        Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            match self.store.borrow().get(key) {
                Some(Entry::Str(s)) => Ok(Some(s.clone())),
                Some(_) => Err(StorageError::TypeMismatch),
                None => Ok(None),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            Self::read_entry(key, |handle, k| {
                let mut len: usize = 0;
                let ret = unsafe { nvs_get_str(handle, k, core::ptr::null_mut(), &mut len) };
                if ret != ESP_OK as esp_err_t {
                    return Err(ret);
                }
                let mut buf = vec![0u8; len];
                let ret = unsafe { nvs_get_str(handle, k, buf.as_mut_ptr() as *mut _, &mut len) };
                if ret != ESP_OK as esp_err_t {
                    return Err(ret);
                }
                // Drop the terminating nul.
                buf.truncate(len.saturating_sub(1));
                String::from_utf8(buf).map_err(|_| ESP_ERR_NVS_TYPE_MISMATCH as esp_err_t)
            })
        }
    }

    fn put_str(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .borrow_mut()
                .insert(key.to_owned(), Entry::Str(value.to_owned()));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let value = std::ffi::CString::new(value).map_err(|_| StorageError::TypeMismatch)?;
            Self::write_entry(key, |handle, k| unsafe { nvs_set_str(handle, k, value.as_ptr()) })
        }
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>, StorageError> {
        Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            match self.store.borrow().get(key) {
                Some(Entry::U64(v)) => Ok(Some(*v)),
                Some(_) => Err(StorageError::TypeMismatch),
                None => Ok(None),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            Self::read_entry(key, |handle, k| {
                let mut value: u64 = 0;
                let ret = unsafe { nvs_get_u64(handle, k, &mut value) };
                if ret != ESP_OK as esp_err_t {
                    return Err(ret);
                }
                Ok(value)
            })
        }
    }

    fn put_u64(&mut self, key: &str, value: u64) -> Result<(), StorageError> {
        Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .borrow_mut()
                .insert(key.to_owned(), Entry::U64(value));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::write_entry(key, |handle, k| unsafe { nvs_set_u64(handle, k, value) })
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.store.borrow_mut().remove(key);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::write_entry(key, |handle, k| {
                let ret = unsafe { nvs_erase_key(handle, k) };
                if ret == ESP_ERR_NVS_NOT_FOUND as esp_err_t {
                    ESP_OK as esp_err_t
                } else {
                    ret
                }
            })
        }
    }
}
