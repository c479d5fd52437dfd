//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements        | Connects to                     |
//! |-------------|-------------------|---------------------------------|
//! | `display`   | DisplayPort       | Log view, HD44780 over I2C      |
//! | `http`      | Transport         | EspHttpConnection / ureq agent  |
//! | `log_sink`  | EventSink         | Serial log output               |
//! | `nvs`       | ConfigPort        | NVS / in-memory store           |
//! |             | StoragePort       |                                 |
//! | `scanner`   | ScannerPort       | MFRC522 over SPI                |
//! | `system`    | SystemPort        | esp_restart, blocking delay     |
//! | `time`      | ClockPort         | ESP32 timer + SNTP wall clock   |
//! | `wifi`      | NetworkPort       | ESP-IDF WiFi STA + AP portal    |
//!
//! `device_id` derives the fallback serial from the factory MAC.

pub mod device_id;
pub mod display;
pub mod http;
pub mod log_sink;
pub mod nvs;
pub mod scanner;
pub mod system;
pub mod time;
pub(super) mod utils;
pub mod wifi;
