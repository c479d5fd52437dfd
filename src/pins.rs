//! GPIO / peripheral pin assignments for the TagMaster terminal board
//! (ESP32-WROOM-32 DevKit).
//!
//! Single source of truth.  `main` claims the matching `esp_idf_hal`
//! peripherals; the numbers here document the wiring and feed the raw
//! sys-level calls.

// ---------------------------------------------------------------------------
// RFID transceiver (MFRC522 on VSPI / SPI2)
// ---------------------------------------------------------------------------

/// Chip select (module pin labelled SDA).
pub const RFID_SS_GPIO: i32 = 5;
/// Active-low reset; held high while running.
pub const RFID_RST_GPIO: i32 = 27;
pub const RFID_SCK_GPIO: i32 = 18;
pub const RFID_MOSI_GPIO: i32 = 23;
pub const RFID_MISO_GPIO: i32 = 19;
/// Modes 0 and 3 both work; the module is specified up to 10 MHz.
pub const RFID_SPI_BAUD_HZ: u32 = 4_000_000;

// ---------------------------------------------------------------------------
// Battery sense (ADC1)
// ---------------------------------------------------------------------------

/// Midpoint of a 2 × 2.2 kΩ divider across the cell.
pub const BATTERY_ADC_GPIO: i32 = 34;
/// GPIO 34 is ADC1 channel 6 on the ESP32.
pub const BATTERY_ADC_CHANNEL: u32 = 6;
/// Divider ratio: cell voltage = pin voltage × 2.
pub const BATTERY_DIVIDER_RATIO: f32 = 2.0;

// ---------------------------------------------------------------------------
// Character display (PCF8574 I²C backpack)
// ---------------------------------------------------------------------------

pub const LCD_I2C_ADDR: u8 = 0x27;
pub const LCD_SDA_GPIO: i32 = 21;
pub const LCD_SCL_GPIO: i32 = 22;
pub const LCD_I2C_BAUD_HZ: u32 = 100_000;
