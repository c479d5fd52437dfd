//! Device serial derived from the ESP32 factory MAC address.
//!
//! Produces a stable, human-readable serial in the form `TM-XXYYZZ`
//! (last 3 bytes of the 6-byte MAC in uppercase hex).  It is used when no
//! serial has been provisioned into storage, and doubles as the name of the
//! provisioning access point.

use core::fmt::Write;

/// "TM-XXYYZZ" fits with room to spare.
pub type SerialString = heapless::String<16>;

pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the buffer is exactly the six bytes the call writes.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0x24, 0x6F, 0x28, 0x1A, 0x2B, 0x3C]
}

pub fn serial_number(mac: &MacAddress) -> SerialString {
    let mut id = SerialString::new();
    let _ = write!(id, "TM-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}
