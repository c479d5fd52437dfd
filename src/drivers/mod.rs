//! Peripheral drivers and one-shot hardware initialisation.

pub mod hd44780;
pub mod hw_init;
pub mod mfrc522;
pub mod watchdog;
