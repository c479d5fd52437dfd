//! Battery gauge on an ADC1 divider.
//!
//! Converts 12-bit samples to cell voltage (3.3 V reference, ×2 divider),
//! averages the last few readings in a fixed ring buffer, and maps
//! 3.3–4.2 V linearly onto 0–100 %.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: samples come from [`Adc1Channel`](crate::drivers::hw_init::Adc1Channel).
//! On host/test: from a [`SimAdc`] that tests script directly.

use crate::app::ports::PowerSensorPort;
use crate::error::HardwareError;
use crate::pins::BATTERY_DIVIDER_RATIO;

const ADC_MAX: f32 = 4095.0;
const ADC_VREF: f32 = 3.3;
pub const CELL_EMPTY_V: f32 = 3.3;
pub const CELL_FULL_V: f32 = 4.2;
const RING_BUF_CAP: usize = 4;

/// Source of raw 12-bit samples.
pub trait RawAdc {
    fn read_raw(&mut self) -> Result<u16, HardwareError>;
}

#[cfg(target_os = "espidf")]
impl RawAdc for crate::drivers::hw_init::Adc1Channel {
    fn read_raw(&mut self) -> Result<u16, HardwareError> {
        self.read().map_err(|e| {
            log::debug!("Battery: {}", e);
            HardwareError::SensorUnavailable
        })
    }
}

/// Scripted sample source.  `None` simulates a failed read.
#[derive(Debug, Default, Clone)]
pub struct SimAdc {
    pub raw: Option<u16>,
}

impl RawAdc for SimAdc {
    fn read_raw(&mut self) -> Result<u16, HardwareError> {
        self.raw.ok_or(HardwareError::SensorUnavailable)
    }
}

pub fn adc_to_volts(raw: u16) -> f32 {
    f32::from(raw.min(4095)) * ADC_VREF / ADC_MAX * BATTERY_DIVIDER_RATIO
}

pub fn volts_to_percent(volts: f32) -> u8 {
    if volts <= CELL_EMPTY_V {
        return 0;
    }
    if volts >= CELL_FULL_V {
        return 100;
    }
    ((volts - CELL_EMPTY_V) * 100.0 / (CELL_FULL_V - CELL_EMPTY_V)) as u8
}

pub struct BatteryMonitor<A: RawAdc> {
    adc: A,
    ring: [f32; RING_BUF_CAP],
    head: usize,
    count: usize,
}

impl<A: RawAdc> BatteryMonitor<A> {
    pub fn new(adc: A) -> Self {
        Self {
            adc,
            ring: [0.0; RING_BUF_CAP],
            head: 0,
            count: 0,
        }
    }

    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }

    /// Averaged cell voltage, `None` before the first good sample.
    pub fn average_volts(&self) -> Option<f32> {
        if self.count == 0 {
            return None;
        }
        let sum: f32 = self.ring[..self.count].iter().sum();
        Some(sum / self.count as f32)
    }

    fn push(&mut self, volts: f32) {
        self.ring[self.head] = volts;
        self.head = (self.head + 1) % RING_BUF_CAP;
        self.count = (self.count + 1).min(RING_BUF_CAP);
    }
}

impl<A: RawAdc> PowerSensorPort for BatteryMonitor<A> {
    /// A failed sample leaves the average untouched and reports the error.
    fn read_battery_percent(&mut self) -> Result<u8, HardwareError> {
        let raw = self.adc.read_raw()?;
        self.push(adc_to_volts(raw));
        self.average_volts()
            .map(volts_to_percent)
            .ok_or(HardwareError::SensorUnavailable)
    }
}
