//! One-shot hardware peripheral initialisation.
//!
//! Configures the battery ADC channel and the RFID reset line using raw
//! ESP-IDF sys calls.  Called once from `main()` before the run loop starts.
//! The SPI bus itself is claimed through `esp_idf_hal` in `main`.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::info;

#[cfg(target_os = "espidf")]
use crate::pins;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    AdcInitFailed(i32),
    AdcReadFailed(i32),
    GpioConfigFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AdcInitFailed(rc) => write!(f, "ADC1 init failed (rc={})", rc),
            Self::AdcReadFailed(rc) => write!(f, "ADC1 read failed (rc={})", rc),
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
        }
    }
}

// ── RFID reset line ───────────────────────────────────────────

/// Drive the MFRC522 reset pin high so the transceiver leaves power-down.
#[cfg(target_os = "espidf")]
pub fn release_rfid_reset() -> Result<(), HwInitError> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pins::RFID_RST_GPIO,
        mode: gpio_mode_t_GPIO_MODE_OUTPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    // SAFETY: valid config for a pin nothing else owns; main task only.
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::GpioConfigFailed(ret));
    }
    unsafe { gpio_set_level(pins::RFID_RST_GPIO, 1) };
    info!("hw_init: RFID reset released (GPIO{})", pins::RFID_RST_GPIO);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn release_rfid_reset() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): RFID reset skipped");
    Ok(())
}

// ── ADC (oneshot) ─────────────────────────────────────────────

/// One ADC1 channel at 12 dB attenuation and 12-bit width.
#[cfg(target_os = "espidf")]
pub struct Adc1Channel {
    handle: adc_oneshot_unit_handle_t,
    channel: adc_channel_t,
}

#[cfg(target_os = "espidf")]
impl Adc1Channel {
    pub fn new(channel: u32) -> Result<Self, HwInitError> {
        let init_cfg = adc_oneshot_unit_init_cfg_t {
            unit_id: adc_unit_t_ADC_UNIT_1,
            ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
            ..Default::default()
        };
        let mut handle: adc_oneshot_unit_handle_t = core::ptr::null_mut();
        // SAFETY: out-pointer to a local handle; unit 1 is claimed once.
        let ret = unsafe { adc_oneshot_new_unit(&init_cfg, &mut handle) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::AdcInitFailed(ret));
        }

        let chan_cfg = adc_oneshot_chan_cfg_t {
            atten: adc_atten_t_ADC_ATTEN_DB_12,
            bitwidth: adc_bitwidth_t_ADC_BITWIDTH_12,
        };
        let ret = unsafe { adc_oneshot_config_channel(handle, channel, &chan_cfg) };
        if ret != ESP_OK as i32 {
            unsafe { adc_oneshot_del_unit(handle) };
            return Err(HwInitError::AdcInitFailed(ret));
        }

        info!("hw_init: ADC1 CH{} configured", channel);
        Ok(Self { handle, channel })
    }

    pub fn read(&mut self) -> Result<u16, HwInitError> {
        let mut raw: i32 = 0;
        // SAFETY: handle is live for the lifetime of self.
        let ret = unsafe { adc_oneshot_read(self.handle, self.channel, &mut raw) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::AdcReadFailed(ret));
        }
        Ok(raw.clamp(0, 4095) as u16)
    }
}

#[cfg(target_os = "espidf")]
impl Drop for Adc1Channel {
    fn drop(&mut self) {
        // SAFETY: handle came from adc_oneshot_new_unit and is freed once.
        unsafe { adc_oneshot_del_unit(self.handle) };
    }
}
