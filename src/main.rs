//! TagMaster Terminal Firmware: Main Entry Point
//!
//! Hexagonal architecture with a cooperative single-task run loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HttpTransport    NvsAdapter      Esp32Clock    LcdDisplay     │
//! │  (Transport)      (Config+Store)  (ClockPort)   (DisplayPort)  │
//! │  RfidScanner      BatteryMonitor  WifiAdapter   EspSystem      │
//! │  (ScannerPort)    (PowerSensor)   (NetworkPort) (SystemPort)   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │           TerminalService (pure logic)                 │    │
//! │  │  Session · Commands · Scan pipeline · Scheduler        │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    firmware::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("the terminal binary only runs on ESP-IDF; use the library on the host")
}

#[cfg(target_os = "espidf")]
mod firmware {
    use anyhow::Result;
    use log::{error, info, warn};

    use esp_idf_hal::delay::Ets;
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver, SpiDriverConfig, config::Config as SpiConfig};
    use esp_idf_hal::units::Hertz;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

    use tagmaster::adapters::device_id;
    use tagmaster::adapters::display::{ConsoleDisplay, LcdDisplay};
    use tagmaster::adapters::http::HttpTransport;
    use tagmaster::adapters::log_sink::LogEventSink;
    use tagmaster::adapters::nvs::NvsAdapter;
    use tagmaster::adapters::scanner::RfidScanner;
    use tagmaster::adapters::system::EspSystem;
    use tagmaster::adapters::time::Esp32Clock;
    use tagmaster::adapters::wifi::WifiAdapter;
    use tagmaster::app::ports::{ConfigPort, DisplayPort, Ports, PowerSensorPort};
    use tagmaster::app::service::{BootOutcome, TerminalService};
    use tagmaster::app::session::DeviceIdentity;
    use tagmaster::config::TerminalConfig;
    use tagmaster::error::HardwareError;
    use tagmaster::drivers::hd44780::Hd44780;
    use tagmaster::drivers::hw_init::{self, Adc1Channel};
    use tagmaster::drivers::mfrc522::Mfrc522;
    use tagmaster::drivers::watchdog::Watchdog;
    use tagmaster::pins;
    use tagmaster::sensors::battery::{BatteryMonitor, SimAdc};

    type RfidSpi = SpiDeviceDriver<'static, SpiDriver<'static>>;

    pub fn run() -> Result<()> {
        // ── 1. ESP-IDF bootstrap ──────────────────────────────────
        esp_idf_svc::sys::link_patches();
        esp_idf_logger::init()?;

        info!("╔══════════════════════════════════════╗");
        info!("║  TagMaster Terminal v{}           ║", env!("CARGO_PKG_VERSION"));
        info!("╚══════════════════════════════════════╝");

        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;

        // ── 2. Load config from NVS (or defaults) ─────────────────
        let mut nvs = match NvsAdapter::new() {
            Ok(n) => n,
            Err(e) => {
                // Without NVS nothing can be cached or provisioned.
                error!("NVS init failed ({}), restarting", e);
                std::thread::sleep(std::time::Duration::from_secs(5));
                // SAFETY: esp_restart never returns.
                unsafe { esp_idf_svc::sys::esp_restart() }
            }
        };
        let config = match nvs.load() {
            Ok(cfg) => {
                info!("Config loaded from NVS");
                cfg
            }
            Err(e) => {
                warn!("NVS config load failed ({}), using defaults", e);
                TerminalConfig::default()
            }
        };
        let watchdog = Watchdog::new(config.watchdog_timeout_ms);

        // ── 3. Peripherals ────────────────────────────────────────
        if let Err(e) = hw_init::release_rfid_reset() {
            warn!("RFID reset line: {}", e);
        }
        let spi_config = SpiConfig::new()
            .baudrate(Hertz(pins::RFID_SPI_BAUD_HZ))
            .data_mode(embedded_hal::spi::MODE_0);
        let spi = SpiDeviceDriver::new_single(
            peripherals.spi2,
            peripherals.pins.gpio18,
            peripherals.pins.gpio23,
            Some(peripherals.pins.gpio19),
            Some(peripherals.pins.gpio5),
            &SpiDriverConfig::default(),
            &spi_config,
        );
        let mut scanner: RfidScanner<Mfrc522<RfidSpi>> = match spi {
            Ok(spi) => {
                let mut reader = Mfrc522::new(spi);
                match reader.init() {
                    Ok(version) => {
                        info!("RFID: MFRC522 version 0x{:02X}", version);
                        RfidScanner::new(reader)
                    }
                    Err(e) => {
                        warn!("RFID: transceiver not answering ({:?}), scanning disabled", e);
                        RfidScanner::unavailable()
                    }
                }
            }
            Err(e) => {
                warn!("RFID: SPI bus init failed ({:?}), scanning disabled", e);
                RfidScanner::unavailable()
            }
        };

        let mut power: Box<dyn PowerSensorPort> = match Adc1Channel::new(pins::BATTERY_ADC_CHANNEL) {
            Ok(adc) => Box::new(BatteryMonitor::new(adc)),
            Err(e) => {
                warn!("Battery: {}, gauge disabled", e);
                // An empty sample source reports the gauge as unavailable.
                Box::new(BatteryMonitor::new(SimAdc::default()))
            }
        };

        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio21,
            peripherals.pins.gpio22,
            &I2cConfig::new().baudrate(Hertz(pins::LCD_I2C_BAUD_HZ)),
        );
        let mut display: Box<dyn DisplayPort> = match i2c {
            Ok(i2c) => {
                let mut lcd = Hd44780::new(i2c, Ets, pins::LCD_I2C_ADDR);
                let panel = lcd
                    .init()
                    .map_err(|_| HardwareError::BusFault)
                    .and_then(|()| LcdDisplay::new(lcd));
                match panel {
                    Ok(panel) => Box::new(panel),
                    Err(e) => {
                        warn!("LCD: panel not answering ({}), log view only", e);
                        Box::new(ConsoleDisplay::new())
                    }
                }
            }
            Err(e) => {
                warn!("LCD: I2C bus init failed ({:?}), log view only", e);
                Box::new(ConsoleDisplay::new())
            }
        };

        // ── 4. Adapters ───────────────────────────────────────────
        let nvs_partition = EspDefaultNvsPartition::take()?;
        let esp_wifi = EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs_partition))?;
        let mut network = WifiAdapter::new(
            BlockingWifi::wrap(esp_wifi, sysloop)?,
            config.wifi_connect_timeout_ms,
            config.provisioning_timeout_ms,
        );
        let clock = Esp32Clock::with_sntp();
        let mut transport = HttpTransport::new(&config.firmware_version);
        let mut system = EspSystem::new();
        let mut events = LogEventSink::new();

        // ── Device identity ───────────────────────────────────────
        let mac = device_id::read_mac();
        let serial = device_id::serial_number(&mac);
        let identity = DeviceIdentity::resolve(&nvs, serial.as_str(), &config.device_class);
        info!("Device serial: {}", identity.serial());

        // ── 5. Boot ───────────────────────────────────────────────
        let loop_idle = std::time::Duration::from_millis(u64::from(config.loop_idle_ms));
        let mut service = TerminalService::new(config, identity);
        let mut ports = Ports {
            transport: &mut transport,
            storage: &mut nvs,
            clock: &clock,
            display: display.as_mut(),
            scanner: &mut scanner,
            power: power.as_mut(),
            network: &mut network,
            system: &mut system,
            events: &mut events,
        };

        match service.boot(&mut ports) {
            BootOutcome::Ready => info!("System ready. Entering run loop."),
            BootOutcome::Restarting => {
                // Restart is already under way; nothing else may run.
                loop {
                    watchdog.feed();
                    std::thread::sleep(loop_idle);
                }
            }
            BootOutcome::Halted(reason) => {
                error!("Halted: {}", reason);
                loop {
                    watchdog.feed();
                    std::thread::sleep(std::time::Duration::from_secs(1));
                }
            }
        }

        // ── 6. Run loop ───────────────────────────────────────────
        loop {
            service.tick(&mut ports);
            watchdog.feed();
            std::thread::sleep(loop_idle);
        }
    }
}
