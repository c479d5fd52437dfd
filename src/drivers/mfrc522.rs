//! MFRC522 13.56 MHz transceiver driver.
//!
//! Generic over an `embedded-hal` 1.0 [`SpiDevice`], so the same code runs
//! against `esp_idf_hal::spi::SpiDeviceDriver` on target and a register
//! model in tests.
//!
//! Supports exactly what the terminal needs to identify a tag:
//!
//! 1. `REQA`: is an idle ISO 14443-A card in the field?
//! 2. Per cascade level (`SEL` 0x93, 0x95, 0x97): anticollision for four
//!    bytes and their BCC, then `SELECT`.  A SAK with the cascade bit set
//!    means the four bytes began with the cascade tag and another level
//!    follows, giving 4-, 7- or 10-byte UIDs.
//! 3. `HLTA`: park the card so it is not read again until it leaves the
//!    field.
//!
//! Authentication and card memory access are not implemented.

use embedded_hal::spi::SpiDevice;
use log::{debug, info};

// ── Registers ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Command = 0x01,
    ComIrq = 0x04,
    Error = 0x06,
    FifoData = 0x09,
    FifoLevel = 0x0A,
    Control = 0x0C,
    BitFraming = 0x0D,
    Coll = 0x0E,
    Mode = 0x11,
    TxControl = 0x14,
    TxAsk = 0x15,
    TMode = 0x2A,
    TPrescaler = 0x2B,
    TReloadHi = 0x2C,
    TReloadLo = 0x2D,
    Version = 0x37,
}

/// SPI address byte: bit 7 = read, bits 6..1 = register.
pub fn address(reg: Reg, read: bool) -> u8 {
    let addr = ((reg as u8) << 1) & 0x7E;
    if read { addr | 0x80 } else { addr }
}

const CMD_IDLE: u8 = 0x00;
const CMD_TRANSCEIVE: u8 = 0x0C;
const CMD_SOFT_RESET: u8 = 0x0F;
const POWER_DOWN: u8 = 0x10;

const IRQ_RX: u8 = 0x20;
const IRQ_IDLE: u8 = 0x10;
const IRQ_TIMER: u8 = 0x01;
const START_SEND: u8 = 0x80;
const FIFO_FLUSH: u8 = 0x80;
/// BufferOvfl | CollErr | ParityErr | ProtocolErr.
const ERR_ANY: u8 = 0x1B;
const ERR_COLL: u8 = 0x08;

const PICC_REQA: u8 = 0x26;
/// SEL command byte for cascade levels 1, 2 and 3.
const PICC_SEL: [u8; 3] = [0x93, 0x95, 0x97];
const PICC_HLTA: u8 = 0x50;
const CASCADE_TAG: u8 = 0x88;
/// SAK bit 2: UID not complete, continue at the next level.
const SAK_CASCADE: u8 = 0x04;

pub const MAX_UID_LEN: usize = 10;
pub type Uid = heapless::Vec<u8, MAX_UID_LEN>;

/// Poll budget for one transceive; the chip timer (25 ms) normally ends it.
const IRQ_POLL_LIMIT: u32 = 2_000;
const FIFO_CAP: usize = 64;

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mfrc522Error<E> {
    Spi(E),
    /// Version register reads 0x00 / 0xFF: nothing on the bus.
    NoChip(u8),
    /// No answer before the chip timer expired.
    Timeout,
    Collision,
    /// Parity, framing or buffer error reported by the chip.
    Protocol,
    /// UID check byte did not match.
    BadChecksum,
}

// ── CRC_A (ISO 14443-3) ───────────────────────────────────────

/// CRC_A, low byte first.
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0x6363;
    for &byte in data {
        let mut ch = byte ^ (crc as u8);
        ch ^= ch << 4;
        let ch = u16::from(ch);
        crc = (crc >> 8) ^ (ch << 8) ^ (ch << 3) ^ (ch >> 4);
    }
    crc.to_le_bytes()
}

/// XOR of the four UID bytes.
pub fn bcc(uid: &[u8; 4]) -> u8 {
    uid.iter().fold(0, |acc, b| acc ^ b)
}

// ── Driver ────────────────────────────────────────────────────

pub struct Mfrc522<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> Mfrc522<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn release(self) -> SPI {
        self.spi
    }

    fn write(&mut self, reg: Reg, value: u8) -> Result<(), Mfrc522Error<SPI::Error>> {
        self.spi
            .write(&[address(reg, false), value])
            .map_err(Mfrc522Error::Spi)?;
        Ok(())
    }

    fn read(&mut self, reg: Reg) -> Result<u8, Mfrc522Error<SPI::Error>> {
        let mut buf = [address(reg, true), 0];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(Mfrc522Error::Spi)?;
        Ok(buf[1])
    }

    fn set_bits(&mut self, reg: Reg, mask: u8) -> Result<(), Mfrc522Error<SPI::Error>> {
        let v = self.read(reg)?;
        self.write(reg, v | mask)
    }

    fn clear_bits(&mut self, reg: Reg, mask: u8) -> Result<(), Mfrc522Error<SPI::Error>> {
        let v = self.read(reg)?;
        self.write(reg, v & !mask)
    }

    pub fn version(&mut self) -> Result<u8, Mfrc522Error<SPI::Error>> {
        self.read(Reg::Version)
    }

    /// Soft reset, 25 ms receive timer, 100 % ASK, CRC preset 0x6363,
    /// antenna on.  Returns the chip version byte.
    pub fn init(&mut self) -> Result<u8, Mfrc522Error<SPI::Error>> {
        self.write(Reg::Command, CMD_SOFT_RESET)?;
        let mut polls = 0;
        while self.read(Reg::Command)? & POWER_DOWN != 0 {
            polls += 1;
            if polls > 100 {
                return Err(Mfrc522Error::Timeout);
            }
        }

        self.write(Reg::TMode, 0x80)?;
        self.write(Reg::TPrescaler, 0xA9)?;
        self.write(Reg::TReloadHi, 0x03)?;
        self.write(Reg::TReloadLo, 0xE8)?;
        self.write(Reg::TxAsk, 0x40)?;
        self.write(Reg::Mode, 0x3D)?;
        self.set_bits(Reg::TxControl, 0x03)?;

        let version = self.version()?;
        if version == 0x00 || version == 0xFF {
            return Err(Mfrc522Error::NoChip(version));
        }
        info!("MFRC522: ready (version 0x{:02X})", version);
        Ok(version)
    }

    /// Send `frame` and collect the answer.  `tx_last_bits` = 0 sends whole
    /// bytes; 7 is the short frame used by REQA.
    fn transceive(
        &mut self,
        frame: &[u8],
        tx_last_bits: u8,
    ) -> Result<heapless::Vec<u8, FIFO_CAP>, Mfrc522Error<SPI::Error>> {
        self.write(Reg::Command, CMD_IDLE)?;
        self.write(Reg::ComIrq, 0x7F)?;
        self.write(Reg::FifoLevel, FIFO_FLUSH)?;
        for &b in frame {
            self.write(Reg::FifoData, b)?;
        }
        self.write(Reg::BitFraming, tx_last_bits & 0x07)?;
        self.write(Reg::Command, CMD_TRANSCEIVE)?;
        self.set_bits(Reg::BitFraming, START_SEND)?;

        let mut polls = 0;
        loop {
            let irq = self.read(Reg::ComIrq)?;
            if irq & (IRQ_RX | IRQ_IDLE) != 0 {
                break;
            }
            polls += 1;
            if irq & IRQ_TIMER != 0 || polls >= IRQ_POLL_LIMIT {
                self.clear_bits(Reg::BitFraming, START_SEND)?;
                return Err(Mfrc522Error::Timeout);
            }
        }
        self.clear_bits(Reg::BitFraming, START_SEND)?;

        let err = self.read(Reg::Error)?;
        if err & ERR_COLL != 0 {
            return Err(Mfrc522Error::Collision);
        }
        if err & ERR_ANY != 0 {
            return Err(Mfrc522Error::Protocol);
        }

        let len = usize::from(self.read(Reg::FifoLevel)?).min(FIFO_CAP);
        let mut out = heapless::Vec::new();
        for _ in 0..len {
            let b = self.read(Reg::FifoData)?;
            // Capacity equals the loop bound.
            let _ = out.push(b);
        }
        Ok(out)
    }

    /// `true` if an idle card answered with a 2-byte ATQA.
    pub fn request_a(&mut self) -> Result<bool, Mfrc522Error<SPI::Error>> {
        self.clear_bits(Reg::Coll, 0x80)?;
        match self.transceive(&[PICC_REQA], 7) {
            Ok(atqa) => Ok(atqa.len() == 2),
            Err(Mfrc522Error::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Anticollision at one cascade level: the four UID bytes (cascade tag
    /// included) of the single card in the field.
    pub fn anticollision(&mut self, sel: u8) -> Result<[u8; 4], Mfrc522Error<SPI::Error>> {
        let resp = self.transceive(&[sel, 0x20], 0)?;
        if resp.len() != 5 {
            return Err(Mfrc522Error::Protocol);
        }
        let part = [resp[0], resp[1], resp[2], resp[3]];
        if bcc(&part) != resp[4] {
            return Err(Mfrc522Error::BadChecksum);
        }
        Ok(part)
    }

    /// Select the card at one cascade level; returns its SAK.
    pub fn select(&mut self, sel: u8, part: &[u8; 4]) -> Result<u8, Mfrc522Error<SPI::Error>> {
        let mut frame = [sel, 0x70, part[0], part[1], part[2], part[3], bcc(part), 0, 0];
        let crc = crc_a(&frame[..7]);
        frame[7..].copy_from_slice(&crc);
        let resp = self.transceive(&frame, 0)?;
        // SAK + CRC_A
        if resp.len() != 3 || crc_a(&resp[..1]) != [resp[1], resp[2]] {
            return Err(Mfrc522Error::Protocol);
        }
        Ok(resp[0])
    }

    /// Send HLTA.  A halted card does not answer, so silence is success.
    pub fn halt(&mut self) -> Result<(), Mfrc522Error<SPI::Error>> {
        let crc = crc_a(&[PICC_HLTA, 0x00]);
        match self.transceive(&[PICC_HLTA, 0x00, crc[0], crc[1]], 0) {
            Ok(_) | Err(Mfrc522Error::Timeout) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// REQA, then anticollision and select per cascade level, then halt.
    /// `Ok(None)` when no card.
    pub fn read_uid(&mut self) -> Result<Option<Uid>, Mfrc522Error<SPI::Error>> {
        if !self.request_a()? {
            return Ok(None);
        }
        let mut uid = Uid::new();
        for sel in PICC_SEL {
            let part = self.anticollision(sel)?;
            let sak = self.select(sel, &part)?;
            if sak & SAK_CASCADE == 0 {
                uid.extend_from_slice(&part)
                    .map_err(|_| Mfrc522Error::Protocol)?;
                debug!("MFRC522: selected {:02X?} (SAK 0x{:02X})", uid.as_slice(), sak);
                self.halt()?;
                return Ok(Some(uid));
            }
            if part[0] != CASCADE_TAG {
                return Err(Mfrc522Error::Protocol);
            }
            uid.extend_from_slice(&part[1..])
                .map_err(|_| Mfrc522Error::Protocol)?;
        }
        // Cascade bit still set after level 3.
        Err(Mfrc522Error::Protocol)
    }
}

/// Upper-case hex, two digits per byte.
pub fn uid_hex<const N: usize>(bytes: &[u8]) -> heapless::String<N> {
    use core::fmt::Write;
    let mut s = heapless::String::new();
    for b in bytes {
        if write!(s, "{:02X}", b).is_err() {
            break;
        }
    }
    s
}
