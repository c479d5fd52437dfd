//! HD44780 character LCD behind a PCF8574 I²C backpack.
//!
//! Generic over `embedded-hal` 1.0 [`I2c`] and [`DelayNs`].  Backpack wiring
//! is the common one: P0 = RS, P1 = RW, P2 = EN, P3 = backlight,
//! P4..P7 = D4..D7.  The controller runs in 4-bit mode, so every byte goes
//! out as two nibbles, each latched by an EN pulse.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::info;

const RS: u8 = 0x01;
const EN: u8 = 0x04;
const BACKLIGHT: u8 = 0x08;

const CMD_CLEAR: u8 = 0x01;
/// Increment, no display shift.
const CMD_ENTRY_MODE: u8 = 0x06;
/// Display on, cursor and blink off.
const CMD_DISPLAY_ON: u8 = 0x0C;
/// 4-bit bus, two lines, 5x8 font.
const CMD_FUNCTION_SET: u8 = 0x28;
const CMD_SET_CGRAM: u8 = 0x40;
const CMD_SET_DDRAM: u8 = 0x80;

const ROW_ADDR: [u8; 2] = [0x00, 0x40];
/// Custom glyph slots in CGRAM.
pub const GLYPH_SLOTS: u8 = 8;

pub struct Hd44780<I2C, D> {
    i2c: I2C,
    delay: D,
    addr: u8,
}

impl<I2C: I2c, D: DelayNs> Hd44780<I2C, D> {
    pub fn new(i2c: I2C, delay: D, addr: u8) -> Self {
        Self { i2c, delay, addr }
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn expander(&mut self, bits: u8) -> Result<(), I2C::Error> {
        self.i2c.write(self.addr, &[bits | BACKLIGHT])
    }

    /// High nibble of `value` on D4..D7, latched with one EN pulse.
    fn nibble(&mut self, value: u8, mode: u8) -> Result<(), I2C::Error> {
        let bits = (value & 0xF0) | mode;
        self.expander(bits | EN)?;
        self.delay.delay_us(1);
        self.expander(bits)?;
        self.delay.delay_us(50);
        Ok(())
    }

    fn send(&mut self, byte: u8, mode: u8) -> Result<(), I2C::Error> {
        self.nibble(byte, mode)?;
        self.nibble(byte << 4, mode)
    }

    fn command(&mut self, cmd: u8) -> Result<(), I2C::Error> {
        self.send(cmd, 0)
    }

    /// Power-on sequence: force 8-bit mode three times, drop to 4-bit, then
    /// configure, clear and turn the display on.
    pub fn init(&mut self) -> Result<(), I2C::Error> {
        self.delay.delay_ms(50);
        self.expander(0)?;
        for wait_us in [4_500, 4_500, 150] {
            self.nibble(0x30, 0)?;
            self.delay.delay_us(wait_us);
        }
        self.nibble(0x20, 0)?;

        self.command(CMD_FUNCTION_SET)?;
        self.command(CMD_DISPLAY_ON)?;
        self.clear()?;
        self.command(CMD_ENTRY_MODE)?;
        info!("HD44780: ready at 0x{:02X}", self.addr);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), I2C::Error> {
        self.command(CMD_CLEAR)?;
        self.delay.delay_ms(2);
        Ok(())
    }

    /// Load a 5x8 bitmap into CGRAM; it then prints as character `slot`.
    pub fn define_glyph(&mut self, slot: u8, rows: &[u8; 8]) -> Result<(), I2C::Error> {
        self.command(CMD_SET_CGRAM | ((slot % GLYPH_SLOTS) << 3))?;
        for &row in rows {
            self.send(row & 0x1F, RS)?;
        }
        Ok(())
    }

    /// Write character codes starting at column 0 of `row`.
    pub fn write_row(&mut self, row: u8, cells: &[u8]) -> Result<(), I2C::Error> {
        let base = ROW_ADDR[usize::from(row) % ROW_ADDR.len()];
        self.command(CMD_SET_DDRAM | base)?;
        for &cell in cells {
            self.send(cell, RS)?;
        }
        Ok(())
    }
}
