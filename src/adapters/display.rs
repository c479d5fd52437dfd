//! 16x2 character display adapter.
//!
//! Implements [`DisplayPort`] by composing the frame a 16x2 panel would show
//! and writing it to the log.  Layout:
//!
//! ```text
//!   ┌────────────────┐
//!   │Terminal Ready ▮│  15 columns of text + battery glyph
//!   │TM-1A2B3C       │  16 columns of text
//!   └────────────────┘
//! ```
//!
//! Lines wider than their row scroll as a marquee, one column per
//! animation step.  The battery gauge has five levels and blinks below 20 %.
//!
//! [`LcdDisplay`] mirrors the same frame onto a physical [`CharPanel`],
//! rewriting only rows that changed.  The gauge is drawn with five custom
//! glyphs loaded into CGRAM slots 0..4.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};

use crate::app::ports::DisplayPort;
use crate::drivers::hd44780::Hd44780;
use crate::error::HardwareError;

pub const COLS: usize = 16;
const TOP_TEXT_COLS: usize = COLS - 1;
/// Blank run between the end of a scrolling line and its restart.
const MARQUEE_GAP: usize = 3;
const BLINK_BELOW_PERCENT: u8 = 20;
/// Gauge glyphs, empty to full.
const GAUGE: [char; 5] = ['_', '.', ':', '|', '#'];

/// Five gauge levels: ≤5 %, ≤25 %, ≤50 %, ≤75 %, above.
pub fn battery_level(percent: u8) -> usize {
    match percent {
        0..=5 => 0,
        6..=25 => 1,
        26..=50 => 2,
        51..=75 => 3,
        _ => 4,
    }
}

/// `width` columns of `text` starting at `offset`, wrapping through a gap.
fn window(text: &str, width: usize, offset: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        let mut row: String = chars.into_iter().collect();
        row.extend(core::iter::repeat_n(' ', width - row.chars().count()));
        return row;
    }
    let cycle = chars.len() + MARQUEE_GAP;
    (0..width)
        .map(|i| chars.get((offset + i) % cycle).copied().unwrap_or(' '))
        .collect()
}

#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    top: String,
    bottom: String,
    offset: usize,
    battery: Option<u8>,
    blink_hidden: bool,
    frame: [String; 2],
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        let mut d = Self::default();
        d.frame = d.compose();
        d
    }

    /// The two rows currently on the panel.
    pub fn frame(&self) -> &[String; 2] {
        &self.frame
    }

    fn scrolls(&self) -> bool {
        self.top.chars().count() > TOP_TEXT_COLS || self.bottom.chars().count() > COLS
    }

    fn glyph(&self) -> char {
        match self.battery {
            None => ' ',
            Some(pct) if pct < BLINK_BELOW_PERCENT && self.blink_hidden => ' ',
            Some(pct) => GAUGE[battery_level(pct)],
        }
    }

    fn compose(&self) -> [String; 2] {
        let mut top = window(&self.top, TOP_TEXT_COLS, self.offset);
        top.push(self.glyph());
        [top, window(&self.bottom, COLS, self.offset)]
    }

    /// Recompose; `true` if the panel content changed.
    fn refresh(&mut self) -> bool {
        let next = self.compose();
        if next == self.frame {
            return false;
        }
        self.frame = next;
        true
    }
}

impl DisplayPort for ConsoleDisplay {
    fn show_lines(&mut self, top: &str, bottom: &str) {
        self.top = top.to_owned();
        self.bottom = bottom.to_owned();
        self.offset = 0;
        self.refresh();
        info!("LCD   | {} | {}", self.frame[0], self.frame[1]);
    }

    fn show_battery_level(&mut self, percent: u8) {
        self.battery = Some(percent.min(100));
        if self.refresh() {
            debug!("LCD   | battery {}%", percent);
        }
    }

    fn advance_scroll_animation(&mut self) {
        if self.scrolls() {
            self.offset = self.offset.wrapping_add(1);
        }
        if self.battery.is_some_and(|p| p < BLINK_BELOW_PERCENT) {
            self.blink_hidden = !self.blink_hidden;
        } else {
            self.blink_hidden = false;
        }
        if self.refresh() {
            debug!("LCD   | {} | {}", self.frame[0], self.frame[1]);
        }
    }
}

/// Battery outlines, empty to full, one per gauge level (5x8, top row first).
pub const BATTERY_GLYPHS: [[u8; 8]; 5] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111, 0b11111],
    [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111, 0b11111, 0b11111],
    [0b01110, 0b10001, 0b10001, 0b10001, 0b11111, 0b11111, 0b11111, 0b11111],
    [0b01110, 0b10001, 0b10001, 0b11111, 0b11111, 0b11111, 0b11111, 0b11111],
];

/// A two-row character panel.
pub trait CharPanel {
    fn define_glyph(&mut self, slot: u8, rows: &[u8; 8]) -> Result<(), HardwareError>;

    /// `cells` are character codes from column 0.
    fn write_row(&mut self, row: u8, cells: &[u8]) -> Result<(), HardwareError>;
}

impl<I2C: I2c, D: DelayNs> CharPanel for Hd44780<I2C, D> {
    fn define_glyph(&mut self, slot: u8, rows: &[u8; 8]) -> Result<(), HardwareError> {
        Hd44780::define_glyph(self, slot, rows).map_err(|_| HardwareError::BusFault)
    }

    fn write_row(&mut self, row: u8, cells: &[u8]) -> Result<(), HardwareError> {
        Hd44780::write_row(self, row, cells).map_err(|_| HardwareError::BusFault)
    }
}

/// Character codes for one frame row.  The gauge column maps to its CGRAM
/// slot; anything outside printable ASCII shows as `?`.
fn cells(row: &str, gauge_column: bool) -> [u8; COLS] {
    let mut out = [b' '; COLS];
    for (i, c) in row.chars().take(COLS).enumerate() {
        out[i] = match GAUGE.iter().position(|&g| g == c) {
            Some(slot) if gauge_column && i == COLS - 1 => slot as u8,
            _ if c == ' ' || c.is_ascii_graphic() => c as u8,
            _ => b'?',
        };
    }
    out
}

/// [`ConsoleDisplay`] plus a physical panel.
pub struct LcdDisplay<P> {
    console: ConsoleDisplay,
    panel: P,
    shown: [Option<[u8; COLS]>; 2],
    faulted: bool,
}

impl<P: CharPanel> LcdDisplay<P> {
    /// Loads the gauge glyphs and draws the blank frame.  Fails if the panel
    /// does not take the glyphs.
    pub fn new(mut panel: P) -> Result<Self, HardwareError> {
        for (slot, glyph) in (0u8..).zip(BATTERY_GLYPHS.iter()) {
            panel.define_glyph(slot, glyph)?;
        }
        let mut d = Self {
            console: ConsoleDisplay::new(),
            panel,
            shown: [None, None],
            faulted: false,
        };
        d.sync();
        Ok(d)
    }

    pub fn frame(&self) -> &[String; 2] {
        self.console.frame()
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut P {
        &mut self.panel
    }

    fn sync(&mut self) {
        let frame = self.console.frame();
        let next = [cells(&frame[0], true), cells(&frame[1], false)];
        for (row, row_cells) in (0u8..).zip(next) {
            let slot = &mut self.shown[usize::from(row)];
            if *slot == Some(row_cells) {
                continue;
            }
            match self.panel.write_row(row, &row_cells) {
                Ok(()) => {
                    *slot = Some(row_cells);
                    if self.faulted {
                        info!("LCD: panel answering again");
                        self.faulted = false;
                    }
                }
                Err(e) => {
                    if !self.faulted {
                        warn!("LCD: panel write failed: {}", e);
                        self.faulted = true;
                    }
                }
            }
        }
    }
}

impl<P: CharPanel> DisplayPort for LcdDisplay<P> {
    fn show_lines(&mut self, top: &str, bottom: &str) {
        self.console.show_lines(top, bottom);
        self.sync();
    }

    fn show_battery_level(&mut self, percent: u8) {
        self.console.show_battery_level(percent);
        self.sync();
    }

    fn advance_scroll_animation(&mut self) {
        self.console.advance_scroll_animation();
        self.sync();
    }
}
