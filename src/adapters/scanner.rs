//! RFID scanner adapter.
//!
//! Implements [`ScannerPort`] over any [`UidReader`]: the MFRC522 driver on
//! target, a scripted reader on the host.  Transient air-interface errors
//! (collision, bad checksum, framing) read as "no tag" so the next read
//! simply retries.  Bus failures and a missing chip are reported.

use log::debug;

use crate::app::ports::{ScannerPort, TagId};
use crate::drivers::mfrc522::{Mfrc522, Mfrc522Error, uid_hex};
use crate::error::HardwareError;

/// One non-blocking read attempt.
pub trait UidReader {
    fn read_uid(&mut self) -> Result<Option<TagId>, HardwareError>;
}

impl<SPI: embedded_hal::spi::SpiDevice> UidReader for Mfrc522<SPI> {
    fn read_uid(&mut self) -> Result<Option<TagId>, HardwareError> {
        match Mfrc522::read_uid(self) {
            Ok(Some(uid)) => Ok(Some(uid_hex(&uid))),
            Ok(None) | Err(Mfrc522Error::Timeout) => Ok(None),
            Err(Mfrc522Error::Spi(_)) => Err(HardwareError::BusFault),
            Err(Mfrc522Error::NoChip(_)) => Err(HardwareError::ScannerUnavailable),
            Err(e @ (Mfrc522Error::Collision
            | Mfrc522Error::Protocol
            | Mfrc522Error::BadChecksum)) => {
                debug!("Scanner: read discarded ({:?})", e);
                Ok(None)
            }
        }
    }
}

/// Host reader returning queued tags, one per read.
#[derive(Debug, Default)]
pub struct SimUidReader {
    queue: std::collections::VecDeque<TagId>,
}

impl SimUidReader {
    pub fn present(&mut self, tag: &str) {
        if let Ok(t) = TagId::try_from(tag) {
            self.queue.push_back(t);
        }
    }
}

impl UidReader for SimUidReader {
    fn read_uid(&mut self) -> Result<Option<TagId>, HardwareError> {
        Ok(self.queue.pop_front())
    }
}

pub struct RfidScanner<R: UidReader> {
    /// `None` when the transceiver failed to initialise.
    reader: Option<R>,
}

impl<R: UidReader> RfidScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
        }
    }

    /// A scanner whose hardware never came up.
    pub fn unavailable() -> Self {
        Self { reader: None }
    }

    pub fn reader_mut(&mut self) -> Option<&mut R> {
        self.reader.as_mut()
    }
}

impl<R: UidReader> ScannerPort for RfidScanner<R> {
    fn read_tag(&mut self) -> Result<Option<TagId>, HardwareError> {
        match &mut self.reader {
            Some(r) => r.read_uid(),
            None => Err(HardwareError::ScannerUnavailable),
        }
    }
}
