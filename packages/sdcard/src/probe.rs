//! SD card transport in SPI mode.
//!
//! Commands go out as 6-byte frames, status comes back as a single R1 byte,
//! and data moves in 512-byte blocks framed by a 0xFE start token and a
//! 2-byte CRC trailer. The card is driven through `embedded-hal` 1.0 traits so
//! the same code runs on the cartridge MCU and against a simulated card.

use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

use crate::block::SECTOR_SIZE;

mod init;
mod io;

const SD_CMD0: u8 = 0;
const SD_CMD8: u8 = 8;
const SD_CMD16: u8 = 16;
const SD_CMD17: u8 = 17;
const SD_CMD24: u8 = 24;
const SD_CMD55: u8 = 55;
const SD_ACMD41: u8 = 41;
const SD_CMD58: u8 = 58;

/// CMD55+ACMD41 rounds before initialization is abandoned.
pub const INIT_ATTEMPTS: u32 = 1000;
/// Bytes clocked while waiting for a read data token.
pub const DATA_TOKEN_POLLS: u32 = 50_000;
/// Bytes clocked while the card holds MISO low after a write.
pub const WRITE_BUSY_POLLS: u32 = 200_000;
const R1_POLLS: usize = 16;
const CMD0_ATTEMPTS: usize = 16;
const ACMD41_RETRY_DELAY_US: u32 = 1_000;

const DATA_START_TOKEN: u8 = 0xFE;
const DATA_ACCEPTED: u8 = 0x05;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCardVersion {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardInfo {
    pub version: SdCardVersion,
    /// Block-addressed (SDHC/SDXC) when set, byte-addressed otherwise.
    pub high_capacity: bool,
    pub init_rounds: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SdCardError<E> {
    Spi(E),
    ChipSelect,
    Cmd0Failed(u8),
    Cmd8Unexpected(u8),
    Cmd8EchoMismatch([u8; 4]),
    Acmd41Timeout(u8),
    Cmd16Unexpected(u8),
    Cmd58Unexpected(u8),
    Cmd17Unexpected(u8),
    Cmd24Unexpected(u8),
    NoResponse(u8),
    DataTokenTimeout(u8),
    DataTokenUnexpected(u8, u8),
    WriteDataRejected(u8),
    WriteBusyTimeout,
    NotInitialized,
}

impl<E> From<E> for SdCardError<E> {
    fn from(value: E) -> Self {
        Self::Spi(value)
    }
}

pub struct SdCard<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
    high_capacity: Option<bool>,
    cached_sector_lba: Option<u32>,
    cached_sector: [u8; SECTOR_SIZE],
}

impl<SPI, CS, D> SdCard<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, mut cs: CS, delay: D) -> Self {
        let _ = cs.set_high();
        Self {
            spi,
            cs,
            delay,
            high_capacity: None,
            cached_sector_lba: None,
            cached_sector: [0; SECTOR_SIZE],
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.high_capacity.is_some()
    }

    /// Forgets the handshake and the cached sector, e.g. after a card swap.
    pub fn invalidate(&mut self) {
        self.high_capacity = None;
        self.cached_sector_lba = None;
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }
}
