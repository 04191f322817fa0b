use super::*;
use crate::block::BlockDevice;

impl<SPI, CS, D> BlockDevice for SdCard<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = SdCardError<SPI::Error>;

    fn read_sector(&mut self, lba: u32, out: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        if self.cached_sector_lba == Some(lba) {
            out.copy_from_slice(&self.cached_sector);
            return Ok(());
        }
        let high_capacity = self.high_capacity.ok_or(SdCardError::NotInitialized)?;
        self.read_data_sector_512_into(lba, high_capacity, out)?;
        self.cached_sector.copy_from_slice(out);
        self.cached_sector_lba = Some(lba);
        Ok(())
    }

    /// Single-block write. A data response other than "accepted" is returned
    /// as [`SdCardError::WriteDataRejected`] and never retried here.
    fn write_sector(&mut self, lba: u32, data: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let high_capacity = self.high_capacity.ok_or(SdCardError::NotInitialized)?;
        let arg = block_argument(lba, high_capacity);

        let cmd24_r1 = self.send_command_hold_cs(SD_CMD24, arg, 0xFF, &mut [])?;
        if cmd24_r1 != 0x00 {
            self.end_transaction();
            return Err(SdCardError::Cmd24Unexpected(cmd24_r1));
        }

        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(DATA_START_TOKEN)?;
        for &byte in data {
            let _ = self.transfer_byte(byte)?;
        }
        // Data CRC16 is ignored in SPI mode unless CRC is explicitly enabled.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;

        let response = self.transfer_byte(0xFF)? & 0x1F;
        if response != DATA_ACCEPTED {
            self.end_transaction();
            // The card may have half-written the block.
            self.cached_sector_lba = None;
            log::warn!("sdcard: write_rejected lba={} status={:#04x}", lba, response);
            return Err(SdCardError::WriteDataRejected(response));
        }

        let mut released = false;
        for _ in 0..WRITE_BUSY_POLLS {
            if self.transfer_byte(0xFF)? == 0xFF {
                released = true;
                break;
            }
        }
        self.end_transaction();
        if !released {
            self.cached_sector_lba = None;
            return Err(SdCardError::WriteBusyTimeout);
        }
        self.cached_sector.copy_from_slice(data);
        self.cached_sector_lba = Some(lba);
        Ok(())
    }
}

fn block_argument(lba: u32, high_capacity: bool) -> u32 {
    if high_capacity {
        lba
    } else {
        lba.saturating_mul(SECTOR_SIZE as u32)
    }
}

impl<SPI, CS, D> SdCard<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub(super) fn send_command(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdCardError<SPI::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, true)
    }

    fn send_command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdCardError<SPI::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, false)
    }

    fn send_command_inner(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
        release_cs_after: bool,
    ) -> Result<u8, SdCardError<SPI::Error>> {
        let frame = command_frame(cmd, arg, crc);

        self.cs.set_low().map_err(|_| SdCardError::ChipSelect)?;
        for byte in frame {
            let _ = self.transfer_byte(byte)?;
        }

        let mut r1 = 0xFFu8;
        let mut got_response = false;
        for _ in 0..R1_POLLS {
            r1 = self.transfer_byte(0xFF)?;
            if (r1 & 0x80) == 0 {
                got_response = true;
                break;
            }
        }

        if !got_response {
            self.end_transaction();
            return Err(SdCardError::NoResponse(cmd));
        }

        for slot in extra_response {
            *slot = self.transfer_byte(0xFF)?;
        }

        if release_cs_after {
            self.end_transaction();
        }
        Ok(r1)
    }

    pub(super) fn send_dummy_clocks(
        &mut self,
        bytes: usize,
    ) -> Result<(), SdCardError<SPI::Error>> {
        for _ in 0..bytes {
            let _ = self.transfer_byte(0xFF)?;
        }
        Ok(())
    }

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SdCardError<SPI::Error>> {
        let mut frame = [byte];
        self.spi.transfer_in_place(&mut frame)?;
        Ok(frame[0])
    }

    fn read_data_sector_512_into(
        &mut self,
        lba: u32,
        high_capacity: bool,
        out: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), SdCardError<SPI::Error>> {
        let arg = block_argument(lba, high_capacity);
        let cmd17_r1 = self.send_command_hold_cs(SD_CMD17, arg, 0xFF, &mut [])?;
        if cmd17_r1 != 0x00 {
            self.end_transaction();
            return Err(SdCardError::Cmd17Unexpected(cmd17_r1));
        }

        let mut token = 0xFFu8;
        let mut got_token = false;
        for _ in 0..DATA_TOKEN_POLLS {
            token = self.transfer_byte(0xFF)?;
            if token != 0xFF {
                got_token = true;
                break;
            }
        }
        if !got_token {
            self.end_transaction();
            return Err(SdCardError::DataTokenTimeout(SD_CMD17));
        }
        if token != DATA_START_TOKEN {
            self.end_transaction();
            return Err(SdCardError::DataTokenUnexpected(SD_CMD17, token));
        }

        for slot in out {
            *slot = self.transfer_byte(0xFF)?;
        }
        // Discard data CRC16.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;
        self.end_transaction();
        Ok(())
    }

    fn end_transaction(&mut self) {
        let _ = self.cs.set_high();
        let _ = self.transfer_byte(0xFF);
    }
}

pub(super) fn command_frame(cmd: u8, arg: u32, crc: u8) -> [u8; 6] {
    [
        0x40 | cmd,
        (arg >> 24) as u8,
        (arg >> 16) as u8,
        (arg >> 8) as u8,
        arg as u8,
        crc,
    ]
}
