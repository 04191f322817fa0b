use super::*;

impl<SPI, CS, D> SdCard<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Runs the SPI-mode handshake: idle clocks, CMD0, CMD8, then
    /// CMD55+ACMD41 until the card leaves the idle state, then CMD58.
    ///
    /// A card that is still busy after [`INIT_ATTEMPTS`] rounds fails with
    /// [`SdCardError::Acmd41Timeout`]; nothing above the transport may run
    /// until this succeeds.
    pub fn init(&mut self) -> Result<CardInfo, SdCardError<SPI::Error>> {
        self.invalidate();
        self.cs.set_high().map_err(|_| SdCardError::ChipSelect)?;
        self.send_dummy_clocks(10)?;

        let mut cmd0_r1 = 0xFFu8;
        for _ in 0..CMD0_ATTEMPTS {
            cmd0_r1 = self.send_command(SD_CMD0, 0, 0x95, &mut [])?;
            if cmd0_r1 == 0x01 {
                break;
            }
        }
        if cmd0_r1 != 0x01 {
            return Err(SdCardError::Cmd0Failed(cmd0_r1));
        }

        let mut r7 = [0u8; 4];
        let cmd8_r1 = self.send_command(SD_CMD8, 0x0000_01AA, 0x87, &mut r7)?;
        let version = if cmd8_r1 == 0x01 {
            if r7[2] != 0x01 || r7[3] != 0xAA {
                return Err(SdCardError::Cmd8EchoMismatch(r7));
            }
            SdCardVersion::V2
        } else if (cmd8_r1 & 0x04) != 0 {
            SdCardVersion::V1
        } else {
            return Err(SdCardError::Cmd8Unexpected(cmd8_r1));
        };

        let acmd41_arg = if version == SdCardVersion::V2 {
            0x4000_0000
        } else {
            0
        };
        let mut acmd41_r1 = 0xFFu8;
        let mut rounds = 0u32;
        while rounds < INIT_ATTEMPTS {
            rounds += 1;
            let _ = self.send_command(SD_CMD55, 0, 0x65, &mut [])?;
            acmd41_r1 = self.send_command(SD_ACMD41, acmd41_arg, 0x77, &mut [])?;
            if acmd41_r1 == 0x00 {
                break;
            }
            self.delay.delay_us(ACMD41_RETRY_DELAY_US);
        }
        if acmd41_r1 != 0x00 {
            log::warn!(
                "sdcard: init acmd41_timeout rounds={} r1={:#04x}",
                rounds,
                acmd41_r1
            );
            return Err(SdCardError::Acmd41Timeout(acmd41_r1));
        }

        if version == SdCardVersion::V1 {
            let cmd16_r1 = self.send_command(SD_CMD16, SECTOR_SIZE as u32, 0xFF, &mut [])?;
            if cmd16_r1 != 0x00 {
                return Err(SdCardError::Cmd16Unexpected(cmd16_r1));
            }
        }

        let mut ocr = [0u8; 4];
        let cmd58_r1 = self.send_command(SD_CMD58, 0, 0xFD, &mut ocr)?;
        if cmd58_r1 != 0x00 {
            return Err(SdCardError::Cmd58Unexpected(cmd58_r1));
        }
        // CCS is only meaningful once ACMD41 reported ready.
        let high_capacity = version == SdCardVersion::V2 && (ocr[0] & 0x40) != 0;
        self.high_capacity = Some(high_capacity);

        log::info!(
            "sdcard: init_ok version={:?} high_capacity={} rounds={}",
            version,
            high_capacity,
            rounds
        );
        Ok(CardInfo {
            version,
            high_capacity,
            init_rounds: rounds,
        })
    }
}
