use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};
use sdcard::SdCard;

use super::{ResultCode, Storage};

impl<SPI, CS, DL> Storage<SdCard<SPI, CS, DL>>
where
    SPI: SpiBus,
    CS: OutputPin,
    DL: DelayNs,
{
    /// Runs the SPI handshake. Any mounted volume is dropped first, since
    /// the card may have been swapped; call [`mount`](Self::mount) or
    /// [`start`](Self::start) afterwards.
    pub fn init_card(&mut self, reason: &str) -> ResultCode {
        self.unmount();
        self.dev.invalidate();
        match self.dev.init() {
            Ok(info) => {
                log::info!(
                    "sdcart[{}]: init_ok version={:?} high_capacity={} rounds={}",
                    reason,
                    info.version,
                    info.high_capacity,
                    info.init_rounds
                );
                ResultCode::Ok
            }
            Err(err) => {
                log::warn!("sdcart[{}]: init_error err={:?}", reason, err);
                ResultCode::InitFailed
            }
        }
    }

    /// Initializes the card if needed, then mounts it.
    pub fn start(&mut self, reason: &str) -> ResultCode {
        if !self.dev.is_initialized() {
            let code = self.init_card(reason);
            if !code.is_ok() {
                return code;
            }
        }
        self.mount(reason)
    }
}
