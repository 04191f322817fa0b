use sdcard::{
    fat::{self, FilePointer},
    BlockDevice,
};

use super::{fat_result_code, ResultCode, Storage};

impl<D: BlockDevice> Storage<D> {
    /// Reads the whole selected file into `out` and returns its length.
    pub fn load(&mut self, reason: &str, out: &mut [u8]) -> Result<usize, ResultCode> {
        let volume = self.mounted(reason, "load")?;
        let Some(item) = self.selected.as_ref() else {
            log::warn!("sdcart[{}]: load no_file_open", reason);
            return Err(ResultCode::NoFileOpen);
        };
        if item.entry.is_dir() {
            log::warn!(
                "sdcart[{}]: load_error name={} err=is_directory",
                reason,
                item.name
            );
            return Err(ResultCode::IsDirectory);
        }
        let size = item.entry.size as usize;
        if size > out.len() {
            log::warn!(
                "sdcart[{}]: load_error name={} err=buffer_too_small needed={}",
                reason,
                item.name,
                size
            );
            return Err(ResultCode::BufferTooSmall);
        }

        let entry = item.entry;
        let loaded = FilePointer::open(&mut self.dev, &volume, volume.current_folder(), &entry)
            .and_then(|mut pointer| {
                let mut total = 0;
                while total < size {
                    let chunk = &mut out[total..size];
                    let read = fat::read_at(&mut self.dev, &volume, &mut pointer, chunk)?;
                    if read == 0 {
                        break;
                    }
                    total += read;
                }
                Ok(total)
            });
        match loaded {
            Ok(total) if total == size => {
                log::info!(
                    "sdcart[{}]: load_ok cluster={} bytes={}",
                    reason,
                    entry.first_cluster,
                    total
                );
                Ok(total)
            }
            Ok(total) => {
                log::warn!(
                    "sdcart[{}]: load_error cluster={} err=short_read bytes={} size={}",
                    reason,
                    entry.first_cluster,
                    total,
                    size
                );
                Err(ResultCode::FileTooLarge)
            }
            Err(err) => {
                log::warn!(
                    "sdcart[{}]: load_error cluster={} err={:?}",
                    reason,
                    entry.first_cluster,
                    err
                );
                Err(fat_result_code(&err))
            }
        }
    }

    /// Like [`load`](Self::load), then runs `checksum` over the loaded bytes
    /// and compares the result with `expected`.
    pub fn load_verified<F>(
        &mut self,
        reason: &str,
        out: &mut [u8],
        expected: u16,
        checksum: F,
    ) -> Result<usize, ResultCode>
    where
        F: FnOnce(&[u8]) -> u16,
    {
        let len = self.load(reason, out)?;
        let actual = checksum(&out[..len]);
        if actual != expected {
            log::warn!(
                "sdcart[{}]: verify_mismatch expected={:04x} actual={:04x}",
                reason,
                expected,
                actual
            );
            return Err(ResultCode::ChecksumMismatch);
        }
        log::info!("sdcart[{}]: verify_ok checksum={:04x}", reason, actual);
        Ok(len)
    }
}
