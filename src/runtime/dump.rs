use sdcard::{
    fat::{self, FilePointer, Query},
    BlockDevice,
};

use super::{fat_result_code, ResultCode, Storage};

impl<D: BlockDevice> Storage<D> {
    /// Creates a fresh dump file in the root dump folder and opens it for
    /// [`append`](Self::append).
    ///
    /// `base` is normalized to an 8.3 base name and gets the configured dump
    /// extension; a clash steps the name's last digit.
    pub fn begin_dump(&mut self, reason: &str, base: &str) -> ResultCode {
        let volume = match self.mounted(reason, "dump") {
            Ok(volume) => volume,
            Err(code) => return code,
        };
        self.pointer = None;

        let dump_folder = self.config.dump_folder;
        let folder = match fat::open_folder(
            &mut self.dev,
            &volume,
            volume.root_cluster(),
            Query::Name(&dump_folder),
        ) {
            Ok(folder) => folder,
            Err(err) => {
                log::warn!(
                    "sdcart[{}]: dump_error folder={} err={:?}",
                    reason,
                    dump_folder,
                    err
                );
                return fat_result_code(&err);
            }
        };

        let name = fat::to_short_name(base).with_ext(&self.config.dump_ext);
        let created = fat::create_unique(&mut self.dev, &volume, folder, name, 0)
            .and_then(|entry| FilePointer::open(&mut self.dev, &volume, folder, &entry));
        if folder == volume.current_folder() {
            self.pages = None;
        }
        match created {
            Ok(pointer) => {
                log::info!(
                    "sdcart[{}]: dump_ok folder={} cluster={}",
                    reason,
                    folder,
                    pointer.first_cluster()
                );
                self.pointer = Some(pointer);
                ResultCode::Ok
            }
            Err(err) => {
                log::warn!("sdcart[{}]: dump_error name={} err={:?}", reason, name, err);
                fat_result_code(&err)
            }
        }
    }

    /// Writes `data` at the open file's pointer.
    pub fn append(&mut self, reason: &str, data: &[u8]) -> ResultCode {
        let volume = match self.mounted(reason, "append") {
            Ok(volume) => volume,
            Err(code) => return code,
        };
        let Some(pointer) = self.pointer.as_mut() else {
            log::warn!("sdcart[{}]: append no_file_open", reason);
            return ResultCode::NoFileOpen;
        };
        match fat::write_at(&mut self.dev, &volume, pointer, data) {
            Ok(written) => {
                log::debug!(
                    "sdcart[{}]: append_ok bytes={} size={}",
                    reason,
                    written,
                    pointer.size()
                );
                ResultCode::Ok
            }
            Err(err) => {
                log::warn!(
                    "sdcart[{}]: append_error offset={} err={:?}",
                    reason,
                    pointer.offset(),
                    err
                );
                fat_result_code(&err)
            }
        }
    }

    /// Closes the open file; its size is already on the card.
    pub fn finish_dump(&mut self, reason: &str) -> ResultCode {
        match self.pointer.take() {
            Some(pointer) => {
                log::info!(
                    "sdcart[{}]: dump_done cluster={} size={}",
                    reason,
                    pointer.first_cluster(),
                    pointer.size()
                );
                ResultCode::Ok
            }
            None => ResultCode::NoFileOpen,
        }
    }
}
