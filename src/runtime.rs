//! Storage session used by the cartridge shell, tape importer, program
//! loader and directory browser.
//!
//! Every operation takes a `reason` tag that prefixes its log lines and
//! returns a [`ResultCode`] instead of the driver's typed errors.

use sdcard::{
    fat::{self, DirItem, FatError, FilePointer, PageIndex, Volume},
    BlockDevice,
};

use crate::config::StorageConfig;

mod browse;
mod card;
mod dump;
mod load;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    NotMounted,
    InitFailed,
    MountFailed,
    NotFound,
    NotDirectory,
    IsDirectory,
    AlreadyExists,
    DirectoryFull,
    DeviceFull,
    FileTooLarge,
    NoFileOpen,
    BufferTooSmall,
    ChecksumMismatch,
    OperationFailed,
}

impl ResultCode {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotMounted => "not_mounted",
            Self::InitFailed => "init_failed",
            Self::MountFailed => "mount_failed",
            Self::NotFound => "not_found",
            Self::NotDirectory => "not_directory",
            Self::IsDirectory => "is_directory",
            Self::AlreadyExists => "already_exists",
            Self::DirectoryFull => "directory_full",
            Self::DeviceFull => "device_full",
            Self::FileTooLarge => "file_too_large",
            Self::NoFileOpen => "no_file_open",
            Self::BufferTooSmall => "buffer_too_small",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::OperationFailed => "operation_failed",
        }
    }
}

fn fat_result_code<E>(error: &FatError<E>) -> ResultCode {
    match error {
        FatError::BadSignature
        | FatError::InvalidBootSector
        | FatError::UnsupportedSectorSize(_) => ResultCode::MountFailed,
        FatError::NotFound => ResultCode::NotFound,
        FatError::NotDirectory => ResultCode::NotDirectory,
        FatError::IsDirectory => ResultCode::IsDirectory,
        FatError::AlreadyExists => ResultCode::AlreadyExists,
        FatError::DirectoryFull => ResultCode::DirectoryFull,
        FatError::DeviceFull => ResultCode::DeviceFull,
        FatError::FileTooLarge => ResultCode::FileTooLarge,
        FatError::Device(_) | FatError::BadCluster(_) => ResultCode::OperationFailed,
    }
}

/// A block device together with what is known about its filesystem.
///
/// The mounted [`Volume`] holds the current folder. The page index, the
/// selected entry and the open file pointer all describe that folder's
/// contents and are dropped whenever it changes.
pub struct Storage<D> {
    dev: D,
    config: StorageConfig,
    volume: Option<Volume>,
    pages: Option<PageIndex>,
    selected: Option<DirItem>,
    pointer: Option<FilePointer>,
}

impl<D: BlockDevice> Storage<D> {
    pub fn new(dev: D, config: StorageConfig) -> Self {
        Self {
            dev,
            config,
            volume: None,
            pages: None,
            selected: None,
            pointer: None,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub fn into_device(self) -> D {
        self.dev
    }

    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    /// Current folder cluster, when mounted.
    pub fn current_folder(&self) -> Option<u32> {
        self.volume.as_ref().map(Volume::current_folder)
    }

    pub fn page_index(&self) -> Option<&PageIndex> {
        self.pages.as_ref()
    }

    pub fn selected(&self) -> Option<&DirItem> {
        self.selected.as_ref()
    }

    pub fn file_pointer(&self) -> Option<&FilePointer> {
        self.pointer.as_ref()
    }

    /// Mounts the card's first partition and makes its root the current
    /// folder.
    pub fn mount(&mut self, reason: &str) -> ResultCode {
        self.unmount();
        let volume = match fat::mount(&mut self.dev) {
            Ok(volume) => volume,
            Err(err) => {
                log::warn!("sdcart[{}]: mount_error err={:?}", reason, err);
                return ResultCode::MountFailed;
            }
        };
        match fat::read_volume_label(&mut self.dev, &volume) {
            Ok(label) => log::info!(
                "sdcart[{}]: mount_ok label={} capacity_kib={} cluster_bytes={}",
                reason,
                label,
                volume.capacity_bytes() / 1024,
                volume.cluster_bytes()
            ),
            Err(err) => {
                log::warn!("sdcart[{}]: mount_error label err={:?}", reason, err);
                return fat_result_code(&err);
            }
        }
        self.volume = Some(volume);
        ResultCode::Ok
    }

    /// Forgets the volume and everything derived from it.
    pub fn unmount(&mut self) {
        self.volume = None;
        self.forget_folder_state();
    }

    fn forget_folder_state(&mut self) {
        self.pages = None;
        self.selected = None;
        self.pointer = None;
    }

    fn mounted(&self, reason: &str, op: &str) -> Result<Volume, ResultCode> {
        match &self.volume {
            Some(volume) => Ok(volume.clone()),
            None => {
                log::warn!("sdcart[{}]: {} not_mounted", reason, op);
                Err(ResultCode::NotMounted)
            }
        }
    }
}
