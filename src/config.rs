use sdcard::fat::ShortName;

/// Entries shown per directory page.
pub const PAGE_SIZE: u16 = 18;
/// Root folder that receives tape dumps.
pub const DUMP_FOLDER: ShortName = ShortName::from_raw(*b"DUMPS      ");
pub const DUMP_EXT: [u8; 3] = *b"CAS";
pub use sdcard::fat::MAX_PAGES;

/// Board-level overrides for the storage session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    pub page_size: u16,
    pub dump_folder: ShortName,
    pub dump_ext: [u8; 3],
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            dump_folder: DUMP_FOLDER,
            dump_ext: DUMP_EXT,
        }
    }
}
