//! FAT32 engine over any [`BlockDevice`](crate::block::BlockDevice).
//!
//! Every operation takes the device and the mounted [`Volume`] explicitly;
//! a `Volume` only exists once [`mount`] has validated the boot records.

mod allocator;
mod chain;
mod dir;
mod entry;
mod file;
mod names;
mod paging;
mod volume;


pub use allocator::{
    allocate_free_cluster, create_file, create_unique, grow_directory, link_cluster,
    COLLISION_ATTEMPTS,
};
pub use chain::{build_chain, chain_tail, read_fat_entry, write_fat_entry, ClusterChain};
pub use dir::{find, list, open_folder, read_volume_label, ListSummary, Query};
pub use entry::{
    Attributes, DirEntry, DirEntryMut, DirItem, DisplayName, EntryLocation, FileEntry,
    DIR_ENTRIES_PER_SECTOR, DIR_ENTRY_SIZE,
};
pub use file::{grow_file, read_at, set_file_pointer, write_at, FilePointer};
pub use names::{next_collision_name, sanitize_short_name, to_short_name, ShortName};
pub use paging::{list_page, PageIndex, PageMark, MAX_PAGES};
pub use volume::{mount, mount_partition, read_boot_record, Volume};

/// Next-pointers per 512-byte FAT sector.
pub const FAT_ENTRIES_PER_SECTOR: u32 = 128;
/// Smallest value that ends a chain.
pub const FAT32_EOC: u32 = 0x0FFF_FFF8;
/// Value written when a cluster becomes a chain tail.
pub const FAT32_EOC_WRITE: u32 = 0x0FFF_FFFF;
const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;

#[derive(Debug, PartialEq, Eq)]
pub enum FatError<E> {
    Device(E),
    /// Sector 0 or the boot parameter block lacks the 0x55AA signature.
    BadSignature,
    InvalidBootSector,
    UnsupportedSectorSize(u16),
    BadCluster(u32),
    NotFound,
    NotDirectory,
    IsDirectory,
    AlreadyExists,
    DirectoryFull,
    DeviceFull,
    /// The request needs more clusters than a chain view can hold.
    FileTooLarge,
}

impl<E> From<E> for FatError<E> {
    fn from(value: E) -> Self {
        Self::Device(value)
    }
}

impl<E> FatError<E> {
    /// Capacity conditions that a caller can only clear by freeing space.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::DirectoryFull | Self::DeviceFull | Self::FileTooLarge
        )
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
