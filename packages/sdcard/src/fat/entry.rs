//! Typed views over the 32-byte directory slots of a sector buffer.

use bitflags::bitflags;

use super::names::ShortName;
use super::{read_u16, read_u32};
use crate::{block::SECTOR_SIZE, NAME_MAX};

pub const DIR_ENTRY_SIZE: usize = 32;
pub const DIR_ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;

const SLOT_END: u8 = 0x00;
const SLOT_DELETED: u8 = 0xE5;

const OFFSET_NAME: usize = 0;
const OFFSET_ATTR: usize = 11;
const OFFSET_CLUSTER_HI: usize = 20;
const OFFSET_CLUSTER_LO: usize = 26;
const OFFSET_SIZE: usize = 28;

const LFN_SEQUENCE_MASK: u8 = 0x1F;
const LFN_LAST_FRAGMENT: u8 = 0x40;
pub(crate) const LFN_UNITS_PER_FRAGMENT: usize = 13;
const LFN_UNIT_OFFSETS: [usize; LFN_UNITS_PER_FRAGMENT] =
    [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const LONG_NAME = Self::READ_ONLY.bits()
            | Self::HIDDEN.bits()
            | Self::SYSTEM.bits()
            | Self::VOLUME_ID.bits();
    }
}

impl Attributes {
    pub fn is_long_name(self) -> bool {
        self.contains(Self::LONG_NAME)
    }

    pub fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    /// Entries never shown to the user. Only plain files and folders are
    /// listed, so any of the four low attribute bits hides an entry.
    pub fn is_concealed(self) -> bool {
        self.intersects(Self::READ_ONLY | Self::HIDDEN | Self::SYSTEM | Self::VOLUME_ID)
    }
}

/// Read-only view of one directory slot.
#[derive(Clone, Copy)]
pub struct DirEntry<'a> {
    raw: &'a [u8],
}

impl<'a> DirEntry<'a> {
    pub fn from_sector(sector: &'a [u8; SECTOR_SIZE], slot: usize) -> Self {
        let base = slot * DIR_ENTRY_SIZE;
        Self {
            raw: &sector[base..base + DIR_ENTRY_SIZE],
        }
    }

    /// `raw` must hold at least [`DIR_ENTRY_SIZE`] bytes.
    pub fn from_bytes(raw: &'a [u8]) -> Self {
        Self {
            raw: &raw[..DIR_ENTRY_SIZE],
        }
    }

    pub fn first_byte(&self) -> u8 {
        self.raw[OFFSET_NAME]
    }

    /// No entry lives in this slot or any slot after it.
    pub fn is_end(&self) -> bool {
        self.first_byte() == SLOT_END
    }

    pub fn is_deleted(&self) -> bool {
        self.first_byte() == SLOT_DELETED
    }

    pub fn is_free(&self) -> bool {
        self.is_end() || self.is_deleted()
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_retain(self.raw[OFFSET_ATTR])
    }

    pub fn short_name(&self) -> ShortName {
        let mut raw = [0u8; 11];
        raw.copy_from_slice(&self.raw[OFFSET_NAME..OFFSET_NAME + 11]);
        ShortName::from_raw(raw)
    }

    pub fn first_cluster(&self) -> u32 {
        let hi = read_u16(self.raw, OFFSET_CLUSTER_HI) as u32;
        let lo = read_u16(self.raw, OFFSET_CLUSTER_LO) as u32;
        (hi << 16) | lo
    }

    pub fn size(&self) -> u32 {
        read_u32(self.raw, OFFSET_SIZE)
    }

    pub fn lfn_sequence(&self) -> u8 {
        self.first_byte() & LFN_SEQUENCE_MASK
    }

    pub fn lfn_is_last(&self) -> bool {
        (self.first_byte() & LFN_LAST_FRAGMENT) != 0
    }

    pub fn lfn_units(&self) -> [u16; LFN_UNITS_PER_FRAGMENT] {
        let mut units = [0xFFFFu16; LFN_UNITS_PER_FRAGMENT];
        for (unit, offset) in units.iter_mut().zip(LFN_UNIT_OFFSETS) {
            *unit = read_u16(self.raw, offset);
        }
        units
    }
}

/// Mutable view of one directory slot.
pub struct DirEntryMut<'a> {
    raw: &'a mut [u8],
}

impl<'a> DirEntryMut<'a> {
    pub fn from_sector(sector: &'a mut [u8; SECTOR_SIZE], slot: usize) -> Self {
        let base = slot * DIR_ENTRY_SIZE;
        Self {
            raw: &mut sector[base..base + DIR_ENTRY_SIZE],
        }
    }

    pub fn as_view(&self) -> DirEntry<'_> {
        DirEntry { raw: &*self.raw }
    }

    pub fn clear(&mut self) {
        self.raw.fill(0);
    }

    pub fn set_short_name(&mut self, name: &ShortName) {
        self.raw[OFFSET_NAME..OFFSET_NAME + 11].copy_from_slice(name.as_bytes());
    }

    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.raw[OFFSET_ATTR] = attributes.bits();
    }

    pub fn set_first_cluster(&mut self, cluster: u32) {
        let hi = ((cluster >> 16) as u16).to_le_bytes();
        let lo = (cluster as u16).to_le_bytes();
        self.raw[OFFSET_CLUSTER_HI..OFFSET_CLUSTER_HI + 2].copy_from_slice(&hi);
        self.raw[OFFSET_CLUSTER_LO..OFFSET_CLUSTER_LO + 2].copy_from_slice(&lo);
    }

    pub fn set_size(&mut self, size: u32) {
        self.raw[OFFSET_SIZE..OFFSET_SIZE + 4].copy_from_slice(&size.to_le_bytes());
    }
}

/// Where a short entry lives on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryLocation {
    pub lba: u32,
    pub slot: u8,
}

/// Decoded fields of a short entry, detached from its sector buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub short_name: ShortName,
    pub attributes: Attributes,
    pub first_cluster: u32,
    pub size: u32,
    pub location: EntryLocation,
}

impl FileEntry {
    pub fn read(entry: &DirEntry<'_>, location: EntryLocation) -> Self {
        Self {
            short_name: entry.short_name(),
            attributes: entry.attributes(),
            first_cluster: entry.first_cluster(),
            size: entry.size(),
            location,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attributes.is_directory()
    }
}

pub type DisplayName = heapless::String<NAME_MAX>;

/// A visible directory entry as produced by listing and lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirItem {
    pub entry: FileEntry,
    /// Long name when one preceded the entry, else the trimmed 8.3 form.
    pub name: DisplayName,
    /// 1-based position among the folder's visible entries.
    pub index: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_decode_fixed_offsets() {
        let mut sector = [0u8; SECTOR_SIZE];
        let base = 3 * DIR_ENTRY_SIZE;
        sector[base..base + 11].copy_from_slice(b"GAME    CAS");
        sector[base + 11] = 0x21;
        sector[base + 20..base + 22].copy_from_slice(&0x0001u16.to_le_bytes());
        sector[base + 26..base + 28].copy_from_slice(&0x2345u16.to_le_bytes());
        sector[base + 28..base + 32].copy_from_slice(&1280u32.to_le_bytes());

        let entry = DirEntry::from_sector(&sector, 3);
        assert_eq!(entry.short_name().as_bytes(), b"GAME    CAS");
        assert_eq!(entry.attributes(), Attributes::ARCHIVE | Attributes::READ_ONLY);
        assert_eq!(entry.first_cluster(), 0x0001_2345);
        assert_eq!(entry.size(), 1280);
        assert!(!entry.is_free());
        assert!(DirEntry::from_sector(&sector, 4).is_end());
    }

    #[test]
    fn mutable_view_writes_the_same_layout() {
        let mut sector = [0xAAu8; SECTOR_SIZE];
        {
            let mut slot = DirEntryMut::from_sector(&mut sector, 15);
            slot.clear();
            slot.set_short_name(&ShortName::from_raw(*b"NEW     BIN"));
            slot.set_attributes(Attributes::ARCHIVE);
            slot.set_first_cluster(0x0003_0004);
            slot.set_size(77);
            assert_eq!(slot.as_view().size(), 77);
        }
        let base = 15 * DIR_ENTRY_SIZE;
        assert_eq!(&sector[base + 20..base + 22], &[0x03, 0x00]);
        assert_eq!(&sector[base + 26..base + 28], &[0x04, 0x00]);
        assert_eq!(sector[base + 12], 0);
        assert_eq!(sector[base - 1], 0xAA);
        let entry = DirEntry::from_sector(&sector, 15);
        assert_eq!(entry.first_cluster(), 0x0003_0004);
    }

    #[test]
    fn long_name_attribute_needs_all_four_low_bits() {
        assert!(Attributes::from_bits_retain(0x0F).is_long_name());
        assert!(Attributes::from_bits_retain(0x3F).is_long_name());
        assert!(!Attributes::from_bits_retain(0x0E).is_long_name());
        assert!(Attributes::from_bits_retain(0x06).is_concealed());
        assert!(Attributes::from_bits_retain(0x21).is_concealed());
        assert!(!Attributes::from_bits_retain(0x20).is_concealed());
        assert!(!Attributes::from_bits_retain(0x10).is_concealed());
    }

    #[test]
    fn lfn_units_follow_fragment_offsets() {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw[0] = 0x42;
        raw[11] = 0x0F;
        for (idx, offset) in LFN_UNIT_OFFSETS.iter().enumerate() {
            raw[*offset..*offset + 2].copy_from_slice(&(b'a' as u16 + idx as u16).to_le_bytes());
        }
        let entry = DirEntry::from_bytes(&raw);
        assert_eq!(entry.lfn_sequence(), 2);
        assert!(entry.lfn_is_last());
        let units = entry.lfn_units();
        assert_eq!(units[0], b'a' as u16);
        assert_eq!(units[12], b'a' as u16 + 12);
    }
}
