use core::ops::ControlFlow;

use super::entry::LFN_UNITS_PER_FRAGMENT;
use super::{
    build_chain, Attributes, DirEntry, DirItem, DisplayName, EntryLocation, FatError, FileEntry,
    ShortName, Volume, DIR_ENTRIES_PER_SECTOR,
};
use crate::block::{BlockDevice, SECTOR_SIZE};

/// Long-name fragments kept per entry; later fragments are ignored.
pub const LFN_MAX_FRAGMENTS: usize = 7;
const LFN_MAX_UNITS: usize = LFN_MAX_FRAGMENTS * LFN_UNITS_PER_FRAGMENT;

/// Lookup predicate for [`find`].
#[derive(Clone, Copy, Debug)]
pub enum Query<'a> {
    /// Byte-exact match on the padded 8.3 name.
    Name(&'a ShortName),
    /// 1-based position among visible entries.
    Index(u16),
    /// Entry whose data starts at this cluster.
    Cluster(u32),
}

impl Query<'_> {
    fn matches(&self, item: &DirItem) -> bool {
        match *self {
            Query::Name(name) => item.entry.short_name == *name,
            Query::Index(index) => item.index == index,
            Query::Cluster(cluster) => cluster >= 2 && item.entry.first_cluster == cluster,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListSummary {
    /// Visible entries handed to the visitor, folders included.
    pub entries: u16,
    pub files: u16,
    pub total_bytes: u64,
    /// The visitor broke out before the end of the folder.
    pub stopped_early: bool,
}

impl ListSummary {
    pub(crate) fn record(&mut self, item: &DirItem) {
        self.entries = self.entries.saturating_add(1);
        if !item.entry.is_dir() {
            self.files = self.files.saturating_add(1);
            self.total_bytes += item.entry.size as u64;
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct WalkStart {
    pub chain_index: u8,
    pub visible_before: u16,
}

/// Where an entry's slots begin, long-name fragments included.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WalkPosition {
    pub chain_index: u8,
    /// Visible entries counted before the current cluster began.
    pub visible_before_cluster: u16,
}

pub(crate) struct WalkEnd {
    pub visible: u16,
    pub stopped: bool,
}

/// Accumulates long-name fragments, each stored at `(sequence - 1) * 13`.
struct LongName {
    units: [u16; LFN_MAX_UNITS],
    present: bool,
    highest: usize,
    /// Where the first buffered fragment was read.
    start: Option<WalkPosition>,
}

impl LongName {
    fn new() -> Self {
        Self {
            units: [0xFFFF; LFN_MAX_UNITS],
            present: false,
            highest: 0,
            start: None,
        }
    }

    fn clear(&mut self) {
        if self.present {
            *self = Self::new();
        }
    }

    fn push(&mut self, entry: &DirEntry<'_>, position: WalkPosition) {
        let sequence = entry.lfn_sequence() as usize;
        if sequence == 0 || sequence > LFN_MAX_FRAGMENTS {
            return;
        }
        // The last-flagged fragment carries its name's highest sequence, so
        // anything buffered at or above it belongs to an orphaned name.
        if entry.lfn_is_last() && self.present && self.highest >= sequence {
            self.clear();
        }
        let start = (sequence - 1) * LFN_UNITS_PER_FRAGMENT;
        self.units[start..start + LFN_UNITS_PER_FRAGMENT].copy_from_slice(&entry.lfn_units());
        if !self.present {
            self.start = Some(position);
        }
        self.present = true;
        self.highest = self.highest.max(sequence);
    }

    /// Decodes the buffered name up to the first NUL or 0xFFFF pad unit and
    /// resets the buffer. Returns false when nothing usable was buffered.
    fn take_into(&mut self, out: &mut DisplayName) -> bool {
        let present = self.present;
        out.clear();
        if present {
            let units = self
                .units
                .iter()
                .copied()
                .take_while(|&unit| unit != 0x0000 && unit != 0xFFFF);
            for ch in char::decode_utf16(units) {
                if out.push(ch.unwrap_or('?')).is_err() {
                    break;
                }
            }
        }
        self.clear();
        present && !out.is_empty()
    }
}

/// Visits the visible entries of `folder` in storage order.
///
/// A slot whose first byte is 0x00 ends the folder even if later clusters
/// exist. Deleted slots, volume labels, hidden or system entries and the
/// "." self-reference are skipped without being counted.
pub(crate) fn walk<D, F>(
    dev: &mut D,
    volume: &Volume,
    folder: u32,
    start: WalkStart,
    mut visit: F,
) -> Result<WalkEnd, FatError<D::Error>>
where
    D: BlockDevice,
    F: FnMut(&DirItem, WalkPosition) -> ControlFlow<()>,
{
    let chain = build_chain(dev, volume, folder)?;
    let mut visible = start.visible_before;
    let mut long_name = LongName::new();
    let mut sector = [0u8; SECTOR_SIZE];

    for (chain_index, &cluster) in chain
        .clusters()
        .iter()
        .enumerate()
        .skip(start.chain_index as usize)
    {
        let position = WalkPosition {
            chain_index: chain_index as u8,
            visible_before_cluster: visible,
        };
        for sector_offset in 0..volume.sectors_per_cluster() as u32 {
            let lba = volume.cluster_lba(cluster, sector_offset)?;
            dev.read_sector(lba, &mut sector)?;

            for slot in 0..DIR_ENTRIES_PER_SECTOR {
                let entry = DirEntry::from_sector(&sector, slot);
                if entry.is_end() {
                    return Ok(WalkEnd {
                        visible,
                        stopped: false,
                    });
                }
                if entry.is_deleted() {
                    long_name.clear();
                    continue;
                }
                let attributes = entry.attributes();
                if attributes.is_long_name() {
                    long_name.push(&entry, position);
                    continue;
                }
                let short_name = entry.short_name();
                if attributes.is_concealed() || short_name.is_dot() {
                    long_name.clear();
                    continue;
                }

                visible = visible.saturating_add(1);
                let location = EntryLocation {
                    lba,
                    slot: slot as u8,
                };
                let mut item = DirItem {
                    entry: FileEntry::read(&entry, location),
                    name: DisplayName::new(),
                    index: visible,
                };
                let item_position = long_name.start.unwrap_or(position);
                if !long_name.take_into(&mut item.name) {
                    short_name.write_display(attributes.is_directory(), &mut item.name);
                }
                if visit(&item, item_position).is_break() {
                    return Ok(WalkEnd {
                        visible,
                        stopped: true,
                    });
                }
            }
        }
    }

    Ok(WalkEnd {
        visible,
        stopped: false,
    })
}

/// Lists every visible entry of `folder`, stopping early when the visitor
/// breaks, and returns the count and size totals of what was visited.
pub fn list<D, F>(
    dev: &mut D,
    volume: &Volume,
    folder: u32,
    mut visit: F,
) -> Result<ListSummary, FatError<D::Error>>
where
    D: BlockDevice,
    F: FnMut(&DirItem) -> ControlFlow<()>,
{
    let mut summary = ListSummary::default();
    let end = walk(dev, volume, folder, WalkStart::default(), |item, _| {
        summary.record(item);
        visit(item)
    })?;
    summary.stopped_early = end.stopped;
    Ok(summary)
}

/// First visible entry of `folder` matching `query`, or `None`.
pub fn find<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    folder: u32,
    query: Query<'_>,
) -> Result<Option<DirItem>, FatError<D::Error>> {
    let mut found = None;
    walk(dev, volume, folder, WalkStart::default(), |item, _| {
        if query.matches(item) {
            found = Some(item.clone());
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    Ok(found)
}

/// Resolves a subfolder of `folder` to its first cluster.
///
/// A hit without the directory bit is [`FatError::NotDirectory`]; a `..`
/// entry pointing at cluster 0 resolves to the root folder.
pub fn open_folder<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    folder: u32,
    query: Query<'_>,
) -> Result<u32, FatError<D::Error>> {
    let item = find(dev, volume, folder, query)?.ok_or(FatError::NotFound)?;
    if !item.entry.is_dir() {
        return Err(FatError::NotDirectory);
    }
    Ok(if item.entry.first_cluster == 0 {
        volume.root_cluster()
    } else {
        item.entry.first_cluster
    })
}

/// Label from the root folder's volume-ID entry, else the boot sector label.
pub fn read_volume_label<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
) -> Result<ShortName, FatError<D::Error>> {
    let chain = build_chain(dev, volume, volume.root_cluster())?;
    let mut sector = [0u8; SECTOR_SIZE];
    'clusters: for &cluster in chain.clusters() {
        for sector_offset in 0..volume.sectors_per_cluster() as u32 {
            dev.read_sector(volume.cluster_lba(cluster, sector_offset)?, &mut sector)?;
            for slot in 0..DIR_ENTRIES_PER_SECTOR {
                let entry = DirEntry::from_sector(&sector, slot);
                if entry.is_end() {
                    break 'clusters;
                }
                let attributes = entry.attributes();
                if !entry.is_deleted()
                    && attributes.contains(Attributes::VOLUME_ID)
                    && !attributes.is_long_name()
                {
                    return Ok(entry.short_name());
                }
            }
        }
    }
    Ok(ShortName::from_raw(*volume.boot_label()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::tests::{fatfs_disk, lfn, sfn, with_fatfs, Layout, MemDisk};
    use crate::fat::FAT32_EOC_WRITE;

    fn names(disk: &mut MemDisk, volume: &Volume, folder: u32) -> (Vec<String>, ListSummary) {
        let mut out = Vec::new();
        let summary = list(disk, volume, folder, |item| {
            out.push(item.name.as_str().to_string());
            ControlFlow::Continue(())
        })
        .unwrap();
        (out, summary)
    }

    fn populated_root() -> (Layout, MemDisk, Volume) {
        let layout = Layout::SMALL;
        let (mut disk, volume) = layout.mounted();
        let root = volume.root_cluster();
        layout.put_entry(&mut disk, root, 0, sfn(b"CARTRIDGE  ", 0x08, 0, 0));
        layout.put_entry(&mut disk, root, 1, sfn(b"README  TXT", 0x20, 5, 100));
        layout.put_entry(&mut disk, root, 2, sfn(b"GAMES      ", 0x10, 6, 0));
        let mut deleted = sfn(b"OLD     BIN", 0x20, 7, 50);
        deleted[0] = 0xE5;
        layout.put_entry(&mut disk, root, 3, deleted);
        layout.put_entry(&mut disk, root, 4, sfn(b"IO      SYS", 0x06, 8, 10));
        layout.put_entry(&mut disk, root, 5, sfn(b"LOCKED  BIN", 0x01, 10, 40));
        layout.put_entry(&mut disk, root, 6, sfn(b"SAVE    DAT", 0x20, 9, 1000));
        (layout, disk, volume)
    }

    #[test]
    fn list_shows_visible_entries_with_totals() {
        let (_, mut disk, volume) = populated_root();
        let (listed, summary) = names(&mut disk, &volume, volume.root_cluster());
        assert_eq!(listed, ["README.TXT", "GAMES", "SAVE.DAT"]);
        assert_eq!(summary.entries, 3);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.total_bytes, 1100);
        assert!(!summary.stopped_early);
    }

    #[test]
    fn listing_is_repeatable() {
        let (_, mut disk, volume) = populated_root();
        let first = names(&mut disk, &volume, volume.root_cluster());
        let second = names(&mut disk, &volume, volume.root_cluster());
        assert_eq!(first, second);
    }

    #[test]
    fn visitor_can_stop_after_a_page() {
        let (_, mut disk, volume) = populated_root();
        let mut seen = 0;
        let summary = list(&mut disk, &volume, volume.root_cluster(), |_| {
            seen += 1;
            if seen == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        assert_eq!(seen, 2);
        assert!(summary.stopped_early);
        assert_eq!(summary.entries, 2);
    }

    #[test]
    fn end_marker_stops_scan_before_later_clusters() {
        let layout = Layout::SMALL;
        let (mut disk, volume) = layout.mounted();
        let root = volume.root_cluster();
        layout.set_fat(&mut disk, root, 30);
        layout.set_fat(&mut disk, 30, FAT32_EOC_WRITE);
        layout.put_entry(&mut disk, root, 0, sfn(b"FIRST   TXT", 0x20, 0, 1));
        // slot 1 stays zeroed
        layout.put_entry(&mut disk, root, 2, sfn(b"GHOST   TXT", 0x20, 0, 1));
        layout.put_entry(&mut disk, 30, 0, sfn(b"LATER   TXT", 0x20, 0, 1));

        let (listed, _) = names(&mut disk, &volume, root);
        assert_eq!(listed, ["FIRST.TXT"]);
    }

    #[test]
    fn long_name_fragments_reassemble_in_sequence_order() {
        let layout = Layout::SMALL;
        let (mut disk, volume) = layout.mounted();
        let root = volume.root_cluster();
        layout.put_entry(&mut disk, root, 0, lfn(2, true, "e.cas"));
        layout.put_entry(&mut disk, root, 1, lfn(1, false, "Long file nam"));
        layout.put_entry(&mut disk, root, 2, sfn(b"LONGFI~1CAS", 0x20, 4, 10));
        layout.put_entry(&mut disk, root, 3, sfn(b"SHORT   CAS", 0x20, 5, 10));

        let (listed, summary) = names(&mut disk, &volume, root);
        assert_eq!(listed, ["Long file name.cas", "SHORT.CAS"]);
        assert_eq!(summary.entries, 2);
    }

    #[test]
    fn orphaned_fragment_does_not_leak_into_next_name() {
        let layout = Layout::SMALL;
        let (mut disk, volume) = layout.mounted();
        let root = volume.root_cluster();
        // A lone second fragment whose short entry is gone, then a name that
        // fills exactly one fragment and so has no NUL terminator.
        layout.put_entry(&mut disk, root, 0, lfn(2, false, "stale tail"));
        layout.put_entry(&mut disk, root, 1, lfn(1, true, "Thirteen char"));
        layout.put_entry(&mut disk, root, 2, sfn(b"THIRTE~1   ", 0x20, 0, 1));

        let (listed, _) = names(&mut disk, &volume, root);
        assert_eq!(listed, ["Thirteen char"]);
    }

    #[test]
    fn forward_ordered_fragments_still_join() {
        let layout = Layout::SMALL;
        let (mut disk, volume) = layout.mounted();
        let root = volume.root_cluster();
        layout.put_entry(&mut disk, root, 0, lfn(1, false, "Long file nam"));
        layout.put_entry(&mut disk, root, 1, lfn(2, true, "e.cas"));
        layout.put_entry(&mut disk, root, 2, sfn(b"LONGFI~1CAS", 0x20, 4, 10));

        let (listed, _) = names(&mut disk, &volume, root);
        assert_eq!(listed, ["Long file name.cas"]);
    }

    #[test]
    fn deleted_entry_discards_pending_long_name() {
        let layout = Layout::SMALL;
        let (mut disk, volume) = layout.mounted();
        let root = volume.root_cluster();
        layout.put_entry(&mut disk, root, 0, lfn(1, true, "stale"));
        let mut deleted = sfn(b"STALE      ", 0x20, 0, 0);
        deleted[0] = 0xE5;
        layout.put_entry(&mut disk, root, 1, deleted);
        layout.put_entry(&mut disk, root, 2, sfn(b"FRESH   TXT", 0x20, 0, 0));

        let (listed, _) = names(&mut disk, &volume, root);
        assert_eq!(listed, ["FRESH.TXT"]);
    }

    #[test]
    fn dot_is_skipped_and_parent_is_kept() {
        let layout = Layout::SMALL;
        let (mut disk, volume) = layout.mounted();
        layout.set_fat(&mut disk, 6, FAT32_EOC_WRITE);
        layout.put_entry(&mut disk, 6, 0, sfn(b".          ", 0x10, 6, 0));
        layout.put_entry(&mut disk, 6, 1, sfn(b"..         ", 0x10, 0, 0));
        layout.put_entry(&mut disk, 6, 2, sfn(b"SAVE    DAT", 0x20, 0, 3));

        let (listed, _) = names(&mut disk, &volume, 6);
        assert_eq!(listed, ["..", "SAVE.DAT"]);
        assert_eq!(
            open_folder(&mut disk, &volume, 6, Query::Index(1)).unwrap(),
            volume.root_cluster()
        );
    }

    #[test]
    fn find_by_name_index_and_cluster() {
        let (_, mut disk, volume) = populated_root();
        let root = volume.root_cluster();

        let readme = ShortName::from_raw(*b"README  TXT");
        let hit = find(&mut disk, &volume, root, Query::Name(&readme))
            .unwrap()
            .unwrap();
        assert_eq!(hit.entry.first_cluster, 5);
        assert_eq!(hit.entry.size, 100);
        assert_eq!(hit.index, 1);
        assert_eq!(hit.entry.location.slot, 1);

        let second = find(&mut disk, &volume, root, Query::Index(2)).unwrap().unwrap();
        assert_eq!(second.name.as_str(), "GAMES");
        assert!(second.entry.is_dir());

        let by_cluster = find(&mut disk, &volume, root, Query::Cluster(9)).unwrap().unwrap();
        assert_eq!(by_cluster.name.as_str(), "SAVE.DAT");
        assert_eq!(by_cluster.index, 3);

        let missing = ShortName::from_raw(*b"NOPE    TXT");
        assert_eq!(find(&mut disk, &volume, root, Query::Name(&missing)).unwrap(), None);
        assert_eq!(find(&mut disk, &volume, root, Query::Index(4)).unwrap(), None);
        // Concealed entries are not reachable by name.
        let system = ShortName::from_raw(*b"IO      SYS");
        assert_eq!(find(&mut disk, &volume, root, Query::Name(&system)).unwrap(), None);
        let locked = ShortName::from_raw(*b"LOCKED  BIN");
        assert_eq!(find(&mut disk, &volume, root, Query::Name(&locked)).unwrap(), None);
        assert_eq!(find(&mut disk, &volume, root, Query::Cluster(10)).unwrap(), None);
    }

    #[test]
    fn open_folder_requires_directory_bit() {
        let (layout, mut disk, volume) = populated_root();
        let root = volume.root_cluster();
        layout.set_fat(&mut disk, 6, FAT32_EOC_WRITE);

        let games = ShortName::from_raw(*b"GAMES      ");
        assert_eq!(open_folder(&mut disk, &volume, root, Query::Name(&games)), Ok(6));
        let readme = ShortName::from_raw(*b"README  TXT");
        assert_eq!(
            open_folder(&mut disk, &volume, root, Query::Name(&readme)),
            Err(FatError::NotDirectory)
        );
        let missing = ShortName::from_raw(*b"MISSING    ");
        assert_eq!(
            open_folder(&mut disk, &volume, root, Query::Name(&missing)),
            Err(FatError::NotFound)
        );
    }

    #[test]
    fn volume_label_prefers_root_entry() {
        let (_, mut disk, volume) = populated_root();
        assert_eq!(
            read_volume_label(&mut disk, &volume).unwrap().as_bytes(),
            b"CARTRIDGE  "
        );

        let (mut empty, volume) = Layout::SMALL.mounted();
        assert_eq!(
            read_volume_label(&mut empty, &volume).unwrap().as_bytes(),
            volume.boot_label()
        );
    }

    #[test]
    fn reads_folders_written_by_fatfs() {
        use std::io::Write;

        let mut disk = fatfs_disk();
        with_fatfs(&mut disk, |fs| {
            let root = fs.root_dir();
            root.create_dir("DUMPS").unwrap();
            let mut file = root.create_file("Long Report.txt").unwrap();
            file.write_all(&[1u8; 700]).unwrap();
            let mut file = root.create_file("GAME.CAS").unwrap();
            file.write_all(&[2u8; 10]).unwrap();
        });

        let volume = crate::fat::mount(&mut disk).unwrap();
        let (listed, summary) = names(&mut disk, &volume, volume.root_cluster());
        assert_eq!(listed, ["DUMPS", "Long Report.txt", "GAME.CAS"]);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.total_bytes, 710);

        let dumps = ShortName::from_raw(*b"DUMPS      ");
        let folder = open_folder(&mut disk, &volume, volume.root_cluster(), Query::Name(&dumps))
            .unwrap();
        let (inside, _) = names(&mut disk, &volume, folder);
        assert_eq!(inside, [".."]);
    }
}
