use super::chain::{patch_fat_slot, store_fat_sector};
use super::{
    build_chain, chain_tail, next_collision_name, read_u32, sanitize_short_name, write_fat_entry,
    Attributes, DirEntry, DirEntryMut, EntryLocation, FatError, FileEntry, ShortName, Volume,
    DIR_ENTRIES_PER_SECTOR, FAT32_ENTRY_MASK, FAT32_EOC_WRITE, FAT_ENTRIES_PER_SECTOR,
};
use crate::block::{BlockDevice, SECTOR_SIZE};
use crate::CHAIN_CAP;

/// Names tried by [`create_unique`]; the collision suffix has ten values.
pub const COLLISION_ATTEMPTS: usize = 10;

/// Claims the lowest free cluster and marks it end-of-chain in every FAT.
pub fn allocate_free_cluster<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
) -> Result<u32, FatError<D::Error>> {
    let mut sector = [0u8; SECTOR_SIZE];
    'scan: for sector_index in 0..volume.sectors_per_fat() {
        dev.read_sector(volume.fat_begin() + sector_index, &mut sector)?;
        for entry in 0..FAT_ENTRIES_PER_SECTOR {
            let cluster = sector_index * FAT_ENTRIES_PER_SECTOR + entry;
            if cluster < 2 {
                continue;
            }
            if cluster > volume.max_cluster() {
                break 'scan;
            }
            let offset = entry as usize * 4;
            if read_u32(&sector, offset) & FAT32_ENTRY_MASK == 0 {
                patch_fat_slot(&mut sector, offset, FAT32_EOC_WRITE);
                store_fat_sector(dev, volume, sector_index, &sector)?;
                log::debug!("fat: alloc cluster={}", cluster);
                return Ok(cluster);
            }
        }
    }
    log::warn!("fat: alloc_full max_cluster={}", volume.max_cluster());
    Err(FatError::DeviceFull)
}

/// Points `tail` at `next`, extending the chain by one cluster.
pub fn link_cluster<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    tail: u32,
    next: u32,
) -> Result<(), FatError<D::Error>> {
    write_fat_entry(dev, volume, tail, next)
}

/// Appends one zeroed cluster to a folder's chain and returns it.
pub fn grow_directory<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    folder: u32,
) -> Result<u32, FatError<D::Error>> {
    let tail = chain_tail(dev, volume, folder)?;
    let cluster = allocate_free_cluster(dev, volume)?;
    let zero = [0u8; SECTOR_SIZE];
    for sector_offset in 0..volume.sectors_per_cluster() as u32 {
        dev.write_sector(volume.cluster_lba(cluster, sector_offset)?, &zero)?;
    }
    link_cluster(dev, volume, tail, cluster)?;
    log::info!("fat: dir_grow folder={} cluster={}", folder, cluster);
    Ok(cluster)
}

struct SlotScan {
    free: Option<EntryLocation>,
    /// A live short entry already carries the requested name, concealed
    /// entries included.
    taken: bool,
    /// The folder already spans as many clusters as a chain view holds.
    at_cap: bool,
}

fn scan_slots<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    folder: u32,
    name: &ShortName,
) -> Result<SlotScan, FatError<D::Error>> {
    let chain = build_chain(dev, volume, folder)?;
    let mut scan = SlotScan {
        free: None,
        taken: false,
        at_cap: chain.is_truncated() || chain.len() >= CHAIN_CAP,
    };
    let mut sector = [0u8; SECTOR_SIZE];
    for &cluster in chain.clusters() {
        for sector_offset in 0..volume.sectors_per_cluster() as u32 {
            let lba = volume.cluster_lba(cluster, sector_offset)?;
            dev.read_sector(lba, &mut sector)?;
            for slot in 0..DIR_ENTRIES_PER_SECTOR {
                let entry = DirEntry::from_sector(&sector, slot);
                if entry.is_free() {
                    if scan.free.is_none() {
                        scan.free = Some(EntryLocation {
                            lba,
                            slot: slot as u8,
                        });
                    }
                    if entry.is_end() {
                        return Ok(scan);
                    }
                    continue;
                }
                if !entry.attributes().is_long_name() && entry.short_name() == *name {
                    scan.taken = true;
                    return Ok(scan);
                }
            }
        }
    }
    Ok(scan)
}

/// Creates a file entry named `name` in `folder` with one freshly allocated
/// cluster and the given size field.
///
/// A folder without a free slot is grown by one cluster and scanned again;
/// a folder that already spans [`CHAIN_CAP`] clusters is
/// [`FatError::DirectoryFull`]. Device-full during either allocation fails
/// the create before the entry is written.
pub fn create_file<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    folder: u32,
    name: &ShortName,
    size: u32,
) -> Result<FileEntry, FatError<D::Error>> {
    let mut scan = scan_slots(dev, volume, folder, name)?;
    if scan.taken {
        return Err(FatError::AlreadyExists);
    }
    if scan.free.is_none() {
        if scan.at_cap {
            return Err(FatError::DirectoryFull);
        }
        grow_directory(dev, volume, folder)?;
        scan = scan_slots(dev, volume, folder, name)?;
    }
    let location = scan.free.ok_or(FatError::DirectoryFull)?;

    let cluster = allocate_free_cluster(dev, volume)?;
    let mut sector = [0u8; SECTOR_SIZE];
    dev.read_sector(location.lba, &mut sector)?;
    let entry = {
        let mut slot = DirEntryMut::from_sector(&mut sector, location.slot as usize);
        slot.clear();
        slot.set_short_name(name);
        slot.set_attributes(Attributes::ARCHIVE);
        slot.set_first_cluster(cluster);
        slot.set_size(size);
        FileEntry::read(&slot.as_view(), location)
    };
    dev.write_sector(location.lba, &sector)?;

    log::info!(
        "fat: create_ok name={} cluster={} size={}",
        name,
        cluster,
        size
    );
    Ok(entry)
}

/// Normalizes `name` and creates it, stepping the collision suffix on each
/// name clash for up to [`COLLISION_ATTEMPTS`] names.
pub fn create_unique<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    folder: u32,
    mut name: ShortName,
    size: u32,
) -> Result<FileEntry, FatError<D::Error>> {
    sanitize_short_name(&mut name);
    for _ in 0..COLLISION_ATTEMPTS {
        match create_file(dev, volume, folder, &name, size) {
            Err(FatError::AlreadyExists) => next_collision_name(&mut name),
            other => return other,
        }
    }
    log::warn!("fat: create_unique exhausted name={}", name);
    Err(FatError::AlreadyExists)
}
