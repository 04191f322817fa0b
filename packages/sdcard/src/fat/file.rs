use super::allocator::{allocate_free_cluster, link_cluster};
use super::dir::{find, Query};
use super::{build_chain, ClusterChain, DirEntryMut, EntryLocation, FatError, FileEntry, Volume};
use crate::block::{BlockDevice, SECTOR_SIZE};
use crate::CHAIN_CAP;

/// Read/write cursor over one file, remembering where its directory entry
/// lives so size changes can be written back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePointer {
    folder: u32,
    first_cluster: u32,
    size: u32,
    capacity: u32,
    truncated: bool,
    offset: u32,
    entry: EntryLocation,
}

impl FilePointer {
    /// Positions a pointer at offset 0 of the file described by `entry`.
    pub fn open<D: BlockDevice>(
        dev: &mut D,
        volume: &Volume,
        folder: u32,
        entry: &FileEntry,
    ) -> Result<Self, FatError<D::Error>> {
        if entry.is_dir() {
            return Err(FatError::IsDirectory);
        }
        let chain = file_chain(dev, volume, entry.first_cluster)?;
        Ok(Self {
            folder,
            first_cluster: entry.first_cluster,
            size: entry.size,
            capacity: chain.len() as u32 * volume.cluster_bytes(),
            truncated: chain.is_truncated(),
            offset: 0,
            entry: entry.location,
        })
    }

    pub fn folder(&self) -> u32 {
        self.folder
    }

    /// 0 until the file owns a cluster.
    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Bytes reachable through the file's cluster chain view.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The chain is longer than [`CHAIN_CAP`] clusters, so bytes past
    /// `capacity` exist but cannot be reached.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn entry_location(&self) -> EntryLocation {
        self.entry
    }

    pub fn remaining(&self) -> u32 {
        self.size.saturating_sub(self.offset)
    }

    /// Moves the cursor, clamped to the current size.
    pub fn seek(&mut self, offset: u32) {
        self.offset = offset.min(self.size);
    }
}

fn file_chain<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    first_cluster: u32,
) -> Result<ClusterChain, FatError<D::Error>> {
    if first_cluster == 0 {
        Ok(ClusterChain::default())
    } else {
        build_chain(dev, volume, first_cluster)
    }
}

/// Finds the file in `folder` whose data starts at `file_cluster` and opens
/// a pointer on it.
pub fn set_file_pointer<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    folder: u32,
    file_cluster: u32,
) -> Result<FilePointer, FatError<D::Error>> {
    let item = find(dev, volume, folder, Query::Cluster(file_cluster))?
        .ok_or(FatError::NotFound)?;
    FilePointer::open(dev, volume, folder, &item.entry)
}

fn update_entry<D, F>(
    dev: &mut D,
    location: EntryLocation,
    edit: F,
) -> Result<(), FatError<D::Error>>
where
    D: BlockDevice,
    F: FnOnce(&mut DirEntryMut<'_>),
{
    let mut sector = [0u8; SECTOR_SIZE];
    dev.read_sector(location.lba, &mut sector)?;
    edit(&mut DirEntryMut::from_sector(&mut sector, location.slot as usize));
    dev.write_sector(location.lba, &sector)?;
    Ok(())
}

/// Appends `additional` freshly allocated clusters to the file's chain.
///
/// Fails with [`FatError::FileTooLarge`] before allocating anything when the
/// grown chain would not fit in a chain view. A file without clusters gets
/// its first one recorded in its directory entry.
pub fn grow_file<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    pointer: &mut FilePointer,
    additional: u32,
) -> Result<(), FatError<D::Error>> {
    if additional == 0 {
        return Ok(());
    }
    let chain = file_chain(dev, volume, pointer.first_cluster)?;
    let target = chain.len() as u64 + additional as u64;
    if chain.is_truncated() || target > CHAIN_CAP as u64 {
        return Err(FatError::FileTooLarge);
    }

    let mut remaining = additional;
    let mut tail = match chain.last() {
        Some(tail) => tail,
        None => {
            let first = allocate_free_cluster(dev, volume)?;
            update_entry(dev, pointer.entry, |entry| entry.set_first_cluster(first))?;
            pointer.first_cluster = first;
            remaining -= 1;
            first
        }
    };
    for _ in 0..remaining {
        let next = allocate_free_cluster(dev, volume)?;
        link_cluster(dev, volume, tail, next)?;
        tail = next;
    }

    pointer.capacity = target as u32 * volume.cluster_bytes();
    log::debug!(
        "fat: grow_file first={} clusters={}",
        pointer.first_cluster,
        target
    );
    Ok(())
}

/// Sector holding byte `position` of the file, and the offset inside it.
fn locate<E>(
    volume: &Volume,
    chain: &ClusterChain,
    position: u32,
) -> Result<Option<(u32, usize)>, FatError<E>> {
    let cluster_bytes = volume.cluster_bytes();
    let Some(cluster) = chain.get((position / cluster_bytes) as usize) else {
        return Ok(None);
    };
    let within = position % cluster_bytes;
    let lba = volume.cluster_lba(cluster, within / SECTOR_SIZE as u32)?;
    Ok(Some((lba, within as usize % SECTOR_SIZE)))
}

/// Writes `src` at the pointer's offset and advances it.
///
/// Missing capacity is allocated first, rounded up to whole clusters.
/// Partially covered sectors are read, patched and written back; fully
/// covered ones are written directly. The directory entry's size field is
/// updated when the file grew.
pub fn write_at<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    pointer: &mut FilePointer,
    src: &[u8],
) -> Result<usize, FatError<D::Error>> {
    if src.is_empty() {
        return Ok(0);
    }
    let final_offset = u32::try_from(pointer.offset as u64 + src.len() as u64)
        .map_err(|_| FatError::FileTooLarge)?;

    if final_offset > pointer.capacity {
        let cluster_bytes = volume.cluster_bytes();
        let shortfall = (final_offset - pointer.capacity).div_ceil(cluster_bytes).max(1);
        grow_file(dev, volume, pointer, shortfall)?;
    }

    let chain = file_chain(dev, volume, pointer.first_cluster)?;
    let mut sector = [0u8; SECTOR_SIZE];
    let mut position = pointer.offset;
    let mut written = 0usize;
    while written < src.len() {
        let (lba, start) = locate(volume, &chain, position)?
            .ok_or(FatError::BadCluster(pointer.first_cluster))?;
        let count = (SECTOR_SIZE - start).min(src.len() - written);
        if count < SECTOR_SIZE {
            dev.read_sector(lba, &mut sector)?;
        }
        sector[start..start + count].copy_from_slice(&src[written..written + count]);
        dev.write_sector(lba, &sector)?;
        written += count;
        position += count as u32;
    }
    pointer.offset = final_offset;

    if final_offset > pointer.size {
        update_entry(dev, pointer.entry, |entry| entry.set_size(final_offset))?;
        pointer.size = final_offset;
    }
    Ok(written)
}

/// Reads from the pointer's offset into `out`, stopping at the file size or
/// at the end of the chain view, and advances the pointer.
pub fn read_at<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    pointer: &mut FilePointer,
    out: &mut [u8],
) -> Result<usize, FatError<D::Error>> {
    let wanted = out.len().min(pointer.remaining() as usize);
    if wanted == 0 {
        return Ok(0);
    }

    let chain = file_chain(dev, volume, pointer.first_cluster)?;
    let mut sector = [0u8; SECTOR_SIZE];
    let mut position = pointer.offset;
    let mut read = 0usize;
    while read < wanted {
        let Some((lba, start)) = locate(volume, &chain, position)? else {
            break;
        };
        let count = (SECTOR_SIZE - start).min(wanted - read);
        dev.read_sector(lba, &mut sector)?;
        out[read..read + count].copy_from_slice(&sector[start..start + count]);
        read += count;
        position += count as u32;
    }
    pointer.offset = position;
    Ok(read)
}
