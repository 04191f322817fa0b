use heapless::Vec;

use super::{read_u32, FatError, Volume, FAT32_EOC, FAT32_ENTRY_MASK, FAT_ENTRIES_PER_SECTOR};
use crate::{
    block::{BlockDevice, SECTOR_SIZE},
    CHAIN_CAP,
};

/// Ordered clusters of one file or folder, at most [`CHAIN_CAP`] long.
///
/// `is_truncated` is set when the cap was reached while the FAT still
/// pointed at another cluster, so the view covers only a prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterChain {
    clusters: Vec<u32, CHAIN_CAP>,
    truncated: bool,
}

impl ClusterChain {
    pub fn clusters(&self) -> &[u32] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.clusters.get(index).copied()
    }

    pub fn last(&self) -> Option<u32> {
        self.clusters.last().copied()
    }
}

fn is_chain_end(value: u32) -> bool {
    value == 0 || value >= FAT32_EOC
}

/// Sector offset inside one FAT copy and byte offset inside that sector.
fn fat_position<E>(volume: &Volume, cluster: u32) -> Result<(u32, usize), FatError<E>> {
    let sector = cluster / FAT_ENTRIES_PER_SECTOR;
    if sector >= volume.sectors_per_fat() {
        return Err(FatError::BadCluster(cluster));
    }
    let offset = (cluster % FAT_ENTRIES_PER_SECTOR) as usize * 4;
    Ok((sector, offset))
}

pub fn read_fat_entry<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    cluster: u32,
) -> Result<u32, FatError<D::Error>> {
    let (sector_index, offset) = fat_position(volume, cluster)?;
    let mut sector = [0u8; SECTOR_SIZE];
    dev.read_sector(volume.fat_begin() + sector_index, &mut sector)?;
    Ok(read_u32(&sector, offset) & FAT32_ENTRY_MASK)
}

/// Sets one FAT entry, keeping the reserved top nibble.
///
/// The primary copy is written first and the same sector is then copied
/// into each mirror. The copies are not updated atomically: a failure or
/// power loss between the writes leaves them different and nothing here
/// detects or repairs that.
pub fn write_fat_entry<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    cluster: u32,
    value: u32,
) -> Result<(), FatError<D::Error>> {
    let (sector_index, offset) = fat_position(volume, cluster)?;
    let mut sector = [0u8; SECTOR_SIZE];
    dev.read_sector(volume.fat_begin() + sector_index, &mut sector)?;
    patch_fat_slot(&mut sector, offset, value);
    store_fat_sector(dev, volume, sector_index, &sector)
}

pub(crate) fn patch_fat_slot(sector: &mut [u8; SECTOR_SIZE], offset: usize, value: u32) {
    let old = read_u32(sector, offset);
    let new = (old & !FAT32_ENTRY_MASK) | (value & FAT32_ENTRY_MASK);
    sector[offset..offset + 4].copy_from_slice(&new.to_le_bytes());
}

pub(crate) fn store_fat_sector<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    sector_index: u32,
    sector: &[u8; SECTOR_SIZE],
) -> Result<(), FatError<D::Error>> {
    let primary = volume.fat_begin() + sector_index;
    dev.write_sector(primary, sector)?;
    for copy in 1..volume.fat_count() as u32 {
        dev.write_sector(primary + copy * volume.sectors_per_fat(), sector)?;
    }
    Ok(())
}

/// Follows the FAT from `start` until a free or end-of-chain marker, or
/// until [`CHAIN_CAP`] clusters were collected.
pub fn build_chain<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    start: u32,
) -> Result<ClusterChain, FatError<D::Error>> {
    let mut chain = ClusterChain::default();
    let mut cluster = start;
    while !is_chain_end(cluster) {
        if cluster < 2 || cluster > volume.max_cluster() {
            return Err(FatError::BadCluster(cluster));
        }
        if chain.clusters.push(cluster).is_err() {
            chain.truncated = true;
            break;
        }
        cluster = read_fat_entry(dev, volume, cluster)?;
    }
    Ok(chain)
}

/// Last cluster of the chain starting at `start`, walking past the view cap.
pub fn chain_tail<D: BlockDevice>(
    dev: &mut D,
    volume: &Volume,
    start: u32,
) -> Result<u32, FatError<D::Error>> {
    if start < 2 || start > volume.max_cluster() {
        return Err(FatError::BadCluster(start));
    }
    let mut tail = start;
    // A well-formed chain visits each cluster at most once.
    for _ in 0..volume.max_cluster() {
        let next = read_fat_entry(dev, volume, tail)?;
        if is_chain_end(next) {
            return Ok(tail);
        }
        if next < 2 || next > volume.max_cluster() {
            return Err(FatError::BadCluster(next));
        }
        tail = next;
    }
    Err(FatError::BadCluster(tail))
}
