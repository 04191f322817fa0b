use super::{read_u16, read_u32, FatError, FAT_ENTRIES_PER_SECTOR};
use crate::block::{BlockDevice, SECTOR_SIZE};

const BOOT_SIGNATURE_OFFSET: usize = 510;
const MBR_PARTITION_START: usize = 446 + 8;

const BPB_BYTES_PER_SECTOR: usize = 0x0B;
const BPB_SECTORS_PER_CLUSTER: usize = 0x0D;
const BPB_RESERVED_SECTORS: usize = 0x0E;
const BPB_FAT_COUNT: usize = 0x10;
const BPB_TOTAL_SECTORS_16: usize = 0x13;
const BPB_TOTAL_SECTORS_32: usize = 0x20;
const BPB_SECTORS_PER_FAT: usize = 0x24;
const BPB_ROOT_CLUSTER: usize = 0x2C;
const BPB_VOLUME_LABEL: usize = 0x47;

/// A mounted FAT32 partition: geometry from the boot parameter block, the
/// region addresses derived from it, and the current working folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    partition_start: u32,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    fat_count: u8,
    sectors_per_fat: u32,
    root_cluster: u32,
    total_sectors: u32,
    label: [u8; 11],
    fat_begin: u32,
    shadow_fat_begin: u32,
    data_begin: u32,
    max_cluster: u32,
    current_folder: u32,
}

impl Volume {
    fn from_boot_sector<E>(
        partition_start: u32,
        boot: &[u8; SECTOR_SIZE],
    ) -> Result<Self, FatError<E>> {
        if !has_boot_signature(boot) {
            return Err(FatError::BadSignature);
        }

        let bytes_per_sector = read_u16(boot, BPB_BYTES_PER_SECTOR);
        if bytes_per_sector != SECTOR_SIZE as u16 {
            return Err(FatError::UnsupportedSectorSize(bytes_per_sector));
        }

        let sectors_per_cluster = boot[BPB_SECTORS_PER_CLUSTER];
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(FatError::InvalidBootSector);
        }

        let reserved_sectors = read_u16(boot, BPB_RESERVED_SECTORS);
        let fat_count = boot[BPB_FAT_COUNT];
        let sectors_per_fat = read_u32(boot, BPB_SECTORS_PER_FAT);
        let root_cluster = read_u32(boot, BPB_ROOT_CLUSTER);
        if fat_count == 0 || sectors_per_fat == 0 || root_cluster < 2 {
            return Err(FatError::InvalidBootSector);
        }

        let total_16 = read_u16(boot, BPB_TOTAL_SECTORS_16) as u32;
        let total_sectors = if total_16 != 0 {
            total_16
        } else {
            read_u32(boot, BPB_TOTAL_SECTORS_32)
        };

        let fat_begin = partition_start
            .checked_add(reserved_sectors as u32)
            .ok_or(FatError::InvalidBootSector)?;
        let fat_sectors = sectors_per_fat
            .checked_mul(fat_count as u32)
            .ok_or(FatError::InvalidBootSector)?;
        let data_begin = fat_begin
            .checked_add(fat_sectors)
            .ok_or(FatError::InvalidBootSector)?;

        let fat_limit = sectors_per_fat
            .saturating_mul(FAT_ENTRIES_PER_SECTOR)
            .saturating_sub(1);
        let max_cluster = if total_sectors == 0 {
            fat_limit
        } else {
            let used = reserved_sectors as u32 + fat_sectors;
            if total_sectors <= used {
                return Err(FatError::InvalidBootSector);
            }
            let data_clusters = (total_sectors - used) / sectors_per_cluster as u32;
            core::cmp::min(fat_limit, data_clusters.saturating_add(1))
        };
        if root_cluster > max_cluster {
            return Err(FatError::InvalidBootSector);
        }

        let mut label = [0u8; 11];
        label.copy_from_slice(&boot[BPB_VOLUME_LABEL..BPB_VOLUME_LABEL + 11]);

        Ok(Self {
            partition_start,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            sectors_per_fat,
            root_cluster,
            total_sectors,
            label,
            fat_begin,
            shadow_fat_begin: fat_begin + sectors_per_fat,
            data_begin,
            max_cluster,
            current_folder: root_cluster,
        })
    }

    pub fn partition_start(&self) -> u32 {
        self.partition_start
    }

    pub fn sectors_per_cluster(&self) -> u8 {
        self.sectors_per_cluster
    }

    pub fn reserved_sectors(&self) -> u16 {
        self.reserved_sectors
    }

    pub fn fat_count(&self) -> u8 {
        self.fat_count
    }

    pub fn sectors_per_fat(&self) -> u32 {
        self.sectors_per_fat
    }

    pub fn root_cluster(&self) -> u32 {
        self.root_cluster
    }

    pub fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    pub fn fat_begin(&self) -> u32 {
        self.fat_begin
    }

    /// First sector of the mirrored FAT.
    pub fn shadow_fat_begin(&self) -> u32 {
        self.shadow_fat_begin
    }

    pub fn data_begin(&self) -> u32 {
        self.data_begin
    }

    /// Highest cluster number that maps into the data region.
    pub fn max_cluster(&self) -> u32 {
        self.max_cluster
    }

    pub fn cluster_bytes(&self) -> u32 {
        self.sectors_per_cluster as u32 * SECTOR_SIZE as u32
    }

    pub fn capacity_bytes(&self) -> u64 {
        (self.max_cluster as u64 - 1) * self.cluster_bytes() as u64
    }

    /// Volume label from the extended boot parameter block.
    pub fn boot_label(&self) -> &[u8; 11] {
        &self.label
    }

    pub fn current_folder(&self) -> u32 {
        self.current_folder
    }

    /// Cluster 0 is how a `..` entry refers to the root folder.
    pub fn set_current_folder(&mut self, cluster: u32) {
        self.current_folder = if cluster == 0 {
            self.root_cluster
        } else {
            cluster
        };
    }

    /// `data_begin + (cluster - 2) * sectors_per_cluster + sector`.
    pub fn sector_address(&self, cluster: u32, sector: u32) -> Option<u32> {
        let index = cluster.checked_sub(2)?;
        index
            .checked_mul(self.sectors_per_cluster as u32)?
            .checked_add(self.data_begin)?
            .checked_add(sector)
    }

    pub(crate) fn cluster_lba<E>(&self, cluster: u32, sector: u32) -> Result<u32, FatError<E>> {
        if cluster < 2 || cluster > self.max_cluster || sector >= self.sectors_per_cluster as u32 {
            return Err(FatError::BadCluster(cluster));
        }
        self.sector_address(cluster, sector)
            .ok_or(FatError::BadCluster(cluster))
    }
}

fn has_boot_signature(sector: &[u8; SECTOR_SIZE]) -> bool {
    sector[BOOT_SIGNATURE_OFFSET] == 0x55 && sector[BOOT_SIGNATURE_OFFSET + 1] == 0xAA
}

/// Reads the master boot record and returns the first partition's start LBA.
pub fn read_boot_record<D: BlockDevice>(dev: &mut D) -> Result<u32, FatError<D::Error>> {
    let mut sector = [0u8; SECTOR_SIZE];
    dev.read_sector(0, &mut sector)?;
    if !has_boot_signature(&sector) {
        return Err(FatError::BadSignature);
    }
    Ok(read_u32(&sector, MBR_PARTITION_START))
}

/// Parses the boot parameter block at `start` into a [`Volume`].
pub fn mount_partition<D: BlockDevice>(
    dev: &mut D,
    start: u32,
) -> Result<Volume, FatError<D::Error>> {
    let mut boot = [0u8; SECTOR_SIZE];
    dev.read_sector(start, &mut boot)?;
    let volume = Volume::from_boot_sector(start, &boot)?;
    log::debug!(
        "fat: bpb start={} spc={} reserved={} fats={} spf={} root={} fat_begin={} data_begin={}",
        start,
        volume.sectors_per_cluster,
        volume.reserved_sectors,
        volume.fat_count,
        volume.sectors_per_fat,
        volume.root_cluster,
        volume.fat_begin,
        volume.data_begin
    );
    Ok(volume)
}

/// Mounts the first partition, falling back to a partitionless volume whose
/// boot parameter block sits in sector 0.
pub fn mount<D: BlockDevice>(dev: &mut D) -> Result<Volume, FatError<D::Error>> {
    let start = read_boot_record(dev)?;
    let volume = if start == 0 {
        mount_partition(dev, 0)?
    } else {
        match mount_partition(dev, start) {
            Ok(volume) => volume,
            Err(err) => match mount_partition(dev, 0) {
                Ok(volume) => volume,
                Err(_) => return Err(err),
            },
        }
    };
    log::info!(
        "fat: mount_ok start={} cluster_bytes={} capacity_kib={}",
        volume.partition_start,
        volume.cluster_bytes(),
        volume.capacity_bytes() / 1024
    );
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::tests::{fatfs_disk, Layout, MemDisk, FATFS_PARTITION_START};

    #[test]
    fn mount_derives_region_addresses() {
        let layout = Layout {
            partition_start: 2048,
            sectors_per_cluster: 8,
            reserved_sectors: 32,
            fat_count: 2,
            sectors_per_fat: 4,
            root_cluster: 2,
            data_clusters: 200,
        };
        let mut disk = layout.build();

        assert_eq!(read_boot_record(&mut disk).unwrap(), 2048);
        let volume = mount(&mut disk).unwrap();
        assert_eq!(volume.partition_start(), 2048);
        assert_eq!(volume.fat_begin(), 2048 + 32);
        assert_eq!(volume.shadow_fat_begin(), 2048 + 32 + 4);
        assert_eq!(volume.data_begin(), 2048 + 32 + 2 * 4);
        assert_eq!(volume.root_cluster(), 2);
        assert_eq!(volume.current_folder(), 2);
        assert_eq!(volume.cluster_bytes(), 4096);
        assert_eq!(volume.max_cluster(), 201);
        assert_eq!(volume.boot_label(), b"CARTRIDGE  ");
    }

    #[test]
    fn sector_address_matches_formula() {
        let (_, volume) = Layout::SMALL.mounted();
        let spc = volume.sectors_per_cluster() as u32;
        for cluster in [2u32, 3, 17, 100] {
            for sector in 0..spc {
                assert_eq!(
                    volume.sector_address(cluster, sector),
                    Some(volume.data_begin() + (cluster - 2) * spc + sector)
                );
            }
        }
        assert_eq!(volume.sector_address(1, 0), None);
        assert!(matches!(
            volume.cluster_lba::<()>(volume.max_cluster() + 1, 0),
            Err(FatError::BadCluster(_))
        ));
    }

    #[test]
    fn missing_mbr_signature_blocks_mount() {
        let mut disk = Layout::SMALL.build();
        disk.data[510] = 0;
        assert_eq!(read_boot_record(&mut disk), Err(FatError::BadSignature));
        assert!(matches!(mount(&mut disk), Err(FatError::BadSignature)));
    }

    #[test]
    fn rejects_non_512_byte_sectors() {
        let layout = Layout::SMALL;
        let mut disk = layout.build();
        let bpb = layout.partition_start as usize * SECTOR_SIZE;
        disk.data[bpb + BPB_BYTES_PER_SECTOR..bpb + BPB_BYTES_PER_SECTOR + 2]
            .copy_from_slice(&1024u16.to_le_bytes());
        assert!(matches!(
            mount_partition(&mut disk, layout.partition_start),
            Err(FatError::UnsupportedSectorSize(1024))
        ));
    }

    #[test]
    fn partitionless_volume_mounts_from_sector_zero() {
        let layout = Layout {
            partition_start: 0,
            ..Layout::SMALL
        };
        let mut disk = layout.build();
        let volume = mount(&mut disk).unwrap();
        assert_eq!(volume.partition_start(), 0);
        assert_eq!(volume.fat_begin(), layout.reserved_sectors as u32);
    }

    #[test]
    fn current_folder_maps_parent_zero_to_root() {
        let (_, mut volume) = Layout::SMALL.mounted();
        volume.set_current_folder(7);
        assert_eq!(volume.current_folder(), 7);
        volume.set_current_folder(0);
        assert_eq!(volume.current_folder(), volume.root_cluster());
    }

    #[test]
    fn mounts_image_formatted_by_fatfs() {
        let mut disk: MemDisk = fatfs_disk();
        let volume = mount(&mut disk).unwrap();
        assert_eq!(volume.partition_start(), FATFS_PARTITION_START);
        assert_eq!(volume.root_cluster(), 2);
        assert_eq!(
            volume.data_begin(),
            volume.fat_begin() + volume.fat_count() as u32 * volume.sectors_per_fat()
        );
    }
}
