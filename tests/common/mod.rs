//! Partitioned FAT32 card images built with `fatfs`.

#![allow(dead_code)]

use std::io::{Cursor, Read};

pub const PARTITION_START: u32 = 2048;
const SECTOR: usize = 512;
const VOLUME_BYTES: usize = 40 * 1024 * 1024;

/// A 40 MiB FAT32 partition behind a one-entry MBR, populated by `fill`.
pub fn card_image(fill: impl FnOnce(&fatfs::FileSystem<Cursor<&mut [u8]>>)) -> Vec<u8> {
    let start = PARTITION_START as usize * SECTOR;
    let mut image = vec![0u8; start + VOLUME_BYTES];
    {
        let mut cursor = Cursor::new(&mut image[start..]);
        fatfs::format_volume(
            &mut cursor,
            fatfs::FormatVolumeOptions::new()
                .fat_type(fatfs::FatType::Fat32)
                .bytes_per_cluster(512)
                .volume_label(*b"CARTRIDGE  "),
        )
        .expect("format_volume failed");
    }
    with_fs(&mut image, fill);

    let mbr = &mut image[..SECTOR];
    mbr[446 + 4] = 0x0C;
    mbr[0x1C6..0x1CA].copy_from_slice(&PARTITION_START.to_le_bytes());
    mbr[0x1CA..0x1CE].copy_from_slice(&((VOLUME_BYTES / SECTOR) as u32).to_le_bytes());
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    image
}

pub fn with_fs<R>(
    image: &mut [u8],
    f: impl FnOnce(&fatfs::FileSystem<Cursor<&mut [u8]>>) -> R,
) -> R {
    let start = PARTITION_START as usize * SECTOR;
    let fs = fatfs::FileSystem::new(Cursor::new(&mut image[start..]), fatfs::FsOptions::new())
        .expect("fatfs mount failed");
    let out = f(&fs);
    fs.unmount().expect("fatfs unmount failed");
    out
}

pub fn read_file(image: &mut [u8], path: &str) -> Vec<u8> {
    with_fs(image, |fs| {
        let mut out = Vec::new();
        fs.root_dir()
            .open_file(path)
            .expect("fatfs open failed")
            .read_to_end(&mut out)
            .expect("fatfs read failed");
        out
    })
}

pub fn file_names(image: &mut [u8], dir: &str) -> Vec<String> {
    with_fs(image, |fs| {
        let root = fs.root_dir();
        let dir = if dir.is_empty() {
            root
        } else {
            root.open_dir(dir).expect("fatfs open_dir failed")
        };
        dir.iter()
            .map(|entry| entry.expect("fatfs dir entry").file_name())
            .filter(|name| name != "." && name != "..")
            .collect()
    })
}
