use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use sdcard::{BlockDevice, SECTOR_SIZE};

/// Card image on the host file system, addressed in 512-byte sectors.
pub struct FileDisk {
    file: File,
    sectors: u32,
}

impl FileDisk {
    pub fn open(path: &Path, writable: bool) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let sectors = (file.metadata()?.len() / SECTOR_SIZE as u64).min(u32::MAX as u64) as u32;
        Ok(Self { file, sectors })
    }

    pub fn sector_count(&self) -> u32 {
        self.sectors
    }

    fn seek_to(&mut self, lba: u32) -> io::Result<()> {
        if lba >= self.sectors {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("sector {lba} past end of image ({} sectors)", self.sectors),
            ));
        }
        self.file
            .seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        Ok(())
    }
}

impl BlockDevice for FileDisk {
    type Error = io::Error;

    fn read_sector(&mut self, lba: u32, out: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        self.seek_to(lba)?;
        self.file.read_exact(out)
    }

    fn write_sector(&mut self, lba: u32, data: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        self.seek_to(lba)?;
        self.file.write_all(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sectors_map_to_file_offsets() -> anyhow::Result<()> {
        let mut image = tempfile::NamedTempFile::new()?;
        image.write_all(&vec![0u8; SECTOR_SIZE * 3 + 17])?;

        let mut disk = FileDisk::open(image.path(), true)?;
        assert_eq!(disk.sector_count(), 3);
        disk.write_sector(2, &[0xC3; SECTOR_SIZE])?;

        let raw = std::fs::read(image.path())?;
        assert_eq!(raw[2 * SECTOR_SIZE], 0xC3);
        assert_eq!(raw[3 * SECTOR_SIZE - 1], 0xC3);
        assert_eq!(raw[SECTOR_SIZE], 0);

        let mut out = [0u8; SECTOR_SIZE];
        let err = disk.read_sector(3, &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        Ok(())
    }

    #[test]
    fn read_only_image_refuses_writes() -> anyhow::Result<()> {
        let mut image = tempfile::NamedTempFile::new()?;
        image.write_all(&vec![0u8; SECTOR_SIZE])?;
        let mut disk = FileDisk::open(image.path(), false)?;
        assert!(disk.write_sector(0, &[1; SECTOR_SIZE]).is_err());
        Ok(())
    }
}
