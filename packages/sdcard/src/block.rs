//! Sector-addressed storage seam shared by the SD transport and the FAT engine.

pub const SECTOR_SIZE: usize = 512;

/// A device that moves whole 512-byte sectors by LBA.
///
/// The FAT layer never assumes a sector buffer survives a second call: every
/// read fills the caller's array and every write reads from it.
pub trait BlockDevice {
    type Error: core::fmt::Debug;

    fn read_sector(&mut self, lba: u32, out: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error>;

    fn write_sector(&mut self, lba: u32, data: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    type Error = T::Error;

    fn read_sector(&mut self, lba: u32, out: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        (**self).read_sector(lba, out)
    }

    fn write_sector(&mut self, lba: u32, data: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        (**self).write_sector(lba, data)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceDeviceError {
    OutOfRange(u32),
}

/// RAM-backed device over a caller-owned byte slice.
///
/// Trailing bytes that do not fill a whole sector are not addressable.
pub struct SliceDevice<'a> {
    data: &'a mut [u8],
}

impl<'a> SliceDevice<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn sector_count(&self) -> u32 {
        (self.data.len() / SECTOR_SIZE) as u32
    }

    fn range(&self, lba: u32) -> Result<core::ops::Range<usize>, SliceDeviceError> {
        let start = (lba as usize)
            .checked_mul(SECTOR_SIZE)
            .ok_or(SliceDeviceError::OutOfRange(lba))?;
        let end = start + SECTOR_SIZE;
        if end > self.data.len() {
            return Err(SliceDeviceError::OutOfRange(lba));
        }
        Ok(start..end)
    }
}

impl BlockDevice for SliceDevice<'_> {
    type Error = SliceDeviceError;

    fn read_sector(&mut self, lba: u32, out: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let range = self.range(lba)?;
        out.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sector(&mut self, lba: u32, data: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let range = self.range(lba)?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_device_round_trips_sectors() {
        let mut backing = vec![0u8; SECTOR_SIZE * 4];
        let mut dev = SliceDevice::new(&mut backing);
        assert_eq!(dev.sector_count(), 4);

        let mut data = [0u8; SECTOR_SIZE];
        data[0] = 0xA5;
        data[511] = 0x5A;
        dev.write_sector(3, &data).unwrap();

        let mut out = [0u8; SECTOR_SIZE];
        dev.read_sector(3, &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(backing[3 * SECTOR_SIZE], 0xA5);
    }

    #[test]
    fn slice_device_rejects_partial_trailing_sector() {
        let mut backing = vec![0u8; SECTOR_SIZE * 2 + 100];
        let mut dev = SliceDevice::new(&mut backing);
        let mut out = [0u8; SECTOR_SIZE];
        assert_eq!(
            dev.read_sector(2, &mut out),
            Err(SliceDeviceError::OutOfRange(2))
        );
    }

    #[test]
    fn mutable_reference_forwards_to_device() {
        fn touch<D: BlockDevice>(mut dev: D) {
            dev.write_sector(0, &[7u8; SECTOR_SIZE]).unwrap();
        }
        let mut backing = vec![0u8; SECTOR_SIZE];
        let mut dev = SliceDevice::new(&mut backing);
        touch(&mut dev);
        let mut out = [0u8; SECTOR_SIZE];
        dev.read_sector(0, &mut out).unwrap();
        assert_eq!(out[100], 7);
    }
}
