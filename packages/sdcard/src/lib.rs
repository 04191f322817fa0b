#![cfg_attr(not(test), no_std)]

pub mod block;
pub mod fat;
pub mod probe;

pub use block::{BlockDevice, SliceDevice, SECTOR_SIZE};
pub use probe::{CardInfo, SdCard, SdCardError, SdCardVersion};

/// Longest display name kept for a directory entry, in UTF-8 bytes.
pub const NAME_MAX: usize = 96;
/// Clusters tracked per chain view.
pub const CHAIN_CAP: usize = 16;
