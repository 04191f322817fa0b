//! Cartridge storage runtime.
//!
//! Wraps the `sdcard` driver in a [`Storage`] session that owns the block
//! device and the mounted volume and reports each operation as a logged
//! [`ResultCode`].

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod runtime;

pub use config::StorageConfig;
pub use runtime::{ResultCode, Storage};
