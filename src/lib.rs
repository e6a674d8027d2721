/*
 * mkhdd
 * =====
 *
 * Builds a bootable virtual hard-disk image: one primary partition holding a
 * populated FAT32 filesystem, emitted as a monolithic-flat VMDK pair.
 *
 * Components:
 * ----------
 * - Random-access file handle (file)
 * - Disk geometry and LBA/CHS translation (geometry)
 * - Monolithic-flat VMDK image (image)
 * - MBR builder (mbr)
 * - FAT32 construction pipeline (fat32)
 * - Abstract filesystem objects and dispatch (fs)
 */

pub mod error;
pub mod fat32;
pub mod file;
pub mod fs;
pub mod geometry;
pub mod image;
pub mod mbr;

// Re-export commonly used types
pub use error::{Error, Result};
pub use fat32::Fat32;
pub use file::{OpenMode, RandomAccessFile};
pub use fs::{FileSystem, FsObject, FsObjectKind};
pub use geometry::DiskGeometry;
pub use image::{DiskImage, VmdkImage};
pub use mbr::{Mbr, PartitionStatus, PartitionType};

pub const SECTOR_SIZE: u64 = 512;

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;
pub const TB: u64 = 1024 * GB;
