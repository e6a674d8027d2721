pub mod directory;
pub mod names;
pub mod table;

use std::collections::HashMap;
use std::path::{Component, Path};

use chrono::{DateTime, Datelike, Timelike, Utc};
use log::debug;

use crate::error::{Error, Result};
use crate::file::{OpenMode, RandomAccessFile};
use crate::fs::{interpret_boolean, FsObject, FsObjectKind};
use crate::image::DiskImage;
use crate::{GB, MB, SECTOR_SIZE, TB};

use directory::Directory;
use table::FileAllocationTable;

const VBR_SIZE: usize = 512;
const FILESYSTEM_TYPE_OFFSET: usize = 82;

// Several mainstream hosts refuse to mount FAT32 volumes with any other
// reserved-sector count.
const RESERVED_SECTOR_COUNT: u64 = 32;

const HARD_DISK_MEDIA_DESCRIPTOR: u8 = 0xF8;
const ROOT_DIRECTORY_CLUSTER: u32 = 2;

/// The FAT and layout parameters shared between the volume and its
/// directory tree. Directories borrow this per call instead of holding a
/// reference back to the volume.
#[derive(Debug)]
pub(crate) struct VolumeState {
    pub fat: FileAllocationTable,
    pub sectors_per_cluster: u64,
    pub data_byte_offset: u64,
    pub use_vfat: bool,
    pub timestamp: DateTime<Utc>,
}

impl VolumeState {
    pub fn cluster_bytes(&self) -> u64 {
        self.sectors_per_cluster * SECTOR_SIZE
    }

    /// Absolute byte offset of data cluster `cluster` in the image.
    pub fn cluster_byte_offset(&self, cluster: u32) -> u64 {
        self.data_byte_offset + (u64::from(cluster) - 2) * self.cluster_bytes()
    }
}

/// A FAT32 volume being assembled inside one partition of the image.
///
/// Construction fixes the geometry (cluster size, FAT size, data offset) and
/// allocates the root directory; `store` populates the tree; `finalize`
/// writes the VBR with the patched EBPB, the FS-information sector, the
/// reserved padding and both FAT copies.
#[derive(Debug)]
pub struct Fat32 {
    lba_offset: u64,
    sector_count: u64,
    sectors_per_fat: u64,
    state: VolumeState,
    root: Directory,
    vbr: [u8; VBR_SIZE],
}

impl Fat32 {
    pub fn new(
        lba_offset: u64,
        sector_count: u64,
        options: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let sectors_per_cluster = pick_sectors_per_cluster(sector_count * SECTOR_SIZE)?;
        let sizing = calculate_fat_length(sector_count, sectors_per_cluster);

        let data_byte_offset =
            (lba_offset + RESERVED_SECTOR_COUNT + 2 * sizing.sectors_per_fat) * SECTOR_SIZE;

        let vbr_path = options
            .get("vbr")
            .ok_or_else(|| Error::InvalidInput("FAT32 requires a vbr=<path> option".into()))?;
        let mut vbr = [0u8; VBR_SIZE];
        RandomAccessFile::open(Path::new(vbr_path), OpenMode::READ)?.read(&mut vbr)?;
        validate_vbr(&vbr)?;

        let use_vfat = match options.get("vfat") {
            Some(value) => interpret_boolean(value)?,
            None => true,
        };

        let mut state = VolumeState {
            fat: FileAllocationTable::new(sizing.capacity, sizing.padded_capacity),
            sectors_per_cluster,
            data_byte_offset,
            use_vfat,
            timestamp: now,
        };
        let root = Directory::new_root(&mut state)?;

        debug!(
            "FAT32 volume at LBA {lba_offset}: {} sectors per cluster, {} sectors per FAT, {} clusters",
            sectors_per_cluster, sizing.sectors_per_fat, sizing.capacity
        );

        Ok(Fat32 {
            lba_offset,
            sector_count,
            sectors_per_fat: sizing.sectors_per_fat,
            state,
            root,
            vbr,
        })
    }

    /// Resolves the object's parent path through the directory tree and
    /// stores it there.
    pub fn store(&mut self, image: &mut DiskImage, obj: &FsObject) -> Result<()> {
        let path = Path::new(&obj.path);
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("invalid path {}", obj.path)))?;

        let mut directory = &mut self.root;
        if let Some(parent) = path.parent() {
            for component in parent.components() {
                match component {
                    Component::RootDir => continue,
                    Component::Normal(name) => {
                        let name = name.to_str().ok_or_else(|| {
                            Error::InvalidInput(format!("invalid path {}", obj.path))
                        })?;
                        directory = directory.subdirectory(name)?;
                    }
                    _ => {
                        return Err(Error::InvalidInput(format!(
                            "path {} is not absolute",
                            obj.path
                        )))
                    }
                }
            }
        }

        match obj.kind {
            FsObjectKind::Directory => {
                directory.store_directory(&mut self.state, image, filename)
            }
            FsObjectKind::File => {
                directory.store_file(&mut self.state, image, filename, &obj.data)
            }
        }
    }

    /// Writes everything that depends on the final allocation state: the
    /// patched VBR, the FSINFO sector, the reserved padding and two FAT
    /// copies.
    pub fn finalize(&mut self, image: &mut DiskImage) -> Result<()> {
        self.patch_ebpb()?;

        image.set_offset(self.lba_offset * SECTOR_SIZE)?;
        image.write(&self.vbr)?;

        let fsinfo = self.build_fsinfo();
        image.write(&fsinfo)?;

        image.skip((RESERVED_SECTOR_COUNT - 2) * SECTOR_SIZE)?;
        self.state.fat.write_into(image, 2)?;

        debug!(
            "finalized FAT32 volume: {} clusters free, last allocated {}",
            self.state.fat.free_cluster_count(),
            self.state.fat.last_allocated()
        );

        Ok(())
    }

    fn patch_ebpb(&mut self) -> Result<()> {
        if &self.vbr[FILESYSTEM_TYPE_OFFSET..FILESYSTEM_TYPE_OFFSET + 8] != b"FAT32   " {
            return Err(Error::InvalidInput(
                "unexpected filesystem type in the EBPB, expected \"FAT32   \"".into(),
            ));
        }

        let vbr = &mut self.vbr;

        let put_u16 = |vbr: &mut [u8; VBR_SIZE], offset: usize, value: u16| {
            vbr[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        };
        let put_u32 = |vbr: &mut [u8; VBR_SIZE], offset: usize, value: u32| {
            vbr[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        };

        put_u16(vbr, 11, SECTOR_SIZE as u16);
        vbr[13] = self.state.sectors_per_cluster as u8;
        put_u16(vbr, 14, RESERVED_SECTOR_COUNT as u16);
        vbr[16] = 2; // FAT count

        // FAT32 has no fixed root directory and outgrows the legacy fields
        put_u16(vbr, 17, 0); // max root dir entries
        put_u16(vbr, 19, 0); // legacy total sectors
        vbr[21] = HARD_DISK_MEDIA_DESCRIPTOR;
        put_u16(vbr, 22, 0); // legacy sectors per FAT
        put_u16(vbr, 24, 0); // sectors per track
        put_u16(vbr, 26, 0); // heads

        put_u32(vbr, 28, self.lba_offset as u32); // hidden sectors
        put_u32(vbr, 32, self.sector_count as u32);
        put_u32(vbr, 36, self.sectors_per_fat as u32);

        // both have to be 0, otherwise Windows won't mount it
        put_u16(vbr, 40, 0); // ext flags
        put_u16(vbr, 42, 0); // version

        put_u32(vbr, 44, ROOT_DIRECTORY_CLUSTER);
        put_u16(vbr, 48, 1); // FS information sector
        put_u16(vbr, 50, 0); // no backup boot sectors
        vbr[52..64].fill(0); // reserved

        vbr[64] = 0x80; // fixed disk 1
        vbr[65] = 0;
        vbr[66] = 0x29; // extended boot signature
        put_u32(vbr, 67, generate_volume_id(&self.state.timestamp));

        Ok(())
    }

    fn build_fsinfo(&self) -> [u8; SECTOR_SIZE as usize] {
        let mut fsinfo = [0u8; SECTOR_SIZE as usize];
        fsinfo[0..4].copy_from_slice(b"RRaA");
        fsinfo[484..488].copy_from_slice(b"rrAa");
        fsinfo[488..492].copy_from_slice(&self.state.fat.free_cluster_count().to_le_bytes());
        fsinfo[492..496].copy_from_slice(&self.state.fat.last_allocated().to_le_bytes());
        fsinfo[508..512].copy_from_slice(&[0x00, 0x00, 0x55, 0xAA]);
        fsinfo
    }
}

struct FatSizing {
    /// Usable clusters.
    capacity: u32,
    /// On-disk cells after rounding each FAT copy up to 4 KiB.
    padded_capacity: u32,
    sectors_per_fat: u64,
}

fn calculate_fat_length(sector_count: u64, sectors_per_cluster: u64) -> FatSizing {
    let mut total_free_sectors = sector_count - RESERVED_SECTOR_COUNT;

    // four bytes per cluster plus the two reserved cells
    let bytes_per_fat = (total_free_sectors / sectors_per_cluster) * 4 + 4 * 2;

    let sectors_per_page = 4096 / SECTOR_SIZE;
    let sectors_per_fat = bytes_per_fat
        .div_ceil(SECTOR_SIZE)
        .next_multiple_of(sectors_per_page);

    total_free_sectors -= sectors_per_fat * 2;

    FatSizing {
        capacity: (total_free_sectors / sectors_per_cluster) as u32,
        padded_capacity: (sectors_per_fat * SECTOR_SIZE / 4) as u32,
        sectors_per_fat,
    }
}

/// Microsoft's default cluster-size table for FAT32.
fn pick_sectors_per_cluster(size_in_bytes: u64) -> Result<u64> {
    if size_in_bytes < 32 * MB {
        Err(Error::InvalidInput(
            "FAT32 cannot be less than 32 megabytes in size".into(),
        ))
    } else if size_in_bytes < 64 * MB {
        Ok(1)
    } else if size_in_bytes < 128 * MB {
        Ok(2)
    } else if size_in_bytes < 256 * MB {
        Ok(4)
    } else if size_in_bytes < 8 * GB {
        Ok(8)
    } else if size_in_bytes < 16 * GB {
        Ok(16)
    } else if size_in_bytes < 32 * GB {
        Ok(32)
    } else if size_in_bytes < 2 * TB {
        Ok(64)
    } else {
        Err(Error::InvalidInput(
            "FAT32 cannot be greater than 2 terabytes in size".into(),
        ))
    }
}

fn validate_vbr(vbr: &[u8; VBR_SIZE]) -> Result<()> {
    if vbr[510] != 0x55 || vbr[511] != 0xAA {
        return Err(Error::InvalidInput(
            "incorrect VBR signature, has to end with 0x55AA".into(),
        ));
    }

    Ok(())
}

/// Combines the current date and time into the EBPB volume serial, the way
/// DOS derived it from its int 21h clock registers.
fn generate_volume_id(time: &DateTime<Utc>) -> u32 {
    let dx_1 = ((time.month() as u16) << 8) | time.day() as u16;
    let dx_2 = (time.second() as u16) << 8;
    let upper_word = dx_1.wrapping_add(dx_2);

    let cx_1 = (time.year() - 1980) as u16;
    let cx_2 = ((time.hour() as u16) << 8) | time.minute() as u16;
    let lower_word = cx_1.wrapping_add(cx_2);

    (u32::from(upper_word) << 16) | u32::from(lower_word)
}
