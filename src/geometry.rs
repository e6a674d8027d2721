use crate::error::{Error, Result};
use crate::SECTOR_SIZE;

const VMDK_IDE_HEADS: u64 = 16;
const VMDK_IDE_SECTORS: u64 = 63;
const VMDK_CYLINDER_COUNT_LIMIT: u64 = 16383;

/// Disk geometry in 512-byte sectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskGeometry {
    pub total_sector_count: u64,
    pub cylinders: u64,
    pub heads: u64,
    pub sectors: u64,
}

/// Cylinder/head/sector triple produced by [`DiskGeometry::to_chs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chs {
    pub cylinder: u64,
    pub head: u64,
    pub sector: u64,
}

impl DiskGeometry {
    /// Computes the IDE-style geometry a monolithic-flat VMDK advertises for
    /// a disk of `size_in_bytes`.
    pub fn for_ide_vmdk(size_in_bytes: u64) -> Result<Self> {
        if size_in_bytes % SECTOR_SIZE != 0 {
            return Err(Error::InvalidInput(
                "disk size must be aligned to sector size".into(),
            ));
        }

        let total_sector_count = size_in_bytes / SECTOR_SIZE;
        let mut cylinders = total_sector_count / (VMDK_IDE_HEADS * VMDK_IDE_SECTORS);

        if cylinders > VMDK_CYLINDER_COUNT_LIMIT {
            cylinders = VMDK_CYLINDER_COUNT_LIMIT;
        }

        Ok(DiskGeometry {
            total_sector_count,
            cylinders,
            heads: VMDK_IDE_HEADS,
            sectors: VMDK_IDE_SECTORS,
        })
    }

    /// Whether every sector of this disk is addressable through the MBR's
    /// 10/8/6-bit CHS fields.
    pub fn within_chs_limit(&self) -> bool {
        self.heads <= 255 && self.sectors <= 63 && self.cylinders <= 1023
    }

    pub fn to_chs(&self, lba: u64) -> Chs {
        Chs {
            head: (lba / self.sectors) % self.heads,
            cylinder: (lba / self.sectors) / self.heads,
            sector: (lba % self.sectors) + 1,
        }
    }
}
