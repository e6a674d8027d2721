use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::file::{OpenMode, RandomAccessFile};
use crate::geometry::DiskGeometry;

/// Sized write-at-offset target backed by a monolithic-flat VMDK pair: the
/// raw extent at `<base>-flat.vmdk` plus a plain-text descriptor at
/// `<base>.vmdk`.
///
/// Any write reaching past the declared size fails. `finalize` truncates or
/// extends the extent to exactly the declared size; it also runs best-effort
/// on drop so an abandoned image still has valid geometry.
#[derive(Debug)]
pub struct VmdkImage {
    geometry: DiskGeometry,
    final_size: u64,
    extent: RandomAccessFile,
}

impl VmdkImage {
    pub fn create(dir: &Path, image_name: &str, size: u64) -> Result<Self> {
        if image_name.contains('.') {
            return Err(Error::InvalidInput(
                "image name cannot contain dots".into(),
            ));
        }

        let geometry = DiskGeometry::for_ide_vmdk(size)?;

        let extent_name = format!("{image_name}-flat.vmdk");
        let extent_path = dir.join(&extent_name);
        let descriptor_path = dir.join(format!("{image_name}.vmdk"));

        let extent =
            RandomAccessFile::open(&extent_path, OpenMode::WRITE | OpenMode::TRUNCATE)?;

        Self::write_descriptor(&descriptor_path, &extent_name, &geometry)?;

        debug!(
            "created {} ({} sectors)",
            extent_path.display(),
            geometry.total_sector_count
        );

        Ok(VmdkImage { geometry, final_size: size, extent })
    }

    fn write_descriptor(
        path: &Path,
        extent_name: &str,
        geometry: &DiskGeometry,
    ) -> Result<()> {
        let mut descriptor =
            RandomAccessFile::open(path, OpenMode::WRITE | OpenMode::TRUNCATE)?;

        let text = format!(
            "# Disk DescriptorFile\n\
             version=1\n\
             encoding=\"UTF-8\"\n\
             CID=fffffffe\n\
             parentCID=ffffffff\n\
             createType=\"monolithicFlat\"\n\
             \n\
             # Extent description\n\
             RW {} FLAT \"{}\" 0\n\
             \n\
             # The Disk Data Base\n\
             #DDB\n\
             \n\
             ddb.virtualHWVersion=\"16\"\n\
             ddb.geometry.cylinders=\"{}\"\n\
             ddb.geometry.heads=\"{}\"\n\
             ddb.geometry.sectors=\"{}\"\n\
             ddb.adapterType=\"ide\"\n\
             ddb.toolsVersion=\"0\"\n",
            geometry.total_sector_count,
            extent_name,
            geometry.cylinders,
            geometry.heads,
            geometry.sectors,
        );

        descriptor.write(text.as_bytes())
    }

    pub fn geometry(&self) -> &DiskGeometry {
        &self.geometry
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.extent.offset()? + data.len() as u64 > self.final_size {
            return Err(Error::CapacityExhausted("disk size overflow".into()));
        }

        self.extent.write(data)
    }

    /// Writes at an absolute byte offset, preserving the current offset.
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        if offset + data.len() as u64 > self.final_size {
            return Err(Error::CapacityExhausted("disk size overflow".into()));
        }

        let previous = self.extent.set_offset(offset)?;
        self.extent.write(data)?;
        self.extent.set_offset(previous)?;

        Ok(())
    }

    pub fn set_offset(&mut self, offset: u64) -> Result<()> {
        if offset >= self.final_size {
            return Err(Error::CapacityExhausted(
                "offset past end of image".into(),
            ));
        }

        self.extent.set_offset(offset)?;
        Ok(())
    }

    pub fn skip(&mut self, bytes: u64) -> Result<()> {
        if self.extent.skip(bytes)? >= self.final_size {
            return Err(Error::CapacityExhausted(
                "skipped past the end of image".into(),
            ));
        }

        Ok(())
    }

    /// Truncates or extends the extent to the declared byte size. Extension
    /// produces zero-filled sparse padding on hosts that support it.
    pub fn finalize(&mut self) -> Result<()> {
        self.extent.set_size(self.final_size)
    }
}

impl Drop for VmdkImage {
    fn drop(&mut self) {
        let _ = self.extent.set_size(self.final_size);
    }
}

/// The image formats a disk can be emitted as.
#[derive(Debug)]
pub enum DiskImage {
    Vmdk(VmdkImage),
}

impl DiskImage {
    pub fn create(format: &str, dir: &Path, image_name: &str, size: u64) -> Result<Self> {
        match format {
            "vmdk" => Ok(DiskImage::Vmdk(VmdkImage::create(dir, image_name, size)?)),
            other => Err(Error::InvalidInput(format!(
                "unknown image format {other}"
            ))),
        }
    }

    pub fn geometry(&self) -> &DiskGeometry {
        match self {
            DiskImage::Vmdk(image) => image.geometry(),
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            DiskImage::Vmdk(image) => image.write(data),
        }
    }

    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        match self {
            DiskImage::Vmdk(image) => image.write_at(data, offset),
        }
    }

    pub fn set_offset(&mut self, offset: u64) -> Result<()> {
        match self {
            DiskImage::Vmdk(image) => image.set_offset(offset),
        }
    }

    pub fn skip(&mut self, bytes: u64) -> Result<()> {
        match self {
            DiskImage::Vmdk(image) => image.skip(bytes),
        }
    }

    pub fn finalize(&mut self) -> Result<()> {
        match self {
            DiskImage::Vmdk(image) => image.finalize(),
        }
    }
}
