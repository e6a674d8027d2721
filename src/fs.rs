use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::fat32::Fat32;
use crate::image::DiskImage;

/// An abstract filesystem object to be placed on the volume.
#[derive(Debug, Clone)]
pub struct FsObject {
    pub kind: FsObjectKind,
    /// Absolute Unix-style path on the volume.
    pub path: String,
    /// Byte contents; empty for directories and empty files.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsObjectKind {
    File,
    Directory,
}

/// The filesystems a partition can be formatted with.
#[derive(Debug)]
pub enum FileSystem {
    Fat32(Fat32),
}

impl FileSystem {
    /// Creates a filesystem from a `<type>[,<option>=<value>]*` string.
    pub fn create(
        lba_offset: u64,
        sector_count: u64,
        descriptor: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut parts = descriptor.split(',');
        let kind = parts.next().unwrap_or_default();
        let options = parse_options(parts)?;

        if kind.eq_ignore_ascii_case("fat32") {
            return Ok(FileSystem::Fat32(Fat32::new(
                lba_offset,
                sector_count,
                &options,
                now,
            )?));
        }

        Err(Error::InvalidInput(format!("unknown filesystem type {kind}")))
    }

    pub fn store(&mut self, image: &mut DiskImage, obj: &FsObject) -> Result<()> {
        match self {
            FileSystem::Fat32(volume) => volume.store(image, obj),
        }
    }

    pub fn finalize(&mut self, image: &mut DiskImage) -> Result<()> {
        match self {
            FileSystem::Fat32(volume) => volume.finalize(image),
        }
    }
}

fn parse_options<'a>(
    parts: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, String>> {
    let mut options = HashMap::new();

    for part in parts {
        let (key, value) = part.split_once('=').ok_or_else(|| {
            Error::InvalidInput(format!("malformed filesystem option {part}"))
        })?;
        options.insert(key.to_owned(), value.to_owned());
    }

    Ok(options)
}

/// Interprets a boolean option value; accepts y/n, yes/no, true/false and
/// on/off in any case.
pub(crate) fn interpret_boolean(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "on" => Ok(true),
        "n" | "no" | "false" | "off" => Ok(false),
        other => Err(Error::InvalidInput(format!("not a boolean value: {other}"))),
    }
}
