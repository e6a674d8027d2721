use chrono::{Datelike, Timelike};

use crate::error::{Error, Result};
use crate::fat32::names::{
    analyze_filename, generate_short_name, next_short_name, short_name_checksum, ShortName,
};
use crate::fat32::VolumeState;
use crate::image::DiskImage;

pub const ENTRY_SIZE: usize = 32;

const SUBDIRECTORY_BIT: u8 = 1 << 4;
const LOWERCASE_NAME_BIT: u8 = 1 << 3;
const LOWERCASE_EXTENSION_BIT: u8 = 1 << 4;

const VFAT_ATTRIBUTES: u8 = 0x0F;
const LAST_LOGICAL_ENTRY_BIT: u8 = 1 << 6;
const CHARACTERS_PER_LONG_ENTRY: usize = 13;

const MAX_NAME_LENGTH: usize = 255;

const ROOT_DIRECTORY_CLUSTER: u32 = 2;

/// 8.3 directory entry, serialized by explicit byte offsets.
#[derive(Debug, Clone)]
struct ShortEntry {
    name: [u8; 8],
    extension: [u8; 3],
    attributes: u8,
    case_info: u8,
    created_time: u16,
    created_date: u16,
    first_cluster: u32,
    size: u32,
}

impl ShortEntry {
    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut bytes = [0u8; ENTRY_SIZE];
        bytes[0..8].copy_from_slice(&self.name);
        bytes[8..11].copy_from_slice(&self.extension);
        bytes[11] = self.attributes;
        bytes[12] = self.case_info;
        bytes[13] = 0; // created-ms
        bytes[14..16].copy_from_slice(&self.created_time.to_le_bytes());
        bytes[16..18].copy_from_slice(&self.created_date.to_le_bytes());
        bytes[18..20].copy_from_slice(&self.created_date.to_le_bytes());
        bytes[20..22].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        bytes[22..24].copy_from_slice(&self.created_time.to_le_bytes());
        bytes[24..26].copy_from_slice(&self.created_date.to_le_bytes());
        bytes[26..28].copy_from_slice(&(self.first_cluster as u16).to_le_bytes());
        bytes[28..32].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }
}

/// VFAT long-name entry carrying up to 13 UCS-2 code units.
#[derive(Debug, Clone)]
struct LongEntry {
    sequence_number: u8,
    checksum: u8,
    characters: [u16; CHARACTERS_PER_LONG_ENTRY],
}

impl LongEntry {
    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut bytes = [0u8; ENTRY_SIZE];
        bytes[0] = self.sequence_number;
        for (i, unit) in self.characters[0..5].iter().enumerate() {
            bytes[1 + i * 2..3 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        bytes[11] = VFAT_ATTRIBUTES;
        bytes[12] = 0; // type
        bytes[13] = self.checksum;
        for (i, unit) in self.characters[5..11].iter().enumerate() {
            bytes[14 + i * 2..16 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        bytes[26..28].copy_from_slice(&0u16.to_le_bytes()); // reserved "first cluster"
        for (i, unit) in self.characters[11..13].iter().enumerate() {
            bytes[28 + i * 2..30 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        bytes
    }
}

#[derive(Debug)]
struct StoredEntry {
    name: String,
    short_name: ShortName,
    /// `None` for files.
    directory: Option<Directory>,
}

/// One directory of the volume being built.
///
/// Entries stream sequentially across the directory's cluster chain; a full
/// cluster chains a fresh one on demand. The volume owns the root directory
/// and, through the stored entries, every subdirectory.
#[derive(Debug)]
pub struct Directory {
    first_cluster: u32,
    current_cluster: u32,
    offset_within_cluster: u32,
    entries: Vec<StoredEntry>,
}

impl Directory {
    /// Creates the root directory, which must end up owning cluster 2.
    pub fn new_root(state: &mut VolumeState) -> Result<Self> {
        let cluster = state.fat.allocate(1, 0);
        if cluster == 0 {
            return Err(Error::CapacityExhausted("no free clusters left".into()));
        }
        if cluster != ROOT_DIRECTORY_CLUSTER {
            return Err(Error::Logic(format!(
                "root directory allocated cluster {cluster} instead of 2"
            )));
        }

        Ok(Directory {
            first_cluster: cluster,
            current_cluster: cluster,
            offset_within_cluster: 0,
            entries: Vec::new(),
        })
    }

    /// A subdirectory over a freshly allocated cluster. The parent has
    /// already placed `.` and `..` at entry slots 0 and 1.
    fn new_child(first_cluster: u32) -> Self {
        Directory {
            first_cluster,
            current_cluster: first_cluster,
            offset_within_cluster: 2,
            entries: Vec::new(),
        }
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    /// Linear search of the stored children by long name.
    pub fn subdirectory(&mut self, name: &str) -> Result<&mut Directory> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.name == name)
            .ok_or_else(|| Error::InvalidInput(format!("no such subdirectory {name}")))?;

        entry
            .directory
            .as_mut()
            .ok_or_else(|| Error::InvalidInput(format!("{name} is not a directory")))
    }

    pub fn store_file(
        &mut self,
        state: &mut VolumeState,
        image: &mut DiskImage,
        name: &str,
        data: &[u8],
    ) -> Result<()> {
        self.do_store(state, image, name, data, false)
    }

    pub fn store_directory(
        &mut self,
        state: &mut VolumeState,
        image: &mut DiskImage,
        name: &str,
    ) -> Result<()> {
        self.do_store(state, image, name, &[], true)
    }

    fn contains_short_name(&self, short_name: &ShortName) -> bool {
        self.entries.iter().any(|entry| entry.short_name == *short_name)
    }

    fn do_store(
        &mut self,
        state: &mut VolumeState,
        image: &mut DiskImage,
        name: &str,
        data: &[u8],
        is_directory: bool,
    ) -> Result<()> {
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(Error::InvalidInput(format!("{name} already exists")));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(Error::InvalidInput(format!("name {name} is too long")));
        }

        let info = analyze_filename(name)?;
        let wants_long_entries = info.needs_vfat && state.use_vfat;

        let mut short_name = generate_short_name(name);
        while self.contains_short_name(&short_name) {
            short_name = next_short_name(&short_name).ok_or_else(|| {
                Error::CapacityExhausted(format!("too many short name collisions for {name}"))
            })?;
        }

        if wants_long_entries {
            self.store_long_entries(state, image, name, &short_name)?;
        }

        let mut first_cluster = 0;
        let mut child = None;

        if is_directory {
            first_cluster = state.fat.allocate(1, 0);
            if first_cluster == 0 {
                return Err(Error::CapacityExhausted("no free clusters left".into()));
            }

            Self::store_dot_and_dot_dot(state, image, first_cluster, self.first_cluster)?;
            child = Some(Directory::new_child(first_cluster));
        }

        if !data.is_empty() {
            let clusters_needed = (data.len() as u64).div_ceil(state.cluster_bytes()) as u32;
            first_cluster = state.fat.allocate(clusters_needed, 0);
            if first_cluster == 0 {
                return Err(Error::CapacityExhausted("no free clusters left".into()));
            }

            image.write_at(data, state.cluster_byte_offset(first_cluster))?;
        }

        let flags = EntryFlags {
            is_directory,
            name_lower: info.name_entirely_lower,
            extension_lower: info.extension_entirely_lower,
        };
        let entry = self.build_entry(state, &short_name, first_cluster, data.len() as u32, flags);
        self.stream_entry(state, image, &entry.to_bytes())?;

        self.entries.push(StoredEntry {
            name: name.to_owned(),
            short_name,
            directory: child,
        });

        Ok(())
    }

    fn store_long_entries(
        &mut self,
        state: &mut VolumeState,
        image: &mut DiskImage,
        name: &str,
        short_name: &ShortName,
    ) -> Result<()> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let entry_count = units.len().div_ceil(CHARACTERS_PER_LONG_ENTRY);
        let checksum = short_name_checksum(short_name);

        for sequence in (1..=entry_count).rev() {
            let mut sequence_number = sequence as u8;
            if sequence == entry_count {
                sequence_number |= LAST_LOGICAL_ENTRY_BIT;
            }

            let piece_start = (sequence - 1) * CHARACTERS_PER_LONG_ENTRY;
            let piece = &units[piece_start..units.len().min(piece_start + CHARACTERS_PER_LONG_ENTRY)];

            let mut characters = [0xFFFFu16; CHARACTERS_PER_LONG_ENTRY];
            characters[..piece.len()].copy_from_slice(piece);
            if piece.len() < CHARACTERS_PER_LONG_ENTRY {
                characters[piece.len()] = 0x0000;
            }

            let long_entry = LongEntry { sequence_number, checksum, characters };
            self.stream_entry(state, image, &long_entry.to_bytes())?;
        }

        Ok(())
    }

    fn build_entry(
        &self,
        state: &VolumeState,
        short_name: &ShortName,
        first_cluster: u32,
        size: u32,
        flags: EntryFlags,
    ) -> ShortEntry {
        let mut name = [0u8; 8];
        let mut extension = [0u8; 3];
        name.copy_from_slice(&short_name[0..8]);
        extension.copy_from_slice(&short_name[8..11]);

        let mut attributes = 0;
        if flags.is_directory {
            attributes |= SUBDIRECTORY_BIT;
        }

        let mut case_info = 0;
        if flags.name_lower {
            case_info |= LOWERCASE_NAME_BIT;
        }
        if flags.extension_lower {
            case_info |= LOWERCASE_EXTENSION_BIT;
        }

        let time = &state.timestamp;
        let created_time = ((time.hour() as u16) << 11)
            | ((time.minute() as u16) << 5)
            | (time.second() as u16 / 2);
        let created_date = (((time.year() - 1980) as u16) << 9)
            | ((time.month() as u16) << 5)
            | (time.day() as u16);

        ShortEntry {
            name,
            extension,
            attributes,
            case_info,
            created_time,
            created_date,
            first_cluster,
            size,
        }
    }

    fn store_dot_and_dot_dot(
        state: &VolumeState,
        image: &mut DiskImage,
        cluster: u32,
        parent_cluster: u32,
    ) -> Result<()> {
        let time = &state.timestamp;
        let created_time = ((time.hour() as u16) << 11)
            | ((time.minute() as u16) << 5)
            | (time.second() as u16 / 2);
        let created_date = (((time.year() - 1980) as u16) << 9)
            | ((time.month() as u16) << 5)
            | (time.day() as u16);

        let mut dot = ShortEntry {
            name: *b".       ",
            extension: *b"   ",
            attributes: SUBDIRECTORY_BIT,
            case_info: 0,
            created_time,
            created_date,
            first_cluster: cluster,
            size: 0,
        };
        Self::write_entry_at(state, image, &dot.to_bytes(), cluster, 0)?;

        dot.name = *b"..      ";
        dot.first_cluster = if parent_cluster == ROOT_DIRECTORY_CLUSTER {
            0
        } else {
            parent_cluster
        };
        Self::write_entry_at(state, image, &dot.to_bytes(), cluster, 1)
    }

    /// Appends an entry at the streaming cursor, chaining one more cluster
    /// when the current one is full.
    fn stream_entry(
        &mut self,
        state: &mut VolumeState,
        image: &mut DiskImage,
        bytes: &[u8; ENTRY_SIZE],
    ) -> Result<()> {
        let entries_per_cluster = (state.cluster_bytes() / ENTRY_SIZE as u64) as u32;

        if self.offset_within_cluster == entries_per_cluster {
            let next = state.fat.allocate(1, self.current_cluster);
            if next == 0 {
                return Err(Error::CapacityExhausted("no free clusters left".into()));
            }

            self.current_cluster = next;
            self.offset_within_cluster = 0;
        }

        Self::write_entry_at(state, image, bytes, self.current_cluster, self.offset_within_cluster)?;
        self.offset_within_cluster += 1;

        Ok(())
    }

    /// Writes an entry at absolute (cluster, index) coordinates without
    /// touching the streaming cursor.
    fn write_entry_at(
        state: &VolumeState,
        image: &mut DiskImage,
        bytes: &[u8; ENTRY_SIZE],
        cluster: u32,
        entry_index: u32,
    ) -> Result<()> {
        let offset =
            state.cluster_byte_offset(cluster) + u64::from(entry_index) * ENTRY_SIZE as u64;
        image.write_at(bytes, offset)
    }
}

struct EntryFlags {
    is_directory: bool,
    name_lower: bool,
    extension_lower: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat32::table::{FileAllocationTable, END_OF_CHAIN};
    use crate::MB;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::tempdir;

    fn test_state() -> VolumeState {
        VolumeState {
            fat: FileAllocationTable::new(1022, 8 * 128),
            sectors_per_cluster: 1,
            data_byte_offset: 4096,
            use_vfat: true,
            timestamp: Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap(),
        }
    }

    fn test_image(dir: &std::path::Path) -> DiskImage {
        DiskImage::create("vmdk", dir, "dirtest", 4 * MB).unwrap()
    }

    fn read_entry(dir: &std::path::Path, state: &VolumeState, cluster: u32, index: u32) -> Vec<u8> {
        let bytes = fs::read(dir.join("dirtest-flat.vmdk")).unwrap();
        let offset = state.cluster_byte_offset(cluster) as usize + index as usize * ENTRY_SIZE;
        bytes[offset..offset + ENTRY_SIZE].to_vec()
    }

    #[test]
    fn test_root_owns_cluster_two() {
        let mut state = test_state();
        let root = Directory::new_root(&mut state).unwrap();
        assert_eq!(root.first_cluster(), 2);
        assert_eq!(state.fat.entry(2), END_OF_CHAIN);
    }

    #[test]
    fn test_store_plain_file() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        root.store_file(&mut state, &mut image, "README.TXT", b"hello").unwrap();
        image.finalize().unwrap();

        // data landed in cluster 3
        assert_eq!(state.fat.entry(3), END_OF_CHAIN);
        let flat = fs::read(dir.path().join("dirtest-flat.vmdk")).unwrap();
        let data_offset = state.cluster_byte_offset(3) as usize;
        assert_eq!(&flat[data_offset..data_offset + 5], b"hello");

        let entry = read_entry(dir.path(), &state, 2, 0);
        assert_eq!(&entry[0..8], b"README  ");
        assert_eq!(&entry[8..11], b"TXT");
        assert_eq!(entry[11], 0); // not a directory
        assert_eq!(u16::from_le_bytes(entry[26..28].try_into().unwrap()), 3);
        assert_eq!(u32::from_le_bytes(entry[28..32].try_into().unwrap()), 5);
    }

    #[test]
    fn test_store_empty_file_has_no_cluster() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        root.store_file(&mut state, &mut image, "EMPTY.TXT", b"").unwrap();
        image.finalize().unwrap();

        let entry = read_entry(dir.path(), &state, 2, 0);
        assert_eq!(u16::from_le_bytes(entry[26..28].try_into().unwrap()), 0);
        assert_eq!(u16::from_le_bytes(entry[20..22].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(entry[28..32].try_into().unwrap()), 0);
        assert_eq!(state.fat.last_allocated(), 2);
    }

    #[test]
    fn test_store_long_name_emits_long_entries() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        root.store_file(&mut state, &mut image, "verylongfilename.txt", b"x").unwrap();
        image.finalize().unwrap();

        // 20 characters -> two long entries, highest sequence first
        let first = read_entry(dir.path(), &state, 2, 0);
        let second = read_entry(dir.path(), &state, 2, 1);
        let short = read_entry(dir.path(), &state, 2, 2);

        assert_eq!(first[0], 0x42);
        assert_eq!(second[0], 0x01);
        assert_eq!(first[11], 0x0F);
        assert_eq!(second[11], 0x0F);
        assert_eq!(&short[0..11], b"VERYLO~1TXT");

        let checksum = short_name_checksum(b"VERYLO~1TXT");
        assert_eq!(first[13], checksum);
        assert_eq!(second[13], checksum);

        // first emitted entry holds characters 14..20, the terminator and
        // 0xFFFF padding; its piece starts at 'a' of "ame.txt"
        assert_eq!(u16::from_le_bytes(first[1..3].try_into().unwrap()), u16::from(b'a'));
        // the terminator sits at character slot 7, i.e. slot 2 of name part 2
        assert_eq!(u16::from_le_bytes(first[18..20].try_into().unwrap()), 0x0000);
        assert_eq!(u16::from_le_bytes(first[28..30].try_into().unwrap()), 0xFFFF);

        // second emitted entry carries the first 13 characters
        assert_eq!(u16::from_le_bytes(second[1..3].try_into().unwrap()), u16::from(b'v'));
        // reserved "first cluster" field stays zero
        assert_eq!(u16::from_le_bytes(second[26..28].try_into().unwrap()), 0);
    }

    #[test]
    fn test_short_name_collision_gets_next_tail() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        root.store_file(&mut state, &mut image, "VeryLongName1.txt", b"a").unwrap();
        root.store_file(&mut state, &mut image, "VeryLongName2.txt", b"b").unwrap();
        image.finalize().unwrap();

        // entries 0-1: long entries + short entry of the first file
        let first_short = read_entry(dir.path(), &state, 2, 2);
        let second_short = read_entry(dir.path(), &state, 2, 5);
        assert_eq!(&first_short[0..11], b"VERYLO~1TXT");
        assert_eq!(&second_short[0..11], b"VERYLO~2TXT");
    }

    #[test]
    fn test_subdirectory_dot_entries() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        root.store_directory(&mut state, &mut image, "BOOT").unwrap();
        let boot_cluster = root.subdirectory("BOOT").unwrap().first_cluster();
        assert_eq!(boot_cluster, 3);

        root.subdirectory("BOOT")
            .unwrap()
            .store_directory(&mut state, &mut image, "GRUB")
            .unwrap();
        let grub_cluster = root
            .subdirectory("BOOT")
            .unwrap()
            .subdirectory("GRUB")
            .unwrap()
            .first_cluster();
        image.finalize().unwrap();

        let dot = read_entry(dir.path(), &state, boot_cluster, 0);
        assert_eq!(&dot[0..11], b".          ");
        assert_eq!(dot[11], 0x10);
        assert_eq!(u16::from_le_bytes(dot[26..28].try_into().unwrap()), boot_cluster as u16);

        // parent is the root, so `..` points at cluster 0
        let dot_dot = read_entry(dir.path(), &state, boot_cluster, 1);
        assert_eq!(&dot_dot[0..11], b"..         ");
        assert_eq!(u16::from_le_bytes(dot_dot[26..28].try_into().unwrap()), 0);

        // one level down, `..` points at BOOT's cluster
        let nested_dot_dot = read_entry(dir.path(), &state, grub_cluster, 1);
        assert_eq!(
            u16::from_le_bytes(nested_dot_dot[26..28].try_into().unwrap()),
            boot_cluster as u16
        );
    }

    #[test]
    fn test_entry_streaming_spills_into_chained_cluster() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        // 512-byte cluster holds 16 entries
        for i in 0..17 {
            let name = format!("FILE{i:04}.BIN");
            root.store_file(&mut state, &mut image, &name, b"").unwrap();
        }
        image.finalize().unwrap();

        let spill_cluster = state.fat.entry(2);
        assert_ne!(spill_cluster, END_OF_CHAIN);
        assert_eq!(state.fat.entry(spill_cluster), END_OF_CHAIN);

        let entry = read_entry(dir.path(), &state, spill_cluster, 0);
        assert_eq!(&entry[0..8], b"FILE0016");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        root.store_file(&mut state, &mut image, "SAME.TXT", b"a").unwrap();
        assert!(root.store_file(&mut state, &mut image, "SAME.TXT", b"b").is_err());

        // long-name comparison is case-sensitive; this one stores fine
        root.store_file(&mut state, &mut image, "same.txt", b"c").unwrap();
    }

    #[test]
    fn test_overlong_name_rejected() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        let name = format!("{}.txt", "a".repeat(300));
        assert!(root.store_file(&mut state, &mut image, &name, b"x").is_err());
    }

    #[test]
    fn test_subdirectory_lookup_errors() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        root.store_file(&mut state, &mut image, "PLAIN.TXT", b"x").unwrap();

        assert!(root.subdirectory("MISSING").is_err());
        assert!(root.subdirectory("PLAIN.TXT").is_err());
    }

    #[test]
    fn test_case_info_bits() {
        let dir = tempdir().unwrap();
        let mut image = test_image(dir.path());
        let mut state = test_state();
        let mut root = Directory::new_root(&mut state).unwrap();

        root.store_file(&mut state, &mut image, "lower.txt", b"x").unwrap();
        image.finalize().unwrap();

        let entry = read_entry(dir.path(), &state, 2, 0);
        assert_eq!(entry[12], LOWERCASE_NAME_BIT | LOWERCASE_EXTENSION_BIT);
    }
}
