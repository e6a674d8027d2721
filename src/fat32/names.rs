use crate::error::{Error, Result};

pub const SHORT_NAME_LENGTH: usize = 8;
pub const SHORT_EXTENSION_LENGTH: usize = 3;
pub const SHORT_NAME_FIELD_LENGTH: usize = SHORT_NAME_LENGTH + SHORT_EXTENSION_LENGTH;

/// An 8.3 name as stored on disk: 8 name bytes then 3 extension bytes,
/// space-padded, uppercase.
pub type ShortName = [u8; SHORT_NAME_FIELD_LENGTH];

/// Splits `file_name` at its last dot, returning the stem and extension
/// lengths in bytes. A leading dot does not start an extension.
pub fn name_and_extension_lengths(file_name: &str) -> (usize, usize) {
    let mut name_length = file_name.rfind('.').unwrap_or(file_name.len());
    let mut extension_length = 0;

    if name_length == 0 {
        name_length = file_name.len();
    } else if name_length < file_name.len() {
        extension_length = file_name.len() - name_length - 1;
    }

    (name_length, extension_length)
}

/// Derives the 8.3 short name for `long_name`: dots and spaces stripped,
/// two trailing stem bytes reserved for a `~1` tail when either part is too
/// long, space-padded, uppercased.
pub fn generate_short_name(long_name: &str) -> ShortName {
    let bytes = long_name.as_bytes();
    let (name_length, extension_length) = name_and_extension_lengths(long_name);

    let needs_numeric_tail =
        name_length > SHORT_NAME_LENGTH || extension_length > SHORT_EXTENSION_LENGTH;
    let name_bytes_to_copy = if needs_numeric_tail {
        SHORT_NAME_LENGTH - 2
    } else {
        SHORT_NAME_LENGTH
    }
    .min(name_length);

    let mut short_name: ShortName = [b' '; SHORT_NAME_FIELD_LENGTH];

    let mut copied = 0;
    for &byte in &bytes[..name_length] {
        if byte == b'.' || byte == b' ' {
            continue;
        }

        short_name[copied] = byte;
        copied += 1;

        if copied == name_bytes_to_copy {
            break;
        }
    }

    if needs_numeric_tail {
        short_name[copied] = b'~';
        short_name[copied + 1] = b'1';
    }

    let extension_bytes = extension_length.min(SHORT_EXTENSION_LENGTH);
    if extension_bytes != 0 {
        let extension_start = name_length + 1;
        short_name[SHORT_NAME_LENGTH..SHORT_NAME_LENGTH + extension_bytes]
            .copy_from_slice(&bytes[extension_start..extension_start + extension_bytes]);
    }

    for byte in &mut short_name {
        *byte = byte.to_ascii_uppercase();
    }

    short_name
}

/// Produces the next candidate after a short-name collision: locates (or
/// synthesizes) the `~` tail and increments the decimal number after it,
/// growing the tail one byte to the left when it is all nines. Returns
/// `None` once the `~999999` space is exhausted.
pub fn next_short_name(current: &ShortName) -> Option<ShortName> {
    if &current[1..SHORT_NAME_LENGTH] == b"~999999" {
        return None;
    }

    let mut next = *current;

    let end_of_name = current.iter().position(|&byte| byte == b' ');

    let Some(tail_pos) = current.iter().rposition(|&byte| byte == b'~') else {
        let end_of_name = end_of_name.unwrap_or(SHORT_NAME_LENGTH - 2);
        let new_tail_pos = end_of_name.min(SHORT_NAME_LENGTH - 2);

        next[new_tail_pos] = b'~';
        next[new_tail_pos + 1] = b'1';
        return Some(next);
    };

    let end_of_name = end_of_name.unwrap_or(SHORT_NAME_LENGTH + 1);
    let end_of_tail = end_of_name.min(SHORT_NAME_LENGTH);

    let mut number: u64 = 0;
    let mut would_overflow = true;
    for i in tail_pos + 1..end_of_tail {
        number = number * 10 + u64::from(next[i] - b'0');
        would_overflow &= next[i] == b'9';
    }
    number += 1;

    if !would_overflow {
        for i in (tail_pos + 1..end_of_tail).rev() {
            next[i] = (number % 10) as u8 + b'0';
            number /= 10;
        }
        return Some(next);
    }

    let can_grow_downwards = end_of_tail != SHORT_NAME_LENGTH;
    let new_start = if can_grow_downwards {
        tail_pos
    } else {
        tail_pos.checked_sub(1)?
    };
    let new_end = if can_grow_downwards { end_of_tail + 1 } else { end_of_tail };

    for i in (new_start + 1..new_end).rev() {
        next[i] = (number % 10) as u8 + b'0';
        number /= 10;
    }
    next[new_start] = b'~';

    Some(next)
}

/// Rotate-right-and-add checksum over the 11 raw bytes of the 8.3 field,
/// stored in every VFAT long entry tied to the short entry.
pub fn short_name_checksum(short_name: &ShortName) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, &byte| sum.rotate_right(1).wrapping_add(byte))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilenameInfo {
    /// The name cannot be represented losslessly as an 8.3 entry.
    pub needs_vfat: bool,
    pub name_entirely_lower: bool,
    pub extension_entirely_lower: bool,
}

const BANNED_BYTES: &[u8] = b"\"*/:<>?\\|";
const BANNED_IN_SHORT_NAMES: &[u8] = b".+,;=[]";

/// Validates `name` and classifies it: rejects control and reserved bytes,
/// decides whether VFAT long entries are required (overlong stem/extension,
/// empty stem, mixed case, or bytes only long names may carry), and reports
/// the all-lowercase flags the short entry's case-info byte stores.
pub fn analyze_filename(name: &str) -> Result<FilenameInfo> {
    let bytes = name.as_bytes();

    for &byte in bytes {
        if byte < 0x20 || BANNED_BYTES.contains(&byte) {
            return Err(Error::InvalidInput(format!("invalid FAT32 filename {name}")));
        }
    }

    let (name_length, extension_length) = name_and_extension_lengths(name);

    let mut info = FilenameInfo {
        needs_vfat: name_length > SHORT_NAME_LENGTH
            || extension_length > SHORT_EXTENSION_LENGTH
            || name_length == 0,
        name_entirely_lower: false,
        extension_entirely_lower: false,
    };

    if info.needs_vfat {
        return Ok(info);
    }

    let stem = &bytes[..name_length];
    let extension = if extension_length != 0 {
        &bytes[name_length + 1..name_length + 1 + extension_length]
    } else {
        &[][..]
    };

    let count_cases = |part: &[u8]| {
        let lower = part.iter().filter(|byte| byte.is_ascii_lowercase()).count();
        let upper = part.iter().filter(|byte| byte.is_ascii_uppercase()).count();
        (lower, upper)
    };

    let (stem_lower, stem_upper) = count_cases(stem);
    info.name_entirely_lower = stem_lower != 0 && stem_upper == 0;
    let name_entirely_upper = stem_lower == 0;

    let mut extension_entirely_upper = true;
    if !extension.is_empty() {
        let (extension_lower, extension_upper) = count_cases(extension);
        info.extension_entirely_lower = extension_lower != 0 && extension_upper == 0;
        extension_entirely_upper = extension_lower == 0;
    }

    info.needs_vfat = !((info.name_entirely_lower || name_entirely_upper)
        && (info.extension_entirely_lower || extension_entirely_upper));

    if !info.needs_vfat {
        info.needs_vfat = stem
            .iter()
            .chain(extension)
            .any(|byte| BANNED_IN_SHORT_NAMES.contains(byte));
    }

    Ok(info)
}
