//! Directory block and entry records
//!
//! A directory block is the unit of directory storage: 20 fixed-size entry
//! slots, 2,560 bytes total, always Blowfish-framed on disk. A folder owns a
//! chain of blocks linked through the last slot's `next_block` field.
//!
//! Like [`crate::header`], this module is pure marshaling.

use chrono::{DateTime, Utc};

use crate::error::{PackError, Result};

/// Encoded size of one directory entry.
pub const ENTRY_SIZE: usize = 128;

/// Entry slots per directory block.
pub const ENTRIES_PER_BLOCK: usize = 20;

/// Encoded size of one directory block.
pub const BLOCK_SIZE: usize = ENTRY_SIZE * ENTRIES_PER_BLOCK;

/// Width of the NUL-padded name field. Names may use at most
/// `NAME_SIZE - 1` bytes so a terminator always fits.
pub const NAME_SIZE: usize = 89;

/// Reserved self-reference name in slot 0 of every folder's first block.
pub const SELF_NAME: &str = ".";

/// Reserved parent-reference name in slot 1 of non-root folder blocks.
pub const PARENT_NAME: &str = "..";

/// 100 ns ticks between 1601-01-01 (FILETIME epoch) and the Unix epoch.
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// Current wall-clock time as a FILETIME tick count.
pub fn filetime_now() -> i64 {
    to_filetime(Utc::now())
}

/// Convert a UTC timestamp to FILETIME ticks.
pub fn to_filetime(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros() * 10 + FILETIME_UNIX_EPOCH
}

/// Convert FILETIME ticks back to a UTC timestamp.
///
/// Returns `None` for tick counts outside the representable range.
pub fn from_filetime(filetime: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros((filetime - FILETIME_UNIX_EPOCH) / 10)
}

/// Discriminant of a directory entry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Empty,
    Folder,
    File,
    /// Kind byte this implementation does not know. Preserved verbatim and
    /// skipped by the chain walk; never treated as a free slot.
    Unknown(u8),
}

impl EntryKind {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => EntryKind::Empty,
            1 => EntryKind::Folder,
            2 => EntryKind::File,
            other => EntryKind::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            EntryKind::Empty => 0,
            EntryKind::Folder => 1,
            EntryKind::File => 2,
            EntryKind::Unknown(value) => value,
        }
    }
}

/// One 128-byte directory entry slot.
///
/// `offset` points at a folder's first directory block or at a file's raw
/// content, depending on `kind`. `next_block` is physically present on every
/// slot but carries meaning only on the last slot of a block, where it links
/// the folder's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub kind: EntryKind,
    pub name: String,
    pub creation_time: i64,
    pub modification_time: i64,
    pub offset: u64,
    pub size: u32,
    pub next_block: u64,
}

impl DirEntry {
    /// An unused slot.
    pub fn empty() -> Self {
        DirEntry {
            kind: EntryKind::Empty,
            name: String::new(),
            creation_time: 0,
            modification_time: 0,
            offset: 0,
            size: 0,
            next_block: 0,
        }
    }

    /// A folder entry pointing at the folder's first block.
    pub fn folder(name: &str, offset: u64, time: i64) -> Self {
        DirEntry {
            kind: EntryKind::Folder,
            name: name.to_owned(),
            creation_time: time,
            modification_time: time,
            offset,
            size: 0,
            next_block: 0,
        }
    }

    /// A file entry pointing at its content range.
    pub fn file(name: &str, offset: u64, size: u32, time: i64) -> Self {
        DirEntry {
            kind: EntryKind::File,
            name: name.to_owned(),
            creation_time: time,
            modification_time: time,
            offset,
            size,
            next_block: 0,
        }
    }

    /// Whether this is a synthetic `.`/`..` slot, never surfaced to callers.
    pub fn is_reserved(&self) -> bool {
        self.kind == EntryKind::Folder && (self.name == SELF_NAME || self.name == PARENT_NAME)
    }

    pub fn creation(&self) -> Option<DateTime<Utc>> {
        from_filetime(self.creation_time)
    }

    pub fn modification(&self) -> Option<DateTime<Utc>> {
        from_filetime(self.modification_time)
    }

    /// Serialize into the fixed 128-byte slot layout.
    ///
    /// A name longer than the field is truncated at the field boundary; the
    /// engine validates name lengths before any entry reaches disk.
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut bytes = [0u8; ENTRY_SIZE];

        bytes[0] = self.kind.to_u8();

        let name = self.name.as_bytes();
        let name_len = name.len().min(NAME_SIZE - 1);
        bytes[1..1 + name_len].copy_from_slice(&name[..name_len]);

        bytes[90..98].copy_from_slice(&self.creation_time.to_le_bytes());
        bytes[98..106].copy_from_slice(&self.modification_time.to_le_bytes());
        bytes[106..114].copy_from_slice(&self.offset.to_le_bytes());
        bytes[114..118].copy_from_slice(&self.size.to_le_bytes());
        bytes[118..126].copy_from_slice(&self.next_block.to_le_bytes());
        // bytes 126..128 stay zero (padding)

        bytes
    }

    /// Deserialize an entry from exactly [`ENTRY_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENTRY_SIZE {
            return Err(PackError::MalformedRecord {
                record: "entry",
                expected: ENTRY_SIZE,
                actual: bytes.len(),
            });
        }

        let name_field = &bytes[1..1 + NAME_SIZE];
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_SIZE);
        let name = String::from_utf8_lossy(&name_field[..name_len]).into_owned();

        Ok(DirEntry {
            kind: EntryKind::from_u8(bytes[0]),
            name,
            creation_time: le_i64(&bytes[90..98]),
            modification_time: le_i64(&bytes[98..106]),
            offset: le_u64(&bytes[106..114]),
            size: le_u32(&bytes[114..118]),
            next_block: le_u64(&bytes[118..126]),
        })
    }
}

fn le_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    i64::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

/// One 2,560-byte directory block: 20 entry slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryBlock {
    pub entries: [DirEntry; ENTRIES_PER_BLOCK],
}

impl Default for DirectoryBlock {
    fn default() -> Self {
        DirectoryBlock {
            entries: std::array::from_fn(|_| DirEntry::empty()),
        }
    }
}

impl DirectoryBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain continuation pointer: the last slot's `next_block` field, zero
    /// when the chain ends at this block.
    pub fn next_block(&self) -> u64 {
        self.entries[ENTRIES_PER_BLOCK - 1].next_block
    }

    pub fn set_next_block(&mut self, offset: u64) {
        self.entries[ENTRIES_PER_BLOCK - 1].next_block = offset;
    }

    /// Index of the first unused slot, if any.
    pub fn find_empty(&self) -> Option<usize> {
        self.entries.iter().position(|e| e.kind == EntryKind::Empty)
    }

    /// Serialize the block to its fixed 2,560-byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(BLOCK_SIZE);
        for entry in &self.entries {
            bytes.extend_from_slice(&entry.to_bytes());
        }
        bytes
    }

    /// Deserialize a block from exactly [`BLOCK_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BLOCK_SIZE {
            return Err(PackError::MalformedRecord {
                record: "directory block",
                expected: BLOCK_SIZE,
                actual: bytes.len(),
            });
        }

        let mut entries = Vec::with_capacity(ENTRIES_PER_BLOCK);
        for chunk in bytes.chunks_exact(ENTRY_SIZE) {
            entries.push(DirEntry::from_bytes(chunk)?);
        }

        let entries =
            <[DirEntry; ENTRIES_PER_BLOCK]>::try_from(entries).map_err(|_| {
                PackError::MalformedRecord {
                    record: "directory block",
                    expected: BLOCK_SIZE,
                    actual: bytes.len(),
                }
            })?;

        Ok(DirectoryBlock { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entry_round_trip() {
        let now = filetime_now();
        let entry = DirEntry::file("textdata_1.txt", 0x1_2345, 4321, now);

        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), ENTRY_SIZE);
        assert_eq!(bytes[0], 2);

        let decoded = DirEntry::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_empty_entry_is_all_zero() {
        assert_eq!(DirEntry::empty().to_bytes(), [0u8; ENTRY_SIZE]);
    }

    #[test]
    fn test_entry_wrong_size_rejected() {
        assert!(matches!(
            DirEntry::from_bytes(&[0u8; ENTRY_SIZE + 4]),
            Err(PackError::MalformedRecord { record: "entry", .. })
        ));
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let mut bytes = [0u8; ENTRY_SIZE];
        bytes[0] = 0x7C;
        let entry = DirEntry::from_bytes(&bytes).unwrap();
        assert_eq!(entry.kind, EntryKind::Unknown(0x7C));
        assert_eq!(entry.to_bytes()[0], 0x7C);
    }

    #[test]
    fn test_block_round_trip_with_chain_link() {
        let now = filetime_now();
        let mut block = DirectoryBlock::new();
        block.entries[0] = DirEntry::folder(SELF_NAME, 256, now);
        block.entries[1] = DirEntry::folder(PARENT_NAME, 4096, now);
        block.entries[2] = DirEntry::file("server_dep.dat", 8192, 77, now);
        block.set_next_block(12288);

        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), BLOCK_SIZE);

        let decoded = DirectoryBlock::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.next_block(), 12288);
        assert_eq!(decoded.find_empty(), Some(3));
        assert!(decoded.entries[0].is_reserved());
        assert!(decoded.entries[1].is_reserved());
        assert!(!decoded.entries[2].is_reserved());
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_block_wrong_size_rejected() {
        assert!(matches!(
            DirectoryBlock::from_bytes(&[0u8; BLOCK_SIZE - 1]),
            Err(PackError::MalformedRecord {
                record: "directory block",
                ..
            })
        ));
    }

    #[test]
    fn test_filetime_conversion() {
        // FILETIME 0 is the 1601 epoch.
        let epoch = from_filetime(0).unwrap();
        assert_eq!(epoch, Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap());

        let t = Utc.with_ymd_and_hms(2009, 7, 14, 12, 30, 45).unwrap();
        assert_eq!(from_filetime(to_filetime(t)).unwrap(), t);
    }
}
