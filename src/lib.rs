//! JMXPACK ("PK2") encrypted pack-file archive
//!
//! A mutable single-file container format: a nested directory tree of named
//! files stored inside one physical file, every directory block Blowfish-
//! encoded under a passphrase-derived key, edited in place.
//!
//! ## On-disk layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ offset 0: Header (256 B, plaintext)              │
//! │  - signature "JoyMax File Manager!\n"            │
//! │  - version 2.0.0.1, encrypted flag               │
//! │  - 16-byte key-check checksum (3 bytes compared) │
//! ├──────────────────────────────────────────────────┤
//! │ offset 256: root directory block (2,560 B)       │
//! │  - 20 × 128 B entries, Blowfish-encoded          │
//! │  - last slot links continuation blocks           │
//! ├──────────────────────────────────────────────────┤
//! │ further directory blocks and raw file content,   │
//! │ first-fit allocated; the container grows in      │
//! │ zero-filled 4 KiB chunks                         │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Every folder owns a chain of directory blocks; file content is stored
//! unencrypted at the offset its entry records. An in-memory allocation
//! table and a path-keyed tree cache are rebuilt from the chain walk on
//! every open and kept in lockstep by every mutation.
//!
//! ## Example
//!
//! ```no_run
//! use jmxpack_rs::Archive;
//!
//! let mut archive = Archive::create("media.pk2", "169841")?;
//! archive.add_file("server_dep/silkroad/textdata/itemdata.txt", b"...")?;
//! let bytes = archive.read_file("server_dep/silkroad/textdata/itemdata.txt")?;
//! # Ok::<(), jmxpack_rs::PackError>(())
//! ```
//!
//! ## Caveats
//!
//! The engine is single-threaded and blocking; every write is flushed
//! before the call returns, but a mutation spanning several writes is not
//! atomic — a crash in between can orphan allocated space (recoverable only
//! by rebuilding the container). The key check is 3 bytes wide by format
//! contract and is no integrity guarantee.

pub mod allocator;
pub mod archive;
pub mod block;
pub mod cipher;
pub mod error;
pub mod header;
pub mod io;
pub mod tree;

pub use allocator::AllocationTable;
pub use archive::{Archive, ArchiveOptions, CHUNK_SIZE};
pub use block::{
    DirEntry, DirectoryBlock, EntryKind, BLOCK_SIZE, ENTRIES_PER_BLOCK, ENTRY_SIZE, NAME_SIZE,
};
pub use cipher::{PackCipher, BASE_KEY, CHECKSUM_PLAINTEXT};
pub use error::{PackError, Result};
pub use header::{Header, FORMAT_VERSION, HEADER_SIZE, SIGNATURE};
pub use io::OpenMode;
pub use tree::{FileInfo, FolderInfo};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
