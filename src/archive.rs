//! Archive engine
//!
//! Orchestrates everything: opening and validating a container, the
//! recursive block-chain walk that rebuilds the in-memory caches, and the
//! mutating operations that edit directory blocks and content ranges in
//! place.
//!
//! Existence and collision conditions are boolean outcomes, not errors, so
//! callers can probe paths without exception-driven control flow. Mutations
//! are not atomic across their individual flushed writes; a crash can leave
//! allocated-but-unlinked ranges behind (see the crate docs).

use std::path::Path;

use tracing::{debug, trace};

use crate::allocator::AllocationTable;
use crate::block::{self, DirEntry, DirectoryBlock, EntryKind, BLOCK_SIZE, NAME_SIZE};
use crate::cipher::PackCipher;
use crate::error::{PackError, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::io::{OpenMode, PackFile};
use crate::tree::{self, DirTree, FileId, FileInfo, FolderId, FolderInfo};

/// Containers are grown and zero-padded in chunks of this many bytes.
pub const CHUNK_SIZE: u64 = 4096;

/// Byte offset of the root folder's first directory block.
const ROOT_BLOCK_OFFSET: u64 = HEADER_SIZE as u64;

/// Behavior switches for an open archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveOptions {
    /// Release a removed file's content range back to the allocator.
    ///
    /// Off by default: the reference tooling keeps the range tracked until
    /// the container is reopened, and matching that keeps allocation
    /// decisions identical across tools editing the same file. Folder
    /// removal always releases descendant ranges, with or without this.
    pub free_on_remove_file: bool,
}

/// An open archive container.
///
/// One instance owns one physical file. All operations are synchronous and
/// the engine holds no locks; callers needing concurrency must serialize
/// access themselves.
pub struct Archive {
    file: PackFile,
    header: Header,
    cipher: PackCipher,
    allocations: AllocationTable,
    tree: DirTree,
    options: ArchiveOptions,
}

impl Archive {
    /// Create a fresh container at `path`, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P, key: &str) -> Result<Self> {
        Self::open_with(path, key, OpenMode::Create, ArchiveOptions::default())
    }

    /// Open an existing container at `path`.
    pub fn open<P: AsRef<Path>>(path: P, key: &str) -> Result<Self> {
        Self::open_with(path, key, OpenMode::Open, ArchiveOptions::default())
    }

    /// Open a container with explicit mode and options.
    ///
    /// Validates the key against the header checksum, then walks the whole
    /// block chain to rebuild the tree cache and the allocation table. Any
    /// structural failure during that walk surfaces as
    /// [`PackError::CorruptArchive`] — in practice a foreign file passed off
    /// as this format, since a wrong key is already caught by the checksum.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        key: &str,
        mode: OpenMode,
        options: ArchiveOptions,
    ) -> Result<Self> {
        let cipher = PackCipher::new(key)?;
        let (mut file, fresh) = PackFile::open(path.as_ref(), mode)?;
        debug!(path = %path.as_ref().display(), fresh, "opening archive");

        if fresh {
            Self::write_base_layout(&mut file, &cipher)?;
        }

        let header_bytes = file.read_at(0, HEADER_SIZE)?;
        let header = Header::from_bytes(&header_bytes)?;
        if !cipher.verify_checksum(&header.checksum) {
            return Err(PackError::AuthenticationFailure);
        }

        let mut archive = Archive {
            file,
            header,
            cipher,
            allocations: AllocationTable::new(),
            tree: DirTree::new(ROOT_BLOCK_OFFSET),
            options,
        };
        archive.allocations.reserve(0, HEADER_SIZE as u64);
        archive
            .allocations
            .reserve(ROOT_BLOCK_OFFSET, BLOCK_SIZE as u64);

        let root = archive.tree.root();
        archive
            .walk_chain(ROOT_BLOCK_OFFSET, root)
            .map_err(|cause| PackError::CorruptArchive(Box::new(cause)))?;

        debug!(
            folders = archive.tree.folder_count(),
            files = archive.tree.file_count(),
            "archive opened"
        );
        Ok(archive)
    }

    /// Look up a folder by virtual path. The empty path is the root.
    pub fn get_folder(&self, path: &str) -> Option<FolderInfo> {
        let normalized = tree::normalize(path);
        let id = self.tree.folder_id(&normalized)?;
        self.tree.folder_info(id)
    }

    /// Look up a file by virtual path.
    pub fn get_file(&self, path: &str) -> Result<Option<FileInfo>> {
        if path.is_empty() {
            return Err(PackError::InvalidArgument("file path must not be empty"));
        }
        let normalized = tree::normalize(path);
        Ok(self
            .tree
            .file_id(&normalized)
            .and_then(|id| self.tree.file_info(id)))
    }

    /// Read a file's content bytes, `None` when the path is absent.
    pub fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(info) = self.get_file(path)? else {
            return Ok(None);
        };
        let bytes = self.file.read_at(info.offset, info.size as usize)?;
        Ok(Some(bytes))
    }

    /// Create a folder (and any missing ancestors) at `path`.
    ///
    /// Returns `false` when a folder or file already occupies the path.
    pub fn add_folder(&mut self, path: &str) -> Result<bool> {
        let normalized = tree::normalize(path);
        if self.tree.folder_id(&normalized).is_some() {
            return Ok(false);
        }
        if self.tree.file_id(&normalized).is_some() {
            return Ok(false);
        }

        let segments: Vec<String> = normalized
            .split(tree::SEPARATOR)
            .map(str::to_owned)
            .collect();
        for segment in &segments {
            if segment.len() >= NAME_SIZE {
                return Err(PackError::InvalidArgument("folder name exceeds 88 bytes"));
            }
        }

        // Nearest existing ancestor: drop one trailing segment at a time,
        // fall back to the root when nothing matches.
        let separator = tree::SEPARATOR.to_string();
        let mut parent = self.tree.root();
        let mut missing_from = 0;
        for dropped in 0..segments.len() {
            let prefix = segments[..segments.len() - dropped].join(&separator);
            if let Some(id) = self.tree.folder_id(&prefix) {
                parent = id;
                missing_from = segments.len() - dropped;
                break;
            }
        }

        self.create_folders(parent, &segments[missing_from..])?;
        Ok(true)
    }

    /// Store `bytes` as the file at `path`, creating missing folders and
    /// replacing any existing content.
    ///
    /// Returns `false` when a folder occupies the path (or blocks the parent
    /// path).
    pub fn add_file(&mut self, path: &str, bytes: &[u8]) -> Result<bool> {
        if self.get_folder(path).is_some() {
            return Ok(false);
        }
        let Ok(size) = u32::try_from(bytes.len()) else {
            return Err(PackError::InvalidArgument(
                "file content exceeds the 4-byte size field",
            ));
        };

        let normalized = tree::normalize(path);
        match self.tree.file_id(&normalized) {
            Some(id) => self.replace_file(id, bytes, size),
            None => self.insert_new_file(&normalized, bytes, size),
        }
    }

    /// Remove the folder at `path` together with its whole subtree.
    ///
    /// Returns `false` when the folder does not exist. Removing the root is
    /// an [`PackError::InvalidArgument`]. Only the parent-side entry is
    /// cleared on disk; descendant blocks and content stay as unreferenced
    /// bytes, their ranges released for reuse.
    pub fn remove_folder(&mut self, path: &str) -> Result<bool> {
        let normalized = tree::normalize(path);
        if normalized.is_empty() {
            return Err(PackError::InvalidArgument("root folder cannot be removed"));
        }
        let Some(folder_id) = self.tree.folder_id(&normalized) else {
            return Ok(false);
        };
        let Some(detached) = self.tree.detach_subtree(folder_id) else {
            return Ok(false);
        };

        for offset in &detached.file_offsets {
            self.allocations.release(*offset);
        }
        for offset in &detached.folder_offsets {
            self.allocations.release(*offset);
        }

        let Some(parent) = detached.parent else {
            return Ok(false);
        };
        let Some(mut chain_offset) = self.tree.block_offset(parent) else {
            return Ok(false);
        };
        while chain_offset != 0 {
            let mut dir = self.load_block(chain_offset)?;
            let slot = dir.entries.iter().position(|e| {
                e.kind == EntryKind::Folder && e.offset == detached.block_offset
            });
            if let Some(slot) = slot {
                Self::clear_slot(&mut dir, slot);
                self.store_block(chain_offset, &dir)?;
                self.tree.unlink_child_folder(parent, &detached.name_key);
                debug!(path = %normalized, "folder removed");
                return Ok(true);
            }
            chain_offset = dir.next_block();
        }

        Ok(false)
    }

    /// Remove the file at `path`.
    ///
    /// Returns `false` when the file does not exist. By default the content
    /// range stays tracked in the allocation table (see [`ArchiveOptions`]);
    /// the bytes themselves are never zeroed either way.
    pub fn remove_file(&mut self, path: &str) -> Result<bool> {
        if path.is_empty() {
            return Err(PackError::InvalidArgument("file path must not be empty"));
        }
        let normalized = tree::normalize(path);
        let Some(file_id) = self.tree.file_id(&normalized) else {
            return Ok(false);
        };
        let Some((offset, _, parent)) = self.tree.file_location(file_id) else {
            return Ok(false);
        };
        let Some(mut chain_offset) = self.tree.block_offset(parent) else {
            return Ok(false);
        };

        while chain_offset != 0 {
            let mut dir = self.load_block(chain_offset)?;
            let slot = dir
                .entries
                .iter()
                .position(|e| e.kind == EntryKind::File && e.offset == offset);
            if let Some(slot) = slot {
                Self::clear_slot(&mut dir, slot);
                self.store_block(chain_offset, &dir)?;
                self.tree.remove_file(file_id);
                if self.options.free_on_remove_file {
                    self.allocations.release(offset);
                }
                debug!(path = %normalized, "file removed");
                return Ok(true);
            }
            chain_offset = dir.next_block();
        }

        Ok(false)
    }

    /// Flush everything to the storage device and release the file handle.
    ///
    /// Dropping the archive also releases the handle; this form surfaces
    /// sync errors.
    pub fn close(mut self) -> Result<()> {
        self.file.sync()
    }

    /// The container header as read at open time.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Path of the underlying container file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    // ---- internals -------------------------------------------------------

    /// Fresh-container layout: plaintext header, root block with its
    /// self-reference in slot 0, zero-padding up to the first chunk boundary.
    fn write_base_layout(file: &mut PackFile, cipher: &PackCipher) -> Result<()> {
        let header = Header::new(cipher.checksum_tag());
        file.write_at(0, &header.to_bytes())?;

        let now = block::filetime_now();
        let mut root = DirectoryBlock::new();
        root.entries[0] = DirEntry::folder(block::SELF_NAME, ROOT_BLOCK_OFFSET, now);
        write_block(file, cipher, ROOT_BLOCK_OFFSET, &root)?;

        let len = file.len()?;
        if len < CHUNK_SIZE {
            file.append_zeroed(CHUNK_SIZE - len)?;
        }
        trace!("base layout written");
        Ok(())
    }

    /// Recursive chain walk: register every folder/file entry of this block
    /// in the caches, recurse into folders, then follow the continuation
    /// pointer for the same folder.
    fn walk_chain(&mut self, offset: u64, folder: FolderId) -> Result<()> {
        trace!(offset, "walking directory block");
        let dir = self.load_block(offset)?;

        for entry in &dir.entries {
            match entry.kind {
                EntryKind::Folder => {
                    if entry.is_reserved() {
                        continue;
                    }
                    let child = self.tree.insert_folder(folder, &entry.name, entry.offset)?;
                    self.allocations.reserve(entry.offset, BLOCK_SIZE as u64);
                    self.walk_chain(entry.offset, child)?;
                }
                EntryKind::File => {
                    self.tree
                        .insert_file(folder, &entry.name, entry.offset, entry.size)?;
                    self.allocations.reserve(entry.offset, entry.size as u64);
                }
                EntryKind::Empty | EntryKind::Unknown(_) => {}
            }
        }

        let next = dir.next_block();
        if next != 0 {
            self.allocations.reserve(next, BLOCK_SIZE as u64);
            self.walk_chain(next, folder)?;
        }
        Ok(())
    }

    fn load_block(&mut self, offset: u64) -> Result<DirectoryBlock> {
        read_block(&mut self.file, &self.cipher, offset)
    }

    fn store_block(&mut self, offset: u64, dir: &DirectoryBlock) -> Result<()> {
        write_block(&mut self.file, &self.cipher, offset, dir)
    }

    /// Install an entry into a slot, keeping whatever chain link the slot
    /// already carries — writing entry fields must never sever the chain
    /// threaded through the last slot.
    fn put_slot(dir: &mut DirectoryBlock, slot: usize, mut entry: DirEntry) {
        entry.next_block = dir.entries[slot].next_block;
        dir.entries[slot] = entry;
    }

    /// Reset a slot to empty, keeping its chain link.
    fn clear_slot(dir: &mut DirectoryBlock, slot: usize) {
        Self::put_slot(dir, slot, DirEntry::empty());
    }

    /// Find space for `size` bytes: first-fit gap reuse, else grow the file
    /// by the chunk-padded size and hand out the pre-growth length.
    ///
    /// The caller records the *actual* used size afterwards, which leaves
    /// the padding tail discoverable as a future gap.
    fn allocate_space(&mut self, size: u64) -> Result<u64> {
        let file_len = self.file.len()?;
        if let Some(offset) = self.allocations.find_gap(size, file_len) {
            trace!(size, offset, "reusing gap");
            return Ok(offset);
        }

        let padded = size.div_ceil(CHUNK_SIZE) * CHUNK_SIZE;
        let offset = self.file.append_zeroed(padded)?;
        trace!(size, padded, offset, "grew container");
        Ok(offset)
    }

    /// Walk a folder's chain for an empty slot, expanding the chain with a
    /// fresh block when every slot is taken.
    fn find_free_slot(&mut self, first_block: u64) -> Result<(u64, usize, DirectoryBlock)> {
        let mut offset = first_block;
        loop {
            let dir = self.load_block(offset)?;
            if let Some(slot) = dir.find_empty() {
                return Ok((offset, slot, dir));
            }
            offset = match dir.next_block() {
                0 => self.expand_chain(offset, dir)?,
                next => next,
            };
        }
    }

    /// Link a freshly allocated, all-empty block to the end of a chain.
    fn expand_chain(&mut self, offset: u64, mut dir: DirectoryBlock) -> Result<u64> {
        let new_offset = self.allocate_space(BLOCK_SIZE as u64)?;
        self.store_block(new_offset, &DirectoryBlock::new())?;
        self.allocations.reserve(new_offset, BLOCK_SIZE as u64);

        dir.set_next_block(new_offset);
        self.store_block(offset, &dir)?;
        trace!(offset, new_offset, "directory chain expanded");
        Ok(new_offset)
    }

    /// Create each missing folder in order under `parent`: new block with
    /// `.`/`..` references, then the parent-side entry, then the cache.
    fn create_folders(&mut self, parent: FolderId, names: &[String]) -> Result<()> {
        let mut parent = parent;
        for name in names {
            let Some(parent_block) = self.tree.block_offset(parent) else {
                return Err(PackError::InvalidArgument("parent folder missing from cache"));
            };
            let (chain_offset, slot, mut dir) = self.find_free_slot(parent_block)?;

            let new_offset = self.allocate_space(BLOCK_SIZE as u64)?;
            let now = block::filetime_now();
            let mut new_block = DirectoryBlock::new();
            new_block.entries[0] = DirEntry::folder(block::SELF_NAME, new_offset, now);
            new_block.entries[1] = DirEntry::folder(block::PARENT_NAME, parent_block, now);
            self.store_block(new_offset, &new_block)?;
            self.allocations.reserve(new_offset, BLOCK_SIZE as u64);

            Self::put_slot(&mut dir, slot, DirEntry::folder(name, new_offset, now));
            self.store_block(chain_offset, &dir)?;

            parent = self.tree.insert_folder(parent, name, new_offset)?;
            debug!(name = %name, offset = new_offset, "folder created");
        }
        Ok(())
    }

    /// Overwrite an existing file: reuse the range when the new content
    /// fits, otherwise release it and allocate anew. The directory entry is
    /// matched by its recorded offset, not by name.
    fn replace_file(&mut self, id: FileId, bytes: &[u8], size: u32) -> Result<bool> {
        let Some((old_offset, old_size, parent)) = self.tree.file_location(id) else {
            return Ok(false);
        };

        let target_offset = if size <= old_size {
            old_offset
        } else {
            self.allocations.release(old_offset);
            self.allocate_space(bytes.len() as u64)?
        };

        let Some(mut chain_offset) = self.tree.block_offset(parent) else {
            return Ok(false);
        };
        while chain_offset != 0 {
            let mut dir = self.load_block(chain_offset)?;
            let slot = dir
                .entries
                .iter()
                .position(|e| e.kind == EntryKind::File && e.offset == old_offset);
            if let Some(slot) = slot {
                self.file.write_at(target_offset, bytes)?;
                self.allocations.reserve(target_offset, size as u64);

                let entry = &mut dir.entries[slot];
                entry.modification_time = block::filetime_now();
                entry.size = size;
                entry.offset = target_offset;
                self.store_block(chain_offset, &dir)?;

                self.tree.update_file(id, target_offset, size);
                debug!(offset = target_offset, size, "file replaced");
                return Ok(true);
            }
            chain_offset = dir.next_block();
        }

        // The chain auto-expands on insert, so a live file without a
        // matching entry means the container changed behind our back.
        Ok(false)
    }

    /// Add a file that does not exist yet, creating missing parent folders.
    fn insert_new_file(&mut self, normalized: &str, bytes: &[u8], size: u32) -> Result<bool> {
        let (dir_path, file_name) = match normalized.rsplit_once(tree::SEPARATOR) {
            Some((dir_path, file_name)) => (dir_path, file_name),
            None => ("", normalized),
        };
        if file_name.len() >= NAME_SIZE {
            return Err(PackError::InvalidArgument("file name exceeds 88 bytes"));
        }

        if !dir_path.is_empty() {
            self.add_folder(dir_path)?;
        }
        let Some(folder_id) = self.tree.folder_id(dir_path) else {
            // The parent path is occupied by a file; nothing to attach to.
            return Ok(false);
        };
        let Some(first_block) = self.tree.block_offset(folder_id) else {
            return Ok(false);
        };

        let (chain_offset, slot, mut dir) = self.find_free_slot(first_block)?;

        let content_offset = self.allocate_space(bytes.len() as u64)?;
        self.file.write_at(content_offset, bytes)?;
        self.allocations.reserve(content_offset, size as u64);

        let now = block::filetime_now();
        Self::put_slot(&mut dir, slot, DirEntry::file(file_name, content_offset, size, now));
        self.store_block(chain_offset, &dir)?;

        self.tree.insert_file(folder_id, file_name, content_offset, size)?;
        debug!(path = %normalized, offset = content_offset, size, "file added");
        Ok(true)
    }
}

/// Load and decode the directory block at `offset`.
fn read_block(file: &mut PackFile, cipher: &PackCipher, offset: u64) -> Result<DirectoryBlock> {
    let raw = file.read_at(offset, BLOCK_SIZE)?;
    DirectoryBlock::from_bytes(&cipher.decode(&raw))
}

/// Encode and persist a directory block at `offset`.
fn write_block(
    file: &mut PackFile,
    cipher: &PackCipher,
    offset: u64,
    dir: &DirectoryBlock,
) -> Result<()> {
    file.write_at(offset, &cipher.encode(&dir.to_bytes()))
}
