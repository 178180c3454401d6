//! In-memory directory tree cache
//!
//! Mirror of the on-disk folder structure, rebuilt by the opening chain walk
//! and kept in lockstep by every mutation. Nodes are id-keyed and carry
//! parent ids instead of parent pointers, so back-references cannot form
//! ownership cycles. Alongside each folder's own child maps, two flat
//! "normalized full path -> id" maps give O(1) lookups; both views are
//! updated through the same insert/remove choke points.

use std::collections::HashMap;

use crate::error::{PackError, Result};

/// Separator used in normalized paths.
pub const SEPARATOR: char = std::path::MAIN_SEPARATOR;

/// Normalize a virtual path: case-fold and convert `/` to the platform
/// separator. The root is the empty string.
pub fn normalize(path: &str) -> String {
    path.to_lowercase().replace('/', &SEPARATOR.to_string())
}

fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_owned()
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FolderId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u64);

/// Folder node: name as stored on disk, first-block offset, and child maps
/// keyed by case-folded child name.
#[derive(Debug)]
pub struct FolderNode {
    pub name: String,
    pub parent: Option<FolderId>,
    pub block_offset: u64,
    pub folders: HashMap<String, FolderId>,
    pub files: HashMap<String, FileId>,
}

#[derive(Debug)]
pub struct FileNode {
    pub name: String,
    pub parent: FolderId,
    pub offset: u64,
    pub size: u32,
}

/// Caller-facing folder snapshot with sorted child name lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub name: String,
    pub path: String,
    pub folders: Vec<String>,
    pub files: Vec<String>,
}

/// Caller-facing file snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub offset: u64,
    pub size: u32,
}

/// Bookkeeping handed back by [`DirTree::detach_subtree`]: everything the
/// engine needs to update the allocation table and patch the parent block.
#[derive(Debug)]
pub struct DetachedSubtree {
    pub parent: Option<FolderId>,
    pub name_key: String,
    pub block_offset: u64,
    /// First-block offset of every removed folder, the target included.
    pub folder_offsets: Vec<u64>,
    /// Content offset of every removed file.
    pub file_offsets: Vec<u64>,
}

#[derive(Debug)]
pub struct DirTree {
    next_id: u64,
    root: FolderId,
    folders: HashMap<FolderId, FolderNode>,
    files: HashMap<FileId, FileNode>,
    folder_paths: HashMap<String, FolderId>,
    file_paths: HashMap<String, FileId>,
}

impl DirTree {
    /// A tree holding only the root folder.
    pub fn new(root_block_offset: u64) -> Self {
        let root = FolderId(0);
        let mut folders = HashMap::new();
        folders.insert(
            root,
            FolderNode {
                name: String::new(),
                parent: None,
                block_offset: root_block_offset,
                folders: HashMap::new(),
                files: HashMap::new(),
            },
        );

        let mut folder_paths = HashMap::new();
        folder_paths.insert(String::new(), root);

        DirTree {
            next_id: 1,
            root,
            folders,
            files: HashMap::new(),
            folder_paths,
            file_paths: HashMap::new(),
        }
    }

    pub fn root(&self) -> FolderId {
        self.root
    }

    pub fn folder_id(&self, normalized_path: &str) -> Option<FolderId> {
        self.folder_paths.get(normalized_path).copied()
    }

    pub fn file_id(&self, normalized_path: &str) -> Option<FileId> {
        self.file_paths.get(normalized_path).copied()
    }

    pub fn block_offset(&self, id: FolderId) -> Option<u64> {
        self.folders.get(&id).map(|node| node.block_offset)
    }

    /// `(content offset, size, parent)` of a live file node.
    pub fn file_location(&self, id: FileId) -> Option<(u64, u32, FolderId)> {
        self.files
            .get(&id)
            .map(|node| (node.offset, node.size, node.parent))
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Full normalized path of a folder; the root is the empty string.
    pub fn folder_path(&self, id: FolderId) -> Option<String> {
        self.folders.get(&id)?;

        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(cursor) = current {
            let node = self.folders.get(&cursor)?;
            if node.parent.is_some() {
                parts.push(node.name.to_lowercase());
            }
            current = node.parent;
        }
        parts.reverse();
        Some(parts.join(&SEPARATOR.to_string()))
    }

    pub fn folder_info(&self, id: FolderId) -> Option<FolderInfo> {
        let node = self.folders.get(&id)?;
        let path = self.folder_path(id)?;

        let mut folders: Vec<String> = node.folders.keys().cloned().collect();
        folders.sort();
        let mut files: Vec<String> = node.files.keys().cloned().collect();
        files.sort();

        Some(FolderInfo {
            name: node.name.clone(),
            path,
            folders,
            files,
        })
    }

    pub fn file_info(&self, id: FileId) -> Option<FileInfo> {
        let node = self.files.get(&id)?;
        let parent_path = self.folder_path(node.parent)?;

        Some(FileInfo {
            name: node.name.clone(),
            path: join(&parent_path, &node.name.to_lowercase()),
            offset: node.offset,
            size: node.size,
        })
    }

    /// Register a folder under `parent`. Fails with [`PackError::DuplicateEntry`]
    /// when a same-named (case-folded) sibling folder already exists.
    pub fn insert_folder(
        &mut self,
        parent: FolderId,
        name: &str,
        block_offset: u64,
    ) -> Result<FolderId> {
        let key = name.to_lowercase();
        let parent_path = self
            .folder_path(parent)
            .ok_or(PackError::InvalidArgument("unknown parent folder"))?;
        let path = join(&parent_path, &key);

        if self.folder_paths.contains_key(&path) {
            return Err(PackError::DuplicateEntry(path));
        }

        let id = FolderId(self.next_id);
        self.next_id += 1;

        let Some(parent_node) = self.folders.get_mut(&parent) else {
            return Err(PackError::InvalidArgument("unknown parent folder"));
        };
        parent_node.folders.insert(key, id);

        self.folders.insert(
            id,
            FolderNode {
                name: name.to_owned(),
                parent: Some(parent),
                block_offset,
                folders: HashMap::new(),
                files: HashMap::new(),
            },
        );
        self.folder_paths.insert(path, id);

        Ok(id)
    }

    /// Register a file under `parent`. Fails with [`PackError::DuplicateEntry`]
    /// when a same-named (case-folded) sibling file already exists.
    pub fn insert_file(
        &mut self,
        parent: FolderId,
        name: &str,
        offset: u64,
        size: u32,
    ) -> Result<FileId> {
        let key = name.to_lowercase();
        let parent_path = self
            .folder_path(parent)
            .ok_or(PackError::InvalidArgument("unknown parent folder"))?;
        let path = join(&parent_path, &key);

        if self.file_paths.contains_key(&path) {
            return Err(PackError::DuplicateEntry(path));
        }

        let id = FileId(self.next_id);
        self.next_id += 1;

        let Some(parent_node) = self.folders.get_mut(&parent) else {
            return Err(PackError::InvalidArgument("unknown parent folder"));
        };
        parent_node.files.insert(key, id);

        self.files.insert(
            id,
            FileNode {
                name: name.to_owned(),
                parent,
                offset,
                size,
            },
        );
        self.file_paths.insert(path, id);

        Ok(id)
    }

    /// Point an existing file node at a new content range.
    pub fn update_file(&mut self, id: FileId, offset: u64, size: u32) {
        if let Some(node) = self.files.get_mut(&id) {
            node.offset = offset;
            node.size = size;
        }
    }

    /// Unlink a file from its parent and both flat maps.
    pub fn remove_file(&mut self, id: FileId) {
        let Some(node) = self.files.remove(&id) else {
            return;
        };
        let key = node.name.to_lowercase();
        if let Some(parent_path) = self.folder_path(node.parent) {
            self.file_paths.remove(&join(&parent_path, &key));
        }
        if let Some(parent_node) = self.folders.get_mut(&node.parent) {
            parent_node.files.remove(&key);
        }
    }

    /// Remove a folder and every descendant from the node and path maps,
    /// reporting the disk ranges they referenced.
    ///
    /// The parent's child-map link to the target is left in place; the engine
    /// severs it with [`DirTree::unlink_child_folder`] once the parent-side
    /// disk entry has actually been cleared.
    pub fn detach_subtree(&mut self, id: FolderId) -> Option<DetachedSubtree> {
        let path = self.folder_path(id)?;
        let (parent, name_key, block_offset) = {
            let node = self.folders.get(&id)?;
            (node.parent, node.name.to_lowercase(), node.block_offset)
        };

        let mut detached = DetachedSubtree {
            parent,
            name_key,
            block_offset,
            folder_offsets: Vec::new(),
            file_offsets: Vec::new(),
        };
        self.detach_folder(id, &path, &mut detached);
        Some(detached)
    }

    fn detach_folder(&mut self, id: FolderId, path: &str, out: &mut DetachedSubtree) {
        let Some(node) = self.folders.remove(&id) else {
            return;
        };
        self.folder_paths.remove(path);
        out.folder_offsets.push(node.block_offset);

        for (key, file_id) in node.files {
            if let Some(file) = self.files.remove(&file_id) {
                self.file_paths.remove(&join(path, &key));
                out.file_offsets.push(file.offset);
            }
        }
        for (key, child_id) in node.folders {
            let child_path = join(path, &key);
            self.detach_folder(child_id, &child_path, out);
        }
    }

    /// Drop the parent's child-map link to a detached folder.
    pub fn unlink_child_folder(&mut self, parent: FolderId, name_key: &str) {
        if let Some(node) = self.folders.get_mut(&parent) {
            node.folders.remove(name_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let sep = SEPARATOR.to_string();
        assert_eq!(normalize("Data/Foo.TXT"), format!("data{sep}foo.txt"));
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_root_is_empty_path() {
        let tree = DirTree::new(256);
        let root = tree.folder_id("").unwrap();
        assert_eq!(root, tree.root());
        assert_eq!(tree.block_offset(root), Some(256));
        assert_eq!(tree.folder_path(root).unwrap(), "");
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut tree = DirTree::new(256);
        let data = tree.insert_folder(tree.root(), "Data", 4096).unwrap();
        let file = tree.insert_file(data, "Foo.txt", 8192, 5).unwrap();

        let data_path = normalize("data");
        let file_path = normalize("data/foo.txt");

        assert_eq!(tree.folder_id(&data_path), Some(data));
        assert_eq!(tree.file_id(&file_path), Some(file));

        let info = tree.file_info(file).unwrap();
        assert_eq!(info.name, "Foo.txt");
        assert_eq!(info.path, file_path);
        assert_eq!(info.offset, 8192);
        assert_eq!(info.size, 5);

        let folder = tree.folder_info(data).unwrap();
        assert_eq!(folder.name, "Data");
        assert_eq!(folder.files, vec!["foo.txt".to_owned()]);
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let mut tree = DirTree::new(256);
        tree.insert_folder(tree.root(), "Data", 4096).unwrap();
        assert!(matches!(
            tree.insert_folder(tree.root(), "DATA", 8192),
            Err(PackError::DuplicateEntry(_))
        ));

        let data = tree.folder_id(&normalize("data")).unwrap();
        tree.insert_file(data, "a.txt", 100, 1).unwrap();
        assert!(matches!(
            tree.insert_file(data, "A.TXT", 200, 1),
            Err(PackError::DuplicateEntry(_))
        ));
    }

    #[test]
    fn test_file_and_folder_may_share_a_path() {
        // Separate maps, as in the on-disk format: a corrupted archive can
        // carry both without breaking the cache.
        let mut tree = DirTree::new(256);
        tree.insert_folder(tree.root(), "x", 4096).unwrap();
        tree.insert_file(tree.root(), "x", 8192, 1).unwrap();
        assert!(tree.folder_id("x").is_some());
        assert!(tree.file_id("x").is_some());
    }

    #[test]
    fn test_update_file() {
        let mut tree = DirTree::new(256);
        let id = tree.insert_file(tree.root(), "f.bin", 2816, 100).unwrap();
        tree.update_file(id, 4096, 2000);
        assert_eq!(tree.file_location(id), Some((4096, 2000, tree.root())));
    }

    #[test]
    fn test_remove_file() {
        let mut tree = DirTree::new(256);
        let id = tree.insert_file(tree.root(), "f.bin", 2816, 100).unwrap();
        tree.remove_file(id);

        assert_eq!(tree.file_id("f.bin"), None);
        assert_eq!(tree.file_count(), 0);
        let root = tree.folder_info(tree.root()).unwrap();
        assert!(root.files.is_empty());
    }

    #[test]
    fn test_detach_subtree() {
        let mut tree = DirTree::new(256);
        let a = tree.insert_folder(tree.root(), "a", 4096).unwrap();
        let b = tree.insert_folder(a, "b", 8192).unwrap();
        tree.insert_file(a, "one.txt", 100, 1).unwrap();
        tree.insert_file(b, "two.txt", 200, 2).unwrap();

        let detached = tree.detach_subtree(a).unwrap();
        assert_eq!(detached.parent, Some(tree.root()));
        assert_eq!(detached.name_key, "a");
        assert_eq!(detached.block_offset, 4096);

        let mut folder_offsets = detached.folder_offsets.clone();
        folder_offsets.sort();
        assert_eq!(folder_offsets, vec![4096, 8192]);
        let mut file_offsets = detached.file_offsets.clone();
        file_offsets.sort();
        assert_eq!(file_offsets, vec![100, 200]);

        let sep = SEPARATOR.to_string();
        assert_eq!(tree.folder_id("a"), None);
        assert_eq!(tree.folder_id(&format!("a{sep}b")), None);
        assert_eq!(tree.file_id(&format!("a{sep}one.txt")), None);
        assert_eq!(tree.file_id(&format!("a{sep}b{sep}two.txt")), None);

        // The parent-side link survives until the disk entry is cleared.
        let root = tree.folder_info(tree.root()).unwrap();
        assert_eq!(root.folders, vec!["a".to_owned()]);
        tree.unlink_child_folder(tree.root(), "a");
        let root = tree.folder_info(tree.root()).unwrap();
        assert!(root.folders.is_empty());
    }
}
