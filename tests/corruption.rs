//! Wrong keys, foreign files, and structurally broken containers

use std::fs::OpenOptions;
use std::path::PathBuf;

use tempfile::TempDir;

use jmxpack_rs::{
    Archive, ArchiveOptions, DirEntry, DirectoryBlock, OpenMode, PackCipher, PackError,
    HEADER_SIZE,
};

const KEY: &str = "169841";

fn scratch() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("media.pk2");
    (dir, path)
}

fn valid_container(path: &std::path::Path) {
    let mut archive = Archive::create(path, KEY).unwrap();
    assert!(archive.add_file("data/foo.txt", b"hello").unwrap());
    archive.close().unwrap();
}

#[test]
fn wrong_key_is_rejected_and_file_untouched() {
    let (_dir, path) = scratch();
    valid_container(&path);
    let before = std::fs::read(&path).unwrap();

    assert!(matches!(
        Archive::open(&path, "badkey99"),
        Err(PackError::AuthenticationFailure)
    ));

    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn right_key_still_works_after_rejection() {
    let (_dir, path) = scratch();
    valid_container(&path);

    let _ = Archive::open(&path, "badkey99");
    let mut archive = Archive::open(&path, KEY).unwrap();
    assert_eq!(archive.read_file("data/foo.txt").unwrap().unwrap(), b"hello");
}

#[test]
fn foreign_file_fails_authentication() {
    let (_dir, path) = scratch();
    std::fs::write(&path, vec![0xAB; 4096]).unwrap();

    assert!(matches!(
        Archive::open(&path, KEY),
        Err(PackError::AuthenticationFailure)
    ));
}

#[test]
fn truncated_container_is_corrupt() {
    let (_dir, path) = scratch();
    valid_container(&path);

    // Keep the header, cut into the root block.
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(300).unwrap();
    drop(file);

    assert!(matches!(
        Archive::open(&path, KEY),
        Err(PackError::CorruptArchive(_))
    ));
}

#[test]
fn header_shorter_than_record_is_io() {
    let (_dir, path) = scratch();
    valid_container(&path);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(100).unwrap();
    drop(file);

    assert!(matches!(Archive::open(&path, KEY), Err(PackError::Io(_))));
}

#[test]
fn dangling_folder_pointer_is_corrupt() {
    let (_dir, path) = scratch();
    valid_container(&path);

    // Hand-craft a root block whose folder entry points far past EOF.
    let cipher = PackCipher::new(KEY).unwrap();
    let mut root = DirectoryBlock::new();
    root.entries[0] = DirEntry::folder(".", HEADER_SIZE as u64, 0);
    root.entries[1] = DirEntry::folder("ghost", 0xFFFF_0000, 0);

    let mut bytes = std::fs::read(&path).unwrap();
    let encoded = cipher.encode(&root.to_bytes());
    bytes[HEADER_SIZE..HEADER_SIZE + encoded.len()].copy_from_slice(&encoded);
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        Archive::open(&path, KEY),
        Err(PackError::CorruptArchive(_))
    ));
}

#[test]
fn duplicate_sibling_entries_are_corrupt() {
    let (_dir, path) = scratch();
    valid_container(&path);

    // Two file entries whose names case-fold to the same sibling key.
    let cipher = PackCipher::new(KEY).unwrap();
    let mut root = DirectoryBlock::new();
    root.entries[0] = DirEntry::folder(".", HEADER_SIZE as u64, 0);
    root.entries[1] = DirEntry::file("dup.txt", 4096, 0, 0);
    root.entries[2] = DirEntry::file("DUP.TXT", 4200, 0, 0);

    let mut bytes = std::fs::read(&path).unwrap();
    let encoded = cipher.encode(&root.to_bytes());
    bytes[HEADER_SIZE..HEADER_SIZE + encoded.len()].copy_from_slice(&encoded);
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        Archive::open(&path, KEY),
        Err(PackError::CorruptArchive(_))
    ));
}

#[test]
fn truncate_mode_is_unsupported() {
    let (_dir, path) = scratch();
    valid_container(&path);
    let before = std::fs::read(&path).unwrap();

    assert!(matches!(
        Archive::open_with(&path, KEY, OpenMode::Truncate, ArchiveOptions::default()),
        Err(PackError::UnsupportedOperation(_))
    ));
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn opening_a_missing_container_is_io() {
    let (_dir, path) = scratch();
    assert!(matches!(Archive::open(&path, KEY), Err(PackError::Io(_))));
}

#[test]
fn too_short_passphrase_is_invalid_argument() {
    let (_dir, path) = scratch();
    assert!(matches!(
        Archive::create(&path, "abc"),
        Err(PackError::InvalidArgument(_))
    ));
}
