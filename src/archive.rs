//! Zip packaging of directory trees
//!
//! Key segments written by [`DirectoryProvider`](crate::provider::DirectoryProvider)
//! carry a standard zip archive of the whole tree, so a key payload extracted
//! from a recording can be opened with any archive tool.
//!
//! Entry names are paths relative to the packed root, `/`-separated, with no
//! leading slash. Only regular files are stored; directories are implied by
//! the entry names.

use crate::error::Result;
use crate::provider::{DirectoryProvider, ProviderConfig};
use crate::types::TreeState;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Upper bound on the buffer reserved up front for one archive entry
const MAX_PREALLOCATION: u64 = 1 << 20;

/// Pack every regular file under `root` into a zip stream written to `sink`
///
/// Directories are walked recursively; symbolic links are not followed.
///
/// # Returns
///
/// The sink, positioned after the archive's central directory.
pub fn pack_directory<W: Write + Seek>(root: &Path, sink: W) -> Result<W> {
    let tree = DirectoryProvider::new(root, ProviderConfig::default())?.scan()?;
    pack_tree(&tree, sink)
}

/// Pack an in-memory tree into a zip stream written to `sink`
pub fn pack_tree<W: Write + Seek>(tree: &TreeState, sink: W) -> Result<W> {
    let mut zip = ZipWriter::new(sink);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, content) in tree.iter() {
        zip.start_file(path, options)?;
        zip.write_all(content)?;
    }

    let sink = zip.finish()?;
    debug!("Packed {} files ({} bytes)", tree.len(), tree.total_size());
    Ok(sink)
}

/// Pack a tree into an in-memory zip archive
pub fn pack_tree_to_vec(tree: &TreeState) -> Result<Vec<u8>> {
    Ok(pack_tree(tree, Cursor::new(Vec::new()))?.into_inner())
}

/// Read a zip archive back into a tree
///
/// An empty byte slice is an empty tree.
pub fn unpack_tree(bytes: &[u8]) -> Result<TreeState> {
    let mut tree = TreeState::new();
    if bytes.is_empty() {
        return Ok(tree);
    }

    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        // The declared size is untrusted input, so it only bounds the hint
        let mut content = Vec::with_capacity(entry.size().min(MAX_PREALLOCATION) as usize);
        entry.read_to_end(&mut content)?;
        tree.insert(name, content);
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_pack_directory_uses_relative_paths() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub mod nested;").unwrap();
        fs::write(dir.path().join("src/nested/mod.rs"), "").unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();

        let bytes = pack_directory(dir.path(), Cursor::new(Vec::new())).unwrap().into_inner();
        let tree = unpack_tree(&bytes).unwrap();

        let paths: Vec<&str> = tree.iter().map(|(path, _)| path).collect();
        assert_eq!(paths, vec!["Cargo.toml", "src/lib.rs", "src/nested/mod.rs"]);
        assert_eq!(tree.get("src/lib.rs"), Some(&b"pub mod nested;"[..]));
        assert_eq!(tree.get("src/nested/mod.rs"), Some(&b""[..]));
    }

    #[test]
    fn test_empty_payload_is_empty_tree() {
        assert!(unpack_tree(&[]).unwrap().is_empty());
        let bytes = pack_tree_to_vec(&TreeState::new()).unwrap();
        assert!(unpack_tree(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(unpack_tree(b"definitely not a zip archive").is_err());
    }

    #[test]
    fn test_oversized_entry_size_is_not_preallocated() {
        let mut tree = TreeState::new();
        tree.insert("a.txt".to_string(), b"hello".to_vec());
        let mut bytes = pack_tree_to_vec(&tree).unwrap();

        // Claim a ~2 GiB uncompressed size in the central directory entry
        let central = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&0x7fff_fff0u32.to_le_bytes());

        // Either outcome is fine as long as nothing tries to reserve the claimed size
        if let Ok(tree) = unpack_tree(&bytes) {
            assert_eq!(tree.get("a.txt"), Some(&b"hello"[..]));
        }
    }
}
