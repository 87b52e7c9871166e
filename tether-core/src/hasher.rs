//! Content fingerprints for files and artifact trees.
//!
//! SHA-256, lowercase hex. A tree hash frames each entry as
//! `path \0 file_hash \n` in sorted path order, so the result does not
//! depend on the order files were collected in.

use sha2::{Digest, Sha256};

use crate::types::{ContentHash, FileHashes, FileTree};

/// Hash a single file's bytes.
pub fn hash_file(bytes: &[u8]) -> ContentHash {
    let mut h = Sha256::new();
    h.update(bytes);
    ContentHash(hex::encode(h.finalize()))
}

/// Hash every file of a materialized tree.
pub fn hash_files(tree: &FileTree) -> FileHashes {
    tree.iter()
        .map(|(path, bytes)| (path.clone(), hash_file(bytes)))
        .collect()
}

/// Combine per-file hashes into a single tree hash.
pub fn tree_hash_of(file_hashes: &FileHashes) -> ContentHash {
    let mut h = Sha256::new();
    // BTreeMap iteration is already sorted by path.
    for (path, hash) in file_hashes {
        h.update(path.as_bytes());
        h.update([0u8]);
        h.update(hash.as_str().as_bytes());
        h.update(b"\n");
    }
    ContentHash(hex::encode(h.finalize()))
}

/// Hash a whole materialized tree.
pub fn hash_tree(tree: &FileTree) -> ContentHash {
    tree_hash_of(&hash_files(tree))
}
