//! Deterministic content fingerprint of a checked-out tree.

use std::fs::File;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// BLAKE3 over every file below `root` (excluding `.git`), visited in sorted
/// path order. Each file contributes its relative path and its bytes.
pub fn tree_fingerprint(root: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(b"\0");

        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut hasher)?;
        hasher.update(b"\0");
    }

    Ok(hasher.finalize().to_hex().to_string())
}
