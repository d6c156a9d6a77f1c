//! Change detection for the document tree
//!
//! The digest is a SHA-256 over `relative/path|size|mtime` lines for
//! every file under the root, sorted by path. It is a cheap signal, not
//! a content hash: touching a file or changing its size changes it.
//! An index directory kept inside the root is left out, otherwise
//! writing the index would itself look like a document change.

use crate::error::{KbError, Result};
use crate::index::write_atomic;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::WalkDir;

/// Compute the digest of every file under `root`, skipping `index_dir`
pub fn docs_digest(root: &Path, index_dir: &Path) -> Result<String> {
    if !root.is_dir() {
        return Err(KbError::Digest(format!(
            "{} is not a readable directory",
            root.display()
        )));
    }

    let skip = nested_dir(root, index_dir);
    let mut items: Vec<(String, u64, u64)> = Vec::new();
    let walk = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| Some(entry.path()) != skip.as_deref());

    for entry in walk {
        let entry = entry.map_err(|e| KbError::Digest(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            // Removed between listing and stat
            Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {
                continue
            }
            Err(e) => return Err(KbError::Digest(e.to_string())),
        };

        let mtime = metadata
            .modified()
            .map_err(|e| KbError::Digest(e.to_string()))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        items.push((relative_key(root, entry.path()), metadata.len(), mtime));
    }

    items.sort_by(|a, b| a.0.cmp(&b.0));
    debug!("Digesting {} files under {:?}", items.len(), root);

    let lines: Vec<String> = items
        .iter()
        .map(|(key, size, mtime)| format!("{key}|{size}|{mtime}"))
        .collect();
    Ok(hex::encode(Sha256::digest(lines.join("\n").as_bytes())))
}

/// `dir` spelled as a path under `root`, if it lives strictly inside it
pub(crate) fn nested_dir(root: &Path, dir: &Path) -> Option<PathBuf> {
    let nested = match (root.canonicalize(), dir.canonicalize()) {
        (Ok(root_real), Ok(dir_real)) => root.join(dir_real.strip_prefix(&root_real).ok()?),
        // Not created yet
        _ if dir.starts_with(root) => dir.to_path_buf(),
        _ => return None,
    };
    (nested != root).then_some(nested)
}

/// `/`-separated path of `path` relative to `root`
fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decide whether a full reindex is needed.
///
/// An unknown `current` digest never forces a rebuild of an existing index,
/// and a missing `saved` digest is first-run bookkeeping, not a change.
pub fn should_reindex(current: Option<&str>, saved: Option<&str>, has_index: bool) -> bool {
    if !has_index {
        return true;
    }
    matches!((current, saved), (Some(current), Some(saved)) if current != saved)
}

/// Read the last recorded digest, if any
pub fn load_saved_digest(path: &Path) -> Option<String> {
    let digest = std::fs::read_to_string(path).ok()?;
    let digest = digest.trim();
    (!digest.is_empty()).then(|| digest.to_string())
}

/// Record `digest` as the last indexed state
pub fn save_digest(path: &Path, digest: &str) -> Result<()> {
    write_atomic(path, digest.as_bytes())
}
