//! Filesystem helpers shared by the archive engine and its callers

use crate::error::{IoResultExt, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Total size in bytes of regular files under `path` (symlinks not followed).
///
/// Unreadable entries count as zero.
pub fn tree_size<P: AsRef<Path>>(path: P) -> u64 {
    let path = path.as_ref();

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(meta) if meta.is_dir() => fs::read_dir(path)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|entry| tree_size(entry.path()))
                    .sum()
            })
            .unwrap_or(0),
        _ => 0,
    }
}

/// True when `path` is a real directory (a symlink to a directory is not)
pub fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// True when `path` is missing or an empty directory
pub fn is_missing_or_empty(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    Ok(fs::read_dir(path).at(path)?.next().is_none())
}

/// Move the contents of `src` into the existing directory `dst`, replacing
/// clashing files and recursing into clashing directories, then remove `src`.
///
/// Entries in `dst` that have no counterpart in `src` are left alone.
pub fn merge_into(src: &Path, dst: &Path) -> Result<()> {
    for entry in fs::read_dir(src).at(src)? {
        let entry = entry.at(src)?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if is_real_dir(&from) && is_real_dir(&to) {
            merge_into(&from, &to)?;
            continue;
        }

        match fs::symlink_metadata(&to) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&to).at(&to)?,
            Ok(_) => fs::remove_file(&to).at(&to)?,
            Err(_) => {}
        }
        debug!("Moving {:?} to {:?}", from, to);
        fs::rename(&from, &to).at(&from)?;
    }

    fs::remove_dir(src).at(src)
}
