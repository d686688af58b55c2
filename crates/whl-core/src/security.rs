//! Path-safety checks for archive extraction
//!
//! Archive members come from untrusted input. Any member whose stored path
//! is absolute or contains a `..` component is rejected before a single byte
//! is written, and every write target is checked to stay inside the
//! extraction root even when earlier members planted symlinks.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Why an archive member path was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafePath {
    /// Path starts at the filesystem root
    Absolute,
    /// Path contains a `..` component
    ParentTraversal,
    /// Path carries a Windows drive or UNC prefix
    Prefix,
    /// Path resolves outside the extraction root (e.g. through a symlink)
    Escapes,
    /// A parent component exists but is not a directory
    NotADirectory,
}

impl fmt::Display for UnsafePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsafePath::Absolute => write!(f, "absolute path"),
            UnsafePath::ParentTraversal => write!(f, "parent directory traversal"),
            UnsafePath::Prefix => write!(f, "drive or UNC prefix"),
            UnsafePath::Escapes => write!(f, "resolves outside destination"),
            UnsafePath::NotADirectory => write!(f, "parent is not a directory"),
        }
    }
}

/// Validate a raw member name as stored in the archive.
///
/// Both `/` and `\` count as separators so that zip entries written on
/// Windows cannot smuggle `..\..\` past the check.
pub fn validate_member_name(name: &str) -> Result<(), UnsafePath> {
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(UnsafePath::Absolute);
    }
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(UnsafePath::Prefix);
    }
    if name.split(['/', '\\']).any(|part| part == "..") {
        return Err(UnsafePath::ParentTraversal);
    }
    Ok(())
}

/// Validate an entry path component by component
pub fn validate_entry_path(path: &Path) -> Result<(), UnsafePath> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(UnsafePath::ParentTraversal),
            Component::RootDir => return Err(UnsafePath::Absolute),
            Component::Prefix(_) => return Err(UnsafePath::Prefix),
        }
    }
    Ok(())
}

/// Drop `.` components and return a purely relative path.
///
/// Callers must have run [`validate_entry_path`] first.
pub fn normalize_relative(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect()
}

/// Join an untrusted relative path onto `base`, refusing anything that
/// would leave it lexically.
pub fn sanitize_path(base: &Path, untrusted: &Path) -> Result<PathBuf, UnsafePath> {
    validate_entry_path(untrusted)?;
    Ok(base.join(normalize_relative(untrusted)))
}

/// Check that an existing directory resolves inside `canonical_root`.
///
/// `canonical_root` must already be canonicalized. Symlinks planted by
/// earlier archive members are resolved here, which is what catches
/// `link -> /etc` followed by `link/passwd`.
pub fn ensure_within(canonical_root: &Path, dir: &Path) -> Result<(), UnsafePath> {
    match dir.canonicalize() {
        Ok(resolved) if resolved.starts_with(canonical_root) => Ok(()),
        Ok(resolved) => {
            warn!(dir = ?dir, resolved = ?resolved, "Directory resolves outside extraction root");
            Err(UnsafePath::Escapes)
        }
        Err(_) => Err(UnsafePath::Escapes),
    }
}

/// Validate that a symlink target stays inside the extraction root.
///
/// `link_relative` is the link's own path relative to the root.
pub fn validate_symlink(link_relative: &Path, target: &Path) -> Result<(), UnsafePath> {
    if target.has_root() {
        return Err(UnsafePath::Absolute);
    }

    let mut depth: usize = link_relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count()
        })
        .unwrap_or(0);

    for component in target.components() {
        match component {
            Component::ParentDir => {
                if depth == 0 {
                    return Err(UnsafePath::Escapes);
                }
                depth -= 1;
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir => return Err(UnsafePath::Absolute),
            Component::Prefix(_) => return Err(UnsafePath::Prefix),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_member_name_rules() {
        assert!(validate_member_name("apollo/README").is_ok());
        assert!(validate_member_name("./apollo/src/main.cc").is_ok());
        assert!(validate_member_name("dots..in..name").is_ok());
        assert_eq!(
            validate_member_name("../../etc/passwd"),
            Err(UnsafePath::ParentTraversal)
        );
        assert_eq!(
            validate_member_name("a/../../b"),
            Err(UnsafePath::ParentTraversal)
        );
        assert_eq!(
            validate_member_name("a\\..\\..\\b"),
            Err(UnsafePath::ParentTraversal)
        );
        assert_eq!(validate_member_name("/etc/passwd"), Err(UnsafePath::Absolute));
        assert_eq!(validate_member_name("C:\\evil"), Err(UnsafePath::Prefix));
    }

    #[test]
    fn test_sanitize_path() {
        let base = Path::new("/srv/out");
        assert_eq!(
            sanitize_path(base, Path::new("./sub/file.txt")).unwrap(),
            PathBuf::from("/srv/out/sub/file.txt")
        );
        assert!(sanitize_path(base, Path::new("../etc/passwd")).is_err());
        assert!(sanitize_path(base, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_symlink_targets() {
        assert!(validate_symlink(Path::new("link"), Path::new("target.txt")).is_ok());
        assert!(validate_symlink(Path::new("sub/link"), Path::new("../target.txt")).is_ok());
        assert_eq!(
            validate_symlink(Path::new("link"), Path::new("../outside")),
            Err(UnsafePath::Escapes)
        );
        assert_eq!(
            validate_symlink(Path::new("sub/link"), Path::new("../../outside")),
            Err(UnsafePath::Escapes)
        );
        assert_eq!(
            validate_symlink(Path::new("link"), Path::new("/etc/passwd")),
            Err(UnsafePath::Absolute)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_within_catches_symlinked_parent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        let outside = temp_dir.path().join("outside");
        std::fs::create_dir_all(root.join("inner")).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let canonical_root = root.canonicalize().unwrap();
        assert!(ensure_within(&canonical_root, &root.join("inner")).is_ok());
        assert_eq!(
            ensure_within(&canonical_root, &root.join("link")),
            Err(UnsafePath::Escapes)
        );
    }
}
