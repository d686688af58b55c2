//! Common assertions for whl-deploy testing

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What a tree node looks like, compared by [`assert_trees_equal`]
#[derive(Debug, PartialEq, Eq)]
enum Node {
    Dir,
    File { content: Vec<u8>, owner_exec: bool },
    Symlink(PathBuf),
}

/// Asserts that two trees have the same relative paths, file contents,
/// owner-executable bits and symlink targets
pub fn assert_trees_equal(expected: &Path, actual: &Path) -> Result<()> {
    let left = snapshot(expected)?;
    let right = snapshot(actual)?;

    let left_paths: Vec<_> = left.keys().collect();
    let right_paths: Vec<_> = right.keys().collect();
    assert_eq!(
        left_paths, right_paths,
        "Different entries under {:?} and {:?}",
        expected, actual
    );

    for (path, node) in &left {
        assert_eq!(Some(node), right.get(path), "Mismatch for {:?}", path);
    }

    Ok(())
}

/// Asserts that a file has specific permissions (Unix only)
#[cfg(unix)]
pub fn assert_file_permissions(path: &Path, expected: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode() & 0o777;
    assert_eq!(
        mode, expected,
        "Permission mismatch for {:?}: expected {:o}, got {:o}",
        path, expected, mode
    );

    Ok(())
}

/// Asserts that nothing under `root` has a name equal to `name`
pub fn assert_no_entry_named(root: &Path, name: &str) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry?;
        assert_ne!(
            entry.file_name().to_string_lossy(),
            name,
            "Unexpected entry {:?}",
            entry.path()
        );
    }
    Ok(())
}

fn snapshot(root: &Path) -> Result<BTreeMap<PathBuf, Node>> {
    let mut nodes = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(root)?.to_path_buf();
        let file_type = entry.file_type();

        let node = if file_type.is_symlink() {
            Node::Symlink(fs::read_link(entry.path())?)
        } else if file_type.is_dir() {
            Node::Dir
        } else {
            let content = fs::read(entry.path())
                .with_context(|| format!("reading {:?}", entry.path()))?;
            Node::File {
                content,
                owner_exec: owner_exec(entry.path())?,
            }
        };
        nodes.insert(relative, node);
    }
    Ok(nodes)
}

#[cfg(unix)]
fn owner_exec(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o100 != 0)
}

#[cfg(not(unix))]
fn owner_exec(_path: &Path) -> Result<bool> {
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestDir;

    #[test]
    fn test_equal_trees_pass() {
        let a = TestDir::new().unwrap();
        let b = TestDir::new().unwrap();
        for dir in [&a, &b] {
            dir.create_file("x/y.txt", b"same").unwrap();
        }
        assert_trees_equal(a.path(), b.path()).unwrap();
    }

    #[test]
    #[should_panic(expected = "Mismatch")]
    fn test_content_difference_panics() {
        let a = TestDir::new().unwrap();
        let b = TestDir::new().unwrap();
        a.create_file("y.txt", b"one").unwrap();
        b.create_file("y.txt", b"two").unwrap();
        let _ = assert_trees_equal(a.path(), b.path());
    }
}
