//! Testing utilities and fixtures for whl-deploy
//!
//! Scratch directories, deployment-bundle fixtures, hand-built (including
//! deliberately malicious) archives, and tree comparisons shared by the
//! whl-core and whl-cli test suites.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub mod archives;
pub mod assertions;
pub mod fixtures;

/// Creates a temporary test directory with cleanup on drop
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    /// Creates a new temporary test directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    /// Returns the path to the temporary directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the test directory (not created)
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Creates a file with the given name and content in the test directory
    pub fn create_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Creates a file with mode 0755
    #[cfg(unix)]
    pub fn create_executable(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.create_file(name, content)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    /// Creates a directory with the given name in the test directory
    pub fn create_dir(&self, name: &str) -> Result<PathBuf> {
        let path = self.join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Creates a symlink `name` pointing at `target` (stored verbatim)
    #[cfg(unix)]
    pub fn create_symlink(&self, name: &str, target: &str) -> Result<PathBuf> {
        let path = self.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(target, &path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_dir() {
        let test_dir = TestDir::new().unwrap();
        assert!(test_dir.path().exists());
    }

    #[test]
    fn test_create_nested_file() {
        let test_dir = TestDir::new().unwrap();
        let file_path = test_dir.create_file("a/b/test.txt", b"Hello").unwrap();
        assert!(file_path.exists());
        assert_eq!(std::fs::read(&file_path).unwrap(), b"Hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_create_symlink() {
        let test_dir = TestDir::new().unwrap();
        test_dir.create_file("target.txt", b"x").unwrap();
        let link = test_dir.create_symlink("link", "target.txt").unwrap();
        assert_eq!(
            std::fs::read_link(link).unwrap(),
            PathBuf::from("target.txt")
        );
    }
}
