//! Error types for whl-core

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the archive engine
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Source path does not exist
    #[error("Source not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Source is a file but neither tar- nor zip-structured
    #[error("Unsupported archive format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// Format was recognized but reading failed part way through
    #[error(
        "Corrupt archive {}: {reason} ({entries_written} entries written before failure)",
        .path.display()
    )]
    CorruptArchive {
        path: PathBuf,
        reason: String,
        entries_written: usize,
    },

    /// A top-level rename was requested but the extraction did not produce
    /// exactly one new top-level directory
    #[error(
        "Cannot rename top-level directory to '{target}': found {} new directories {new_dirs:?} and {} new files {new_files:?}",
        .new_dirs.len(),
        .new_files.len()
    )]
    AmbiguousTopLevel {
        target: String,
        new_dirs: Vec<String>,
        new_files: Vec<String>,
    },

    /// A caller-supplied path option cannot be applied
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Underlying filesystem operation failed
    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    /// Record how many entries reached disk before a corrupt stream was hit
    pub(crate) fn with_entries_written(self, count: usize) -> Self {
        match self {
            ArchiveError::CorruptArchive { path, reason, .. } => ArchiveError::CorruptArchive {
                path,
                reason,
                entries_written: count,
            },
            other => other,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl ToString) -> Self {
        ArchiveError::CorruptArchive {
            path: path.to_path_buf(),
            reason: reason.to_string(),
            entries_written: 0,
        }
    }
}

impl From<walkdir::Error> for ArchiveError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        let source = err
            .into_io_error()
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "directory walk failed"));
        ArchiveError::Filesystem { path, source }
    }
}

/// Errors raised while resolving a source descriptor into a local path
#[derive(Error, Debug)]
pub enum FetchError {
    /// Local path does not exist
    #[error("Local path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Download or clone failed
    #[error("Network error while fetching '{url}': {reason}")]
    Network { url: String, reason: String },

    /// A required external executable is not installed
    #[error("Required tool not found: {0}")]
    ToolMissing(String),

    /// Local filesystem operation failed
    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Attach the failing path to a raw I/O result
pub trait IoResultExt<T> {
    /// Convert into an archive error located at `path`
    fn at(self, path: &Path) -> std::result::Result<T, ArchiveError>;

    /// Convert into a fetch error located at `path`
    fn fetch_at(self, path: &Path) -> std::result::Result<T, FetchError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> std::result::Result<T, ArchiveError> {
        self.map_err(|source| ArchiveError::Filesystem {
            path: path.to_path_buf(),
            source,
        })
    }

    fn fetch_at(self, path: &Path) -> std::result::Result<T, FetchError> {
        self.map_err(|source| FetchError::Filesystem {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;
