//! Resolving source descriptors into local paths
//!
//! A [`Fetcher`] turns a local path, an HTTP(S)/FTP URL or a git remote into
//! a path on disk. Remote sources without an explicit destination land in
//! temp directories owned by the fetcher; those are removed by
//! [`Fetcher::cleanup_temp_directories`] or, at the latest, when the fetcher
//! is dropped.

pub mod git;
pub mod http;

use crate::config::FetchConfig;
use crate::error::{FetchError, IoResultExt};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// What a source descriptor points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    Url,
    Git,
}

impl SourceKind {
    /// Classify a descriptor. Git patterns win over URL schemes, so
    /// `https://host/repo.git` is cloned rather than downloaded.
    pub fn classify(source: &str) -> Self {
        if source.ends_with(".git")
            || source.starts_with("git@")
            || source.starts_with("ssh://")
            || source.contains("/git/")
        {
            SourceKind::Git
        } else if source.starts_with("http://")
            || source.starts_with("https://")
            || source.starts_with("ftp://")
        {
            SourceKind::Url
        } else {
            SourceKind::Local
        }
    }
}

/// Fetches sources and tracks the temp directories it creates
#[derive(Debug)]
pub struct Fetcher {
    config: FetchConfig,
    temp_dirs: Vec<TempDir>,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            temp_dirs: Vec::new(),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Temp directories currently owned by this fetcher
    pub fn temp_directories(&self) -> Vec<&Path> {
        self.temp_dirs.iter().map(TempDir::path).collect()
    }

    /// Resolve `source` to a local path.
    ///
    /// Local paths are returned absolute and must exist. Downloads and clones
    /// go to `destination` when given, otherwise to a fresh temp directory.
    pub fn fetch(&mut self, source: &str, destination: Option<&Path>) -> Result<PathBuf, FetchError> {
        let destination = destination.map(absolute).transpose()?;

        match SourceKind::classify(source) {
            SourceKind::Git => {
                info!("Detected Git repository: {}", source);
                let (parent, managed) = self.target_dir(destination)?;
                git::shallow_clone(source, &parent, managed)
            }
            SourceKind::Url => {
                info!("Detected URL resource: {}", source);
                let (dir, _) = self.target_dir(destination)?;
                http::download(source, &dir, &self.config)
            }
            SourceKind::Local => {
                let path = Path::new(source);
                if !path.exists() {
                    return Err(FetchError::NotFound(absolute(path)?));
                }
                let path = path.canonicalize().fetch_at(path)?;
                info!("Using local path: {:?}", path);
                Ok(path)
            }
        }
    }

    /// Remove every temp directory this fetcher created.
    ///
    /// Failures are logged and do not stop the remaining removals; calling
    /// this again is a no-op.
    pub fn cleanup_temp_directories(&mut self) {
        for dir in self.temp_dirs.drain(..) {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("Removed temp directory {:?}", path),
                Err(e) => warn!("Failed to remove temp directory {:?}: {}", path, e),
            }
        }
    }

    /// Destination directory for a remote fetch, and whether it is managed
    fn target_dir(&mut self, destination: Option<PathBuf>) -> Result<(PathBuf, bool), FetchError> {
        match destination {
            Some(dir) => {
                fs::create_dir_all(&dir).fetch_at(&dir)?;
                Ok((dir, false))
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix(&self.config.temp_prefix)
                    .tempdir()
                    .fetch_at(&env::temp_dir())?;
                let path = temp.path().to_path_buf();
                debug!("Created temp directory {:?}", path);
                self.temp_dirs.push(temp);
                Ok((path, true))
            }
        }
    }
}

impl Drop for Fetcher {
    fn drop(&mut self) {
        self.cleanup_temp_directories();
    }
}

fn absolute(path: &Path) -> Result<PathBuf, FetchError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = env::current_dir().fetch_at(path)?;
        Ok(cwd.join(path))
    }
}
