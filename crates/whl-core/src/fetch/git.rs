//! Shallow git clones

use crate::error::{FetchError, IoResultExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Repository name from the last URL segment, `.git` stripped
pub fn repo_name(url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(url);
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() || name == "." || name == ".." {
        "repository".to_string()
    } else {
        name.to_string()
    }
}

/// Clone `url` with depth 1 into `parent/<repo name>`.
///
/// `managed` marks `parent` as a fetcher-owned temp directory: a leftover
/// clone there is deleted and re-cloned. In a caller-supplied directory an
/// existing clone is returned untouched.
pub(crate) fn shallow_clone(url: &str, parent: &Path, managed: bool) -> Result<PathBuf, FetchError> {
    let target = parent.join(repo_name(url));

    if target.exists() {
        if managed {
            warn!("Cleaning existing temp git directory: {:?}", target);
            fs::remove_dir_all(&target).fetch_at(&target)?;
        } else {
            warn!(
                "Target git directory {:?} already exists, skipping clone",
                target
            );
            return Ok(target);
        }
    }

    let git = which::which("git").map_err(|_| FetchError::ToolMissing("git".to_string()))?;

    info!("Cloning '{}' into {:?}", url, target);
    let output = Command::new(git)
        .args(["clone", "--depth", "1", "--"])
        .arg(url)
        .arg(&target)
        .output()
        .fetch_at(&target)?;

    if !output.status.success() {
        return Err(FetchError::Network {
            url: url.to_string(),
            reason: format!(
                "git clone failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    info!("Repository cloned successfully: {:?}", target);
    Ok(target)
}
