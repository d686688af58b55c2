//! Plain directory sources: copied through the same writer as archive members

use super::entry::{ArchiveEntry, EntryKind};
use super::plan::ExtractionPlan;
use super::unpack::EntryWriter;
use super::ExtractReport;
use crate::config::ArchiveConfig;
use crate::error::{IoResultExt, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::warn;
use walkdir::WalkDir;

/// Copy the contents of `source` into the plan's extraction root
pub(crate) fn copy_tree(
    source: &Path,
    plan: &ExtractionPlan,
    config: &ArchiveConfig,
) -> Result<ExtractReport> {
    let mut writer = EntryWriter::new(plan, config, source)?;

    for entry in WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let metadata = entry.metadata()?;
        let file_type = entry.file_type();
        let (kind, link_target) = if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).at(entry.path())?;
            (EntryKind::Symlink, Some(target))
        } else if file_type.is_dir() {
            (EntryKind::Directory, None)
        } else if file_type.is_file() {
            (EntryKind::RegularFile, None)
        } else {
            warn!("Skipping special file {:?}", entry.path());
            continue;
        };

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };
        #[cfg(not(unix))]
        let mode = None;

        let record = ArchiveEntry {
            name,
            path: relative.to_path_buf(),
            kind,
            mode,
            size: metadata.len(),
            mtime: metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_secs()),
            link_target,
        };

        match kind {
            EntryKind::RegularFile => {
                let mut file = File::open(entry.path()).at(entry.path())?;
                writer.write(&record, &mut file)?;
            }
            _ => writer.write(&record, &mut io::empty())?,
        }
    }

    writer.finish()
}
