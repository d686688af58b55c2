//! Archive engine: unpacking and packing deployment bundles
//!
//! Sources are identified by content (see [`format::sniff`]), members are
//! checked against path traversal before anything is written, and an
//! optional post-extraction rename gives the bundle a stable top-level name
//! whatever versioned directory the archive happened to contain.

mod copy;
pub mod entry;
pub mod format;
mod handle;
mod pack;
pub mod plan;
pub mod tar;
mod unpack;
pub mod zip;

pub use entry::{ArchiveEntry, EntryKind, EntryReader};
pub use format::{ArchiveFormat, ArchiveKind, TarCompression};
pub use handle::ArchiveHandle;

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, IoResultExt, Result};
use crate::fsutil::{is_real_dir, merge_into};
use plan::ExtractionPlan;
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use unpack::EntryWriter;

/// Options for [`ArchiveEngine::decompress`]
#[derive(Debug, Clone, Default)]
pub struct DecompressOptions {
    /// Only extract members whose stored name contains this substring
    pub member_filter: Option<String>,
    /// Rename the single extracted top-level directory to this name
    pub target_top_level_name: Option<String>,
    /// Strip this leading path from member names
    pub strip_prefix: Option<PathBuf>,
    /// Strip the archive's single top-level directory, if it has one
    pub strip_single_root: bool,
}

/// Options for [`ArchiveEngine::compress`]
#[derive(Debug, Clone, Default)]
pub struct CompressOptions {
    /// Name of the root entry inside the archive
    pub archive_root_name: Option<String>,
    /// Make member names relative to this ancestor of the source.
    ///
    /// Without an explicit `archive_root_name`, names start at the prefix
    /// and the source's base name is not prepended.
    pub strip_prefix: Option<PathBuf>,
}

/// Outcome of a decompress call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Members written to disk
    pub entries_written: usize,
    /// Members excluded by the member filter
    pub entries_filtered: usize,
    /// Names of members refused as unsafe
    pub skipped_unsafe: Vec<String>,
    /// Top-level names written by this call, relative to the extraction root
    pub top_level: BTreeSet<String>,
    /// Final location of the renamed top-level directory
    pub renamed_root: Option<PathBuf>,
}

/// Unpacks and packs archives under one [`ArchiveConfig`]
#[derive(Debug, Clone, Default)]
pub struct ArchiveEngine {
    config: ArchiveConfig,
}

impl ArchiveEngine {
    pub fn new(config: ArchiveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Unpack `source` (tar, compressed tar, zip or a plain directory) into
    /// `destination`.
    ///
    /// The destination is created if needed and never cleared; existing
    /// files are overwritten member by member. Unsafe members are skipped and
    /// listed in the report.
    pub fn decompress(
        &self,
        source: &Path,
        destination: &Path,
        options: &DecompressOptions,
    ) -> Result<ExtractReport> {
        info!("Unpacking {:?} into {:?}", source, destination);

        let handle = ArchiveHandle::open(source)?;
        if handle.kind() == ArchiveKind::Unknown {
            return Err(ArchiveError::UnsupportedFormat(handle.path().to_path_buf()));
        }
        fs::create_dir_all(destination).at(destination)?;

        let report = match handle.kind() {
            ArchiveKind::PlainDirectory => {
                let plan = ExtractionPlan::for_directory(destination, options)?;
                debug!("Copying directory {:?} into {:?}", handle.path(), plan.extract_root());
                copy::copy_tree(handle.path(), &plan, &self.config)?
            }
            _ => self.unpack_archive(&handle, destination, options)?,
        };

        if !report.skipped_unsafe.is_empty() {
            warn!(
                "Skipped {} unsafe member(s) from {:?}",
                report.skipped_unsafe.len(),
                source
            );
        }
        info!(
            "Unpacked {} entries from {:?} into {:?}",
            report.entries_written, source, destination
        );
        Ok(report)
    }

    fn unpack_archive(
        &self,
        handle: &ArchiveHandle,
        destination: &Path,
        options: &DecompressOptions,
    ) -> Result<ExtractReport> {
        let detected_root = if options.strip_single_root && options.strip_prefix.is_none() {
            let root = handle.single_root_dir()?;
            if root.is_none() {
                debug!("{:?} has no single top-level directory to strip", handle.path());
            }
            root
        } else {
            None
        };

        let plan = ExtractionPlan::for_archive(destination, options, detected_root)?;
        let mut reader = handle.reader()?;
        debug!(
            "Reading {} archive {:?} into {:?}",
            reader.format_name(),
            handle.path(),
            plan.extract_root()
        );

        let existing = match plan.rename_to() {
            Some(_) => Some(top_level_names(plan.extract_root())?),
            None => None,
        };

        let mut writer = EntryWriter::new(&plan, &self.config, handle.path())?;
        let result = reader.for_each_entry(&mut |entry: &ArchiveEntry, data: &mut dyn Read| {
            writer.write(entry, data)
        });
        if let Err(err) = result {
            return Err(err.with_entries_written(writer.entries_written()));
        }
        let mut report = writer.finish()?;

        if let (Some(target), Some(existing)) = (plan.rename_to(), existing) {
            report.renamed_root = Some(rename_top_level(&plan, target, &existing, &report)?);
        }
        Ok(report)
    }

    /// Pack `source` into `output`, returning the path actually written.
    ///
    /// The format follows the output suffix; an unrecognized suffix is
    /// replaced by `.tar.gz`.
    pub fn compress(&self, source: &Path, output: &Path, options: &CompressOptions) -> Result<PathBuf> {
        pack::pack(source, output, options, &self.config)
    }
}

/// Names directly under `dir`; a missing directory has none
fn top_level_names(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !dir.exists() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Rename the single top-level directory this extraction created.
///
/// Only names absent from `existing` (the root's contents before extraction)
/// are candidates, so directories that were already there are never moved.
fn rename_top_level(
    plan: &ExtractionPlan,
    target: &str,
    existing: &BTreeSet<String>,
    report: &ExtractReport,
) -> Result<PathBuf> {
    let root = plan.extract_root();
    let (new_dirs, new_files): (Vec<String>, Vec<String>) = top_level_names(root)?
        .into_iter()
        .filter(|name| !existing.contains(name))
        .partition(|name| is_real_dir(&root.join(name)));

    // Re-extracting an archive whose root already carries the target name
    let renamed = root.join(target);
    if new_dirs.is_empty()
        && !report.top_level.is_empty()
        && report.top_level.iter().all(|name| name == target)
        && is_real_dir(&renamed)
    {
        debug!("Top-level directory already named {:?}", renamed);
        return Ok(renamed);
    }

    if new_dirs.len() != 1 {
        return Err(ArchiveError::AmbiguousTopLevel {
            target: target.to_string(),
            new_dirs,
            new_files,
        });
    }

    let extracted = root.join(&new_dirs[0]);
    if new_dirs[0] == target {
        debug!("Top-level directory already named {:?}", renamed);
        return Ok(renamed);
    }
    if !new_files.is_empty() {
        warn!(
            "Renaming {:?} while leaving top-level files {:?} in {:?}",
            extracted,
            new_files,
            plan.destination()
        );
    }

    match fs::symlink_metadata(&renamed) {
        Ok(meta) if meta.is_dir() => {
            info!("Merging {:?} into existing {:?}", extracted, renamed);
            merge_into(&extracted, &renamed)?;
        }
        Ok(_) => {
            return Err(ArchiveError::InvalidPath(format!(
                "cannot rename {:?}: {:?} exists and is not a directory",
                extracted, renamed
            )))
        }
        Err(_) => {
            info!("Renaming {:?} to {:?}", extracted, renamed);
            fs::rename(&extracted, &renamed).at(&extracted)?;
        }
    }
    Ok(renamed)
}

/// Unpack with a default-configured engine
pub fn decompress(source: &Path, destination: &Path, options: &DecompressOptions) -> Result<ExtractReport> {
    ArchiveEngine::default().decompress(source, destination, options)
}

/// Pack with a default-configured engine
pub fn compress(source: &Path, output: &Path, options: &CompressOptions) -> Result<PathBuf> {
    ArchiveEngine::default().compress(source, output, options)
}

/// True when `path` is a tar (optionally gzip/bzip2 compressed) or zip file
pub fn is_archive(path: &Path) -> bool {
    format::sniff(path)
        .map(|kind| kind.is_archive())
        .unwrap_or(false)
}
