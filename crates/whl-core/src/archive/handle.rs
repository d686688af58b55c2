//! Opened extraction sources

use super::entry::{ArchiveEntry, EntryKind, EntryReader};
use super::format::{sniff, ArchiveKind};
use super::tar::TarReader;
use super::zip::ZipReader;
use crate::error::{ArchiveError, IoResultExt, Result};
use crate::security::{validate_entry_path, validate_member_name};
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// A source path together with its detected kind
#[derive(Debug, Clone)]
pub struct ArchiveHandle {
    path: PathBuf,
    kind: ArchiveKind,
}

impl ArchiveHandle {
    /// Resolve `path` to an absolute path and detect its kind
    pub fn open(path: &Path) -> Result<Self> {
        if fs::symlink_metadata(path).is_err() {
            return Err(ArchiveError::NotFound(path.to_path_buf()));
        }
        let path = path.canonicalize().at(path)?;
        let kind = sniff(&path)?;
        Ok(Self { path, kind })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    /// Fresh sequential reader over the archive members
    pub fn reader(&self) -> Result<Box<dyn EntryReader>> {
        match self.kind {
            ArchiveKind::Tar(compression) => Ok(Box::new(TarReader::open(&self.path, compression)?)),
            ArchiveKind::Zip => Ok(Box::new(ZipReader::open(&self.path)?)),
            ArchiveKind::PlainDirectory | ArchiveKind::Unknown => {
                Err(ArchiveError::UnsupportedFormat(self.path.clone()))
            }
        }
    }

    /// List every member without extracting anything
    pub fn entries(&self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        self.reader()?
            .for_each_entry(&mut |entry: &ArchiveEntry, _: &mut dyn Read| {
                entries.push(entry.clone());
                Ok(())
            })?;
        Ok(entries)
    }

    /// Names of the top-level components (unsafe members ignored)
    pub fn top_level_components(&self) -> Result<BTreeSet<String>> {
        if self.kind == ArchiveKind::PlainDirectory {
            let mut names = BTreeSet::new();
            for entry in fs::read_dir(&self.path).at(&self.path)? {
                let entry = entry.at(&self.path)?;
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
            return Ok(names);
        }

        Ok(self
            .entries()?
            .iter()
            .filter(|entry| is_safe(entry))
            .filter_map(ArchiveEntry::top_level)
            .collect())
    }

    /// The archive's single top-level directory, if it has exactly one and
    /// nothing else at the top level.
    pub fn single_root_dir(&self) -> Result<Option<String>> {
        let entries: Vec<ArchiveEntry> = self.entries()?.into_iter().filter(is_safe).collect();

        let tops: BTreeSet<String> = entries.iter().filter_map(ArchiveEntry::top_level).collect();
        if tops.len() != 1 {
            return Ok(None);
        }

        // The single name must be a directory: either stored as one or holding children
        let is_dir = entries.iter().any(|entry| {
            entry.depth() > 1 || (entry.depth() == 1 && entry.kind == EntryKind::Directory)
        });
        Ok(if is_dir { tops.into_iter().next() } else { None })
    }
}

fn is_safe(entry: &ArchiveEntry) -> bool {
    validate_member_name(&entry.name).is_ok() && validate_entry_path(&entry.path).is_ok()
}
