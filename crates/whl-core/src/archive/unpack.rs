//! Writes archive members to disk

use super::entry::{ArchiveEntry, EntryKind};
use super::plan::{EntryDecision, ExtractionPlan};
use super::ExtractReport;
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, IoResultExt, Result};
use crate::security::{ensure_within, sanitize_path, validate_symlink, UnsafePath};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Mode and mtime of a directory, applied once all members are written so a
/// read-only directory cannot block its own children.
struct DeferredDir {
    path: PathBuf,
    mode: Option<u32>,
    mtime: Option<u64>,
}

/// Sink for one extraction: applies the plan, the safety checks and the
/// metadata policy to every member handed to it.
pub(crate) struct EntryWriter<'a> {
    plan: &'a ExtractionPlan,
    config: &'a ArchiveConfig,
    source: &'a Path,
    canonical_root: PathBuf,
    report: ExtractReport,
    deferred_dirs: Vec<DeferredDir>,
}

impl<'a> EntryWriter<'a> {
    pub fn new(plan: &'a ExtractionPlan, config: &'a ArchiveConfig, source: &'a Path) -> Result<Self> {
        let root = plan.extract_root();
        fs::create_dir_all(root).at(root)?;
        let canonical_root = root.canonicalize().at(root)?;

        Ok(Self {
            plan,
            config,
            source,
            canonical_root,
            report: ExtractReport::default(),
            deferred_dirs: Vec::new(),
        })
    }

    pub fn entries_written(&self) -> usize {
        self.report.entries_written
    }

    /// Write one member. Unsafe members are skipped and recorded; only
    /// filesystem failures and corrupt content streams are returned as errors.
    pub fn write(&mut self, entry: &ArchiveEntry, data: &mut dyn Read) -> Result<()> {
        let relative = match self.plan.decide(&entry.name, &entry.path) {
            EntryDecision::Extract(relative) => relative,
            EntryDecision::Filtered => {
                self.report.entries_filtered += 1;
                return Ok(());
            }
            EntryDecision::Root => return Ok(()),
            EntryDecision::Unsafe(reason) => {
                self.skip_unsafe(entry, reason);
                return Ok(());
            }
        };

        let target = match sanitize_path(self.plan.extract_root(), &relative) {
            Ok(target) => target,
            Err(reason) => {
                self.skip_unsafe(entry, reason);
                return Ok(());
            }
        };
        if let Some(parent) = target.parent() {
            if let Err(reason) = self.prepare_parent(parent)? {
                self.skip_unsafe(entry, reason);
                return Ok(());
            }
        }

        let written = match entry.kind {
            EntryKind::Directory => self.write_directory(entry, &target)?,
            EntryKind::RegularFile => self.write_file(entry, &target, data)?,
            EntryKind::Symlink => self.write_symlink(entry, &relative, &target)?,
            EntryKind::HardLink => self.write_hard_link(entry, &target)?,
        };

        if written {
            self.report.entries_written += 1;
            if let Some(top) = relative.components().next() {
                self.report
                    .top_level
                    .insert(top.as_os_str().to_string_lossy().into_owned());
            }
        }
        Ok(())
    }

    /// Apply deferred directory metadata and hand back the report
    pub fn finish(mut self) -> Result<ExtractReport> {
        // Deepest first so parents are touched after their children
        self.deferred_dirs
            .sort_by_key(|dir| std::cmp::Reverse(dir.path.components().count()));
        for dir in &self.deferred_dirs {
            self.apply_metadata(&dir.path, dir.mode, dir.mtime);
        }
        Ok(self.report)
    }

    fn skip_unsafe(&mut self, entry: &ArchiveEntry, reason: UnsafePath) {
        warn!("Skipping unsafe archive member {:?}: {}", entry.name, reason);
        self.report.skipped_unsafe.push(entry.name.clone());
    }

    /// Create `parent`, refusing when its nearest existing ancestor already
    /// resolves outside the root or is not a directory (nothing is created
    /// in that case). Dangling symlinks count as existing.
    fn prepare_parent(&self, parent: &Path) -> Result<std::result::Result<(), UnsafePath>> {
        let existing = parent
            .ancestors()
            .find(|ancestor| fs::symlink_metadata(ancestor).is_ok())
            .unwrap_or(parent);
        if let Err(reason) = ensure_within(&self.canonical_root, existing) {
            return Ok(Err(reason));
        }
        if !existing.is_dir() {
            return Ok(Err(UnsafePath::NotADirectory));
        }
        if let Err(e) = fs::create_dir_all(parent) {
            if e.kind() == io::ErrorKind::AlreadyExists {
                return Ok(Err(UnsafePath::NotADirectory));
            }
            return Err(ArchiveError::Filesystem {
                path: parent.to_path_buf(),
                source: e,
            });
        }
        Ok(ensure_within(&self.canonical_root, parent))
    }

    fn write_directory(&mut self, entry: &ArchiveEntry, target: &Path) -> Result<bool> {
        if let Ok(meta) = fs::symlink_metadata(target) {
            if !meta.is_dir() {
                fs::remove_file(target).at(target)?;
            }
        }
        fs::create_dir_all(target).at(target)?;
        self.deferred_dirs.push(DeferredDir {
            path: target.to_path_buf(),
            mode: entry.mode,
            mtime: entry.mtime,
        });
        Ok(true)
    }

    fn write_file(&mut self, entry: &ArchiveEntry, target: &Path, data: &mut dyn Read) -> Result<bool> {
        if !self.clear_slot(entry, target)? {
            return Ok(false);
        }

        debug!("Extracting {:?}", target);
        let mut file = File::create(target).at(target)?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let read = match data.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ArchiveError::corrupt(
                        self.source,
                        format!("reading member '{}': {}", entry.name, e),
                    ))
                }
            };
            file.write_all(&buffer[..read]).at(target)?;
        }
        file.flush().at(target)?;
        drop(file);

        self.apply_metadata(target, entry.mode, entry.mtime);
        Ok(true)
    }

    fn write_symlink(&mut self, entry: &ArchiveEntry, relative: &Path, target: &Path) -> Result<bool> {
        let Some(link_target) = &entry.link_target else {
            warn!("Symlink member {:?} has no target, skipping", entry.name);
            return Ok(false);
        };
        if !self.config.allow_external_symlinks {
            if let Err(reason) = validate_symlink(relative, link_target) {
                self.skip_unsafe(entry, reason);
                return Ok(false);
            }
        }
        if !self.clear_slot(entry, target)? {
            return Ok(false);
        }

        debug!("Creating symlink {:?} -> {:?}", target, link_target);
        create_symlink(link_target, target).at(target)?;
        Ok(true)
    }

    fn write_hard_link(&mut self, entry: &ArchiveEntry, target: &Path) -> Result<bool> {
        let Some(original) = entry
            .link_target
            .as_deref()
            .and_then(|link| self.plan.map_link_target(link))
        else {
            warn!("Hard link {:?} has no usable target, skipping", entry.name);
            return Ok(false);
        };
        let original = self.plan.extract_root().join(original);
        if let Some(Err(reason)) = original
            .parent()
            .map(|parent| ensure_within(&self.canonical_root, parent))
        {
            self.skip_unsafe(entry, reason);
            return Ok(false);
        }
        if !original.is_file() {
            warn!(
                "Hard link {:?} points at {:?} which was not extracted, skipping",
                entry.name, original
            );
            return Ok(false);
        }
        if !self.clear_slot(entry, target)? {
            return Ok(false);
        }

        debug!("Creating hard link {:?} => {:?}", target, original);
        fs::hard_link(&original, target).at(target)?;
        Ok(true)
    }

    /// Remove whatever sits at `target` so a new file or link can take its
    /// place. Returns false when a real directory is in the way.
    fn clear_slot(&mut self, entry: &ArchiveEntry, target: &Path) -> Result<bool> {
        match fs::symlink_metadata(target) {
            Ok(meta) if meta.is_dir() => {
                warn!(
                    "Member {:?} would replace directory {:?}, skipping",
                    entry.name, target
                );
                Ok(false)
            }
            Ok(_) => {
                fs::remove_file(target).at(target)?;
                Ok(true)
            }
            Err(_) => Ok(true),
        }
    }

    fn apply_metadata(&self, path: &Path, mode: Option<u32>, mtime: Option<u64>) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            if let Some(mode) = mode {
                let mode = if self.config.preserve_permissions {
                    mode & 0o777
                } else {
                    let current = fs::metadata(path)
                        .map(|meta| meta.permissions().mode())
                        .unwrap_or(0o644);
                    current | (mode & 0o100)
                };
                if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
                    debug!("Failed to set permissions on {:?}: {}", path, e);
                }
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        if self.config.preserve_mtime {
            if let Some(mtime) = mtime {
                let mtime = filetime::FileTime::from_unix_time(mtime as i64, 0);
                if let Err(e) = filetime::set_file_mtime(path, mtime) {
                    debug!("Failed to set mtime on {:?}: {}", path, e);
                }
            }
        }
    }
}

#[cfg(unix)]
fn create_symlink(link_target: &Path, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link_target, path)
}

#[cfg(windows)]
fn create_symlink(link_target: &Path, path: &Path) -> io::Result<()> {
    let resolved = path
        .parent()
        .map(|parent| parent.join(link_target))
        .unwrap_or_else(|| link_target.to_path_buf());
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(link_target, path)
    } else {
        std::os::windows::fs::symlink_file(link_target, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DecompressOptions;
    use tempfile::TempDir;

    fn file_entry(name: &str, mode: u32) -> ArchiveEntry {
        ArchiveEntry {
            name: name.to_string(),
            path: PathBuf::from(name),
            kind: EntryKind::RegularFile,
            mode: Some(mode),
            size: 0,
            mtime: Some(1_600_000_000),
            link_target: None,
        }
    }

    #[test]
    fn test_writes_file_and_tracks_top_level() {
        let temp_dir = TempDir::new().unwrap();
        let plan =
            ExtractionPlan::for_archive(temp_dir.path(), &DecompressOptions::default(), None)
                .unwrap();
        let config = ArchiveConfig::default();
        let source = Path::new("bundle.tar");
        let mut writer = EntryWriter::new(&plan, &config, source).unwrap();

        writer
            .write(&file_entry("apollo/README", 0o644), &mut &b"hello"[..])
            .unwrap();
        writer
            .write(&file_entry("../escape", 0o644), &mut &b"nope"[..])
            .unwrap();
        let report = writer.finish().unwrap();

        assert_eq!(report.entries_written, 1);
        assert_eq!(report.skipped_unsafe, vec!["../escape".to_string()]);
        assert!(report.top_level.contains("apollo"));
        assert_eq!(
            fs::read(temp_dir.path().join("apollo/README")).unwrap(),
            b"hello"
        );
        assert!(!temp_dir.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn test_failing_stream_is_corrupt() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated"))
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let plan =
            ExtractionPlan::for_archive(temp_dir.path(), &DecompressOptions::default(), None)
                .unwrap();
        let config = ArchiveConfig::default();
        let mut writer = EntryWriter::new(&plan, &config, Path::new("bundle.tar")).unwrap();

        let err = writer
            .write(&file_entry("a.bin", 0o644), &mut Broken)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptArchive { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_bit_kept_without_full_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let plan =
            ExtractionPlan::for_archive(temp_dir.path(), &DecompressOptions::default(), None)
                .unwrap();
        let config = ArchiveConfig {
            preserve_permissions: false,
            ..Default::default()
        };
        let mut writer = EntryWriter::new(&plan, &config, Path::new("bundle.tar")).unwrap();
        writer
            .write(&file_entry("run.sh", 0o755), &mut &b"#!/bin/sh\n"[..])
            .unwrap();
        writer.finish().unwrap();

        let mode = fs::metadata(temp_dir.path().join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o100, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_parent_is_not_followed() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("dest");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&dest).unwrap();
        fs::create_dir_all(&outside).unwrap();

        let plan = ExtractionPlan::for_archive(&dest, &DecompressOptions::default(), None).unwrap();
        let config = ArchiveConfig::default();
        let mut writer = EntryWriter::new(&plan, &config, Path::new("bundle.tar")).unwrap();

        let link = ArchiveEntry {
            kind: EntryKind::Symlink,
            link_target: Some(outside.clone()),
            ..file_entry("escape", 0o777)
        };
        writer.write(&link, &mut io::empty()).unwrap();
        writer
            .write(&file_entry("escape/owned.txt", 0o644), &mut &b"x"[..])
            .unwrap();
        let report = writer.finish().unwrap();

        assert!(!outside.join("owned.txt").exists());
        assert_eq!(report.skipped_unsafe, vec!["escape/owned.txt".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_parent_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let plan =
            ExtractionPlan::for_archive(temp_dir.path(), &DecompressOptions::default(), None)
                .unwrap();
        let config = ArchiveConfig::default();
        let mut writer = EntryWriter::new(&plan, &config, Path::new("bundle.tar")).unwrap();

        let link = ArchiveEntry {
            kind: EntryKind::Symlink,
            link_target: Some(PathBuf::from("/nonexistent/whl-deploy/target")),
            ..file_entry("bundle/link", 0o777)
        };
        writer.write(&link, &mut io::empty()).unwrap();
        writer
            .write(&file_entry("bundle/link/evil.txt", 0o644), &mut &b"x"[..])
            .unwrap();
        writer
            .write(&file_entry("bundle/ok.txt", 0o644), &mut &b"ok"[..])
            .unwrap();
        let report = writer.finish().unwrap();

        assert_eq!(report.skipped_unsafe, vec!["bundle/link/evil.txt".to_string()]);
        assert!(temp_dir.path().join("bundle/ok.txt").is_file());
    }

    #[test]
    fn test_file_in_place_of_directory_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let plan =
            ExtractionPlan::for_archive(temp_dir.path(), &DecompressOptions::default(), None)
                .unwrap();
        let config = ArchiveConfig::default();
        let mut writer = EntryWriter::new(&plan, &config, Path::new("bundle.tar")).unwrap();

        writer
            .write(&file_entry("bundle/data", 0o644), &mut &b"plain"[..])
            .unwrap();
        writer
            .write(&file_entry("bundle/data/nested.txt", 0o644), &mut &b"x"[..])
            .unwrap();
        let report = writer.finish().unwrap();

        assert_eq!(report.entries_written, 1);
        assert_eq!(report.skipped_unsafe, vec!["bundle/data/nested.txt".to_string()]);
        assert_eq!(fs::read(temp_dir.path().join("bundle/data")).unwrap(), b"plain");
    }
}
