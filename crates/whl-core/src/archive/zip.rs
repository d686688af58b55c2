//! Zip archive reading and packing

use super::entry::{ArchiveEntry, EntryKind, EntryReader, EntryVisitor};
use super::pack::{PackItem, PackKind};
use crate::error::{ArchiveError, IoResultExt, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Reader over the central directory of a zip file
pub struct ZipReader {
    archive: ZipArchive<BufReader<File>>,
    source: PathBuf,
}

impl ZipReader {
    /// Open `path`, reading its central directory
    pub fn open(path: &Path) -> Result<Self> {
        let file = BufReader::new(File::open(path).at(path)?);
        let archive = ZipArchive::new(file).map_err(|e| ArchiveError::corrupt(path, e))?;

        Ok(Self {
            archive,
            source: path.to_path_buf(),
        })
    }
}

impl EntryReader for ZipReader {
    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<()> {
        for index in 0..self.archive.len() {
            let mut file = self
                .archive
                .by_index(index)
                .map_err(|e| ArchiveError::corrupt(&self.source, e))?;

            let name = file.name().to_string();
            let mode = file.unix_mode();
            let kind = if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
                EntryKind::Symlink
            } else if file.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::RegularFile
            };

            // Symlink targets are stored as the member's content
            let link_target = if kind == EntryKind::Symlink {
                let mut target = String::new();
                file.read_to_string(&mut target)
                    .map_err(|e| ArchiveError::corrupt(&self.source, e))?;
                Some(PathBuf::from(target))
            } else {
                None
            };

            let record = ArchiveEntry {
                path: PathBuf::from(&name),
                name,
                kind,
                mode,
                size: file.size(),
                mtime: None,
                link_target,
            };

            visit(&record, &mut file)?;
        }

        Ok(())
    }

    fn format_name(&self) -> &'static str {
        "zip"
    }
}

/// Write `items` as a zip archive into `file`
pub(crate) fn write_zip(file: File, items: &[PackItem], output: &Path) -> Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for item in items {
        let options = FileOptions::<'static, ()>::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(item.mode & 0o777)
            .large_file(item.size >= u64::from(u32::MAX));

        match &item.kind {
            PackKind::File => {
                debug!("Adding file to ZIP: {}", item.name);
                zip.start_file(item.name.clone(), options)
                    .map_err(|e| zip_write_error(output, e))?;
                let mut source = File::open(&item.source).at(&item.source)?;
                io::copy(&mut source, &mut zip).at(output)?;
            }
            PackKind::Directory => {
                debug!("Adding directory to ZIP: {}", item.name);
                zip.add_directory(item.name.clone(), options)
                    .map_err(|e| zip_write_error(output, e))?;
            }
            PackKind::Symlink(target) => {
                debug!("Adding symlink to ZIP: {} -> {:?}", item.name, target);
                zip.add_symlink(
                    item.name.clone(),
                    target.to_string_lossy().into_owned(),
                    options,
                )
                .map_err(|e| zip_write_error(output, e))?;
            }
        }
    }

    let mut writer = zip.finish().map_err(|e| zip_write_error(output, e))?;
    writer.flush().at(output)
}

fn zip_write_error(output: &Path, err: ZipError) -> ArchiveError {
    let source = match err {
        ZipError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    };
    ArchiveError::Filesystem {
        path: output.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reader_reports_kinds_and_modes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bundle.zip");
        {
            let mut zip = ZipWriter::new(File::create(&path).unwrap());
            let options = |mode| FileOptions::<'static, ()>::default().unix_permissions(mode);
            zip.add_directory("apollo/", options(0o755)).unwrap();
            zip.start_file("apollo/run.sh", options(0o755)).unwrap();
            zip.write_all(b"#!/bin/sh\n").unwrap();
            zip.add_symlink("apollo/latest", "run.sh", options(0o777))
                .unwrap();
            zip.finish().unwrap();
        }

        let mut reader = ZipReader::open(&path).unwrap();
        let mut seen = Vec::new();
        reader
            .for_each_entry(&mut |entry: &ArchiveEntry, _: &mut dyn Read| {
                seen.push(entry.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].kind, EntryKind::Directory);
        assert_eq!(seen[1].kind, EntryKind::RegularFile);
        assert_eq!(seen[1].mode.map(|m| m & 0o777), Some(0o755));
        assert_eq!(seen[2].kind, EntryKind::Symlink);
        assert_eq!(seen[2].link_target, Some(PathBuf::from("run.sh")));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.zip");
        std::fs::write(&path, b"PK\x05\x06 definitely not a zip").unwrap();

        assert!(matches!(
            ZipReader::open(&path),
            Err(ArchiveError::CorruptArchive { .. })
        ));
    }
}
