//! Tar archive reading and packing

use super::entry::{ArchiveEntry, EntryKind, EntryReader, EntryVisitor};
use super::format::TarCompression;
use super::pack::{PackItem, PackKind};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, IoResultExt, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, warn};

/// Timestamp written into every header when packing deterministically
const DETERMINISTIC_MTIME: u64 = 1_153_704_088;

/// Sequential reader over a (possibly compressed) tar stream
pub struct TarReader {
    archive: Archive<Box<dyn Read>>,
    source: PathBuf,
    compression: TarCompression,
}

impl TarReader {
    /// Open `path` with the given stream compression
    pub fn open(path: &Path, compression: TarCompression) -> Result<Self> {
        let file = BufReader::new(File::open(path).at(path)?);
        let reader: Box<dyn Read> = match compression {
            TarCompression::None => Box::new(file),
            TarCompression::Gzip => Box::new(GzDecoder::new(file)),
            TarCompression::Bzip2 => Box::new(BzDecoder::new(file)),
        };

        Ok(Self {
            archive: Archive::new(reader),
            source: path.to_path_buf(),
            compression,
        })
    }
}

impl EntryReader for TarReader {
    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<()> {
        let source = self.source.clone();
        let corrupt = |e: io::Error| ArchiveError::corrupt(&source, e);

        for entry in self.archive.entries().map_err(corrupt)? {
            let mut entry = entry.map_err(corrupt)?;

            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let path = entry.path().map_err(corrupt)?.into_owned();
            let entry_type = entry.header().entry_type();
            let kind = match entry_type {
                EntryType::Regular | EntryType::Continuous => EntryKind::RegularFile,
                EntryType::Directory => EntryKind::Directory,
                EntryType::Symlink => EntryKind::Symlink,
                EntryType::Link => EntryKind::HardLink,
                EntryType::XGlobalHeader | EntryType::XHeader => continue,
                other => {
                    warn!("Skipping unsupported tar member type {:?}: {}", other, name);
                    continue;
                }
            };
            let link_target = match kind {
                EntryKind::Symlink | EntryKind::HardLink => entry
                    .link_name()
                    .map_err(corrupt)?
                    .map(|target| target.into_owned()),
                _ => None,
            };
            let header = entry.header();
            let record = ArchiveEntry {
                name,
                path,
                kind,
                mode: header.mode().ok(),
                size: entry.size(),
                mtime: header.mtime().ok(),
                link_target,
            };

            visit(&record, &mut entry)?;
        }

        Ok(())
    }

    fn format_name(&self) -> &'static str {
        match self.compression {
            TarCompression::None => "tar",
            TarCompression::Gzip => "tar.gz",
            TarCompression::Bzip2 => "tar.bz2",
        }
    }
}

/// Write `items` as a tar stream into `writer`, returning the writer so the
/// caller can finish any compression layer around it.
pub(crate) fn write_tar<W: Write>(
    writer: W,
    items: &[PackItem],
    config: &ArchiveConfig,
    output: &Path,
) -> Result<W> {
    let mut builder = Builder::new(writer);
    builder.follow_symlinks(false);

    for item in items {
        let mut header = Header::new_gnu();
        header.set_mode(item.mode & 0o7777);
        header.set_mtime(if config.deterministic {
            DETERMINISTIC_MTIME
        } else {
            item.mtime
        });
        let (uid, gid) = if config.deterministic {
            (0, 0)
        } else {
            (item.uid, item.gid)
        };
        header.set_uid(uid);
        header.set_gid(gid);

        match &item.kind {
            PackKind::File => {
                debug!("Adding file: {}", item.name);
                header.set_entry_type(EntryType::Regular);
                header.set_size(item.size);
                let file = File::open(&item.source).at(&item.source)?;
                builder
                    .append_data(&mut header, &item.name, file.take(item.size))
                    .at(output)?;
            }
            PackKind::Directory => {
                debug!("Adding directory: {}", item.name);
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                builder
                    .append_data(&mut header, &item.name, io::empty())
                    .at(output)?;
            }
            PackKind::Symlink(target) => {
                debug!("Adding symlink: {} -> {:?}", item.name, target);
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                builder
                    .append_link(&mut header, &item.name, target)
                    .at(output)?;
            }
        }
    }

    builder.into_inner().at(output)
}
