//! Packing: walking a source tree into archive items and writing them out

use super::format::{resolve_output, ArchiveFormat};
use super::CompressOptions;
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, IoResultExt, Result};
use crate::fsutil::tree_size;
use crate::security::{normalize_relative, validate_entry_path};
use std::fs::{self, File, Metadata};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What a packed item is
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PackKind {
    File,
    Directory,
    Symlink(PathBuf),
}

/// One filesystem object queued for packing
#[derive(Debug, Clone)]
pub(crate) struct PackItem {
    pub source: PathBuf,
    /// Archive member name, `/`-separated
    pub name: String,
    pub kind: PackKind,
    pub mode: u32,
    pub mtime: u64,
    pub uid: u64,
    pub gid: u64,
    pub size: u64,
}

/// Pack `source` into `output`, returning the path actually written
pub(crate) fn pack(
    source: &Path,
    output: &Path,
    options: &CompressOptions,
    config: &ArchiveConfig,
) -> Result<PathBuf> {
    if fs::symlink_metadata(source).is_err() {
        return Err(ArchiveError::NotFound(source.to_path_buf()));
    }

    let (format, output) = resolve_output(output);
    info!("Packing {:?} into {:?} ({:?})", source, output, format);

    let items = collect_items(source, options)?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).at(parent)?;
        }
    }
    let file = File::create(&output).at(&output)?;

    match format {
        ArchiveFormat::Tar => {
            let writer = super::tar::write_tar(BufWriter::new(file), &items, config, &output)?;
            finish_writer(writer, &output)?;
        }
        ArchiveFormat::TarGz => {
            let level = flate2::Compression::new(config.gzip_level.min(9));
            let encoder = flate2::write::GzEncoder::new(BufWriter::new(file), level);
            let encoder = super::tar::write_tar(encoder, &items, config, &output)?;
            finish_writer(encoder.finish().at(&output)?, &output)?;
        }
        ArchiveFormat::TarBz2 => {
            let level = bzip2::Compression::new(config.bzip2_level.clamp(1, 9));
            let encoder = bzip2::write::BzEncoder::new(BufWriter::new(file), level);
            let encoder = super::tar::write_tar(encoder, &items, config, &output)?;
            finish_writer(encoder.finish().at(&output)?, &output)?;
        }
        ArchiveFormat::Zip => super::zip::write_zip(file, &items, &output)?,
    }

    info!(
        "Packed {} entries ({} bytes of input) into {:?} ({} bytes)",
        items.len(),
        items.iter().map(|item| item.size).sum::<u64>(),
        output,
        tree_size(&output)
    );
    Ok(output)
}

fn finish_writer<W: Write>(mut writer: W, output: &Path) -> Result<()> {
    writer.flush().at(output)
}

/// Walk `source` and name every object the way it will appear in the archive.
///
/// Without a strip prefix, names are rooted at `archive_root_name` (or the
/// source's own file name). With one, names are relative to the prefix and
/// carry `archive_root_name` in front only when it was given explicitly.
pub(crate) fn collect_items(source: &Path, options: &CompressOptions) -> Result<Vec<PackItem>> {
    let explicit_root = match options.archive_root_name.as_deref() {
        Some(name) => Some(validated_root_name(name)?),
        None => None,
    };

    let (base, root) = match options.strip_prefix.as_deref() {
        Some(prefix) => {
            let source_abs = source.canonicalize().at(source)?;
            let prefix_abs = prefix
                .canonicalize()
                .map_err(|_| not_an_ancestor(prefix, source))?;
            if !source_abs.starts_with(&prefix_abs) {
                return Err(not_an_ancestor(prefix, source));
            }
            let within = source_abs
                .strip_prefix(&prefix_abs)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let root = match explicit_root {
                Some(root) => root.join(within),
                None => within,
            };
            (source_abs, root)
        }
        None => {
            let root = match explicit_root {
                Some(root) => root,
                None => default_root_name(source)?,
            };
            (source.to_path_buf(), root)
        }
    };

    let mut items = Vec::new();
    for entry in WalkDir::new(&base).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(&base).unwrap_or(entry.path());
        let name_path = root.join(relative);
        if name_path.components().next().is_none() {
            continue;
        }
        let name = archive_name(&name_path);

        let metadata = entry.metadata()?;
        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            PackKind::Symlink(fs::read_link(entry.path()).at(entry.path())?)
        } else if file_type.is_dir() {
            PackKind::Directory
        } else if file_type.is_file() {
            PackKind::File
        } else {
            warn!("Skipping special file {:?}", entry.path());
            continue;
        };

        debug!("Queued {:?} as {}", entry.path(), name);
        items.push(item_from_metadata(entry.path(), name, kind, &metadata));
    }

    Ok(items)
}

fn item_from_metadata(source: &Path, name: String, kind: PackKind, metadata: &Metadata) -> PackItem {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    let size = if kind == PackKind::File { metadata.len() } else { 0 };

    #[cfg(unix)]
    let (mode, uid, gid) = {
        use std::os::unix::fs::MetadataExt;
        (metadata.mode(), u64::from(metadata.uid()), u64::from(metadata.gid()))
    };
    #[cfg(not(unix))]
    let (mode, uid, gid) = match kind {
        PackKind::Directory => (0o755, 0, 0),
        PackKind::Symlink(_) => (0o777, 0, 0),
        PackKind::File if metadata.permissions().readonly() => (0o444, 0, 0),
        PackKind::File => (0o644, 0, 0),
    };

    PackItem {
        source: source.to_path_buf(),
        name,
        kind,
        mode,
        mtime,
        uid,
        gid,
        size,
    }
}

fn archive_name(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn validated_root_name(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    validate_entry_path(path)
        .map_err(|reason| ArchiveError::InvalidPath(format!("archive root name '{}': {}", name, reason)))?;
    Ok(normalize_relative(path))
}

fn default_root_name(source: &Path) -> Result<PathBuf> {
    let resolved;
    let source = match source.file_name() {
        Some(_) => source,
        None => {
            resolved = source.canonicalize().at(source)?;
            resolved.as_path()
        }
    };
    source
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| ArchiveError::InvalidPath(format!("{:?} has no name to root the archive at", source)))
}

fn not_an_ancestor(prefix: &Path, source: &Path) -> ArchiveError {
    ArchiveError::InvalidPath(format!(
        "strip prefix {:?} is not an ancestor of {:?}",
        prefix, source
    ))
}
