//! Archive kind detection and output format selection
//!
//! Input archives are identified by their bytes, never by their name: URLs
//! and user supplied paths routinely carry misleading or missing suffixes.
//! Output archives are the opposite case, the caller names the file and the
//! suffix chain picks the format.

use crate::error::{ArchiveError, IoResultExt, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TAR_BLOCK: usize = 512;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = *b"BZh";
const ZIP_EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
const ZIP_EOCD_MIN_LEN: u64 = 22;
const ZIP_MAX_COMMENT: u64 = 65_535;

/// Stream compression wrapped around a tar archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
    Bzip2,
}

/// Structural kind of an extraction source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar(TarCompression),
    Zip,
    PlainDirectory,
    Unknown,
}

impl ArchiveKind {
    /// Whether this kind is decoded member by member
    pub fn is_archive(&self) -> bool {
        matches!(self, ArchiveKind::Tar(_) | ArchiveKind::Zip)
    }
}

/// Detect the kind of `path` by inspecting its contents
pub fn sniff(path: &Path) -> Result<ArchiveKind> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ArchiveError::NotFound(path.to_path_buf()),
        _ => ArchiveError::Filesystem {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    if metadata.is_dir() {
        return Ok(ArchiveKind::PlainDirectory);
    }

    let mut file = File::open(path).at(path)?;
    let mut head = [0u8; TAR_BLOCK];
    let read = read_up_to(&mut file, &mut head).at(path)?;
    let head = &head[..read];

    let tar_kind = if head.starts_with(&GZIP_MAGIC) {
        let decoder = GzDecoder::new(File::open(path).at(path)?);
        decoded_is_tar(decoder).then_some(TarCompression::Gzip)
    } else if head.starts_with(&BZIP2_MAGIC) {
        let decoder = BzDecoder::new(File::open(path).at(path)?);
        decoded_is_tar(decoder).then_some(TarCompression::Bzip2)
    } else if is_tar_header(head) {
        Some(TarCompression::None)
    } else {
        None
    };

    if let Some(compression) = tar_kind {
        debug!("Detected tar archive ({:?}): {:?}", compression, path);
        return Ok(ArchiveKind::Tar(compression));
    }

    if has_zip_end_record(&mut file, metadata.len()).at(path)? {
        debug!("Detected zip archive: {:?}", path);
        return Ok(ArchiveKind::Zip);
    }

    Ok(ArchiveKind::Unknown)
}

/// Fill `buf` as far as the reader allows, returning the byte count
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn decoded_is_tar<R: Read>(mut decoder: R) -> bool {
    let mut block = [0u8; TAR_BLOCK];
    matches!(read_up_to(&mut decoder, &mut block), Ok(TAR_BLOCK)) && is_tar_header(&block)
}

/// Check whether `block` is a valid tar header by verifying its checksum.
///
/// The checksum covers the whole 512-byte header with the checksum field
/// itself counted as spaces; this accepts v7, ustar and GNU headers alike.
pub fn is_tar_header(block: &[u8]) -> bool {
    if block.len() < TAR_BLOCK {
        return false;
    }
    let Some(stored) = parse_octal(&block[148..156]) else {
        return false;
    };

    let computed: u32 = block[..TAR_BLOCK]
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if (148..156).contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(*b)
            }
        })
        .sum();

    computed == stored
}

fn parse_octal(field: &[u8]) -> Option<u32> {
    let trimmed: Vec<u8> = field
        .iter()
        .copied()
        .skip_while(|b| *b == b' ')
        .take_while(|b| *b != 0 && *b != b' ')
        .collect();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.iter().try_fold(0u32, |acc, digit| match digit {
        b'0'..=b'7' => acc.checked_mul(8)?.checked_add(u32::from(digit - b'0')),
        _ => None,
    })
}

/// Look for the zip end-of-central-directory record in the file tail
fn has_zip_end_record(file: &mut File, len: u64) -> io::Result<bool> {
    if len < ZIP_EOCD_MIN_LEN {
        return Ok(false);
    }
    let tail_len = len.min(ZIP_EOCD_MIN_LEN + ZIP_MAX_COMMENT);
    file.seek(SeekFrom::Start(len - tail_len))?;
    let mut tail = Vec::with_capacity(tail_len as usize);
    file.take(tail_len).read_to_end(&mut tail)?;

    Ok(tail
        .windows(ZIP_EOCD_SIGNATURE.len())
        .any(|window| window == ZIP_EOCD_SIGNATURE))
}

/// Output archive format, chosen from the output file's suffix chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    Zip,
}

impl ArchiveFormat {
    /// Recognize `.tar`, `.tar.gz`, `.tar.bz2` and `.zip` (case-insensitive)
    pub fn from_output_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".tar.gz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar.bz2") {
            Some(ArchiveFormat::TarBz2)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }

    /// Canonical suffix for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => ".tar",
            ArchiveFormat::TarGz => ".tar.gz",
            ArchiveFormat::TarBz2 => ".tar.bz2",
            ArchiveFormat::Zip => ".zip",
        }
    }
}

/// Pick the output format, rewriting unrecognized names to `.tar.gz`
pub fn resolve_output(path: &Path) -> (ArchiveFormat, PathBuf) {
    if let Some(format) = ArchiveFormat::from_output_path(path) {
        return (format, path.to_path_buf());
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let base = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name.as_str(),
    };
    let base = base.strip_suffix(".tar").unwrap_or(base);
    let rewritten = path.with_file_name(format!("{}{}", base, ArchiveFormat::TarGz.extension()));

    warn!(
        "Unsupported output archive suffix for {:?}, writing {:?} instead",
        path, rewritten
    );
    (ArchiveFormat::TarGz, rewritten)
}
