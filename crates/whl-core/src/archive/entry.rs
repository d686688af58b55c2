//! Entry model shared by the tar and zip readers

use crate::Result;
use std::io::Read;
use std::path::PathBuf;

/// Kind of an archive member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    RegularFile,
    Directory,
    Symlink,
    HardLink,
}

/// One member of an archive, as stored
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Raw member name, separators untouched
    pub name: String,
    /// Member path as the format library decoded it
    pub path: PathBuf,
    /// Member kind
    pub kind: EntryKind,
    /// Stored unix mode bits (if available)
    pub mode: Option<u32>,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Modification time (Unix timestamp)
    pub mtime: Option<u64>,
    /// Link target (symlinks and hard links)
    pub link_target: Option<PathBuf>,
}

impl ArchiveEntry {
    /// First normal component of the member path
    pub fn top_level(&self) -> Option<String> {
        self.path.components().find_map(|component| match component {
            std::path::Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
    }

    /// Number of normal components in the member path
    pub fn depth(&self) -> usize {
        self.path
            .components()
            .filter(|c| matches!(c, std::path::Component::Normal(_)))
            .count()
    }
}

/// Callback receiving each entry together with its content stream
pub type EntryVisitor<'v> = dyn FnMut(&ArchiveEntry, &mut dyn Read) -> Result<()> + 'v;

/// Sequential reader over the members of one archive.
///
/// Entries are visited in archive order. Read failures inside the archive
/// surface as [`crate::ArchiveError::CorruptArchive`]; errors returned by the
/// visitor are passed through untouched.
pub trait EntryReader {
    /// Visit every member in order
    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<()>;

    /// Get the format name for this reader
    fn format_name(&self) -> &'static str;
}
