//! whl-core - archive and artifact handling for deployment bundles
//!
//! This library unpacks and packs the archives that make up a deployment
//! bundle (source code, maps, models, caches) and fetches them from local
//! paths, HTTP(S)/FTP URLs or Git remotes.

pub mod archive;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod security;

pub use error::{ArchiveError, FetchError, Result};

// Re-export commonly used types
pub use archive::{
    compress, decompress, is_archive, ArchiveEngine, ArchiveFormat, ArchiveHandle, ArchiveKind,
    CompressOptions, DecompressOptions, ExtractReport,
};
pub use config::{ArchiveConfig, Config, FetchConfig};
pub use fetch::{Fetcher, SourceKind};
