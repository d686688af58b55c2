//! Deployment resources and where they live on a host

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use whl_core::archive::ArchiveKind;
use whl_core::fsutil::is_missing_or_empty;
use whl_core::{
    ArchiveEngine, ArchiveError, ArchiveHandle, CompressOptions, DecompressOptions, Fetcher,
};

/// Resource kinds that can be imported onto or exported from a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceKind {
    /// Source tree checked out under /opt
    SourceCode,
    /// HD map data, one directory per map
    Maps,
    /// Perception models, one directory per model
    Models,
    /// Bazel repository cache
    Cache,
}

/// Static defaults for one resource kind
#[derive(Debug)]
pub struct ResourceDefaults {
    pub kind: ResourceKind,
    /// Directory the resource's top-level directory lives in
    pub root: &'static str,
    /// Archive file name used by export when no output is given
    pub archive_name: &'static str,
    /// Fixed top-level name; `None` means `--name` is required
    pub top_level: Option<&'static str>,
}

const RESOURCES: &[ResourceDefaults] = &[
    ResourceDefaults {
        kind: ResourceKind::SourceCode,
        root: "/opt",
        archive_name: "apollo_source_code.tar.gz",
        top_level: Some("apollo"),
    },
    ResourceDefaults {
        kind: ResourceKind::Maps,
        root: "modules/map/data",
        archive_name: "map_data.tar.gz",
        top_level: None,
    },
    ResourceDefaults {
        kind: ResourceKind::Models,
        root: "modules/perception/production/data/perception",
        archive_name: "model_data.tar.gz",
        top_level: None,
    },
    ResourceDefaults {
        kind: ResourceKind::Cache,
        root: "/var/cache/bazel",
        archive_name: "bazel_repo_cache.tar.gz",
        top_level: Some("repo_cache"),
    },
];

impl ResourceKind {
    pub fn defaults(self) -> &'static ResourceDefaults {
        match self {
            ResourceKind::SourceCode => &RESOURCES[0],
            ResourceKind::Maps => &RESOURCES[1],
            ResourceKind::Models => &RESOURCES[2],
            ResourceKind::Cache => &RESOURCES[3],
        }
    }
}

/// Where a resource lives once `--name` and `--root` are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocation {
    pub root: PathBuf,
    pub name: String,
}

impl ResourceLocation {
    pub fn resolve(kind: ResourceKind, name: Option<&str>, root: Option<&Path>) -> Result<Self> {
        let defaults = kind.defaults();
        let name = match (name, defaults.top_level) {
            (Some(name), _) => name.to_string(),
            (None, Some(default)) => default.to_string(),
            (None, None) => bail!("--name is required for {:?} resources", kind),
        };
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            bail!("invalid resource name '{}'", name);
        }
        let root = root.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(defaults.root));
        Ok(Self { root, name })
    }

    pub fn target(&self) -> PathBuf {
        self.root.join(&self.name)
    }
}

/// Fetch `source` and unpack it to the resource location, returning the
/// final directory.
///
/// With `force`, existing content is removed only once the source has been
/// fetched and read successfully.
pub fn import(
    engine: &ArchiveEngine,
    fetcher: &mut Fetcher,
    location: &ResourceLocation,
    source: &str,
    force: bool,
) -> Result<PathBuf> {
    let target = location.target();
    let occupied = !is_missing_or_empty(&target)?;
    if occupied && !force {
        bail!(
            "{:?} already exists and is not empty; use --force to replace it",
            target
        );
    }

    let result = unpack_into(engine, fetcher, location, source, occupied);
    fetcher.cleanup_temp_directories();
    result
}

fn unpack_into(
    engine: &ArchiveEngine,
    fetcher: &mut Fetcher,
    location: &ResourceLocation,
    source: &str,
    replace: bool,
) -> Result<PathBuf> {
    let local = fetcher.fetch(source, None)?;
    let handle = ArchiveHandle::open(&local)?;
    let target = location.target();

    // Archives without one top-level directory go straight into the target
    let single_root = match handle.kind() {
        ArchiveKind::Unknown => return Err(ArchiveError::UnsupportedFormat(local).into()),
        ArchiveKind::PlainDirectory => true,
        _ => handle.single_root_dir()?.is_some(),
    };

    if replace {
        warn!("Removing existing content at {:?}", target);
        fs::remove_dir_all(&target).with_context(|| format!("removing {:?}", target))?;
    }

    if single_root {
        let options = DecompressOptions {
            target_top_level_name: Some(location.name.clone()),
            strip_single_root: true,
            ..Default::default()
        };
        engine.decompress(&local, &location.root, &options)?;
    } else {
        engine.decompress(&local, &target, &DecompressOptions::default())?;
    }

    info!("Imported {:?} into {:?}", source, target);
    Ok(target)
}

/// Pack the resource directory into `output`, returning the written path
pub fn export(
    engine: &ArchiveEngine,
    kind: ResourceKind,
    location: &ResourceLocation,
    output: Option<&Path>,
) -> Result<PathBuf> {
    let source = location.target();
    if is_missing_or_empty(&source)? {
        bail!("{:?} does not exist or is empty; nothing to export", source);
    }

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(kind.defaults().archive_name));
    let written = engine.compress(&source, &output, &CompressOptions::default())?;
    info!("Exported {:?} to {:?}", source, written);
    Ok(written)
}
