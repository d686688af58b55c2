//! whl-deploy - Command-line interface for host setup and artifact deployment
//!
//! Thin surface over whl-core:
//! - Unpacking local or remote archives into deployment directories
//! - Packing directories into tar/zip bundles
//! - Fetching artifacts from URLs and git remotes
//! - Importing and exporting well-known host resources

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use whl_core::config::ConfigError;
use whl_core::error::{ArchiveError, FetchError};
use whl_core::{ArchiveEngine, CompressOptions, Config, DecompressOptions, Fetcher, SourceKind};

mod resources;

use resources::{ResourceKind, ResourceLocation};

/// whl-deploy - Deploy source code, maps, models and caches onto a host
#[derive(Parser)]
#[command(name = "whl-deploy")]
#[command(author, version, about = "Host setup and artifact deployment tool", long_about = None)]
struct Cli {
    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Configuration file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a source and unpack it into a directory
    Unpack {
        /// Local path, URL or git remote
        source: String,

        /// Destination directory
        dest: PathBuf,

        /// Only extract members whose name contains this string
        #[arg(long)]
        filter: Option<String>,

        /// Rename the extracted top-level directory
        #[arg(long)]
        rename_to: Option<String>,

        /// Strip this leading path from member names
        #[arg(long)]
        strip_prefix: Option<PathBuf>,

        /// Strip the archive's single top-level directory
        #[arg(long)]
        flatten: bool,
    },

    /// Pack a file or directory into an archive
    Pack {
        /// Input file or directory
        source: PathBuf,

        /// Output archive (.tar, .tar.gz, .tar.bz2, .zip; anything else becomes .tar.gz)
        output: PathBuf,

        /// Name of the root entry inside the archive
        #[arg(long)]
        root_name: Option<String>,

        /// Store member names relative to this ancestor of the input
        #[arg(long)]
        strip_prefix: Option<PathBuf>,
    },

    /// Resolve a source to a local path
    Fetch {
        /// Local path, URL or git remote
        source: String,

        /// Directory to download or clone into (required for remote sources)
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Import a resource onto this host
    Import {
        #[arg(value_enum)]
        kind: ResourceKind,

        /// Local path, URL or git remote of the resource archive
        source: String,

        /// Resource name (map or model name)
        #[arg(long)]
        name: Option<String>,

        /// Override the directory the resource is installed under
        #[arg(long)]
        root: Option<PathBuf>,

        /// Replace an existing non-empty resource
        #[arg(long)]
        force: bool,
    },

    /// Export a resource from this host
    Export {
        #[arg(value_enum)]
        kind: ResourceKind,

        /// Resource name (map or model name)
        #[arg(long)]
        name: Option<String>,

        /// Override the directory the resource is installed under
        #[arg(long)]
        root: Option<PathBuf>,

        /// Output archive path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show configuration
    Config {
        /// Show current configuration
        #[arg(long, conflicts_with = "path")]
        show: bool,

        /// Show configuration file path
        #[arg(long, conflicts_with = "show")]
        path: bool,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    let quiet = cli.quiet;
    setup_logging(cli.verbose, quiet);

    if let Err(e) = run(cli) {
        if quiet {
            eprintln!("Error: {:#}", e);
        } else {
            error!("Error: {:#}", e);
        }
        process::exit(map_error_to_exit_code(&e));
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load_from(path)?),
        None => Ok(Config::load_or_default()),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let engine = ArchiveEngine::new(config.archive.clone());
    let mut fetch_config = config.fetch.clone();
    if cli.quiet {
        fetch_config.show_progress = false;
    }

    match cli.command {
        Commands::Unpack {
            source,
            dest,
            filter,
            rename_to,
            strip_prefix,
            flatten,
        } => {
            let options = DecompressOptions {
                member_filter: filter,
                target_top_level_name: rename_to,
                strip_prefix,
                strip_single_root: flatten,
            };

            let mut fetcher = Fetcher::new(fetch_config);
            let result = fetcher
                .fetch(&source, None)
                .map_err(anyhow::Error::from)
                .and_then(|local| Ok(engine.decompress(&local, &dest, &options)?));
            fetcher.cleanup_temp_directories();
            let report = result?;

            if !report.skipped_unsafe.is_empty() {
                info!("Skipped unsafe members: {:?}", report.skipped_unsafe);
            }
            let location = report.renamed_root.unwrap_or(dest);
            println!("{}", location.display());
        }

        Commands::Pack {
            source,
            output,
            root_name,
            strip_prefix,
        } => {
            let options = CompressOptions {
                archive_root_name: root_name,
                strip_prefix,
            };
            let written = engine.compress(&source, &output, &options)?;
            println!("{}", written.display());
        }

        Commands::Fetch { source, dest } => {
            if dest.is_none() && SourceKind::classify(&source) != SourceKind::Local {
                bail!("--dest is required when fetching a remote source");
            }
            let mut fetcher = Fetcher::new(fetch_config);
            let path = fetcher.fetch(&source, dest.as_deref())?;
            println!("{}", path.display());
        }

        Commands::Import {
            kind,
            source,
            name,
            root,
            force,
        } => {
            let location = ResourceLocation::resolve(kind, name.as_deref(), root.as_deref())?;
            let mut fetcher = Fetcher::new(fetch_config);
            let target = resources::import(&engine, &mut fetcher, &location, &source, force)?;
            println!("{}", target.display());
        }

        Commands::Export {
            kind,
            name,
            root,
            output,
        } => {
            let location = ResourceLocation::resolve(kind, name.as_deref(), root.as_deref())?;
            let written = resources::export(&engine, kind, &location, output.as_deref())?;
            println!("{}", written.display());
        }

        Commands::Config { show, path } => {
            if path {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::config_path()?,
                };
                println!("{}", path.display());
            } else if show {
                let rendered =
                    toml::to_string_pretty(&config).context("rendering configuration")?;
                print!("{}", rendered);
            } else {
                bail!("config needs --show or --path");
            }
        }
    }

    Ok(())
}

/// Map errors to exit codes:
/// 1 usage/config, 2 not found/network/filesystem,
/// 3 unsupported/invalid/ambiguous, 4 corrupt, 5 missing tool
fn map_error_to_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(archive_err) = err.downcast_ref::<ArchiveError>() {
        match archive_err {
            ArchiveError::NotFound(_) => 2,
            ArchiveError::Filesystem { .. } => 2,
            ArchiveError::UnsupportedFormat(_) => 3,
            ArchiveError::InvalidPath(_) => 3,
            ArchiveError::AmbiguousTopLevel { .. } => 3,
            ArchiveError::CorruptArchive { .. } => 4,
        }
    } else if let Some(fetch_err) = err.downcast_ref::<FetchError>() {
        match fetch_err {
            FetchError::NotFound(_) => 2,
            FetchError::Network { .. } => 2,
            FetchError::Filesystem { .. } => 2,
            FetchError::ToolMissing(_) => 5,
        }
    } else if err.is::<ConfigError>() {
        1
    } else if err.is::<std::io::Error>() {
        2
    } else {
        1
    }
}
