//! Extraction planning: where each archive member lands

use super::DecompressOptions;
use crate::error::{ArchiveError, Result};
use crate::security::{normalize_relative, validate_entry_path, validate_member_name, UnsafePath};
use std::path::{Component, Path, PathBuf};

/// What to do with a single member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDecision {
    /// Write the member at this path relative to the extraction root
    Extract(PathBuf),
    /// Member did not match the member filter
    Filtered,
    /// Member is the stripped prefix itself (or `./`); nothing to write
    Root,
    /// Member path is unsafe and must be skipped
    Unsafe(UnsafePath),
}

/// Destination layout for one decompress call
#[derive(Debug, Clone)]
pub struct ExtractionPlan {
    destination: PathBuf,
    extract_root: PathBuf,
    strip_prefix: Option<PathBuf>,
    member_filter: Option<String>,
    rename_to: Option<String>,
}

impl ExtractionPlan {
    /// Plan an archive extraction.
    ///
    /// `detected_root` is the archive's single top-level directory, only
    /// supplied when the caller asked for it to be flattened. Flattening with a
    /// target name writes straight into `destination/target` and skips the
    /// rename phase.
    pub fn for_archive(
        destination: &Path,
        options: &DecompressOptions,
        detected_root: Option<String>,
    ) -> Result<Self> {
        let rename_to = validated_target(options.target_top_level_name.as_deref())?;
        let explicit_strip = validated_prefix(options.strip_prefix.as_deref())?;

        let (strip_prefix, extract_root, rename_to) = match (explicit_strip, detected_root) {
            (Some(prefix), _) => (Some(prefix), destination.to_path_buf(), rename_to),
            (None, Some(root)) => match rename_to {
                Some(target) => (Some(PathBuf::from(root)), destination.join(target), None),
                None => (Some(PathBuf::from(root)), destination.to_path_buf(), None),
            },
            (None, None) => (None, destination.to_path_buf(), rename_to),
        };

        Ok(Self {
            destination: destination.to_path_buf(),
            extract_root,
            strip_prefix,
            member_filter: options.member_filter.clone(),
            rename_to,
        })
    }

    /// Plan a plain directory copy: the target name becomes a subdirectory
    pub fn for_directory(destination: &Path, options: &DecompressOptions) -> Result<Self> {
        let target = validated_target(options.target_top_level_name.as_deref())?;
        let extract_root = match &target {
            Some(name) => destination.join(name),
            None => destination.to_path_buf(),
        };

        Ok(Self {
            destination: destination.to_path_buf(),
            extract_root,
            strip_prefix: validated_prefix(options.strip_prefix.as_deref())?,
            member_filter: options.member_filter.clone(),
            rename_to: None,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Directory that member paths are joined onto
    pub fn extract_root(&self) -> &Path {
        &self.extract_root
    }

    /// Top-level name to rename the single extracted directory to
    pub fn rename_to(&self) -> Option<&str> {
        self.rename_to.as_deref()
    }

    /// Decide where a member goes
    pub fn decide(&self, name: &str, path: &Path) -> EntryDecision {
        if let Err(reason) = validate_member_name(name).and_then(|_| validate_entry_path(path)) {
            return EntryDecision::Unsafe(reason);
        }
        if let Some(filter) = &self.member_filter {
            if !name.contains(filter.as_str()) {
                return EntryDecision::Filtered;
            }
        }

        match self.relocate(&normalize_relative(path)) {
            Some(relative) => EntryDecision::Extract(relative),
            None => EntryDecision::Root,
        }
    }

    /// Map a hard link's stored target the same way its member paths are mapped
    pub fn map_link_target(&self, target: &Path) -> Option<PathBuf> {
        validate_entry_path(target).ok()?;
        self.relocate(&normalize_relative(target))
    }

    fn relocate(&self, relative: &Path) -> Option<PathBuf> {
        let relative = match &self.strip_prefix {
            Some(prefix) => relative.strip_prefix(prefix).unwrap_or(relative),
            None => relative,
        };
        if relative.as_os_str().is_empty() {
            None
        } else {
            Some(relative.to_path_buf())
        }
    }
}

fn validated_target(target: Option<&str>) -> Result<Option<String>> {
    let Some(target) = target else {
        return Ok(None);
    };
    let mut components = Path::new(target).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !target.contains(['/', '\\']) => {
            Ok(Some(target.to_string()))
        }
        _ => Err(ArchiveError::InvalidPath(format!(
            "target top-level name must be a single path component, got '{}'",
            target
        ))),
    }
}

fn validated_prefix(prefix: Option<&Path>) -> Result<Option<PathBuf>> {
    let Some(prefix) = prefix else {
        return Ok(None);
    };
    validate_entry_path(prefix).map_err(|reason| {
        ArchiveError::InvalidPath(format!("strip prefix {:?}: {}", prefix, reason))
    })?;
    let normalized = normalize_relative(prefix);
    Ok((!normalized.as_os_str().is_empty()).then_some(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> DecompressOptions {
        DecompressOptions::default()
    }

    #[test]
    fn test_plain_plan_keeps_paths() {
        let plan = ExtractionPlan::for_archive(Path::new("/dst"), &options(), None).unwrap();
        assert_eq!(plan.extract_root(), Path::new("/dst"));
        assert_eq!(
            plan.decide("./apollo/README", Path::new("./apollo/README")),
            EntryDecision::Extract(PathBuf::from("apollo/README"))
        );
        assert_eq!(plan.decide("./", Path::new("./")), EntryDecision::Root);
    }

    #[test]
    fn test_unsafe_members_rejected() {
        let plan = ExtractionPlan::for_archive(Path::new("/dst"), &options(), None).unwrap();
        assert_eq!(
            plan.decide("../../etc/passwd", Path::new("../../etc/passwd")),
            EntryDecision::Unsafe(UnsafePath::ParentTraversal)
        );
        assert_eq!(
            plan.decide("/etc/passwd", Path::new("/etc/passwd")),
            EntryDecision::Unsafe(UnsafePath::Absolute)
        );
    }

    #[test]
    fn test_filter_matches_substring() {
        let opts = DecompressOptions {
            member_filter: Some("src/".to_string()),
            ..options()
        };
        let plan = ExtractionPlan::for_archive(Path::new("/dst"), &opts, None).unwrap();
        assert!(matches!(
            plan.decide("apollo/src/main.cc", Path::new("apollo/src/main.cc")),
            EntryDecision::Extract(_)
        ));
        assert_eq!(
            plan.decide("apollo/README", Path::new("apollo/README")),
            EntryDecision::Filtered
        );
    }

    #[test]
    fn test_explicit_strip_prefix() {
        let opts = DecompressOptions {
            strip_prefix: Some(PathBuf::from("apollo-v1")),
            ..options()
        };
        let plan = ExtractionPlan::for_archive(Path::new("/dst"), &opts, None).unwrap();
        assert_eq!(
            plan.decide("apollo-v1/src/a.cc", Path::new("apollo-v1/src/a.cc")),
            EntryDecision::Extract(PathBuf::from("src/a.cc"))
        );
        assert_eq!(
            plan.decide("other/b.cc", Path::new("other/b.cc")),
            EntryDecision::Extract(PathBuf::from("other/b.cc"))
        );
        assert_eq!(
            plan.decide("apollo-v1/", Path::new("apollo-v1/")),
            EntryDecision::Root
        );
        // Component-wise, not textual
        assert_eq!(
            plan.decide("apollo-v10/x", Path::new("apollo-v10/x")),
            EntryDecision::Extract(PathBuf::from("apollo-v10/x"))
        );
    }

    #[test]
    fn test_flatten_with_target_writes_into_target() {
        let opts = DecompressOptions {
            target_top_level_name: Some("apollo".to_string()),
            strip_single_root: true,
            ..options()
        };
        let plan =
            ExtractionPlan::for_archive(Path::new("/dst"), &opts, Some("apollo-v1".to_string()))
                .unwrap();
        assert_eq!(plan.extract_root(), Path::new("/dst/apollo"));
        assert_eq!(plan.rename_to(), None);
        assert_eq!(
            plan.map_link_target(Path::new("apollo-v1/bin/tool")),
            Some(PathBuf::from("bin/tool"))
        );
    }

    #[test]
    fn test_rename_target_validated() {
        for bad in ["", "a/b", "..", "/abs", "a\\b"] {
            let opts = DecompressOptions {
                target_top_level_name: Some(bad.to_string()),
                ..options()
            };
            assert!(
                matches!(
                    ExtractionPlan::for_archive(Path::new("/dst"), &opts, None),
                    Err(ArchiveError::InvalidPath(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_directory_plan_uses_target_subdir() {
        let opts = DecompressOptions {
            target_top_level_name: Some("maps".to_string()),
            ..options()
        };
        let plan = ExtractionPlan::for_directory(Path::new("/dst"), &opts).unwrap();
        assert_eq!(plan.extract_root(), Path::new("/dst/maps"));
        assert_eq!(plan.rename_to(), None);
    }
}
