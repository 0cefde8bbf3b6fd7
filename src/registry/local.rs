// src/registry/local.rs

//! Registry backed by a local directory
//!
//! Layout: `<root>/<ruleset>/<version>/<files...>`. Version directories are
//! matched against constraints with semver; directory names that are not
//! valid versions can still be installed by exact name.

use super::Registry;
use crate::error::{Error, Result};
use crate::fetch::filter_paths;
use async_trait::async_trait;
use semver::{Version, VersionReq};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

pub struct LocalRegistry {
    name: String,
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version directory names available for a ruleset
    pub fn list_versions(&self, ruleset: &str) -> Result<Vec<String>> {
        let ruleset_dir = self.root.join(ruleset);
        let entries = fs::read_dir(&ruleset_dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("ruleset '{}' in registry '{}'", ruleset, self.name))
            } else {
                Error::io(format!("listing {}", ruleset_dir.display()), e)
            }
        })?;

        let listing_error =
            |e: std::io::Error| Error::io(format!("listing {}", ruleset_dir.display()), e);
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(listing_error)?;
            if entry.file_type().map_err(listing_error)?.is_dir()
                && let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                versions.push(name.to_string());
            }
        }

        versions.sort();
        Ok(versions)
    }

    fn version_dir(&self, ruleset: &str, version: &str) -> Result<PathBuf> {
        let dir = self.root.join(ruleset).join(version);
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "{}@{} in registry '{}'",
                ruleset, version, self.name
            )));
        }
        Ok(dir)
    }

    async fn copy_version(
        &self,
        cancel: &CancellationToken,
        ruleset: &str,
        version: &str,
        dest: &Path,
        patterns: &[String],
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let source = self.version_dir(ruleset, version)?;
        let dest = dest.to_path_buf();
        let patterns = patterns.to_vec();

        tokio::task::spawn_blocking(move || copy_tree(&source, &dest, &patterns))
            .await
            .map_err(|e| Error::DownloadError(format!("copy worker failed: {e}")))?
    }
}

/// Pick the version to install for a constraint
///
/// An exact directory name wins; `latest` (or `*`) picks the highest
/// semver; anything else is parsed as a semver requirement.
fn select_version(available: &[String], constraint: &str) -> Result<Option<String>> {
    if available.iter().any(|v| v == constraint) {
        return Ok(Some(constraint.to_string()));
    }

    let parsed = available
        .iter()
        .filter_map(|name| {
            Version::parse(name.trim_start_matches('v'))
                .ok()
                .map(|version| (version, name))
        })
        .collect::<Vec<_>>();

    let req = match constraint.trim() {
        "latest" | "*" | "" => VersionReq::STAR,
        other => VersionReq::parse(other.trim_start_matches('v')).map_err(|e| {
            Error::ParseError(format!("Invalid version constraint '{constraint}': {e}"))
        })?,
    };

    Ok(parsed
        .into_iter()
        .filter(|(version, _)| req.matches(version))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, name)| name.clone()))
}

/// Copy every file below `source` into `dest`, keeping relative paths
fn copy_tree(source: &Path, dest: &Path, patterns: &[String]) -> Result<()> {
    let mut relative_paths = Vec::new();
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::IoError(format!("walking {}: {e}", source.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(source) {
            relative_paths.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }

    let selected = filter_paths(patterns, &relative_paths)?;
    for relative in &selected {
        let from = source.join(relative);
        let to = dest.join(relative);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        }
        fs::copy(&from, &to).map_err(|e| Error::io(format!("copying {}", from.display()), e))?;
    }

    debug!(
        "Copied {}/{} files from {}",
        selected.len(),
        relative_paths.len(),
        source.display()
    );
    Ok(())
}

#[async_trait]
impl Registry for LocalRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_patterns(&self) -> bool {
        true
    }

    async fn resolve_version(&self, ruleset: &str, constraint: &str) -> Result<String> {
        let available = self.list_versions(ruleset)?;
        select_version(&available, constraint)?.ok_or_else(|| {
            Error::NotFound(format!(
                "no version of '{}' in registry '{}' matches '{}'",
                ruleset, self.name, constraint
            ))
        })
    }

    async fn download_ruleset(
        &self,
        cancel: &CancellationToken,
        ruleset: &str,
        version: &str,
        dest: &Path,
    ) -> Result<()> {
        self.copy_version(cancel, ruleset, version, dest, &[]).await
    }

    async fn download_ruleset_with_patterns(
        &self,
        cancel: &CancellationToken,
        ruleset: &str,
        version: &str,
        dest: &Path,
        patterns: &[String],
    ) -> Result<()> {
        self.copy_version(cancel, ruleset, version, dest, patterns).await
    }
}
