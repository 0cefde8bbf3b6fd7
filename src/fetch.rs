// src/fetch.rs

//! Content fetching: registry download into a scratch directory
//!
//! The fetcher only decides which download variant to call, stages the result
//! in a temporary directory and enumerates what arrived. Installing the files
//! is the installer's job; the scratch directory lives exactly as long as the
//! returned [`FetchedContent`].

use crate::error::{Error, Result};
use crate::registry::RegistryHandle;
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Keep the paths matching at least one glob pattern
///
/// Paths are `/`-separated and relative to the ruleset root. `*` stays within
/// one path segment; `**` crosses segments. No patterns means every path.
pub fn filter_paths(patterns: &[String], paths: &[String]) -> Result<Vec<String>> {
    if patterns.is_empty() {
        return Ok(paths.to_vec());
    }

    let compiled = patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| Error::ParseError(format!("Invalid pattern '{p}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(paths
        .iter()
        .filter(|path| {
            compiled
                .iter()
                .any(|pattern| pattern.matches_with(path, MATCH_OPTIONS))
        })
        .cloned()
        .collect())
}

/// Files staged for one ruleset version
///
/// Owns the scratch directory; dropping this removes it.
#[derive(Debug)]
pub struct FetchedContent {
    scratch: TempDir,
    files: Vec<PathBuf>,
}

impl FetchedContent {
    /// Download root all files live under
    pub fn root(&self) -> &Path {
        self.scratch.path()
    }

    /// Absolute paths of every staged file, sorted
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Stages registry downloads into scratch directories
#[derive(Debug, Clone, Default)]
pub struct ContentFetcher {
    scratch_parent: Option<PathBuf>,
}

impl ContentFetcher {
    /// Fetcher using the system temp directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create scratch directories under `dir` instead of the system temp dir
    pub fn with_scratch_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_parent: Some(dir.into()),
        }
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("arm-fetch-");

        match &self.scratch_parent {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| Error::io("creating scratch directory", e))
    }

    /// Download `ruleset@version` and enumerate the staged files
    pub async fn fetch(
        &self,
        registry: &RegistryHandle,
        ruleset: &str,
        version: &str,
        patterns: &[String],
        cancel: &CancellationToken,
    ) -> Result<FetchedContent> {
        let scratch = self.scratch_dir()?;
        let dest = scratch.path();

        let filter_locally = !patterns.is_empty() && !registry.supports_patterns();
        if !patterns.is_empty() && registry.supports_patterns() {
            registry
                .registry()
                .download_ruleset_with_patterns(cancel, ruleset, version, dest, patterns)
                .await?;
        } else {
            registry
                .registry()
                .download_ruleset(cancel, ruleset, version, dest)
                .await?;
        }

        let mut files = list_files(dest)?;
        if filter_locally {
            files = retain_matching(dest, files, patterns)?;
        }

        if files.is_empty() {
            return Err(Error::NotFound(format!(
                "no files for {}@{} in registry '{}'",
                ruleset,
                version,
                registry.name()
            )));
        }

        info!(
            "Fetched {}@{} from {} ({} files)",
            ruleset,
            version,
            registry.name(),
            files.len()
        );
        Ok(FetchedContent { scratch, files })
    }
}

fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::IoError(format!("walking {}: {e}", root.display())))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Apply patterns after a full download, deleting what they exclude
fn retain_matching(root: &Path, files: Vec<PathBuf>, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let relative = files
        .iter()
        .filter_map(|f| f.strip_prefix(root).ok())
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .collect::<Vec<_>>();
    let keep = filter_paths(patterns, &relative)?;

    let mut kept = Vec::with_capacity(keep.len());
    for (file, rel) in files.into_iter().zip(relative) {
        if keep.contains(&rel) {
            kept.push(file);
        } else {
            fs::remove_file(&file)
                .map_err(|e| Error::io(format!("removing {}", file.display()), e))?;
        }
    }

    debug!("Pattern filter kept {} files", kept.len());
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    /// Writes a fixed tree and records which variant was called
    struct FixtureRegistry {
        patterns: bool,
        used_patterns: AtomicBool,
    }

    impl FixtureRegistry {
        fn write_tree(dest: &Path) {
            for file in ["rules/python.md", "rules/extra/style.md", "README.txt"] {
                let path = dest.join(file);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, file).unwrap();
            }
        }
    }

    #[async_trait]
    impl Registry for FixtureRegistry {
        fn name(&self) -> &str {
            "fixture"
        }

        fn supports_patterns(&self) -> bool {
            self.patterns
        }

        async fn download_ruleset(
            &self,
            _cancel: &CancellationToken,
            _ruleset: &str,
            _version: &str,
            dest: &Path,
        ) -> Result<()> {
            Self::write_tree(dest);
            Ok(())
        }

        async fn download_ruleset_with_patterns(
            &self,
            _cancel: &CancellationToken,
            _ruleset: &str,
            _version: &str,
            dest: &Path,
            _patterns: &[String],
        ) -> Result<()> {
            self.used_patterns.store(true, Ordering::SeqCst);
            let path = dest.join("rules/python.md");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "filtered").unwrap();
            Ok(())
        }
    }

    fn handle(patterns: bool) -> (Arc<FixtureRegistry>, RegistryHandle) {
        let registry = Arc::new(FixtureRegistry {
            patterns,
            used_patterns: AtomicBool::new(false),
        });
        let handle = RegistryHandle::new(registry.clone());
        (registry, handle)
    }

    #[test]
    fn test_filter_paths() {
        let paths = strings(&["rules/python.md", "rules/extra/style.md", "README.txt"]);

        assert_eq!(filter_paths(&[], &paths).unwrap(), paths);
        assert_eq!(
            filter_paths(&strings(&["rules/*.md"]), &paths).unwrap(),
            strings(&["rules/python.md"])
        );
        assert_eq!(
            filter_paths(&strings(&["rules/**/*.md"]), &paths).unwrap(),
            strings(&["rules/python.md", "rules/extra/style.md"])
        );
        assert_eq!(
            filter_paths(&strings(&["*.txt", "rules/extra/*"]), &paths).unwrap(),
            strings(&["rules/extra/style.md", "README.txt"])
        );
        assert!(filter_paths(&strings(&["rules/[.md"]), &paths).is_err());
    }

    #[tokio::test]
    async fn test_fetch_uses_pattern_download_when_supported() {
        let scratch_parent = TempDir::new().unwrap();
        let fetcher = ContentFetcher::with_scratch_dir(scratch_parent.path());
        let (registry, handle) = handle(true);

        let content = fetcher
            .fetch(&handle, "rules", "1.0.0", &strings(&["rules/*.md"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(registry.used_patterns.load(Ordering::SeqCst));
        assert_eq!(content.len(), 1);
        assert!(content.files()[0].starts_with(content.root()));
    }

    #[tokio::test]
    async fn test_fetch_filters_locally_without_support() {
        let scratch_parent = TempDir::new().unwrap();
        let fetcher = ContentFetcher::with_scratch_dir(scratch_parent.path());
        let (registry, handle) = handle(false);

        let content = fetcher
            .fetch(&handle, "rules", "1.0.0", &strings(&["rules/**/*.md"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!registry.used_patterns.load(Ordering::SeqCst));
        assert_eq!(content.len(), 2);
        assert!(!content.root().join("README.txt").exists());
    }

    #[tokio::test]
    async fn test_scratch_removed_on_drop_and_failure() {
        let scratch_parent = TempDir::new().unwrap();
        let fetcher = ContentFetcher::with_scratch_dir(scratch_parent.path());
        let (_registry, handle) = handle(false);

        let content = fetcher
            .fetch(&handle, "rules", "1.0.0", &[], &CancellationToken::new())
            .await
            .unwrap();
        let root = content.root().to_path_buf();
        assert_eq!(content.len(), 3);
        drop(content);
        assert!(!root.exists());

        // Nothing matches: error, and no scratch directory left behind
        let result = fetcher
            .fetch(&handle, "rules", "1.0.0", &strings(&["*.json"]), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(fs::read_dir(scratch_parent.path()).unwrap().count(), 0);
    }
}
