// src/install/deployer.rs

//! Namespaced file deployment into channel directories
//!
//! Layout: `<channel-dir>/arm/<registry>/<ruleset>/<version>/<relative-path>`.
//!
//! A version is first copied into a hidden staging directory next to its
//! final location and only renamed into place by [`StagedVersion::commit`].
//! A staged version that is dropped without being committed removes itself,
//! so a failed multi-channel install leaves every channel as it was.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory under each channel directory that holds managed rulesets
pub const NAMESPACE_DIR: &str = "arm";

/// Mode of every deployed file (owner rw, group/other r)
pub const FILE_MODE: u32 = 0o644;

/// A source file and where it lands below the version directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceFile {
    pub source: PathBuf,
    pub relative: PathBuf,
}

/// Work out the deploy-relative path of every source file
///
/// With a `root`, paths below it are kept as-is. Without one, relative
/// sources drop their first component (the download directory) and absolute
/// sources keep only their file name.
pub(crate) fn plan_sources(files: &[PathBuf], root: Option<&Path>) -> Result<Vec<SourceFile>> {
    files
        .iter()
        .map(|file| -> Result<SourceFile> {
            let (source, relative) = match root {
                Some(root) => {
                    let source = if file.is_absolute() || file.starts_with(root) {
                        file.clone()
                    } else {
                        root.join(file)
                    };
                    let relative = source.strip_prefix(root).map_err(|_| {
                        Error::InvalidRequest(format!(
                            "source file {} is outside source root {}",
                            file.display(),
                            root.display()
                        ))
                    })?;
                    let relative = relative.to_path_buf();
                    (source, relative)
                }
                None if file.is_absolute() => {
                    let name = file.file_name().ok_or_else(|| {
                        Error::InvalidRequest(format!("source file {} has no file name", file.display()))
                    })?;
                    (file.clone(), PathBuf::from(name))
                }
                None => {
                    let mut components = file
                        .components()
                        .filter(|c| !matches!(c, Component::CurDir))
                        .collect::<Vec<_>>();
                    if components.len() > 1 {
                        components.remove(0);
                    }
                    (file.clone(), components.iter().collect())
                }
            };

            Ok(SourceFile {
                source,
                relative: normalize_relative(&relative)?,
            })
        })
        .collect()
}

/// Reduce a path to its normal components, rejecting `..`
fn normalize_relative(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                warn!("Path traversal attempt detected: {}", path.display());
                return Err(Error::InvalidRequest(format!(
                    "source path escapes the ruleset: {}",
                    path.display()
                )));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidRequest(format!(
            "empty destination path for source {}",
            path.display()
        )));
    }
    Ok(normalized)
}

/// `<dir>/arm/<registry>/<ruleset>`
pub(crate) fn ruleset_path(dir: &Path, registry: &str, ruleset: &str) -> PathBuf {
    dir.join(NAMESPACE_DIR).join(registry).join(ruleset)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Missing directories between `dir` and the filesystem root, deepest first
fn missing_ancestors(dir: &Path) -> Vec<PathBuf> {
    dir.ancestors()
        .take_while(|path| !path.as_os_str().is_empty() && !path.exists())
        .map(Path::to_path_buf)
        .collect()
}

/// Remove directories created for a stage that never landed
///
/// Stops at the first directory that is no longer empty.
fn prune_created(created: &[PathBuf]) {
    for dir in created {
        match fs::remove_dir(dir) {
            Ok(()) => debug!("Removed {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                debug!("Leaving {}: {}", dir.display(), e);
                return;
            }
        }
    }
}

/// A fully copied version waiting to be renamed into place
#[derive(Debug)]
pub(crate) struct StagedVersion {
    staging: PathBuf,
    target: PathBuf,
    /// Directories created to hold the stage, deepest first
    created: Vec<PathBuf>,
    committed: bool,
}

impl StagedVersion {
    /// Replace the version directory with the staged copy
    pub fn commit(mut self) -> Result<PathBuf> {
        if let Ok(meta) = fs::symlink_metadata(&self.target) {
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&self.target)
            } else {
                fs::remove_file(&self.target)
            };
            removed.map_err(|e| Error::io(format!("replacing {}", self.target.display()), e))?;
        }

        fs::rename(&self.staging, &self.target).map_err(|e| {
            Error::io(
                format!(
                    "moving {} to {}",
                    self.staging.display(),
                    self.target.display()
                ),
                e,
            )
        })?;
        self.committed = true;

        Ok(self.target.clone())
    }
}

impl Drop for StagedVersion {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_dir_all(&self.staging) {
            Ok(()) => debug!("Discarded staged copy {}", self.staging.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove staging directory {}: {}",
                self.staging.display(),
                e
            ),
        }
        prune_created(&self.created);
    }
}

/// Copies rulesets into channel directories and removes them again
#[derive(Debug, Clone)]
pub(crate) struct FileDeployer {
    file_mode: u32,
}

impl Default for FileDeployer {
    fn default() -> Self {
        Self {
            file_mode: FILE_MODE,
        }
    }
}

impl FileDeployer {
    /// Copy `sources` into a staging directory beside the version directory
    pub fn stage(
        &self,
        dir: &Path,
        registry: &str,
        ruleset: &str,
        version: &str,
        sources: &[SourceFile],
    ) -> Result<StagedVersion> {
        let ruleset_dir = ruleset_path(dir, registry, ruleset);
        let created = missing_ancestors(&ruleset_dir);
        if let Err(e) = fs::create_dir_all(&ruleset_dir) {
            prune_created(&created);
            return Err(Error::io(format!("creating {}", ruleset_dir.display()), e));
        }

        let staging = ruleset_dir.join(format!(".{}.staging-{}", version, uuid::Uuid::new_v4()));
        if let Err(e) = fs::create_dir(&staging) {
            prune_created(&created);
            return Err(Error::io(format!("creating {}", staging.display()), e));
        }

        // From here on the guard undoes the stage on any error
        let staged = StagedVersion {
            staging,
            target: ruleset_dir.join(version),
            created,
            committed: false,
        };

        for file in sources {
            self.copy_file(&file.source, &staged.staging.join(&file.relative))?;
        }

        debug!(
            "Staged {} files for {}/{}@{} in {}",
            sources.len(),
            registry,
            ruleset,
            version,
            dir.display()
        );
        Ok(staged)
    }

    fn copy_file(&self, source: &Path, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        }

        fs::copy(source, target).map_err(|e| {
            Error::io(
                format!("copying {} to {}", source.display(), target.display()),
                e,
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(target, fs::Permissions::from_mode(self.file_mode))
                .map_err(|e| Error::io(format!("setting mode on {}", target.display()), e))?;
        }

        Ok(())
    }

    /// Remove every version directory except `keep`
    ///
    /// Best effort: failures are logged and returned as warnings.
    pub fn remove_other_versions(&self, ruleset_dir: &Path, keep: &str) -> Vec<String> {
        let mut warnings = Vec::new();

        let entries = match fs::read_dir(ruleset_dir) {
            Ok(entries) => entries,
            Err(e) => {
                let msg = format!("could not list {}: {}", ruleset_dir.display(), e);
                warn!("{}", msg);
                warnings.push(msg);
                return warnings;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == keep || is_hidden(&name) {
                continue;
            }

            let path = entry.path();
            let removed = match entry.file_type() {
                Ok(ft) if ft.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };

            match removed {
                Ok(()) => info!("Removed previous version {}", path.display()),
                Err(e) => {
                    let msg = format!("could not remove old version {}: {}", path.display(), e);
                    warn!("{}", msg);
                    warnings.push(msg);
                }
            }
        }

        warnings
    }

    /// Remove a ruleset from one channel directory
    ///
    /// Returns `Ok(false)` when it was not installed there. The registry
    /// directory is pruned when this was its last ruleset.
    pub fn remove_ruleset(&self, dir: &Path, registry: &str, ruleset: &str) -> Result<bool> {
        let ruleset_dir = ruleset_path(dir, registry, ruleset);
        if !ruleset_dir.exists() {
            debug!("{}/{} not present in {}", registry, ruleset, dir.display());
            return Ok(false);
        }

        fs::remove_dir_all(&ruleset_dir)
            .map_err(|e| Error::io(format!("removing {}", ruleset_dir.display()), e))?;
        info!("Removed {}", ruleset_dir.display());

        if let Some(registry_dir) = ruleset_dir.parent()
            && fs::read_dir(registry_dir).is_ok_and(|mut e| e.next().is_none())
            && let Err(e) = fs::remove_dir(registry_dir)
        {
            debug!("Leaving registry directory {}: {}", registry_dir.display(), e);
        }

        Ok(true)
    }

    /// Registry name -> ruleset names present under one channel directory
    ///
    /// Presence only: version directories are not inspected.
    pub fn installed_rulesets(&self, dir: &Path) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let namespace = dir.join(NAMESPACE_DIR);
        let mut installed = BTreeMap::new();

        for registry in visible_subdirs(&namespace)? {
            let rulesets = visible_subdirs(&namespace.join(&registry))?;
            if !rulesets.is_empty() {
                installed
                    .entry(registry)
                    .or_insert_with(BTreeSet::new)
                    .extend(rulesets);
            }
        }

        Ok(installed)
    }
}

/// Names of non-hidden subdirectories; a missing directory has none
fn visible_subdirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(format!("listing {}", dir.display()), e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(format!("listing {}", dir.display()), e))?;
        if !entry.file_type().is_ok_and(|ft| ft.is_dir()) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && !is_hidden(name)
        {
            names.push(name.to_string());
        }
    }

    names.sort();
    Ok(names)
}
