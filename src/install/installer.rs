// src/install/installer.rs

//! Single-request installer
//!
//! Deploys already-fetched files into every target channel directory and
//! records the result in the lock file. Deployment is two-phase: every
//! channel directory is staged first, and versions are only swapped into
//! place once all of them staged cleanly. The lock entry is written strictly
//! after every channel directory was committed.

use super::deployer::{FileDeployer, StagedVersion, plan_sources};
use super::{Install, InstallRequest, InstallResult};
use crate::config::{Config, RegistryConfig};
use crate::error::{Error, Result};
use crate::lockfile::{LockEntry, LockStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Channel name with its directories
type ResolvedChannel = (String, Vec<PathBuf>);

/// Installs, removes and lists rulesets in channel directories
#[derive(Clone)]
pub struct Installer {
    config: Arc<Config>,
    lock: Arc<LockStore>,
    deployer: FileDeployer,
}

impl Installer {
    pub fn new(config: Arc<Config>, lock: Arc<LockStore>) -> Self {
        Self {
            config,
            lock,
            deployer: FileDeployer::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lock_store(&self) -> &LockStore {
        &self.lock
    }

    /// Install one request
    ///
    /// Nothing on disk changes unless validation passes and every channel
    /// directory stages successfully.
    pub fn install(&self, request: &InstallRequest) -> Result<InstallResult> {
        validate_names(request)?;
        let registry = self.registry_config(&request.registry)?;
        if request.source_files.is_empty() {
            return Err(Error::InvalidRequest("no source files provided".to_string()));
        }
        let channels = self.resolve_channels(&request.channels)?;
        let dir_count = channels.iter().map(|(_, dirs)| dirs.len()).sum::<usize>();
        if dir_count == 0 {
            return Err(Error::InvalidRequest(
                "target channels have no directories configured".to_string(),
            ));
        }

        let sources = plan_sources(&request.source_files, request.source_root.as_deref())?;
        let version = request.effective_version();
        info!(
            "Installing {} ({} files) to {} channel(s)",
            request.description(),
            sources.len(),
            channels.len()
        );

        // Phase 1: stage every channel directory. Any failure drops what was
        // staged so far, leaving all channels untouched.
        let mut staged: Vec<(&str, StagedVersion)> = Vec::with_capacity(dir_count);
        for (channel, dirs) in &channels {
            for dir in dirs {
                let version_dir = self
                    .deployer
                    .stage(dir, &request.registry, &request.ruleset, version, &sources)
                    .map_err(|e| deploy_error(request, channel, e))?;
                staged.push((channel.as_str(), version_dir));
            }
        }

        // Phase 2: swap staged copies into place and drop older versions
        let mut installed_path = None;
        let mut warnings = Vec::new();
        for (channel, version_dir) in staged {
            let path = version_dir
                .commit()
                .map_err(|e| deploy_error(request, channel, e))?;

            if let Some(ruleset_dir) = path.parent() {
                warnings.extend(self.deployer.remove_other_versions(ruleset_dir, version));
            }
            installed_path.get_or_insert(path);
        }

        let entry = LockEntry::new(version, registry, &request.patterns);
        self.lock
            .update(&request.registry, &request.ruleset, entry)
            .map_err(|e| {
                Error::LockFile(format!(
                    "{}/{} deployed but lock file update failed: {}",
                    request.registry, request.ruleset, e
                ))
            })?;

        let result = InstallResult {
            registry: request.registry.clone(),
            ruleset: request.ruleset.clone(),
            version: version.to_string(),
            installed_path: installed_path.unwrap_or_default(),
            files_count: sources.len() * dir_count,
            channels: channels.into_iter().map(|(name, _)| name).collect(),
            warnings,
        };

        if !result.warnings.is_empty() {
            warn!(
                "Installed {} with {} cleanup warning(s)",
                request.description(),
                result.warnings.len()
            );
        }
        info!(
            "Installed {} ({} file copies)",
            request.description(),
            result.files_count
        );
        Ok(result)
    }

    /// Check everything an install needs except the files themselves
    ///
    /// Lets a fetching caller fail fast before downloading anything.
    pub fn validate_target(&self, request: &InstallRequest) -> Result<()> {
        validate_names(request)?;
        self.registry_config(&request.registry)?;
        self.resolve_channels(&request.channels)?;
        Ok(())
    }

    /// Remove a ruleset from the given channels (all when empty) and unlock it
    ///
    /// Channels that are not configured, and directories that do not hold
    /// the ruleset, are skipped. A failed removal aborts before the lock
    /// entry is touched.
    pub fn uninstall(&self, registry: &str, ruleset: &str, channels: &[String]) -> Result<()> {
        check_component("registry", registry)?;
        check_component("ruleset", ruleset)?;

        let targets = if channels.is_empty() {
            self.config.channel_names()
        } else {
            channels.to_vec()
        };

        let mut removed = 0;
        for name in &targets {
            let Some(channel) = self.config.channel(name) else {
                debug!("Skipping unknown channel '{}'", name);
                continue;
            };

            for dir in &channel.directories {
                if self
                    .deployer
                    .remove_ruleset(dir, registry, ruleset)
                    .map_err(|e| {
                        Error::IoError(format!(
                            "{}/{} from channel '{}': {}",
                            registry,
                            ruleset,
                            name,
                            io_message(e)
                        ))
                    })?
                {
                    removed += 1;
                }
            }
        }

        self.lock.remove(registry, ruleset).map_err(|e| {
            Error::LockFile(format!(
                "{registry}/{ruleset} removed but lock file update failed: {e}"
            ))
        })?;

        info!(
            "Uninstalled {}/{} from {} director{}",
            registry,
            ruleset,
            removed,
            if removed == 1 { "y" } else { "ies" }
        );
        Ok(())
    }

    /// Channel -> registry -> ruleset names found on disk
    ///
    /// Scans the `arm/` namespace of each channel directory; never reads the
    /// lock file. Empty `channels` means every configured channel.
    pub fn list_installed(
        &self,
        channels: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, Vec<String>>>> {
        let mut listing = BTreeMap::new();

        for (name, dirs) in self.resolve_channels(channels)? {
            let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for dir in &dirs {
                for (registry, rulesets) in self.deployer.installed_rulesets(dir)? {
                    merged.entry(registry).or_default().extend(rulesets);
                }
            }

            let by_registry = merged
                .into_iter()
                .map(|(registry, rulesets)| (registry, rulesets.into_iter().collect()))
                .collect();
            listing.insert(name, by_registry);
        }

        Ok(listing)
    }

    fn registry_config(&self, name: &str) -> Result<&RegistryConfig> {
        self.config
            .registry(name)
            .ok_or_else(|| Error::NotFound(format!("registry '{name}' is not configured")))
    }

    /// Explicit channels, or all configured ones when none were named
    fn resolve_channels(&self, requested: &[String]) -> Result<Vec<ResolvedChannel>> {
        if requested.is_empty() {
            if self.config.channels.is_empty() {
                return Err(Error::InvalidRequest("no channels configured".to_string()));
            }
            return Ok(self
                .config
                .channels
                .iter()
                .map(|(name, channel)| (name.clone(), channel.directories.clone()))
                .collect());
        }

        let mut resolved: Vec<ResolvedChannel> = Vec::with_capacity(requested.len());
        for name in requested {
            if resolved.iter().any(|(seen, _)| seen == name) {
                continue;
            }
            let channel = self
                .config
                .channel(name)
                .ok_or_else(|| Error::NotFound(format!("channel '{name}' is not configured")))?;
            resolved.push((name.clone(), channel.directories.clone()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Install for Installer {
    async fn install(&self, request: InstallRequest) -> Result<InstallResult> {
        let installer = self.clone();
        tokio::task::spawn_blocking(move || installer.install(&request))
            .await
            .map_err(|e| Error::WorkerFailed(e.to_string()))?
    }
}

fn validate_names(request: &InstallRequest) -> Result<()> {
    check_component("registry", &request.registry)?;
    check_component("ruleset", &request.ruleset)?;
    if request.version.is_empty() {
        return Err(Error::InvalidRequest("version is required".to_string()));
    }
    check_component("version", request.effective_version())
}

/// Names become directory names and must stay a single path component
fn check_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidRequest(format!("{field} is required")));
    }
    if value.starts_with('.') || value.contains(['/', '\\']) {
        return Err(Error::InvalidRequest(format!("invalid {field} name '{value}'")));
    }
    Ok(())
}

fn io_message(err: Error) -> String {
    match err {
        Error::IoError(msg) => msg,
        other => other.to_string(),
    }
}

fn deploy_error(request: &InstallRequest, channel: &str, err: Error) -> Error {
    Error::IoError(format!(
        "{}/{} to channel '{}': {}",
        request.registry,
        request.ruleset,
        channel,
        io_message(err)
    ))
}
