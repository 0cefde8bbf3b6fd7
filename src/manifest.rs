// src/manifest.rs

//! Declared rulesets (`arm.json`)
//!
//! The manifest lists what the project wants; the lock file records what was
//! actually installed. Install and update flows turn the manifest into
//! [`InstallRequest`]s, reusing the patterns a previous install persisted
//! when the manifest itself does not name any.

use crate::error::{Error, Result};
use crate::install::InstallRequest;
use crate::lockfile::LockFile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default manifest file name
pub const MANIFEST_NAME: &str = "arm.json";

/// One declared ruleset
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Version constraint, e.g. `^1.2.0` or `latest`
    pub version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,

    /// Target channels; empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Registry name -> ruleset name -> entry
    #[serde(default)]
    pub rulesets: BTreeMap<String, BTreeMap<String, ManifestEntry>>,
}

impl Manifest {
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ParseError(format!("Invalid manifest: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading manifest {}", path.display()), e))?;
        Self::from_json_str(&content)
    }

    pub fn add(
        &mut self,
        registry: &str,
        ruleset: &str,
        version: &str,
        patterns: Vec<String>,
        channels: Vec<String>,
    ) {
        self.rulesets.entry(registry.to_string()).or_default().insert(
            ruleset.to_string(),
            ManifestEntry {
                version: version.to_string(),
                patterns,
                channels,
            },
        );
    }

    pub fn remove(&mut self, registry: &str, ruleset: &str) -> Option<ManifestEntry> {
        let rulesets = self.rulesets.get_mut(registry)?;
        let removed = rulesets.remove(ruleset);
        if rulesets.is_empty() {
            self.rulesets.remove(registry);
        }
        removed
    }

    /// Iterate `(registry, ruleset, entry)` in sorted order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &ManifestEntry)> {
        self.rulesets.iter().flat_map(|(registry, rulesets)| {
            rulesets
                .iter()
                .map(move |(ruleset, entry)| (registry.as_str(), ruleset.as_str(), entry))
        })
    }

    /// One install request per declared ruleset
    ///
    /// Requests carry no files; they are meant for a fetching installer.
    pub fn install_requests(&self, lock: &LockFile) -> Vec<InstallRequest> {
        self.entries()
            .map(|(registry, ruleset, entry)| {
                let patterns = if entry.patterns.is_empty() {
                    lock.get(registry, ruleset)
                        .and_then(|locked| locked.patterns.clone())
                        .unwrap_or_default()
                } else {
                    entry.patterns.clone()
                };

                InstallRequest::new(registry, ruleset, &entry.version)
                    .with_patterns(patterns)
                    .with_channels(entry.channels.iter().cloned())
            })
            .collect()
    }
}
