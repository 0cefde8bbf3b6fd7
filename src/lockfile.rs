// src/lockfile.rs

//! Lock file recording exactly which version of each ruleset is installed
//!
//! The lock file is the single source of truth for installed versions.
//! Channel directories are only ever scanned to learn which rulesets are
//! *present*, never which version they are at.
//!
//! # Format
//!
//! ```json
//! {
//!   "rulesets": {
//!     "acme": {
//!       "py-rules": {
//!         "version": "1.2.0",
//!         "resolved": "2026-01-15T10:30:00+00:00",
//!         "registry": "https://github.com/acme/rules",
//!         "type": "git",
//!         "patterns": ["rules/**/*.md"]
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Every write replaces the whole file: the new document goes to a `.tmp`
//! sibling which is then renamed over the target, so readers never see a
//! truncated lock file.

use crate::config::{Config, RegistryConfig, RegistryType};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default lock file name, next to the manifest
pub const LOCKFILE_NAME: &str = "arm-lock.json";

/// Resolved state of one installed ruleset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockEntry {
    /// Installed version (or the declared constraint after a manifest sync)
    pub version: String,

    /// When this entry was resolved (RFC 3339)
    pub resolved: String,

    /// Registry source URL
    pub registry: String,

    #[serde(rename = "type")]
    pub kind: RegistryType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// File selection used at install time (Git registries only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<String>>,
}

impl LockEntry {
    /// Build an entry stamped with the current time
    ///
    /// Patterns are kept only for registry types that need them to repeat
    /// the same file selection on update.
    pub fn new(version: &str, registry: &RegistryConfig, patterns: &[String]) -> Self {
        let patterns = if registry.kind.persists_patterns() && !patterns.is_empty() {
            Some(patterns.to_vec())
        } else {
            None
        };

        Self {
            version: version.to_string(),
            resolved: Utc::now().to_rfc3339(),
            registry: registry.url.clone(),
            kind: registry.kind,
            region: registry.region.clone(),
            patterns,
        }
    }
}

/// Lock file root: registry name -> ruleset name -> entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockFile {
    #[serde(default)]
    pub rulesets: BTreeMap<String, BTreeMap<String, LockEntry>>,
}

impl LockFile {
    pub fn get(&self, registry: &str, ruleset: &str) -> Option<&LockEntry> {
        self.rulesets.get(registry)?.get(ruleset)
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, registry: &str, ruleset: &str, entry: LockEntry) {
        self.rulesets
            .entry(registry.to_string())
            .or_default()
            .insert(ruleset.to_string(), entry);
    }

    /// Remove an entry, dropping the registry key once it has no rulesets left
    pub fn remove(&mut self, registry: &str, ruleset: &str) -> Option<LockEntry> {
        let rulesets = self.rulesets.get_mut(registry)?;
        let removed = rulesets.remove(ruleset);

        if rulesets.is_empty() {
            self.rulesets.remove(registry);
        }

        removed
    }

    pub fn is_empty(&self) -> bool {
        self.rulesets.is_empty()
    }

    /// Number of locked rulesets across all registries
    pub fn len(&self) -> usize {
        self.rulesets.values().map(BTreeMap::len).sum()
    }

    /// Iterate `(registry, ruleset, entry)` in sorted order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &LockEntry)> {
        self.rulesets.iter().flat_map(|(registry, rulesets)| {
            rulesets
                .iter()
                .map(move |(ruleset, entry)| (registry.as_str(), ruleset.as_str(), entry))
        })
    }
}

/// Owner of the on-disk lock file
///
/// All reads and writes go through one mutex that covers the full
/// read-modify-write-rename cycle.
pub struct LockStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl LockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the lock file
    ///
    /// A missing or unparsable file yields an empty lock file: it is a record
    /// of resolved state, not a required input.
    pub fn load(&self) -> LockFile {
        let _guard = self.guard.lock();
        self.read_unlocked()
    }

    pub fn get(&self, registry: &str, ruleset: &str) -> Option<LockEntry> {
        self.load().get(registry, ruleset).cloned()
    }

    /// Record (or replace) the entry for one ruleset
    pub fn update(&self, registry: &str, ruleset: &str, entry: LockEntry) -> Result<()> {
        let _guard = self.guard.lock();

        let mut lock = self.read_unlocked();
        lock.insert(registry, ruleset, entry);
        self.write_unlocked(&lock)?;

        debug!("Locked {}/{}", registry, ruleset);
        Ok(())
    }

    /// Drop the entry for one ruleset
    ///
    /// Returns whether an entry existed. Nothing is written when it did not.
    pub fn remove(&self, registry: &str, ruleset: &str) -> Result<bool> {
        let _guard = self.guard.lock();

        let mut lock = self.read_unlocked();
        if lock.remove(registry, ruleset).is_none() {
            return Ok(false);
        }
        self.write_unlocked(&lock)?;

        debug!("Unlocked {}/{}", registry, ruleset);
        Ok(true)
    }

    /// Rebuild the whole lock file from the declared manifest
    ///
    /// Each entry records the manifest's constraint string as its version
    /// until a real install resolves it. Used to reconcile configuration
    /// drift, not during normal installs.
    pub fn sync(&self, manifest: &Manifest, config: &Config) -> Result<LockFile> {
        let mut lock = LockFile::default();

        for (registry, ruleset, declared) in manifest.entries() {
            let registry_config = config.registry(registry).ok_or_else(|| {
                Error::NotFound(format!(
                    "registry '{registry}' (declared for ruleset '{ruleset}') is not configured"
                ))
            })?;
            lock.insert(
                registry,
                ruleset,
                LockEntry::new(&declared.version, registry_config, &declared.patterns),
            );
        }

        let _guard = self.guard.lock();
        self.write_unlocked(&lock)?;

        info!("Synced lock file with {} rulesets from manifest", lock.len());
        Ok(lock)
    }

    fn read_unlocked(&self) -> LockFile {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LockFile::default(),
            Err(e) => {
                warn!("Failed to read lock file {}: {}", self.path.display(), e);
                return LockFile::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(
                "Ignoring unparsable lock file {}: {}",
                self.path.display(),
                e
            );
            LockFile::default()
        })
    }

    fn write_unlocked(&self, lock: &LockFile) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        }

        let content = serde_json::to_string_pretty(lock)
            .map_err(|e| Error::LockFile(format!("Failed to serialize lock file: {e}")))?;

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)
            .map_err(|e| Error::io(format!("creating {}", temp_path.display()), e))?;
        file.write_all(content.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::io(format!("writing {}", temp_path.display()), e))?;
        drop(file);

        // Rename does not replace an existing file on every platform
        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| Error::io(format!("replacing {}", self.path.display()), e))?;
        }
        fs::rename(&temp_path, &self.path)
            .map_err(|e| Error::io(format!("renaming {}", temp_path.display()), e))?;

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_registry() -> RegistryConfig {
        RegistryConfig {
            url: "https://github.com/acme/rules".to_string(),
            kind: RegistryType::Git,
            ..Default::default()
        }
    }

    fn s3_registry() -> RegistryConfig {
        RegistryConfig {
            url: "s3://bucket".to_string(),
            kind: RegistryType::S3,
            region: Some("us-east-1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_entry_patterns_only_for_git() {
        let patterns = vec!["rules/*.md".to_string()];

        let git = LockEntry::new("1.0.0", &git_registry(), &patterns);
        assert_eq!(git.patterns, Some(patterns.clone()));
        assert_eq!(git.kind, RegistryType::Git);

        let s3 = LockEntry::new("1.0.0", &s3_registry(), &patterns);
        assert_eq!(s3.patterns, None);
        assert_eq!(s3.region.as_deref(), Some("us-east-1"));

        let no_patterns = LockEntry::new("1.0.0", &git_registry(), &[]);
        assert_eq!(no_patterns.patterns, None);
    }

    #[test]
    fn test_remove_prunes_empty_registry() {
        let mut lock = LockFile::default();
        lock.insert("acme", "a", LockEntry::new("1", &git_registry(), &[]));
        lock.insert("acme", "b", LockEntry::new("1", &git_registry(), &[]));
        assert_eq!(lock.len(), 2);

        lock.remove("acme", "a");
        assert!(lock.rulesets.contains_key("acme"));

        lock.remove("acme", "b");
        assert!(!lock.rulesets.contains_key("acme"));
        assert!(lock.is_empty());
        assert!(lock.remove("acme", "b").is_none());
    }

    #[test]
    fn test_update_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path().join("nested").join(LOCKFILE_NAME));

        store
            .update("acme", "py-rules", LockEntry::new("1.2.0", &git_registry(), &[]))
            .unwrap();

        let lock = store.load();
        assert_eq!(lock.get("acme", "py-rules").unwrap().version, "1.2.0");
        assert!(!store.temp_path().exists());

        // Replacing keeps a single entry
        store
            .update("acme", "py-rules", LockEntry::new("1.3.0", &git_registry(), &[]))
            .unwrap();
        assert_eq!(store.load().len(), 1);
        assert_eq!(store.get("acme", "py-rules").unwrap().version, "1.3.0");
    }

    #[test]
    fn test_on_disk_layout() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path().join(LOCKFILE_NAME));
        store
            .update("bucket", "rules", LockEntry::new("2.0.0", &s3_registry(), &[]))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        let entry = &raw["rulesets"]["bucket"]["rules"];
        assert_eq!(entry["version"], "2.0.0");
        assert_eq!(entry["type"], "s3");
        assert_eq!(entry["region"], "us-east-1");
        assert!(entry.get("patterns").is_none());
    }

    #[test]
    fn test_load_tolerates_missing_and_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(LOCKFILE_NAME);
        let store = LockStore::new(&path);

        assert!(store.load().is_empty());

        fs::write(&path, "{ not json").unwrap();
        assert!(store.load().is_empty());

        // A corrupt file is replaced by the next update
        store
            .update("acme", "x", LockEntry::new("1", &git_registry(), &[]))
            .unwrap();
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn test_remove_from_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path().join(LOCKFILE_NAME));
        store
            .update("acme", "x", LockEntry::new("1", &git_registry(), &[]))
            .unwrap();

        assert!(store.remove("acme", "x").unwrap());
        assert!(!store.remove("acme", "x").unwrap());

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("acme"));
    }

    #[test]
    fn test_sync_from_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path().join(LOCKFILE_NAME));
        store
            .update("stale", "old", LockEntry::new("0.1.0", &git_registry(), &[]))
            .unwrap();

        let mut config = Config::default();
        config.registries.insert("acme".to_string(), git_registry());

        let mut manifest = Manifest::default();
        manifest.add("acme", "py-rules", "^1.2.0", vec!["**/*.md".to_string()], vec![]);

        let lock = store.sync(&manifest, &config).unwrap();
        assert_eq!(lock.len(), 1);

        let loaded = store.load();
        let entry = loaded.get("acme", "py-rules").unwrap();
        assert_eq!(entry.version, "^1.2.0");
        assert_eq!(entry.registry, "https://github.com/acme/rules");
        assert_eq!(entry.patterns, Some(vec!["**/*.md".to_string()]));
        assert!(loaded.get("stale", "old").is_none());
    }

    #[test]
    fn test_sync_rejects_unknown_registry() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path().join(LOCKFILE_NAME));

        let mut manifest = Manifest::default();
        manifest.add("ghost", "rules", "1.0.0", vec![], vec![]);

        let result = store.sync(&manifest, &Config::default());
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!store.path().exists());
    }
}
