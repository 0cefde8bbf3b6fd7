// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use arm::{ChannelConfig, Config, Installer, LockStore, RegistryConfig, RegistryType};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Route library logs to the test output; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A temporary project: configuration, channel directories and lock file.
///
/// Channel directories are given relative to the temp dir. Keep the value
/// alive for the duration of the test to prevent cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config: Config,
    lock: Arc<LockStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        let temp_dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(LockStore::new(temp_dir.path().join(arm::LOCKFILE_NAME)));
        Self {
            temp_dir,
            config: Config::default(),
            lock,
        }
    }

    pub fn with_registry(self, name: &str, kind: RegistryType) -> Self {
        let config = RegistryConfig {
            url: format!("https://rules.example.com/{name}"),
            kind,
            ..Default::default()
        };
        self.with_registry_config(name, config)
    }

    pub fn with_registry_config(mut self, name: &str, config: RegistryConfig) -> Self {
        self.config.registries.insert(name.to_string(), config);
        self
    }

    pub fn with_channel(mut self, name: &str, dirs: &[&str]) -> Self {
        let directories = dirs.iter().map(|d| self.temp_dir.path().join(d)).collect();
        self.config
            .channels
            .insert(name.to_string(), ChannelConfig { directories });
        self
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.temp_dir.path().join(rel)
    }

    pub fn lock_store(&self) -> Arc<LockStore> {
        self.lock.clone()
    }

    pub fn installer(&self) -> Installer {
        Installer::new(Arc::new(self.config.clone()), self.lock.clone())
    }

    /// Write `files` below `root` (relative to the temp dir).
    ///
    /// Returns the root and the absolute file paths. Content embeds the
    /// `tag` so different versions can be told apart.
    pub fn write_sources(&self, root: &str, tag: &str, files: &[&str]) -> (PathBuf, Vec<PathBuf>) {
        let root = self.path(root);
        let paths = files
            .iter()
            .map(|file| {
                let path = root.join(file);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, format!("{tag}:{file}")).unwrap();
                path
            })
            .collect();
        (root, paths)
    }
}

/// Sorted names of the entries in a directory
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

/// Create a `<root>/<ruleset>/<version>/<file>` tree for a local registry
pub fn write_local_version(root: &Path, ruleset: &str, version: &str, files: &[&str]) {
    for file in files {
        let path = root.join(ruleset).join(version).join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("{ruleset}@{version}:{file}")).unwrap();
    }
}
