// src/registry/mod.rs

//! Registry capability interface
//!
//! Registries are the sources rulesets are fetched from (Git repositories,
//! S3 buckets, HTTPS APIs, local directories). Protocol clients live outside
//! this crate and plug in through the [`Registry`] trait; only the local
//! directory registry is provided here.
//!
//! Whether a registry can filter by glob pattern on its side is resolved
//! once, when it is wrapped in a [`RegistryHandle`], instead of being
//! re-checked on every download.

mod local;

pub use local::LocalRegistry;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A named source of rulesets
#[async_trait]
pub trait Registry: Send + Sync {
    /// Registry name as used in configuration and install requests
    fn name(&self) -> &str;

    /// Whether [`Registry::download_ruleset_with_patterns`] is implemented
    fn supports_patterns(&self) -> bool {
        false
    }

    /// Resolve a version constraint to a concrete version
    ///
    /// Registries without version metadata install exactly what was asked
    /// for, so the default returns the constraint unchanged.
    async fn resolve_version(&self, _ruleset: &str, constraint: &str) -> Result<String> {
        Ok(constraint.to_string())
    }

    /// Download every file of a ruleset version into `dest`
    async fn download_ruleset(
        &self,
        cancel: &CancellationToken,
        ruleset: &str,
        version: &str,
        dest: &Path,
    ) -> Result<()>;

    /// Download only the files matching `patterns` into `dest`
    async fn download_ruleset_with_patterns(
        &self,
        _cancel: &CancellationToken,
        _ruleset: &str,
        _version: &str,
        _dest: &Path,
        _patterns: &[String],
    ) -> Result<()> {
        Err(Error::DownloadError(format!(
            "registry '{}' does not support pattern-filtered downloads",
            self.name()
        )))
    }

    /// Release connections or other resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A registry plus the capabilities resolved when it was registered
#[derive(Clone)]
pub struct RegistryHandle {
    registry: Arc<dyn Registry>,
    supports_patterns: bool,
}

impl RegistryHandle {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        let supports_patterns = registry.supports_patterns();
        debug!(
            "Registered registry '{}' (pattern downloads: {})",
            registry.name(),
            supports_patterns
        );
        Self {
            registry,
            supports_patterns,
        }
    }

    pub fn name(&self) -> &str {
        self.registry.name()
    }

    pub fn supports_patterns(&self) -> bool {
        self.supports_patterns
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }
}

/// Registries available to an install run, keyed by name
#[derive(Clone, Default)]
pub struct RegistrySet {
    handles: BTreeMap<String, RegistryHandle>,
}

impl RegistrySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a registry under its own name
    pub fn insert(&mut self, registry: Arc<dyn Registry>) {
        let handle = RegistryHandle::new(registry);
        self.handles.insert(handle.name().to_string(), handle);
    }

    pub fn with(mut self, registry: Arc<dyn Registry>) -> Self {
        self.insert(registry);
        self
    }

    pub fn get(&self, name: &str) -> Result<&RegistryHandle> {
        self.handles
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("registry '{name}' is not available")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Close every registry, reporting the first failure after trying all
    pub async fn close_all(&self) -> Result<()> {
        let mut first_error = None;

        for handle in self.handles.values() {
            if let Err(e) = handle.registry().close().await {
                warn!("Failed to close registry '{}': {}", handle.name(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
