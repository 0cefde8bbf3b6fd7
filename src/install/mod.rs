// src/install/mod.rs

//! Ruleset installation
//!
//! - [`Installer`]: one request, already-fetched files, every target channel
//! - [`InstallOrchestrator`]: many requests under per-registry limits
//! - [`FetchingInstaller`]: resolve and fetch from a registry, then install
//!
//! All three speak the [`Install`] trait so the orchestrator can drive either
//! installer.

mod deployer;
mod installer;
mod orchestrator;
mod pipeline;

pub use deployer::{FILE_MODE, NAMESPACE_DIR};
pub use installer::Installer;
pub use orchestrator::InstallOrchestrator;
pub use pipeline::FetchingInstaller;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// One desired install outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallRequest {
    pub registry: String,
    pub ruleset: String,
    /// Version constraint as declared by the caller
    pub version: String,
    /// Concrete version chosen by registry resolution, if any
    pub resolved_version: Option<String>,
    /// Already-fetched files to deploy
    pub source_files: Vec<PathBuf>,
    /// Download root the source files live under
    ///
    /// Paths below it are preserved on deploy. Without it, relative sources
    /// drop their first component and absolute sources keep their file name.
    pub source_root: Option<PathBuf>,
    /// Channel names; empty means every configured channel
    pub channels: Vec<String>,
    /// Glob patterns that selected the files
    pub patterns: Vec<String>,
}

impl InstallRequest {
    pub fn new(
        registry: impl Into<String>,
        ruleset: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            ruleset: ruleset.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_resolved_version(mut self, version: impl Into<String>) -> Self {
        self.resolved_version = Some(version.into());
        self
    }

    pub fn with_source_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.source_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Version directory name: the resolved version, else the declared one
    pub fn effective_version(&self) -> &str {
        self.resolved_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.version)
    }

    /// `registry/ruleset@version` for logs and progress
    pub fn description(&self) -> String {
        format!("{}/{}@{}", self.registry, self.ruleset, self.effective_version())
    }
}

/// Outcome of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub registry: String,
    pub ruleset: String,
    /// Version directory that was deployed
    pub version: String,
    /// Version directory in the first channel directory
    pub installed_path: PathBuf,
    /// File copies performed (sources x channel directories)
    pub files_count: usize,
    /// Channel names deployed to
    pub channels: Vec<String>,
    /// Non-fatal problems, e.g. a stale version that could not be removed
    pub warnings: Vec<String>,
}

/// A failed request inside a batch
#[derive(Debug, thiserror::Error)]
#[error("{registry}/{ruleset}: {cause}")]
pub struct InstallError {
    pub registry: String,
    pub ruleset: String,
    #[source]
    pub cause: Error,
}

impl InstallError {
    pub fn new(request: &InstallRequest, cause: Error) -> Self {
        Self {
            registry: request.registry.clone(),
            ruleset: request.ruleset.clone(),
            cause,
        }
    }
}

/// Anything that can carry out a single install request
#[async_trait]
pub trait Install: Send + Sync {
    async fn install(&self, request: InstallRequest) -> Result<InstallResult>;
}

/// Batch of install requests
#[derive(Debug, Clone, Default)]
pub struct MultiInstallRequest {
    pub requests: Vec<InstallRequest>,
}

impl MultiInstallRequest {
    pub fn new(requests: Vec<InstallRequest>) -> Self {
        Self { requests }
    }
}

impl From<Vec<InstallRequest>> for MultiInstallRequest {
    fn from(requests: Vec<InstallRequest>) -> Self {
        Self::new(requests)
    }
}

/// Aggregate outcome of a batch
#[derive(Debug, Default)]
pub struct MultiInstallResult {
    pub successful: Vec<InstallResult>,
    pub failed: Vec<InstallError>,
    /// Always the number of requests submitted
    pub total: usize,
}

impl MultiInstallResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}
