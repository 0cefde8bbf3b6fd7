// src/install/pipeline.rs

//! Resolve, fetch, install
//!
//! [`FetchingInstaller`] fills in what a bare request lacks: it resolves the
//! version constraint with the registry, stages the content in a scratch
//! directory and hands the staged files to the [`Installer`]. The scratch
//! directory is gone by the time `install` returns, whatever the outcome.

use super::{Install, InstallRequest, InstallResult, Installer};
use crate::error::Result;
use crate::fetch::ContentFetcher;
use crate::registry::RegistrySet;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct FetchingInstaller {
    installer: Installer,
    registries: RegistrySet,
    fetcher: ContentFetcher,
    cancel: CancellationToken,
}

impl FetchingInstaller {
    pub fn new(installer: Installer, registries: RegistrySet) -> Self {
        Self {
            installer,
            registries,
            fetcher: ContentFetcher::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: ContentFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Abort downloads when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    pub fn registries(&self) -> &RegistrySet {
        &self.registries
    }
}

#[async_trait]
impl Install for FetchingInstaller {
    async fn install(&self, mut request: InstallRequest) -> Result<InstallResult> {
        // Already fetched by the caller
        if !request.source_files.is_empty() {
            return Install::install(&self.installer, request).await;
        }

        self.installer.validate_target(&request)?;
        let handle = self.registries.get(&request.registry)?;

        let version = match request.resolved_version.as_deref() {
            Some(version) if !version.is_empty() => version.to_string(),
            _ => {
                handle
                    .registry()
                    .resolve_version(&request.ruleset, &request.version)
                    .await?
            }
        };
        debug!(
            "Resolved {}/{} {} to {}",
            request.registry, request.ruleset, request.version, version
        );

        let content = self
            .fetcher
            .fetch(handle, &request.ruleset, &version, &request.patterns, &self.cancel)
            .await?;

        request.resolved_version = Some(version);
        request.source_root = Some(content.root().to_path_buf());
        request.source_files = content.files().to_vec();

        let result = Install::install(&self.installer, request).await;
        drop(content);
        result
    }
}
