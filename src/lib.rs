// src/lib.rs

//! ARM: ruleset manager for AI coding assistants
//!
//! Rulesets are versioned bundles of text/config files published by
//! registries (Git, S3, HTTPS, local directories) and installed into one or
//! more channel directories, one per assistant tool.
//!
//! # Architecture
//!
//! - Lock file first: the lock file says which version is installed, the
//!   channel directories only say what is present
//! - Namespaced layout: `<channel-dir>/arm/<registry>/<ruleset>/<version>/`
//! - Staged deploys: every channel directory is staged before any is touched
//! - Per-registry limits: concurrency ceiling plus token-bucket rate limit
//! - Batch isolation: one failed request never affects its siblings

pub mod config;
mod error;
pub mod fetch;
pub mod install;
pub mod lockfile;
pub mod manifest;
pub mod progress;
pub mod ratelimit;
pub mod registry;

pub use config::{ChannelConfig, Config, RegistryConfig, RegistryType, TypeDefaults};
pub use error::{Error, Result};
pub use fetch::{ContentFetcher, FetchedContent, filter_paths};
pub use install::{
    FetchingInstaller, Install, InstallError, InstallOrchestrator, InstallRequest, InstallResult,
    Installer, MultiInstallRequest, MultiInstallResult,
};
pub use lockfile::{LOCKFILE_NAME, LockEntry, LockFile, LockStore};
pub use manifest::{MANIFEST_NAME, Manifest, ManifestEntry};
pub use progress::{BarProgress, LogProgress, ProgressReporter, SilentProgress};
pub use ratelimit::{RateLimit, RateLimiterRegistry, TokenBucket};
pub use registry::{LocalRegistry, Registry, RegistryHandle, RegistrySet};
