// src/config.rs

//! Merged configuration consumed by the install core
//!
//! Discovery and layering of `.armrc` / `arm.json` files happen elsewhere;
//! this module only describes the already-merged document and offers
//! read-only accessors over it.
//!
//! # Example
//!
//! ```toml
//! [registries.acme]
//! url = "https://github.com/acme/rules"
//! type = "git"
//! concurrency = 2
//! rateLimit = "30/minute"
//!
//! [typeDefaults.s3]
//! concurrency = 8
//! rateLimit = "100/minute"
//!
//! [channels.cursor]
//! directories = [".cursor/rules"]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strum_macros::{AsRefStr, Display, EnumString};

/// Concurrency ceiling when neither the registry nor its type sets one
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Kind of backend a registry is served from
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RegistryType {
    #[default]
    Git,
    S3,
    Https,
    Local,
}

impl RegistryType {
    /// Whether installs from this kind of registry record their glob patterns
    ///
    /// Git registries serve whole repository trees, so an update has to
    /// re-apply the same file selection as the original install.
    pub fn persists_patterns(self) -> bool {
        matches!(self, RegistryType::Git)
    }
}

/// Per-registry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Source URL (or directory for local registries)
    pub url: String,

    #[serde(rename = "type", default)]
    pub kind: RegistryType,

    /// Maximum in-flight operations against this registry
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Throughput limit such as `"10/minute"`
    #[serde(default, alias = "rate_limit")]
    pub rate_limit: Option<String>,

    /// Bucket region (S3 only)
    #[serde(default)]
    pub region: Option<String>,
}

/// Defaults applied to every registry of one type
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefaults {
    #[serde(default)]
    pub concurrency: Option<usize>,

    #[serde(default, alias = "rate_limit")]
    pub rate_limit: Option<String>,
}

/// Installation target: one or more directories fed the same rulesets
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    #[serde(default)]
    pub directories: Vec<PathBuf>,
}

/// Fully merged configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryConfig>,

    /// Keyed by registry type name (`git`, `s3`, ...)
    #[serde(default, alias = "type_defaults")]
    pub type_defaults: BTreeMap<String, TypeDefaults>,

    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid TOML config: {e}")))
    }

    /// Parse a JSON document
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ParseError(format!("Invalid JSON config: {e}")))
    }

    /// Load a single config file, choosing the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn registry(&self, name: &str) -> Option<&RegistryConfig> {
        self.registries.get(name)
    }

    /// Source URL of a registry, if configured
    pub fn registry_url(&self, name: &str) -> Option<&str> {
        self.registries.get(name).map(|r| r.url.as_str())
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.get(name)
    }

    /// Names of every configured channel, sorted
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Concurrency ceiling for a registry
    ///
    /// Registry override, else the type default, else [`DEFAULT_CONCURRENCY`].
    /// Unknown registries get the global default.
    pub fn concurrency_for(&self, registry: &str) -> usize {
        let Some(reg) = self.registries.get(registry) else {
            return DEFAULT_CONCURRENCY;
        };

        reg.concurrency
            .or_else(|| self.type_defaults_for(reg.kind).and_then(|d| d.concurrency))
            .unwrap_or(DEFAULT_CONCURRENCY)
    }

    pub fn type_defaults_for(&self, kind: RegistryType) -> Option<&TypeDefaults> {
        self.type_defaults.get(kind.as_ref())
    }

    /// Raw rate limit string for a registry, registry override first
    pub fn rate_limit_for(&self, registry: &str) -> Option<&str> {
        let reg = self.registries.get(registry)?;

        reg.rate_limit
            .as_deref()
            .or_else(|| {
                self.type_defaults_for(reg.kind)
                    .and_then(|d| d.rate_limit.as_deref())
            })
    }
}
