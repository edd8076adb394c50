//! Configuration for the introducer client.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $INTRODUCER_CLIENT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/introducer-client/config.toml
//!   3. ~/.config/introducer-client/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::crypto::{CryptoError, SigningKey};
use crate::wire::NodeIdentity;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub introducer: IntroducerConfig,
    pub node: NodeConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntroducerConfig {
    /// FURL of the introducer. Empty = not configured.
    pub furl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Human-readable name shown to other nodes.
    pub nickname: String,
    pub my_version: String,
    /// Oldest peer version this node interoperates with.
    pub oldest_supported: String,
    /// Extra application versions advertised with every announcement.
    pub app_versions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Sign published announcements. Unsigned announcements are keyed by
    /// the FURL's tub id instead of a key.
    pub sign_announcements: bool,
    /// Path to the signing key. Auto-generated on first use.
    pub signing_key_path: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

const PACKAGE_VERSION: &str = concat!("introducer-client/", env!("CARGO_PKG_VERSION"));

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            my_version: PACKAGE_VERSION.to_string(),
            oldest_supported: PACKAGE_VERSION.to_string(),
            app_versions: BTreeMap::new(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            sign_announcements: true,
            signing_key_path: config_dir().join("signing.key"),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("introducer-client")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("signing key {0}: {1}")]
    SigningKey(PathBuf, CryptoError),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ClientConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&path, &text)?
        } else {
            ClientConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_toml(path: &std::path::Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("INTRODUCER_CLIENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ClientConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply INTRODUCER_CLIENT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("INTRODUCER_CLIENT_INTRODUCER__FURL") {
            self.introducer.furl = v;
        }
        if let Ok(v) = std::env::var("INTRODUCER_CLIENT_NODE__NICKNAME") {
            self.node.nickname = v;
        }
        if let Ok(v) = std::env::var("INTRODUCER_CLIENT_IDENTITY__SIGN_ANNOUNCEMENTS") {
            self.identity.sign_announcements = v == "true" || v == "1";
        }
    }

    /// The identity stamped into announcements and subscriptions.
    pub fn node_identity(&self) -> NodeIdentity {
        NodeIdentity {
            nickname: self.node.nickname.clone(),
            my_version: self.node.my_version.clone(),
            oldest_supported: self.node.oldest_supported.clone(),
            app_versions: self
                .node
                .app_versions
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        }
    }
}

impl IdentityConfig {
    /// The key to sign announcements with, or None when signing is disabled.
    pub fn signing_key(&self) -> Result<Option<SigningKey>, ConfigError> {
        if !self.sign_announcements {
            return Ok(None);
        }
        SigningKey::load_or_generate(&self.signing_key_path)
            .map(Some)
            .map_err(|e| ConfigError::SigningKey(self.signing_key_path.clone(), e))
    }
}
