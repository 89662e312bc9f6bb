//! Configuration management
//!
//! This module handles loading, validation, and management of the Quire configuration.
//! Configuration is stored in TOML format at ~/.quire/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **plugins**: Plugin locations and the host version plugins are checked against
//! - **security**: Checksum policy, signature verification, trusted signers
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Creates the data directory if it doesn't exist
//!
//! # Examples
//!
//! ```no_run
//! use quire_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! println!("Data directory: {:?}", config.core.data_dir);
//! println!("Plugin locations: {:?}", config.plugins.locations);
//! # Ok(())
//! # }
//! ```

pub mod plugin_store;

pub use plugin_store::{FileConfigStore, MemoryConfigStore, PluginConfigStore, StoreError};

use ed25519_dalek::{VerifyingKey, PUBLIC_KEY_LENGTH};
use sdk::errors::ErrorExt;
use sdk::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine home directory")]
    NoHomeDirectory,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ErrorExt for ConfigError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Read { .. } | Self::Write { .. } => {
                "The configuration file could not be accessed. Check file permissions"
            }
            Self::Parse(_) | Self::Serialize(_) => {
                "The configuration file is not valid TOML. Check ~/.quire/config.toml"
            }
            Self::NoHomeDirectory => "Set the HOME environment variable",
            Self::Invalid(_) => "The configuration contains an invalid value",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Main configuration structure
///
/// This structure represents the complete Quire configuration loaded from
/// ~/.quire/config.toml. Only `core` is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Plugin discovery settings
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Trust policy
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

/// Plugin discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directories scanned for plugin bundles (supports ~ expansion)
    #[serde(default = "default_locations")]
    pub locations: Vec<PathBuf>,

    /// Host version plugins are checked against
    #[serde(default = "default_host_version")]
    pub host_version: Version,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            locations: default_locations(),
            host_version: default_host_version(),
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Reject plugins that do not declare a content checksum
    #[serde(default)]
    pub require_checksum: bool,

    /// Verify detached Ed25519 signatures against `signers`
    #[serde(default = "default_true")]
    pub verify_signatures: bool,

    /// Trusted signing roots
    #[serde(default)]
    pub signers: Vec<TrustedSigner>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_checksum: false,
            verify_signatures: true,
            signers: Vec::new(),
        }
    }
}

/// A signing identity the host trusts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedSigner {
    /// Identity plugins claim in `trust.signing_identity`
    pub identity: String,

    /// Team the identity belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    /// Hex-encoded Ed25519 public key
    pub public_key: String,
}

impl TrustedSigner {
    /// Decode the configured public key
    pub fn verifying_key(&self) -> Result<VerifyingKey, ConfigError> {
        let bytes = hex::decode(self.public_key.trim()).map_err(|e| {
            ConfigError::Invalid(format!(
                "public key for signer '{}' is not hex: {}",
                self.identity, e
            ))
        })?;

        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            ConfigError::Invalid(format!(
                "public key for signer '{}' must be {} bytes, got {}",
                self.identity,
                PUBLIC_KEY_LENGTH,
                b.len()
            ))
        })?;

        VerifyingKey::from_bytes(&bytes).map_err(|e| {
            ConfigError::Invalid(format!(
                "public key for signer '{}' is invalid: {}",
                self.identity, e
            ))
        })
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.quire/data")
}

fn default_locations() -> Vec<PathBuf> {
    vec![PathBuf::from("~/.quire/plugins")]
}

/// The engine's own crate version
pub fn default_host_version() -> Version {
    env!("CARGO_PKG_VERSION")
        .parse()
        .unwrap_or(Version::new(0, 1, 0))
}

impl Config {
    /// Load configuration from the default location (~/.quire/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Validates the configuration after loading and returns descriptive errors
    /// if validation fails.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (invalid log level, undecodable signer key)
    pub fn load_or_create() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config = toml::from_str(&contents)?;

        config.validate_and_process()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())?;

        fs::write(path, toml_string).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(path = %path.display(), "Created default configuration");

        let mut config = Self::default();
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.quire/config.toml)
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
        Ok(home.join(".quire").join("config.toml"))
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level
    /// - Expands ~ in the data directory and plugin locations
    /// - Creates the data directory if it doesn't exist
    /// - Decodes every trusted signer key
    pub fn validate_and_process(&mut self) -> Result<(), ConfigError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|source| ConfigError::Write {
                path: self.core.data_dir.clone(),
                source,
            })?;
        }

        self.plugins.locations = self
            .plugins
            .locations
            .iter()
            .map(|location| expand_path(location))
            .collect::<Result<_, _>>()?;

        for signer in &self.security.signers {
            signer.verifying_key()?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| ConfigError::Invalid(format!("Invalid UTF-8 in path {:?}", path)))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert!(!config.security.require_checksum);
        assert!(config.security.verify_signatures);
        assert!(config.security.signers.is_empty());
        assert_eq!(config.plugins.locations.len(), 1);
        assert_eq!(
            config.plugins.host_version.to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/tmp/plugins");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_load_minimal_config() {
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("data");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            format!(
                "[core]\nlog_level = \"debug\"\ndata_dir = {:?}\n\n[plugins]\nhost_version = \"2.1.0\"\n",
                data_dir
            ),
        )
        .unwrap();

        let config = Config::load_from_path(&config_path).unwrap();
        assert_eq!(config.core.log_level, "debug");
        assert!(data_dir.is_dir());
        assert_eq!(config.plugins.host_version, Version::new(2, 1, 0));
    }

    #[test]
    fn test_invalid_log_level() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            format!(
                "[core]\nlog_level = \"loud\"\ndata_dir = {:?}\n",
                temp.path().join("data")
            ),
        )
        .unwrap();

        let result = Config::load_from_path(&config_path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_signer_key() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            format!(
                "[core]\ndata_dir = {:?}\n\n[[security.signers]]\nidentity = \"Example\"\npublic_key = \"abcd\"\n",
                temp.path().join("data")
            ),
        )
        .unwrap();

        let err = Config::load_from_path(&config_path).unwrap_err();
        assert!(err.to_string().contains("must be 32 bytes"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_prerelease_host_version_rejected() {
        let result: Result<Config, _> =
            toml::from_str("[core]\n\n[plugins]\nhost_version = \"2.0.0-rc.1\"\n");
        assert!(result.is_err());
    }
}
