//! Error types and handling
//!
//! This module provides the error types shared between the host and plugins.
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Error Categories
//!
//! - **Manifest**: a plugin manifest could not be turned into a descriptor
//! - **Plugin**: a loaded plugin failed during init, teardown or an invocation

use thiserror::Error;

/// Trait for Quire error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// file paths or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are attributable to a single plugin and leave the
    /// host and every other plugin untouched.
    fn is_recoverable(&self) -> bool;
}

/// Manifest parsing failure
///
/// Every malformed input maps to one of these variants; parsing never panics.
///
/// # Examples
///
/// ```
/// use sdk::errors::{ErrorExt, ManifestError};
/// use sdk::PluginDescriptor;
///
/// let err = PluginDescriptor::parse(b"not toml at all [").unwrap_err();
/// assert!(matches!(err, ManifestError::Syntax(_)));
/// assert!(err.is_recoverable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("Manifest is not valid UTF-8")]
    NotUtf8,

    #[error("Manifest syntax error: {0}")]
    Syntax(String),

    #[error("Invalid plugin identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown capability: {0:?}")]
    UnknownCapability(String),

    #[error("Invalid artifact file name: {0:?}")]
    InvalidArtifact(String),

    #[error("Invalid version {value:?} in {field}: {reason}")]
    InvalidVersion {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Host version range is empty: min {min} is above max {max}")]
    EmptyVersionRange { min: String, max: String },

    #[error("Invalid content checksum: {0}")]
    InvalidChecksum(String),

    #[error("Menu contributions require the ui-contribution capability")]
    UndeclaredMenu,

    #[error("Duplicate menu action id: {0}")]
    DuplicateMenuAction(String),

    #[error("Menu contributions may nest only one level deep")]
    MenuTooDeep,
}

impl ErrorExt for ManifestError {
    fn user_hint(&self) -> &str {
        match self {
            Self::NotUtf8 | Self::Syntax(_) => "The plugin manifest could not be read as TOML",
            Self::InvalidIdentifier(_) => {
                "Plugin ids may contain only letters, digits, '.', '-' and '_'"
            }
            Self::MissingField(_) => "The plugin manifest is incomplete",
            Self::UnknownCapability(_) => "The plugin declares a capability this host does not know",
            Self::InvalidArtifact(_) => "The plugin artifact must be a plain file name",
            Self::InvalidVersion { .. } | Self::EmptyVersionRange { .. } => {
                "The plugin manifest declares an invalid version"
            }
            Self::InvalidChecksum(_) => "The plugin checksum must be 'blake3:' followed by 64 hex digits",
            Self::UndeclaredMenu | Self::DuplicateMenuAction(_) | Self::MenuTooDeep => {
                "The plugin declares invalid menu contributions"
            }
        }
    }

    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Errors raised by plugin code through the module contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("Plugin initialization failed: {0}")]
    Init(String),

    #[error("Plugin teardown failed: {0}")]
    Teardown(String),

    #[error("Unsupported invocation: {0}")]
    Unsupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Plugin execution failed: {0}")]
    Execution(String),
}

impl ErrorExt for PluginError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Init(_) => "The plugin could not start. Check plugin logs",
            Self::Teardown(_) => "The plugin did not shut down cleanly",
            Self::Unsupported(_) => "The plugin does not support this action",
            Self::InvalidInput(_) => "The plugin rejected the request",
            Self::Execution(_) => "Plugin execution failed. Check plugin logs",
        }
    }

    fn is_recoverable(&self) -> bool {
        true
    }
}
