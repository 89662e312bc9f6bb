//! Engine error types
//!
//! - **LifecycleError**: a load, unload or invocation did not complete. Stored
//!   per plugin as its last error, so it is `Clone`.
//! - **ScanError**: one location or bundle could not be discovered. The scan
//!   carries on with the remaining bundles.

use crate::trust::{TrustRejection, TrustVerdict};
use sdk::errors::{ErrorExt, ManifestError, PluginError};
use sdk::Capability;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Plugin '{0}' is not in the catalog")]
    UnknownPlugin(String),

    #[error("Plugin '{plugin_id}' failed validation at {} stage ({reason}): {detail}", .reason.stage())]
    ValidationFailed {
        plugin_id: String,
        reason: TrustRejection,
        detail: String,
    },

    #[error("Plugin '{plugin_id}' failed to initialize: {message}")]
    InstantiationFailed { plugin_id: String, message: String },

    #[error("Plugin '{plugin_id}' teardown failed: {message}")]
    TeardownFailed { plugin_id: String, message: String },

    #[error("Plugin '{plugin_id}' is not loaded (state: {state})")]
    NotLoaded { plugin_id: String, state: String },

    #[error("Artifact for plugin '{plugin_id}' is unavailable: {message}")]
    ArtifactUnavailable { plugin_id: String, message: String },

    #[error("Load of plugin '{0}' was cancelled")]
    Cancelled(String),

    #[error("Plugin '{0}' is being removed by a rescan")]
    ConcurrentRequestSuperseded(String),

    #[error("Plugin '{plugin_id}' did not declare the {capability} capability")]
    CapabilityNotDeclared {
        plugin_id: String,
        capability: Capability,
    },

    #[error("Plugin '{plugin_id}' did not declare menu action '{action_id}'")]
    MenuActionNotDeclared { plugin_id: String, action_id: String },

    #[error("Plugin '{plugin_id}' failed: {source}")]
    InvocationFailed {
        plugin_id: String,
        #[source]
        source: PluginError,
    },
}

impl LifecycleError {
    /// Build the error for a rejected verdict; `None` when accepted
    pub fn from_verdict(plugin_id: &str, verdict: &TrustVerdict) -> Option<Self> {
        match verdict {
            TrustVerdict::Accepted => None,
            TrustVerdict::Rejected { reason, detail } => Some(Self::ValidationFailed {
                plugin_id: plugin_id.to_string(),
                reason: *reason,
                detail: detail.clone(),
            }),
        }
    }

    /// Trust rejection carried by this error, if any
    pub fn trust_rejection(&self) -> Option<TrustRejection> {
        match self {
            Self::ValidationFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl ErrorExt for LifecycleError {
    fn user_hint(&self) -> &str {
        match self {
            Self::UnknownPlugin(_) => "Run a scan to discover installed plugins",
            Self::ValidationFailed { reason, .. } => match reason {
                TrustRejection::ChecksumMismatch => {
                    "The plugin file does not match its manifest. Reinstall the plugin"
                }
                TrustRejection::SignatureMissing => "The plugin is not signed",
                TrustRejection::SignatureUntrusted => {
                    "The plugin is signed by an identity this host does not trust"
                }
                TrustRejection::HostVersionIncompatible => {
                    "The plugin does not support this version of the application"
                }
                TrustRejection::EntitlementDenied => {
                    "The plugin requests permissions it is not entitled to"
                }
                TrustRejection::ManifestMalformed => "The plugin manifest is invalid",
            },
            Self::InstantiationFailed { .. } => "The plugin could not start. Check plugin logs",
            Self::TeardownFailed { .. } => "The plugin did not shut down cleanly",
            Self::NotLoaded { .. } => "Load the plugin first",
            Self::ArtifactUnavailable { .. } => {
                "The plugin file is missing or unreadable. Reinstall the plugin"
            }
            Self::Cancelled(_) => "The operation was cancelled",
            Self::ConcurrentRequestSuperseded(_) => "The plugin was removed from disk",
            Self::CapabilityNotDeclared { .. } | Self::MenuActionNotDeclared { .. } => {
                "The plugin does not offer this action"
            }
            Self::InvocationFailed { source, .. } => source.user_hint(),
        }
    }

    fn is_recoverable(&self) -> bool {
        // Every failure is scoped to one plugin
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("Plugin location {path:?} is unreadable: {message}")]
    LocationUnreadable { path: PathBuf, message: String },

    #[error("Manifest {path:?} is unreadable: {message}")]
    ManifestUnreadable { path: PathBuf, message: String },

    #[error("Manifest {path:?} is malformed: {source}")]
    ManifestMalformed {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    #[error("Plugin id '{id}' in {path:?} was already discovered in {first:?}")]
    DuplicateIdentifier {
        id: String,
        path: PathBuf,
        first: PathBuf,
    },
}

impl ScanError {
    /// Path the error refers to
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::LocationUnreadable { path, .. }
            | Self::ManifestUnreadable { path, .. }
            | Self::ManifestMalformed { path, .. }
            | Self::DuplicateIdentifier { path, .. } => path,
        }
    }
}

impl ErrorExt for ScanError {
    fn user_hint(&self) -> &str {
        match self {
            Self::LocationUnreadable { .. } => "Check the configured plugin locations",
            Self::ManifestUnreadable { .. } => "A plugin manifest could not be read",
            Self::ManifestMalformed { source, .. } => source.user_hint(),
            Self::DuplicateIdentifier { .. } => {
                "Two installed plugins use the same id. Remove one of them"
            }
        }
    }

    fn is_recoverable(&self) -> bool {
        true
    }
}
