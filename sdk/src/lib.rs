//! Quire SDK
//!
//! Shared library providing the plugin contract and manifest types.
//! This crate is used by both the engine and plugins.

/// Capability model
pub mod capability;

/// Error types and handling
pub mod errors;

/// Manifest and descriptor types
pub mod manifest;

/// Plugin module trait and context
pub mod plugin;

/// Invocation input/output types
pub mod types;

/// Version types
pub mod version;

// Re-export commonly used types
pub use capability::{Capability, CapabilitySet};
pub use errors::{ErrorExt, ManifestError, PluginError};
pub use manifest::{
    ContentChecksum, MenuAction, MenuEntry, MenuItem, PluginDescriptor, TrustEvidence,
    MANIFEST_FILE,
};
pub use plugin::{PluginContext, PluginModule};
pub use types::{ImageFormat, Invocation, PluginOutput};
pub use version::{Version, VersionRange};
