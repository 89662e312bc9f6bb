//! Native loader for plugins shipped as shared libraries
//!
//! The NativeLoader opens the staged copy of a plugin's artifact
//! (.so/.dylib/.dll) with `libloading` and calls its `create_plugin`
//! constructor. It performs no verification of its own: the staged bytes are
//! the ones that passed the trust pipeline.
//!
//! # Examples
//!
//! ```no_run
//! use quire_engine::lifecycle::InstanceId;
//! use quire_engine::runtime::{NativeLoader, PluginLoader, StagedArtifact};
//! use sdk::PluginDescriptor;
//! use std::path::Path;
//!
//! # fn example(descriptor: &PluginDescriptor, validated: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! let staged = StagedArtifact::stage(
//!     Path::new("/var/lib/quire/plugins/.staged/pdf-export"),
//!     InstanceId(1),
//!     "libpdf_export.so",
//!     validated,
//! )?;
//! let loaded = NativeLoader::new().instantiate(descriptor, &staged)?;
//! assert!(loaded.library.is_some());
//! # Ok(())
//! # }
//! ```

use super::{LoadedModule, LoaderError, PluginLoader, StagedArtifact};
use sdk::plugin::CONSTRUCTOR_SYMBOL;
use sdk::{PluginDescriptor, PluginModule};

/// Loader for native shared-library plugins
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }
}

impl PluginLoader for NativeLoader {
    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        artifact: &StagedArtifact,
    ) -> Result<LoadedModule, LoaderError> {
        let artifact_path = artifact.path();
        tracing::info!(
            "Loading plugin '{}' from {}",
            descriptor.id,
            artifact_path.display()
        );

        // SAFETY: the staged bytes passed trust validation; running its
        // initializers is the point of loading it.
        let lib = unsafe {
            libloading::Library::new(artifact_path).map_err(|e| {
                tracing::error!("Failed to load library {}: {}", artifact_path.display(), e);
                LoaderError::LibraryLoadFailed(e.to_string())
            })?
        };

        let module = {
            // SAFETY: the symbol type matches the one emitted by `export_plugin!`.
            let create_plugin: libloading::Symbol<unsafe extern "C" fn() -> *mut dyn PluginModule> =
                unsafe {
                    lib.get(CONSTRUCTOR_SYMBOL).map_err(|e| {
                        tracing::error!(
                            "Symbol 'create_plugin' not found in {}: {}",
                            artifact_path.display(),
                            e
                        );
                        LoaderError::SymbolNotFound(e.to_string())
                    })?
                };

            // SAFETY: a non-null pointer came from `Box::into_raw` in the plugin.
            unsafe {
                let ptr = create_plugin();
                if ptr.is_null() {
                    tracing::error!("create_plugin returned null for '{}'", descriptor.id);
                    return Err(LoaderError::NullInstance);
                }
                Box::from_raw(ptr)
            }
        };

        tracing::debug!("Plugin '{}' constructed", descriptor.id);
        Ok(LoadedModule {
            module,
            library: Some(lib),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::{TrustEvidence, Version, VersionRange};

    fn descriptor() -> PluginDescriptor {
        PluginDescriptor {
            id: "missing".to_string(),
            name: "Missing".to_string(),
            version: Version::new(1, 0, 0),
            author: "a".to_string(),
            description: String::new(),
            artifact: "libmissing.so".to_string(),
            capabilities: Default::default(),
            host: VersionRange::at_least(Version::new(1, 0, 0)),
            entitlements: Vec::new(),
            trust: TrustEvidence::default(),
            menu: Vec::new(),
        }
    }

    fn stage(dir: &std::path::Path, bytes: &[u8]) -> StagedArtifact {
        StagedArtifact::stage(dir, crate::lifecycle::InstanceId(1), "libmissing.so", bytes.to_vec())
            .unwrap()
    }

    #[test]
    fn test_missing_library_fails() {
        let dir = tempfile::tempdir().unwrap();
        let staged = stage(dir.path(), b"");
        std::fs::remove_file(staged.path()).unwrap();

        let result = NativeLoader::new().instantiate(&descriptor(), &staged);
        assert!(matches!(result, Err(LoaderError::LibraryLoadFailed(_))));
    }

    #[test]
    fn test_non_library_bytes_fail() {
        let dir = tempfile::tempdir().unwrap();
        let staged = stage(dir.path(), b"definitely not an object file");

        let result = NativeLoader::new().instantiate(&descriptor(), &staged);
        assert!(matches!(result, Err(LoaderError::LibraryLoadFailed(_))));
    }
}
