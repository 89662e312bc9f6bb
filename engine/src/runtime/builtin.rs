//! Loader for plugins compiled into the host
//!
//! Built-in plugins still ship a bundle with a manifest and an artifact so
//! they go through the same trust pipeline; the loader only swaps
//! `dlopen` for a registered factory.

use super::{LoadedModule, LoaderError, PluginLoader, StagedArtifact};
use sdk::{PluginDescriptor, PluginModule};
use std::collections::HashMap;

type Factory = Box<dyn Fn() -> Box<dyn PluginModule> + Send + Sync>;

/// Loader backed by in-process factories keyed by plugin id
#[derive(Default)]
pub struct BuiltinLoader {
    factories: HashMap<String, Factory>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `plugin_id`, replacing any previous one
    pub fn register<F>(&mut self, plugin_id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn PluginModule> + Send + Sync + 'static,
    {
        self.factories.insert(plugin_id.into(), Box::new(factory));
    }

    /// Builder-style variant of [`register`](Self::register)
    pub fn with<F>(mut self, plugin_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PluginModule> + Send + Sync + 'static,
    {
        self.register(plugin_id, factory);
        self
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.factories.contains_key(plugin_id)
    }
}

impl PluginLoader for BuiltinLoader {
    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        _artifact: &StagedArtifact,
    ) -> Result<LoadedModule, LoaderError> {
        let factory = self
            .factories
            .get(&descriptor.id)
            .ok_or_else(|| LoaderError::UnknownBuiltin(descriptor.id.clone()))?;

        tracing::debug!("Constructing built-in plugin '{}'", descriptor.id);
        Ok(LoadedModule::builtin(factory()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::{
        Invocation, PluginContext, PluginError, PluginOutput, TrustEvidence, Version, VersionRange,
    };

    struct Echo;

    impl PluginModule for Echo {
        fn init(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
            Ok(())
        }

        fn teardown(&mut self) -> Result<(), PluginError> {
            Ok(())
        }

        fn handle(&self, invocation: Invocation) -> Result<PluginOutput, PluginError> {
            Ok(PluginOutput::text(invocation.name()))
        }
    }

    fn descriptor(id: &str) -> PluginDescriptor {
        PluginDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            version: Version::new(1, 0, 0),
            author: "a".to_string(),
            description: String::new(),
            artifact: "echo.bin".to_string(),
            capabilities: Default::default(),
            host: VersionRange::at_least(Version::new(1, 0, 0)),
            entitlements: Vec::new(),
            trust: TrustEvidence::default(),
            menu: Vec::new(),
        }
    }

    fn staged(dir: &std::path::Path) -> StagedArtifact {
        StagedArtifact::stage(dir, crate::lifecycle::InstanceId(1), "echo.bin", Vec::new()).unwrap()
    }

    #[test]
    fn test_registered_factory_is_used() {
        let loader = BuiltinLoader::new().with("echo", || Box::new(Echo));
        assert!(loader.contains("echo"));

        let dir = tempfile::tempdir().unwrap();
        let loaded = loader
            .instantiate(&descriptor("echo"), &staged(dir.path()))
            .unwrap();
        assert!(loaded.library.is_none());
    }

    #[test]
    fn test_unknown_builtin() {
        let loader = BuiltinLoader::new();
        let dir = tempfile::tempdir().unwrap();
        let result = loader.instantiate(&descriptor("ghost"), &staged(dir.path()));
        assert!(matches!(result, Err(LoaderError::UnknownBuiltin(id)) if id == "ghost"));
    }
}
