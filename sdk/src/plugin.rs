//! Plugin module contract
//!
//! This module defines the `PluginModule` trait every plugin implements and
//! the `PluginContext` handed to it at initialization.

use crate::errors::PluginError;
use crate::types::{Invocation, PluginOutput};
use crate::version::Version;
use std::path::PathBuf;

/// Name of the constructor symbol a native plugin library exports
pub const CONSTRUCTOR_SYMBOL: &[u8] = b"create_plugin";

/// Trait that all plugins must implement
///
/// The host calls `init` once after the plugin passed validation, `handle`
/// any number of times while it is loaded, and `teardown` once before the
/// instance is dropped.
pub trait PluginModule: Send + Sync {
    /// Called once after instantiation
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError>;

    /// Called once before the instance is released
    fn teardown(&mut self) -> Result<(), PluginError>;

    /// Handle an invocation the plugin is entitled to receive
    fn handle(&self, invocation: Invocation) -> Result<PluginOutput, PluginError>;
}

/// Context provided to a plugin at initialization
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Identifier the plugin was loaded under
    pub plugin_id: String,
    /// Version of the host application
    pub host_version: Version,
    /// Persisted per-plugin configuration, `Null` when none was stored
    pub config: serde_json::Value,
    /// Directory the plugin may use for its own state
    pub data_dir: PathBuf,
}

impl PluginContext {
    pub fn new(
        plugin_id: impl Into<String>,
        host_version: Version,
        config: serde_json::Value,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            host_version,
            config,
            data_dir: data_dir.into(),
        }
    }

    /// Read a string setting from the persisted configuration
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Export a plugin type from a native library
///
/// The type must implement [`PluginModule`] and `Default`.
///
/// ```ignore
/// #[derive(Default)]
/// struct WordCount;
///
/// impl sdk::PluginModule for WordCount { /* ... */ }
///
/// sdk::export_plugin!(WordCount);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($plugin:ty) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn create_plugin() -> *mut dyn $crate::PluginModule {
            let plugin: ::std::boxed::Box<dyn $crate::PluginModule> =
                ::std::boxed::Box::new(<$plugin as ::std::default::Default>::default());
            ::std::boxed::Box::into_raw(plugin)
        }
    };
}
