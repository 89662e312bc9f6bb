//! Runtime module for instantiating plugins
//!
//! This module provides two loader implementations:
//! - NativeLoader: Loads plugins from native shared libraries via `libloading`
//! - BuiltinLoader: Instantiates plugins compiled into the host
//!
//! Loaders receive a [`StagedArtifact`]: the validated bytes and a private
//! copy of them on disk, never the bundle path.
//!
//! A loaded plugin is wrapped in a [`PluginInstance`], which isolates panics
//! raised by plugin code and guarantees the module is torn down and dropped
//! before the library that contains its code.

pub mod builtin;
pub mod native;
pub mod staging;

pub use builtin::BuiltinLoader;
pub use native::NativeLoader;
pub use staging::{StagedArtifact, StagingGuard};

use crate::lifecycle::InstanceId;
use sdk::{Invocation, PluginContext, PluginDescriptor, PluginError, PluginModule, PluginOutput};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Failed to load library: {0}")]
    LibraryLoadFailed(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Plugin constructor returned null")]
    NullInstance,

    #[error("No built-in plugin registered for '{0}'")]
    UnknownBuiltin(String),
}

/// A freshly constructed, not yet initialized plugin
pub struct LoadedModule {
    pub module: Box<dyn PluginModule>,
    /// Library holding the module's code, if it came from one
    pub library: Option<libloading::Library>,
}

impl LoadedModule {
    pub fn builtin(module: Box<dyn PluginModule>) -> Self {
        Self {
            module,
            library: None,
        }
    }
}

/// Turns a validated artifact into a plugin module
pub trait PluginLoader: Send + Sync {
    /// Construct the plugin described by `descriptor` from `artifact`
    ///
    /// Implementations load the staged copy; the bundle on disk may have
    /// changed since validation.
    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        artifact: &StagedArtifact,
    ) -> Result<LoadedModule, LoaderError>;
}

/// Render a panic payload as text
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Why an instance could not serve a call
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("instance has been released")]
    Released,

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// A live plugin owned by the registry
///
/// Field order matters: `module` is declared before `library`, and the
/// staged copy last, so that an instance dropped without `release` still
/// frees the module first and unmaps the library before its file goes.
pub struct PluginInstance {
    id: InstanceId,
    module: RwLock<Option<Box<dyn PluginModule>>>,
    library: Mutex<Option<libloading::Library>>,
    _staging: Option<StagingGuard>,
}

impl PluginInstance {
    /// Initialize a loaded module
    ///
    /// Panics inside `init` are caught and reported as `PluginError::Init`.
    /// On failure the module is dropped before its library.
    pub fn initialize(
        id: InstanceId,
        loaded: LoadedModule,
        ctx: &PluginContext,
    ) -> Result<Self, PluginError> {
        let LoadedModule {
            mut module,
            library,
        } = loaded;

        let outcome = catch_unwind(AssertUnwindSafe(|| module.init(ctx)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(PluginError::Init(format!(
                "panicked during init: {}",
                panic_message(payload.as_ref())
            ))),
        };

        if let Some(e) = failure {
            drop(module);
            drop(library);
            return Err(e);
        }

        Ok(Self {
            id,
            module: RwLock::new(Some(module)),
            library: Mutex::new(library),
            _staging: None,
        })
    }

    /// Keep the staged artifact until this instance is dropped
    pub fn with_staging(mut self, guard: StagingGuard) -> Self {
        self._staging = Some(guard);
        self
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Whether `release` has already run
    pub fn is_released(&self) -> bool {
        self.module
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Deliver an invocation; panics become `PluginError::Execution`
    pub fn handle(&self, invocation: Invocation) -> Result<PluginOutput, InstanceError> {
        let guard = self.module.read().unwrap_or_else(PoisonError::into_inner);
        let module = guard.as_ref().ok_or(InstanceError::Released)?;

        match catch_unwind(AssertUnwindSafe(|| module.handle(invocation))) {
            Ok(result) => result.map_err(InstanceError::from),
            Err(payload) => Err(InstanceError::Plugin(PluginError::Execution(format!(
                "panicked: {}",
                panic_message(payload.as_ref())
            )))),
        }
    }

    /// Tear down and drop the module, then drop its library
    ///
    /// Waits for in-progress invocations. The module is gone after this
    /// returns, whether or not teardown reported an error. Releasing twice is
    /// a no-op.
    pub fn release(&self) -> Result<(), PluginError> {
        let module = self
            .module
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(mut module) = module else {
            return Ok(());
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| module.teardown()));
        drop(module);

        let library = self
            .library
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(library);

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(PluginError::Teardown(format!(
                "panicked during teardown: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}
