use super::state::{InstanceId, PluginState, RejectionReason};
use crate::config::{Config, ConfigError, FileConfigStore, MemoryConfigStore, PluginConfigStore};
use crate::discovery::Scanner;
use crate::errors::LifecycleError;
use crate::events::{Event, EventBus, EventType};
use crate::registry::{CatalogEntry, Registry};
use crate::runtime::{
    panic_message, InstanceError, NativeLoader, PluginInstance, PluginLoader, StagedArtifact,
};
use crate::trust::{PluginArtifact, TrustRejection, TrustValidator, TrustVerdict};
use futures::future::{BoxFuture, FutureExt, Shared};
use sdk::{Invocation, PluginContext, PluginDescriptor, PluginError, PluginOutput, Version};
use std::any::Any;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum OpKind {
    Load,
    Unload,
}

type OpOutcome = Shared<BoxFuture<'static, Result<(), LifecycleError>>>;

/// Directory under the data root holding private copies of loaded artifacts
const STAGING_DIR: &str = ".staged";

pub(super) struct InFlight {
    pub(super) kind: OpKind,
    pub(super) outcome: OpOutcome,
    cancel: CancellationToken,
    /// Set once a load has decided its outcome; it can no longer be cancelled
    settled: bool,
    seq: u64,
}

enum Pending {
    /// Result of this operation is the caller's result
    Join(OpOutcome),
    /// Another kind of operation must finish first
    Wait(OpOutcome),
}

pub(super) struct Inner {
    pub(super) registry: Arc<Registry>,
    validator: Arc<TrustValidator>,
    loader: Arc<dyn PluginLoader>,
    config_store: Arc<dyn PluginConfigStore>,
    pub(super) events: Arc<EventBus>,
    pub(super) scanner: Scanner,
    host_version: Version,
    data_dir: PathBuf,
    pub(super) locations: Vec<PathBuf>,
    pub(super) in_flight: Mutex<HashMap<String, InFlight>>,
    pub(super) scan_lock: Mutex<()>,
    next_instance: AtomicU64,
    next_op: AtomicU64,
}

/// Drives plugins through validation, instantiation and teardown
///
/// Cheap to clone; clones share the same registry and in-flight table.
///
/// # Examples
///
/// ```no_run
/// use quire_engine::config::Config;
/// use quire_engine::lifecycle::LifecycleManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load_or_create()?;
/// let manager = LifecycleManager::from_config(&config)?;
///
/// let report = manager.scan().await;
/// for id in &report.added {
///     if let Err(e) = manager.load(id).await {
///         eprintln!("{}", e);
///     }
/// }
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LifecycleManager {
    pub(super) inner: Arc<Inner>,
}

/// Builder for [`LifecycleManager`]
pub struct LifecycleBuilder {
    validator: TrustValidator,
    loader: Option<Arc<dyn PluginLoader>>,
    config_store: Option<Arc<dyn PluginConfigStore>>,
    registry: Option<Arc<Registry>>,
    events: Option<Arc<EventBus>>,
    host_version: Version,
    data_dir: PathBuf,
    locations: Vec<PathBuf>,
}

impl LifecycleBuilder {
    /// Loader used to instantiate validated plugins (default: native)
    pub fn loader(mut self, loader: impl PluginLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Store of per-plugin settings (default: in memory)
    pub fn config_store(mut self, store: Arc<dyn PluginConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn host_version(mut self, version: Version) -> Self {
        self.host_version = version;
        self
    }

    /// Root under which each plugin gets a private data directory
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Locations searched by [`LifecycleManager::scan`]
    pub fn locations(mut self, locations: Vec<PathBuf>) -> Self {
        self.locations = locations;
        self
    }

    pub fn build(self) -> LifecycleManager {
        LifecycleManager {
            inner: Arc::new(Inner {
                registry: self.registry.unwrap_or_default(),
                validator: Arc::new(self.validator),
                loader: self.loader.unwrap_or_else(|| Arc::new(NativeLoader::new())),
                config_store: self
                    .config_store
                    .unwrap_or_else(|| Arc::new(MemoryConfigStore::new())),
                events: self.events.unwrap_or_default(),
                scanner: Scanner::new(),
                host_version: self.host_version,
                data_dir: self.data_dir,
                locations: self.locations,
                in_flight: Mutex::new(HashMap::new()),
                scan_lock: Mutex::new(()),
                next_instance: AtomicU64::new(1),
                next_op: AtomicU64::new(1),
            }),
        }
    }
}

impl LifecycleManager {
    pub fn builder(validator: TrustValidator) -> LifecycleBuilder {
        LifecycleBuilder {
            validator,
            loader: None,
            config_store: None,
            registry: None,
            events: None,
            host_version: crate::config::default_host_version(),
            data_dir: std::env::temp_dir().join("quire"),
            locations: Vec::new(),
        }
    }

    /// Wire a manager from configuration: native loader, file-backed settings
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let validator = TrustValidator::from_config(&config.security)?;
        Ok(Self::builder(validator)
            .config_store(Arc::new(FileConfigStore::new(&config.core.data_dir)))
            .host_version(config.plugins.host_version)
            .data_dir(config.core.data_dir.join("plugins"))
            .locations(config.plugins.locations.clone())
            .build())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn host_version(&self) -> Version {
        self.inner.host_version
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.inner.locations
    }

    pub fn config_store(&self) -> &Arc<dyn PluginConfigStore> {
        &self.inner.config_store
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.inner.registry.is_loaded(id)
    }

    pub fn state(&self, id: &str) -> Option<PluginState> {
        self.inner.registry.state(id)
    }

    pub fn last_error(&self, id: &str) -> Option<LifecycleError> {
        self.inner.registry.last_error(id)
    }

    /// Receive lifecycle notifications
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        self.inner.events.subscribe(event_type).await
    }

    /// Validate and instantiate a plugin
    ///
    /// Returns immediately when the plugin is already loaded. Concurrent
    /// calls for the same id share one validation run and one result.
    ///
    /// # Errors
    ///
    /// `UnknownPlugin` when the id is not in the catalog,
    /// `ConcurrentRequestSuperseded` while a rescan is removing it, and
    /// otherwise the failure that left the plugin Rejected.
    pub async fn load(&self, id: &str) -> Result<(), LifecycleError> {
        loop {
            let pending = {
                let mut in_flight = self.inner.in_flight.lock().await;
                match in_flight.get(id) {
                    Some(op) if op.kind == OpKind::Load => {
                        tracing::debug!(plugin_id = %id, "Joining in-flight load");
                        Pending::Join(op.outcome.clone())
                    }
                    Some(op) => Pending::Wait(op.outcome.clone()),
                    None => {
                        let registry = &self.inner.registry;
                        if !registry.contains(id) {
                            return Err(LifecycleError::UnknownPlugin(id.to_string()));
                        }
                        if registry.is_retiring(id) {
                            return Err(LifecycleError::ConcurrentRequestSuperseded(
                                id.to_string(),
                            ));
                        }
                        if registry.is_loaded(id) {
                            return Ok(());
                        }
                        Pending::Join(Inner::spawn_op(
                            &self.inner,
                            &mut in_flight,
                            id,
                            OpKind::Load,
                        ))
                    }
                }
            };

            match pending {
                Pending::Join(outcome) => return outcome.await,
                Pending::Wait(outcome) => {
                    let _ = outcome.await;
                }
            }
        }
    }

    /// Tear down a loaded plugin
    ///
    /// # Errors
    ///
    /// `NotLoaded` when the plugin is in any state other than Loaded; the
    /// state is left as it was. `TeardownFailed` when the plugin reported an
    /// error while shutting down; the plugin is Unloaded regardless.
    pub async fn unload(&self, id: &str) -> Result<(), LifecycleError> {
        self.inner.unload(id).await
    }

    /// Cancel an in-flight load
    ///
    /// Returns true when the load will end Rejected(cancelled). A load that
    /// has already committed its outcome is left alone and this returns false.
    pub async fn cancel(&self, id: &str) -> bool {
        let in_flight = self.inner.in_flight.lock().await;
        match in_flight.get(id) {
            Some(op) if op.kind == OpKind::Load && !op.settled => {
                tracing::info!(plugin_id = %id, "Cancelling load");
                op.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Run trust validation without changing any state
    pub async fn verify(&self, id: &str) -> Result<TrustVerdict, LifecycleError> {
        let entry = self
            .inner
            .registry
            .entry(id)
            .ok_or_else(|| LifecycleError::UnknownPlugin(id.to_string()))?;

        let (manifest, artifact) = read_bundle(id, &entry).await?;
        if let Err(verdict) = recheck_manifest(&entry, &manifest) {
            return Ok(verdict);
        }

        let validator = Arc::clone(&self.inner.validator);
        let descriptor = Arc::clone(&entry.descriptor);
        let host_version = self.inner.host_version;
        tokio::task::spawn_blocking(move || validator.validate(&descriptor, &artifact, &host_version))
            .await
            .map_err(|e| LifecycleError::ArtifactUnavailable {
                plugin_id: id.to_string(),
                message: format!("validation did not complete: {}", e),
            })
    }

    /// Deliver an invocation to a loaded plugin
    ///
    /// # Errors
    ///
    /// `CapabilityNotDeclared` or `MenuActionNotDeclared` when the plugin did
    /// not declare the entry point, `NotLoaded` when it is not running, and
    /// `InvocationFailed` for errors and panics raised by plugin code.
    pub async fn invoke(
        &self,
        id: &str,
        invocation: Invocation,
    ) -> Result<PluginOutput, LifecycleError> {
        let registry = &self.inner.registry;
        let descriptor = registry
            .descriptor(id)
            .ok_or_else(|| LifecycleError::UnknownPlugin(id.to_string()))?;

        authorize(&descriptor, &invocation)?;

        let not_loaded = |state: Option<PluginState>| LifecycleError::NotLoaded {
            plugin_id: id.to_string(),
            state: state.map_or("unknown", |s| s.name()).to_string(),
        };
        let instance = registry
            .instance(id)
            .ok_or_else(|| not_loaded(registry.state(id)))?;

        let name = invocation.name();
        tracing::debug!(plugin_id = %id, invocation = name, "Invoking plugin");

        let joined = tokio::task::spawn_blocking(move || instance.handle(invocation)).await;
        match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(InstanceError::Released)) => Err(not_loaded(registry.state(id))),
            Ok(Err(InstanceError::Plugin(source))) => {
                tracing::warn!(plugin_id = %id, invocation = name, error = %source, "Plugin invocation failed");
                Err(LifecycleError::InvocationFailed {
                    plugin_id: id.to_string(),
                    source,
                })
            }
            Err(e) => Err(LifecycleError::InvocationFailed {
                plugin_id: id.to_string(),
                source: PluginError::Execution(e.to_string()),
            }),
        }
    }

    /// Cancel pending loads and unload every loaded plugin
    ///
    /// Returns the teardown failures; every plugin ends up unloaded.
    pub async fn shutdown(&self) -> Vec<LifecycleError> {
        tracing::info!("Shutting down plugins");

        let pending: Vec<OpOutcome> = {
            let in_flight = self.inner.in_flight.lock().await;
            in_flight
                .values()
                .map(|op| {
                    if op.kind == OpKind::Load {
                        op.cancel.cancel();
                    }
                    op.outcome.clone()
                })
                .collect()
        };
        futures::future::join_all(pending).await;

        let unloads = self
            .inner
            .registry
            .loaded_ids()
            .into_iter()
            .map(|id| async move { self.unload(&id).await });

        let failures: Vec<LifecycleError> = futures::future::join_all(unloads)
            .await
            .into_iter()
            .filter_map(Result::err)
            .filter(|e| !matches!(e, LifecycleError::NotLoaded { .. }))
            .collect();

        tracing::info!(failures = failures.len(), "All plugins unloaded");
        failures
    }
}

/// Check that `descriptor` declares the entry point `invocation` targets
fn authorize(descriptor: &PluginDescriptor, invocation: &Invocation) -> Result<(), LifecycleError> {
    let capability = invocation.required_capability();
    if !descriptor.capabilities.contains(capability) {
        return Err(LifecycleError::CapabilityNotDeclared {
            plugin_id: descriptor.id.clone(),
            capability,
        });
    }

    if let Invocation::MenuAction { action_id } = invocation {
        if descriptor.menu_action(action_id).is_none() {
            return Err(LifecycleError::MenuActionNotDeclared {
                plugin_id: descriptor.id.clone(),
                action_id: action_id.clone(),
            });
        }
    }

    Ok(())
}

/// Read the manifest, artifact and optional detached signature of a bundle
async fn read_bundle(
    id: &str,
    entry: &CatalogEntry,
) -> Result<(Vec<u8>, PluginArtifact), LifecycleError> {
    let unavailable = |what: &str, e: std::io::Error| LifecycleError::ArtifactUnavailable {
        plugin_id: id.to_string(),
        message: format!("{}: {}", what, e),
    };

    let manifest = tokio::fs::read(entry.manifest_path())
        .await
        .map_err(|e| unavailable("manifest", e))?;
    let bytes = tokio::fs::read(entry.artifact_path())
        .await
        .map_err(|e| unavailable(entry.descriptor.artifact.as_str(), e))?;

    let signature = match tokio::fs::read(entry.signature_path()).await {
        Ok(sig) => Some(sig),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(plugin_id = %id, error = %e, "Signature file unreadable, treating as absent");
            None
        }
    };

    Ok((manifest, PluginArtifact::new(bytes, signature)))
}

/// Name for the staged copy of a descriptor's artifact
fn artifact_file_name(descriptor: &PluginDescriptor) -> String {
    std::path::Path::new(&descriptor.artifact)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("artifact")
        .to_string()
}

/// Re-parse the manifest read at load time
///
/// A manifest that no longer parses rejects the plugin. One that parses but
/// differs from the catalog is reported; the catalog descriptor stays
/// authoritative until the next scan.
fn recheck_manifest(entry: &CatalogEntry, bytes: &[u8]) -> Result<(), TrustVerdict> {
    match PluginDescriptor::parse(bytes) {
        Err(e) => Err(TrustVerdict::rejected(
            TrustRejection::ManifestMalformed,
            e.to_string(),
        )),
        Ok(current) => {
            if current != *entry.descriptor {
                tracing::warn!(
                    plugin_id = %entry.descriptor.id,
                    "Manifest changed on disk since the last scan; rescan to apply it"
                );
            }
            Ok(())
        }
    }
}

type Rejection = (RejectionReason, LifecycleError);

impl Inner {
    /// Start an operation task and register it as in flight
    ///
    /// Must be called with the in-flight table locked.
    pub(super) fn spawn_op(
        inner: &Arc<Self>,
        in_flight: &mut HashMap<String, InFlight>,
        id: &str,
        kind: OpKind,
    ) -> OpOutcome {
        let cancel = CancellationToken::new();
        let seq = inner.next_op.fetch_add(1, Ordering::Relaxed);

        let task_inner = Arc::clone(inner);
        let task_id = id.to_string();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let run = async {
                match kind {
                    OpKind::Load => task_inner.run_load(&task_id, &task_cancel).await,
                    OpKind::Unload => task_inner.run_unload(&task_id).await,
                }
            };
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => task_inner.recover(&task_id, kind, payload).await,
            };

            let mut in_flight = task_inner.in_flight.lock().await;
            if in_flight.get(&task_id).is_some_and(|op| op.seq == seq) {
                in_flight.remove(&task_id);
            }
            result
        });

        let plugin_id = id.to_string();
        let outcome = handle
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    tracing::error!(plugin_id = %plugin_id, error = %e, "Lifecycle task aborted");
                    Err(LifecycleError::Cancelled(plugin_id))
                })
            })
            .boxed()
            .shared();

        in_flight.insert(
            id.to_string(),
            InFlight {
                kind,
                outcome: outcome.clone(),
                cancel,
                settled: false,
                seq,
            },
        );
        outcome
    }

    pub(super) async fn unload(self: &Arc<Self>, id: &str) -> Result<(), LifecycleError> {
        loop {
            let pending = {
                let mut in_flight = self.in_flight.lock().await;
                match in_flight.get(id) {
                    Some(op) if op.kind == OpKind::Unload => Pending::Join(op.outcome.clone()),
                    Some(op) => Pending::Wait(op.outcome.clone()),
                    None => {
                        match self.registry.state(id) {
                            None => return Err(LifecycleError::UnknownPlugin(id.to_string())),
                            Some(state) if !state.is_loaded() => {
                                return Err(LifecycleError::NotLoaded {
                                    plugin_id: id.to_string(),
                                    state: state.name().to_string(),
                                })
                            }
                            Some(_) => {}
                        }
                        Pending::Join(Self::spawn_op(self, &mut in_flight, id, OpKind::Unload))
                    }
                }
            };

            match pending {
                Pending::Join(outcome) => return outcome.await,
                Pending::Wait(outcome) => {
                    let _ = outcome.await;
                }
            }
        }
    }

    async fn publish_transition(&self, id: &str, from: Option<PluginState>, to: PluginState) {
        if let Some(from) = from {
            self.events
                .publish(Event::StateChanged {
                    plugin_id: id.to_string(),
                    from: Some(from),
                    to,
                })
                .await;
        }
    }

    async fn transition(&self, id: &str, to: PluginState) {
        let from = self.registry.transition(id, to);
        self.publish_transition(id, from, to).await;
    }

    async fn reject(&self, id: &str, (reason, error): Rejection) -> Result<(), LifecycleError> {
        let to = PluginState::Rejected { reason };
        let from = self.registry.fail(id, to, error.clone());
        tracing::warn!(plugin_id = %id, %reason, error = %error, "Plugin rejected");
        self.publish_transition(id, from, to).await;
        Err(error)
    }

    /// Stop `cancel` from reaching the load of `id`
    ///
    /// The returned guard keeps the in-flight table locked, so checking the
    /// token and committing the outcome happen as one step.
    async fn settle(&self, id: &str) -> MutexGuard<'_, HashMap<String, InFlight>> {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(op) = in_flight.get_mut(id) {
            op.settled = true;
        }
        in_flight
    }

    /// Keep a teardown failure visible after the load's own outcome
    fn record_teardown(&self, id: &str, teardown: Result<(), LifecycleError>) {
        if let Err(e) = teardown {
            self.registry.record_error(id, e);
        }
    }

    async fn run_load(&self, id: &str, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        let entry = self
            .registry
            .entry(id)
            .ok_or_else(|| LifecycleError::UnknownPlugin(id.to_string()))?;

        tracing::info!(plugin_id = %id, version = %entry.descriptor.version, "Loading plugin");
        self.transition(id, PluginState::Validating).await;

        let instance = match self.validate_and_instantiate(id, &entry, cancel).await {
            Ok(instance) => instance,
            Err(rejection) => return self.reject(id, rejection).await,
        };

        let in_flight = self.settle(id).await;

        if cancel.is_cancelled() {
            drop(in_flight);
            tracing::info!(plugin_id = %id, "Load cancelled after instantiation, releasing");
            let teardown = release_detached(id, instance).await;
            let result = self
                .reject(
                    id,
                    (
                        RejectionReason::Cancelled,
                        LifecycleError::Cancelled(id.to_string()),
                    ),
                )
                .await;
            self.record_teardown(id, teardown);
            return result;
        }

        let instance_id = instance.id();
        match self.registry.complete_load(id, Arc::clone(&instance)) {
            Some(from) => {
                self.publish_transition(
                    id,
                    Some(from),
                    PluginState::Loaded {
                        instance: instance_id,
                    },
                )
                .await;
                drop(in_flight);
                tracing::info!(plugin_id = %id, instance = %instance_id, "Plugin loaded");
                Ok(())
            }
            None => {
                drop(in_flight);
                let teardown = release_detached(id, instance).await;
                self.record_teardown(id, teardown);
                Err(LifecycleError::InstantiationFailed {
                    plugin_id: id.to_string(),
                    message: "plugin left the validating state during load".to_string(),
                })
            }
        }
    }

    async fn validate_and_instantiate(
        &self,
        id: &str,
        entry: &CatalogEntry,
        cancel: &CancellationToken,
    ) -> Result<Arc<PluginInstance>, Rejection> {
        let cancelled = || {
            (
                RejectionReason::Cancelled,
                LifecycleError::Cancelled(id.to_string()),
            )
        };

        let files = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            files = read_bundle(id, entry) => files,
        };
        let (manifest, artifact) =
            files.map_err(|e| (RejectionReason::ArtifactUnavailable, e))?;

        // The validated bytes come back with the verdict and are the only
        // copy the loader ever sees.
        let (verdict, validated) = match recheck_manifest(entry, &manifest) {
            Err(verdict) => (verdict, Vec::new()),
            Ok(()) => {
                let validator = Arc::clone(&self.validator);
                let descriptor = Arc::clone(&entry.descriptor);
                let host_version = self.host_version;
                let validation = tokio::task::spawn_blocking(move || {
                    let verdict = validator.validate(&descriptor, &artifact, &host_version);
                    (verdict, artifact.bytes)
                });

                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled()),
                    joined = validation => joined.map_err(|e| {
                        (
                            RejectionReason::InstantiationFailed,
                            LifecycleError::InstantiationFailed {
                                plugin_id: id.to_string(),
                                message: format!("validation did not complete: {}", e),
                            },
                        )
                    })?,
                }
            }
        };

        if let TrustVerdict::Rejected { reason, detail } = verdict {
            return Err((
                RejectionReason::Trust(reason),
                LifecycleError::ValidationFailed {
                    plugin_id: id.to_string(),
                    reason,
                    detail,
                },
            ));
        }

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        self.instantiate(id, entry, validated).await.map_err(|message| {
            (
                RejectionReason::InstantiationFailed,
                LifecycleError::InstantiationFailed {
                    plugin_id: id.to_string(),
                    message,
                },
            )
        })
    }

    /// Construct and initialize a validated plugin on the blocking pool
    ///
    /// `validated` is staged to a private file for the loader; the bundle is
    /// not read again.
    async fn instantiate(
        &self,
        id: &str,
        entry: &CatalogEntry,
        validated: Vec<u8>,
    ) -> Result<Arc<PluginInstance>, String> {
        let instance_id = InstanceId(self.next_instance.fetch_add(1, Ordering::Relaxed));
        let plugin_id = id.to_string();
        let descriptor = Arc::clone(&entry.descriptor);
        let staging_root = self.data_dir.join(STAGING_DIR).join(id);
        let file_name = artifact_file_name(&descriptor);
        let loader = Arc::clone(&self.loader);
        let store = Arc::clone(&self.config_store);
        let host_version = self.host_version;
        let data_dir = self.data_dir.join(id);

        let joined = tokio::task::spawn_blocking(move || {
            let config = store
                .get(&plugin_id)
                .map_err(|e| format!("plugin settings unavailable: {}", e))?
                .unwrap_or(serde_json::Value::Null);

            std::fs::create_dir_all(&data_dir)
                .map_err(|e| format!("cannot create plugin data directory: {}", e))?;

            let staged = StagedArtifact::stage(&staging_root, instance_id, &file_name, validated)
                .map_err(|e| format!("cannot stage validated artifact: {}", e))?;
            let loaded = loader
                .instantiate(&descriptor, &staged)
                .map_err(|e| e.to_string())?;

            let ctx = PluginContext::new(plugin_id, host_version, config, data_dir);
            let instance =
                PluginInstance::initialize(instance_id, loaded, &ctx).map_err(|e| e.to_string())?;
            Ok(instance.with_staging(staged.into_guard()))
        })
        .await;

        match joined {
            Ok(result) => result.map(Arc::new),
            Err(e) if e.is_panic() => Err(format!(
                "panicked while loading: {}",
                panic_message(e.into_panic().as_ref())
            )),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn run_unload(&self, id: &str) -> Result<(), LifecycleError> {
        let instance = self
            .registry
            .detach_instance(id)
            .map_err(|state| LifecycleError::NotLoaded {
                plugin_id: id.to_string(),
                state: state.name().to_string(),
            })?;

        tracing::info!(plugin_id = %id, instance = %instance.id(), "Unloading plugin");
        let result = release_detached(id, instance).await;

        if let Err(e) = &result {
            self.registry.record_error(id, e.clone());
        }
        self.transition(id, PluginState::Unloaded).await;
        result
    }

    /// Restore a consistent state after an operation task panicked
    async fn recover(
        &self,
        id: &str,
        kind: OpKind,
        payload: Box<dyn Any + Send>,
    ) -> Result<(), LifecycleError> {
        let message = panic_message(payload.as_ref());
        tracing::error!(plugin_id = %id, ?kind, %message, "Lifecycle task panicked");

        match kind {
            OpKind::Load => {
                let error = LifecycleError::InstantiationFailed {
                    plugin_id: id.to_string(),
                    message,
                };
                if self.registry.state(id) == Some(PluginState::Validating) {
                    self.reject(id, (RejectionReason::InstantiationFailed, error))
                        .await
                } else {
                    self.registry.record_error(id, error.clone());
                    Err(error)
                }
            }
            OpKind::Unload => {
                let error = LifecycleError::TeardownFailed {
                    plugin_id: id.to_string(),
                    message,
                };
                self.registry.record_error(id, error.clone());
                Err(error)
            }
        }
    }
}

/// Tear down an instance that is no longer reachable from the registry
async fn release_detached(id: &str, instance: Arc<PluginInstance>) -> Result<(), LifecycleError> {
    let teardown_failed = |message: String| LifecycleError::TeardownFailed {
        plugin_id: id.to_string(),
        message,
    };

    match tokio::task::spawn_blocking(move || instance.release()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::warn!(plugin_id = %id, error = %e, "Plugin teardown failed");
            Err(teardown_failed(e.to_string()))
        }
        Err(e) => Err(teardown_failed(e.to_string())),
    }
}
