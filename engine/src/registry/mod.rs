//! Plugin registry
//!
//! The registry is the single source of truth for what the host knows about
//! its plugins:
//!
//! - **catalog**: id → descriptor and bundle location, rebuilt on each scan
//! - **states**: id → lifecycle state, one per catalog id
//! - **last errors**: id → most recent lifecycle failure
//! - **instances**: id → live plugin instance, present only while Loaded
//!
//! Queries are public. Mutations are crate-private and performed only by the
//! lifecycle manager, which serializes operations per id.

use crate::discovery::DiscoveredPlugin;
use crate::errors::LifecycleError;
use crate::lifecycle::PluginState;
use crate::runtime::PluginInstance;
use crate::trust::RiskScore;
use sdk::{PluginDescriptor, Version, MANIFEST_FILE};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

/// A discovered plugin and where its bundle lives
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub descriptor: Arc<PluginDescriptor>,
    pub bundle_dir: PathBuf,
}

impl CatalogEntry {
    pub fn manifest_path(&self) -> PathBuf {
        self.bundle_dir.join(MANIFEST_FILE)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.bundle_dir.join(&self.descriptor.artifact)
    }

    /// Detached signature shipped next to the artifact
    pub fn signature_path(&self) -> PathBuf {
        self.bundle_dir.join(format!("{}.sig", self.descriptor.artifact))
    }
}

/// Display row for one plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: Version,
    pub state: PluginState,
    pub risk: RiskScore,
    pub bundle_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// How a scan changed the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CatalogDiff {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Default)]
struct RegistryInner {
    catalog: BTreeMap<String, CatalogEntry>,
    states: HashMap<String, PluginState>,
    last_errors: HashMap<String, LifecycleError>,
    instances: HashMap<String, Arc<PluginInstance>>,
    /// Ids dropped by an in-progress rescan
    retiring: HashSet<String>,
}

/// Catalog, state, error and instance maps
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// All descriptors, ordered by id
    pub fn descriptors(&self) -> Vec<Arc<PluginDescriptor>> {
        self.read()
            .catalog
            .values()
            .map(|entry| Arc::clone(&entry.descriptor))
            .collect()
    }

    pub fn descriptor(&self, id: &str) -> Option<Arc<PluginDescriptor>> {
        self.read()
            .catalog
            .get(id)
            .map(|entry| Arc::clone(&entry.descriptor))
    }

    pub fn entry(&self, id: &str) -> Option<CatalogEntry> {
        self.read().catalog.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().catalog.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.read().catalog.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().catalog.is_empty()
    }

    pub fn state(&self, id: &str) -> Option<PluginState> {
        self.read().states.get(id).copied()
    }

    /// Most recent failure for `id`; cleared by a successful load
    pub fn last_error(&self, id: &str) -> Option<LifecycleError> {
        self.read().last_errors.get(id).cloned()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.state(id).is_some_and(|s| s.is_loaded())
    }

    /// Ids currently in the Loaded state
    pub fn loaded_ids(&self) -> Vec<String> {
        let inner = self.read();
        inner
            .catalog
            .keys()
            .filter(|id| inner.states.get(*id).is_some_and(|s| s.is_loaded()))
            .cloned()
            .collect()
    }

    /// Advisory risk score for `id`
    pub fn risk(&self, id: &str) -> Option<RiskScore> {
        self.descriptor(id).map(|d| RiskScore::assess(&d))
    }

    pub fn summary(&self, id: &str) -> Option<PluginSummary> {
        let inner = self.read();
        let entry = inner.catalog.get(id)?;
        Some(Self::summarize(&inner, id, entry))
    }

    /// Summaries for every catalog entry, ordered by id
    pub fn summaries(&self) -> Vec<PluginSummary> {
        let inner = self.read();
        inner
            .catalog
            .iter()
            .map(|(id, entry)| Self::summarize(&inner, id, entry))
            .collect()
    }

    fn summarize(inner: &RegistryInner, id: &str, entry: &CatalogEntry) -> PluginSummary {
        let descriptor = &entry.descriptor;
        PluginSummary {
            id: id.to_string(),
            name: descriptor.name.clone(),
            version: descriptor.version,
            state: inner
                .states
                .get(id)
                .copied()
                .unwrap_or(PluginState::Discovered),
            risk: RiskScore::assess(descriptor),
            bundle_dir: entry.bundle_dir.clone(),
            last_error: inner.last_errors.get(id).map(ToString::to_string),
        }
    }

    pub(crate) fn instance(&self, id: &str) -> Option<Arc<PluginInstance>> {
        self.read().instances.get(id).cloned()
    }

    pub(crate) fn is_retiring(&self, id: &str) -> bool {
        self.read().retiring.contains(id)
    }

    /// Ids present in the catalog but absent from `keep`
    pub(crate) fn missing_from(&self, keep: &HashSet<&str>) -> Vec<String> {
        self.read()
            .catalog
            .keys()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect()
    }

    pub(crate) fn mark_retiring(&self, ids: &[String]) {
        let mut inner = self.write();
        inner.retiring.extend(ids.iter().cloned());
    }

    /// Move `id` to `next` if the state machine allows it
    ///
    /// Returns the previous state on success.
    pub(crate) fn transition(&self, id: &str, next: PluginState) -> Option<PluginState> {
        let mut inner = self.write();
        Self::transition_locked(&mut inner, id, next)
    }

    fn transition_locked(
        inner: &mut RegistryInner,
        id: &str,
        next: PluginState,
    ) -> Option<PluginState> {
        let current = inner.states.get_mut(id)?;
        if !current.can_transition_to(&next) {
            tracing::error!(
                plugin_id = %id,
                from = %current,
                to = %next,
                "Refusing invalid state transition"
            );
            return None;
        }
        Some(std::mem::replace(current, next))
    }

    /// Record a failure and move to `next` in one step
    pub(crate) fn fail(
        &self,
        id: &str,
        next: PluginState,
        error: LifecycleError,
    ) -> Option<PluginState> {
        let mut inner = self.write();
        inner.last_errors.insert(id.to_string(), error);
        Self::transition_locked(&mut inner, id, next)
    }

    pub(crate) fn record_error(&self, id: &str, error: LifecycleError) {
        self.write().last_errors.insert(id.to_string(), error);
    }

    /// Publish a new instance: state Loaded, handle stored, last error cleared
    pub(crate) fn complete_load(
        &self,
        id: &str,
        instance: Arc<PluginInstance>,
    ) -> Option<PluginState> {
        let mut inner = self.write();
        let next = PluginState::Loaded {
            instance: instance.id(),
        };
        let previous = Self::transition_locked(&mut inner, id, next)?;
        inner.instances.insert(id.to_string(), instance);
        inner.last_errors.remove(id);
        Some(previous)
    }

    /// Detach the instance of a Loaded plugin
    ///
    /// The state stays Loaded until [`finish_unload`](Self::finish_unload);
    /// new invocations see no instance. Returns the current state when the
    /// plugin is not Loaded.
    pub(crate) fn detach_instance(&self, id: &str) -> Result<Arc<PluginInstance>, PluginState> {
        let mut inner = self.write();
        let state = inner
            .states
            .get(id)
            .copied()
            .unwrap_or(PluginState::Discovered);
        if !state.is_loaded() {
            return Err(state);
        }
        inner.instances.remove(id).ok_or(state)
    }

    pub(crate) fn finish_unload(&self, id: &str) -> Option<PluginState> {
        self.transition(id, PluginState::Unloaded)
    }

    /// Replace the catalog with a scan result
    ///
    /// Removed ids must already be unloaded. Surviving ids keep their state;
    /// their descriptor is replaced.
    pub(crate) fn apply_catalog(&self, discovered: Vec<DiscoveredPlugin>) -> CatalogDiff {
        let mut inner = self.write();
        let mut diff = CatalogDiff::default();

        let mut next = BTreeMap::new();
        for plugin in discovered {
            let id = plugin.descriptor.id.clone();
            match inner.catalog.get(&id) {
                None => diff.added.push(id.clone()),
                Some(existing)
                    if *existing.descriptor != plugin.descriptor
                        || existing.bundle_dir != plugin.bundle_dir =>
                {
                    diff.updated.push(id.clone())
                }
                Some(_) => {}
            }
            next.insert(
                id,
                CatalogEntry {
                    descriptor: Arc::new(plugin.descriptor),
                    bundle_dir: plugin.bundle_dir,
                },
            );
        }

        diff.removed = inner
            .catalog
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();

        for id in &diff.removed {
            inner.states.remove(id);
            inner.last_errors.remove(id);
            inner.retiring.remove(id);
            if let Some(instance) = inner.instances.remove(id) {
                tracing::warn!(plugin_id = %id, "Dropping catalog entry with a live instance");
                drop(instance);
            }
        }

        for id in &diff.added {
            inner.states.insert(id.clone(), PluginState::Discovered);
        }

        inner.catalog = next;
        diff
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("Registry")
            .field("plugins", &inner.catalog.len())
            .field("loaded", &inner.instances.len())
            .finish()
    }
}
