use super::manager::LifecycleManager;
use super::state::PluginState;
use crate::discovery::DiscoveredPlugin;
use crate::errors::{LifecycleError, ScanError};
use crate::events::Event;
use futures::StreamExt;
use std::collections::HashSet;

/// What a scan found and how it changed the catalog
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Ids that entered the catalog
    pub added: Vec<String>,
    /// Ids whose descriptor or bundle location changed
    pub updated: Vec<String>,
    /// Ids that left the catalog; loaded ones were unloaded first
    pub removed: Vec<String>,
    /// Bundles that could not be discovered
    pub skipped: Vec<ScanError>,
}

impl ScanReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

impl LifecycleManager {
    /// Rebuild the catalog from the configured locations
    ///
    /// Ids no longer on disk are unloaded (if loaded) and then removed. New
    /// ids enter the Discovered state. Ids that survive keep their state,
    /// including any running instance. Scans do not overlap.
    pub async fn scan(&self) -> ScanReport {
        let inner = &self.inner;
        let _scan = inner.scan_lock.lock().await;

        tracing::info!(locations = inner.locations.len(), "Scanning for plugins");
        inner.events.publish(Event::ScanStarted).await;

        let mut discovered: Vec<DiscoveredPlugin> = Vec::new();
        let mut skipped = Vec::new();
        let mut stream = Box::pin(inner.scanner.scan(&inner.locations));
        while let Some(item) = stream.next().await {
            match item {
                Ok(plugin) => discovered.push(plugin),
                Err(e) => {
                    tracing::warn!(path = %e.path().display(), error = %e, "Skipping plugin bundle");
                    inner
                        .events
                        .publish(Event::ManifestSkipped {
                            path: e.path().to_path_buf(),
                            reason: e.to_string(),
                        })
                        .await;
                    skipped.push(e);
                }
            }
        }

        let keep: HashSet<&str> = discovered
            .iter()
            .map(|p| p.descriptor.id.as_str())
            .collect();
        let retiring = inner.registry.missing_from(&keep);
        self.retire(&retiring).await;

        let report = {
            // Held so no load starts between the diff and its events
            let _in_flight = inner.in_flight.lock().await;
            let diff = inner.registry.apply_catalog(discovered);

            for id in &diff.added {
                inner
                    .events
                    .publish(Event::StateChanged {
                        plugin_id: id.clone(),
                        from: None,
                        to: PluginState::Discovered,
                    })
                    .await;
            }
            for id in &diff.removed {
                inner
                    .events
                    .publish(Event::PluginDropped {
                        plugin_id: id.clone(),
                    })
                    .await;
            }
            for id in &diff.updated {
                if inner.registry.is_loaded(id) {
                    tracing::info!(plugin_id = %id, "Manifest changed; reload the plugin to apply it");
                }
            }

            ScanReport {
                added: diff.added,
                updated: diff.updated,
                removed: diff.removed,
                skipped,
            }
        };

        inner
            .events
            .publish(Event::ScanCompleted {
                discovered: inner.registry.len(),
                skipped: report.skipped.len(),
                removed: report.removed.len(),
            })
            .await;

        tracing::info!(
            plugins = inner.registry.len(),
            added = report.added.len(),
            removed = report.removed.len(),
            skipped = report.skipped.len(),
            "Scan complete"
        );
        report
    }

    /// Stop pending loads of `ids` and unload any that are loaded
    async fn retire(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        self.inner.registry.mark_retiring(ids);

        for id in ids {
            self.cancel(id).await;
            match self.inner.unload(id).await {
                Ok(()) | Err(LifecycleError::NotLoaded { .. }) => {}
                Err(e) => {
                    tracing::warn!(plugin_id = %id, error = %e, "Forced unload reported an error");
                }
            }
            tracing::info!(plugin_id = %id, "Plugin removed from disk");
        }
    }
}
