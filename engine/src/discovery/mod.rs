//! Plugin discovery
//!
//! Walks the configured plugin locations and yields one item per bundle. A
//! location is either:
//!
//! - a **bundle directory**, containing a `plugin.toml`, or
//! - a **directory of bundles**, whose immediate subdirectories are bundles
//!   (visited in name order; nothing deeper is searched)
//!
//! The scan is a lazy stream. Each call to [`Scanner::scan`] starts over, and
//! an unreadable location or bad manifest produces one error item without
//! ending the stream.
//!
//! # Examples
//!
//! ```no_run
//! use futures::StreamExt;
//! use quire_engine::discovery::Scanner;
//! use std::path::PathBuf;
//!
//! # async fn example() {
//! let locations = vec![PathBuf::from("/usr/share/quire/plugins")];
//! let mut stream = Box::pin(Scanner::new().scan(&locations));
//! while let Some(item) = stream.next().await {
//!     match item {
//!         Ok(plugin) => println!("found {}", plugin.descriptor.id),
//!         Err(e) => eprintln!("skipped: {}", e),
//!     }
//! }
//! # }
//! ```

use crate::errors::ScanError;
use futures::stream::{self, Stream};
use sdk::{PluginDescriptor, MANIFEST_FILE};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A bundle whose manifest parsed successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPlugin {
    pub descriptor: PluginDescriptor,
    pub bundle_dir: PathBuf,
}

/// Enumerates plugin bundles under a set of locations
#[derive(Debug, Default, Clone, Copy)]
pub struct Scanner;

impl Scanner {
    pub fn new() -> Self {
        Self
    }

    /// Stream every bundle under `locations`, in location order
    pub fn scan(
        &self,
        locations: &[PathBuf],
    ) -> impl Stream<Item = Result<DiscoveredPlugin, ScanError>> + Send + 'static {
        let state = ScanState {
            locations: locations.iter().cloned().collect(),
            bundles: VecDeque::new(),
            seen: HashMap::new(),
        };

        stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        })
    }
}

struct ScanState {
    locations: VecDeque<PathBuf>,
    bundles: VecDeque<PathBuf>,
    /// id → manifest that first claimed it
    seen: HashMap<String, PathBuf>,
}

impl ScanState {
    async fn next_item(&mut self) -> Option<Result<DiscoveredPlugin, ScanError>> {
        loop {
            if let Some(bundle) = self.bundles.pop_front() {
                return Some(self.read_bundle(&bundle).await);
            }

            let location = self.locations.pop_front()?;
            match expand_location(&location).await {
                Ok(bundles) => self.bundles.extend(bundles),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn read_bundle(&mut self, bundle: &Path) -> Result<DiscoveredPlugin, ScanError> {
        let manifest_path = bundle.join(MANIFEST_FILE);

        let bytes = tokio::fs::read(&manifest_path)
            .await
            .map_err(|e| ScanError::ManifestUnreadable {
                path: manifest_path.clone(),
                message: e.to_string(),
            })?;

        let descriptor =
            PluginDescriptor::parse(&bytes).map_err(|source| ScanError::ManifestMalformed {
                path: manifest_path.clone(),
                source,
            })?;

        if let Some(first) = self.seen.get(&descriptor.id) {
            return Err(ScanError::DuplicateIdentifier {
                id: descriptor.id,
                path: manifest_path,
                first: first.clone(),
            });
        }
        self.seen.insert(descriptor.id.clone(), manifest_path);

        tracing::debug!(plugin_id = %descriptor.id, bundle = %bundle.display(), "Discovered plugin");
        Ok(DiscoveredPlugin {
            descriptor,
            bundle_dir: bundle.to_path_buf(),
        })
    }
}

async fn has_manifest(dir: &Path) -> bool {
    tokio::fs::metadata(dir.join(MANIFEST_FILE))
        .await
        .is_ok_and(|m| m.is_file())
}

/// Resolve a location to the bundle directories it contains
async fn expand_location(location: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let unreadable = |e: std::io::Error| ScanError::LocationUnreadable {
        path: location.to_path_buf(),
        message: e.to_string(),
    };

    if has_manifest(location).await {
        return Ok(vec![location.to_path_buf()]);
    }

    let mut entries = match tokio::fs::read_dir(location).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("Plugin location {} does not exist", location.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(unreadable(e)),
    };

    let mut bundles = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let path = entry.path();
        let is_dir = tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir());
        if !is_dir {
            continue;
        }
        if has_manifest(&path).await {
            bundles.push(path);
        } else {
            tracing::debug!("Skipping {}: no {}", path.display(), MANIFEST_FILE);
        }
    }

    bundles.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    fn manifest(id: &str) -> String {
        format!(
            r#"
[plugin]
id = "{id}"
name = "{id}"
version = "1.0.0"
author = "Test"
artifact = "lib{id}.so"
capabilities = ["document-processing"]

[host]
min = "1.0.0"
"#
        )
    }

    fn write_bundle(root: &Path, dir: &str, contents: &str) -> PathBuf {
        let bundle = root.join(dir);
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join(MANIFEST_FILE), contents).unwrap();
        bundle
    }

    async fn collect(locations: &[PathBuf]) -> Vec<Result<DiscoveredPlugin, ScanError>> {
        Scanner::new().scan(locations).collect().await
    }

    #[tokio::test]
    async fn test_directory_of_bundles_in_name_order() {
        let root = TempDir::new().unwrap();
        write_bundle(root.path(), "zeta", &manifest("zeta"));
        write_bundle(root.path(), "alpha", &manifest("alpha"));
        std::fs::create_dir(root.path().join("not-a-bundle")).unwrap();
        std::fs::write(root.path().join("README"), "ignored").unwrap();

        let items = collect(&[root.path().to_path_buf()]).await;
        let ids: Vec<String> = items
            .into_iter()
            .map(|r| r.unwrap().descriptor.id)
            .collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_location_may_be_a_bundle() {
        let root = TempDir::new().unwrap();
        let bundle = write_bundle(root.path(), "single", &manifest("single"));

        let items = collect(&[bundle.clone()]).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().bundle_dir, bundle);
    }

    #[tokio::test]
    async fn test_malformed_manifest_does_not_stop_scan() {
        let root = TempDir::new().unwrap();
        write_bundle(root.path(), "a-broken", "this is not [ toml");
        write_bundle(root.path(), "b-good", &manifest("good"));

        let items = collect(&[root.path().to_path_buf()]).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items[0],
            Err(ScanError::ManifestMalformed { .. })
        ));
        assert_eq!(items[1].as_ref().unwrap().descriptor.id, "good");
    }

    #[tokio::test]
    async fn test_duplicate_identifier_keeps_first() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_bundle(first.path(), "dup", &manifest("dup"));
        write_bundle(second.path(), "dup-again", &manifest("dup"));

        let items = collect(&[first.path().to_path_buf(), second.path().to_path_buf()]).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        match &items[1] {
            Err(ScanError::DuplicateIdentifier { id, first: origin, .. }) => {
                assert_eq!(id, "dup");
                assert!(origin.starts_with(first.path()));
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_location_is_empty() {
        let root = TempDir::new().unwrap();
        let items = collect(&[root.path().join("nowhere")]).await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_scan_is_restartable() {
        let root = TempDir::new().unwrap();
        write_bundle(root.path(), "a", &manifest("a"));

        let scanner = Scanner::new();
        let locations = vec![root.path().to_path_buf()];
        let first: Vec<_> = scanner.scan(&locations).collect().await;
        let second: Vec<_> = scanner.scan(&locations).collect().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_file_as_location_is_unreadable() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("plugins.txt");
        std::fs::write(&file, "not a directory").unwrap();

        let items = collect(&[file]).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ScanError::LocationUnreadable { .. })));
    }
}
