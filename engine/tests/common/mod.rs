//! Shared fixtures for lifecycle integration tests
//!
//! Builds plugin bundles in a temporary directory and backs them with
//! in-process plugin modules whose behavior each test controls.

#![allow(dead_code)]

use quire_engine::config::{MemoryConfigStore, PluginConfigStore};
use quire_engine::lifecycle::{LifecycleManager, PluginState};
use quire_engine::runtime::BuiltinLoader;
use quire_engine::trust::{
    checksum, CodeSignatureVerifier, TrustValidator, UnsupportedVerifier, ValidationPolicy,
};
use sdk::{Invocation, PluginContext, PluginError, PluginModule, PluginOutput, Version};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const HOST_VERSION: Version = Version::new(2, 1, 0);

/// How a fixture plugin behaves at each lifecycle hook
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    pub panic_on_init: bool,
    pub fail_init: bool,
    pub fail_teardown: bool,
    pub init_delay: Option<Duration>,
}

/// Observations shared between a test and the plugin instances it creates
#[derive(Debug, Default)]
pub struct Tally {
    pub constructed: AtomicUsize,
    pub initialized: AtomicUsize,
    pub torn_down: AtomicUsize,
    pub last_greeting: Mutex<Option<String>>,
}

impl Tally {
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }
}

struct FixturePlugin {
    behavior: Behavior,
    tally: Arc<Tally>,
    greeting: Option<String>,
}

impl PluginModule for FixturePlugin {
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        if let Some(delay) = self.behavior.init_delay {
            std::thread::sleep(delay);
        }
        if self.behavior.panic_on_init {
            panic!("fixture init panic");
        }
        if self.behavior.fail_init {
            return Err(PluginError::Init("fixture refused to start".to_string()));
        }

        self.greeting = ctx.setting_str("greeting").map(str::to_string);
        if let Ok(mut last) = self.tally.last_greeting.lock() {
            *last = self.greeting.clone();
        }
        self.tally.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), PluginError> {
        self.tally.torn_down.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_teardown {
            return Err(PluginError::Teardown("fixture left a mess".to_string()));
        }
        Ok(())
    }

    fn handle(&self, invocation: Invocation) -> Result<PluginOutput, PluginError> {
        match invocation {
            Invocation::MenuAction { action_id } if action_id == "explode" => {
                panic!("fixture handler panic")
            }
            Invocation::MenuAction { action_id } => Ok(PluginOutput::text(action_id)),
            Invocation::ProcessDocument { document, .. } => Ok(PluginOutput::json(
                serde_json::json!({
                    "document": document,
                    "greeting": self.greeting,
                }),
            )),
            other => Err(PluginError::Unsupported(other.name().to_string())),
        }
    }
}

/// Manifest fields a test may vary
#[derive(Debug, Clone)]
pub struct BundleSpec {
    pub id: String,
    pub capabilities: Vec<&'static str>,
    pub entitlements: Vec<&'static str>,
    pub host_min: &'static str,
    pub host_max: Option<&'static str>,
    pub artifact: Vec<u8>,
    /// `Some(true)` declares the artifact's real checksum, `Some(false)` a wrong one
    pub checksum: Option<bool>,
    pub signing_identity: Option<&'static str>,
    pub team_identifier: Option<&'static str>,
    pub menu_actions: Vec<&'static str>,
}

impl BundleSpec {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            capabilities: vec!["document-processing"],
            entitlements: Vec::new(),
            host_min: "2.0.0",
            host_max: None,
            artifact: format!("artifact bytes for {}", id).into_bytes(),
            checksum: Some(true),
            signing_identity: None,
            team_identifier: None,
            menu_actions: Vec::new(),
        }
    }

    pub fn capabilities(mut self, capabilities: &[&'static str]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    pub fn entitlements(mut self, entitlements: &[&'static str]) -> Self {
        self.entitlements = entitlements.to_vec();
        self
    }

    pub fn host(mut self, min: &'static str, max: Option<&'static str>) -> Self {
        self.host_min = min;
        self.host_max = max;
        self
    }

    pub fn checksum(mut self, checksum: Option<bool>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn signed_by(mut self, identity: &'static str, team: Option<&'static str>) -> Self {
        self.signing_identity = Some(identity);
        self.team_identifier = team;
        self
    }

    pub fn menu(mut self, actions: &[&'static str]) -> Self {
        self.menu_actions = actions.to_vec();
        if !self.capabilities.contains(&"ui-contribution") {
            self.capabilities.push("ui-contribution");
        }
        self
    }

    pub fn artifact_name(&self) -> String {
        format!("lib{}.so", self.id.replace('.', "_"))
    }

    pub fn manifest(&self) -> String {
        let quoted = |items: &[&str]| {
            items
                .iter()
                .map(|s| format!("\"{}\"", s))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut text = format!(
            "[plugin]\nid = \"{id}\"\nname = \"{id}\"\nversion = \"1.0.0\"\nauthor = \"Fixture\"\n\
             artifact = \"{artifact}\"\ncapabilities = [{caps}]\nentitlements = [{ents}]\n\n\
             [host]\nmin = \"{min}\"\n",
            id = self.id,
            artifact = self.artifact_name(),
            caps = quoted(&self.capabilities),
            ents = quoted(&self.entitlements),
            min = self.host_min,
        );
        if let Some(max) = self.host_max {
            text.push_str(&format!("max = \"{}\"\n", max));
        }

        text.push_str("\n[trust]\n");
        if let Some(identity) = self.signing_identity {
            text.push_str(&format!("signing_identity = \"{}\"\n", identity));
        }
        if let Some(team) = self.team_identifier {
            text.push_str(&format!("team_identifier = \"{}\"\n", team));
        }
        match self.checksum {
            Some(true) => text.push_str(&format!(
                "checksum = \"{}\"\n",
                checksum::to_checksum(&checksum::digest(&self.artifact))
            )),
            Some(false) => text.push_str(&format!(
                "checksum = \"{}\"\n",
                checksum::to_checksum(&checksum::digest(b"something else entirely"))
            )),
            None => {}
        }

        for action in &self.menu_actions {
            text.push_str(&format!(
                "\n[[menu]]\ntype = \"action\"\nid = \"{}\"\ntitle = \"{}\"\n",
                action, action
            ));
        }
        text
    }
}

/// A temporary plugin location plus the loader backing its bundles
pub struct Harness {
    pub dir: TempDir,
    pub tally: Arc<Tally>,
    pub store: Arc<MemoryConfigStore>,
    loader: BuiltinLoader,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
            tally: Arc::new(Tally::default()),
            store: Arc::new(MemoryConfigStore::new()),
            loader: BuiltinLoader::new(),
        }
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    pub fn bundle_dir(&self, id: &str) -> PathBuf {
        self.plugins_dir().join(id)
    }

    /// Write a bundle to disk and register its in-process module
    pub fn install(&mut self, spec: &BundleSpec, behavior: Behavior) -> PathBuf {
        let bundle = self.write_bundle(spec);
        let tally = Arc::clone(&self.tally);
        self.loader.register(spec.id.clone(), move || -> Box<dyn PluginModule> {
            tally.constructed.fetch_add(1, Ordering::SeqCst);
            Box::new(FixturePlugin {
                behavior,
                tally: Arc::clone(&tally),
                greeting: None,
            })
        });
        bundle
    }

    /// Write a bundle without registering a module for it
    pub fn write_bundle(&self, spec: &BundleSpec) -> PathBuf {
        let bundle = self.bundle_dir(&spec.id);
        std::fs::create_dir_all(&bundle).expect("bundle dir");
        std::fs::write(bundle.join("plugin.toml"), spec.manifest()).expect("manifest");
        std::fs::write(bundle.join(spec.artifact_name()), &spec.artifact).expect("artifact");
        bundle
    }

    pub fn remove_bundle(&self, id: &str) {
        std::fs::remove_dir_all(self.bundle_dir(id)).expect("remove bundle");
    }

    pub fn manager(self) -> (LifecycleManager, Fixtures) {
        self.manager_with_verifier(Box::new(UnsupportedVerifier), ValidationPolicy::default())
    }

    pub fn manager_with_verifier(
        self,
        verifier: Box<dyn CodeSignatureVerifier>,
        policy: ValidationPolicy,
    ) -> (LifecycleManager, Fixtures) {
        let store: Arc<dyn PluginConfigStore> = self.store.clone();
        let manager = LifecycleManager::builder(TrustValidator::new(verifier, policy))
            .loader(self.loader)
            .config_store(store)
            .host_version(HOST_VERSION)
            .data_dir(self.dir.path().join("data"))
            .locations(vec![self.dir.path().join("plugins")])
            .build();

        let fixtures = Fixtures {
            dir: self.dir,
            tally: self.tally,
            store: self.store,
        };
        (manager, fixtures)
    }
}

/// What a test keeps after handing the loader to the manager
pub struct Fixtures {
    pub dir: TempDir,
    pub tally: Arc<Tally>,
    pub store: Arc<MemoryConfigStore>,
}

impl Fixtures {
    pub fn bundle_dir(&self, id: &str) -> PathBuf {
        self.dir.path().join("plugins").join(id)
    }

    pub fn remove_bundle(&self, id: &str) {
        std::fs::remove_dir_all(self.bundle_dir(id)).expect("remove bundle");
    }

    pub fn write(&self, id: &str, file: &str, contents: impl AsRef<[u8]>) {
        std::fs::write(self.bundle_dir(id).join(file), contents).expect("write bundle file");
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Poll until `id` reaches a state matching `pred`, or give up after a second
pub async fn wait_for_state(
    manager: &LifecycleManager,
    id: &str,
    pred: impl Fn(&PluginState) -> bool,
) -> PluginState {
    for _ in 0..200 {
        if let Some(state) = manager.state(id) {
            if pred(&state) {
                return state;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} never reached the expected state: {:?}", id, manager.state(id));
}
