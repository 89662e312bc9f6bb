//! Plugin manifest and descriptor types
//!
//! A plugin bundle ships a `plugin.toml` manifest next to its artifact. The
//! manifest is parsed into an immutable [`PluginDescriptor`]. Parsing is pure
//! and total: any input either yields a descriptor or a [`ManifestError`].

use crate::capability::{Capability, CapabilitySet};
use crate::errors::ManifestError;
use crate::version::{Version, VersionRange};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Manifest file name inside a plugin bundle
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Prefix of the manifest checksum notation
const CHECKSUM_PREFIX: &str = "blake3:";

/// Length of a content checksum in bytes
pub const CHECKSUM_LENGTH: usize = 32;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("identifier pattern is valid")
    })
}

/// BLAKE3 digest of a plugin artifact
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentChecksum([u8; CHECKSUM_LENGTH]);

impl ContentChecksum {
    pub fn from_bytes(bytes: [u8; CHECKSUM_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LENGTH] {
        &self.0
    }
}

impl FromStr for ContentChecksum {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix(CHECKSUM_PREFIX).ok_or_else(|| {
            ManifestError::InvalidChecksum(format!("expected '{}' prefix", CHECKSUM_PREFIX))
        })?;

        let bytes = hex::decode(hex_part)
            .map_err(|e| ManifestError::InvalidChecksum(e.to_string()))?;

        let bytes: [u8; CHECKSUM_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            ManifestError::InvalidChecksum(format!(
                "expected {} bytes, got {}",
                CHECKSUM_LENGTH,
                b.len()
            ))
        })?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CHECKSUM_PREFIX, hex::encode(self.0))
    }
}

impl fmt::Debug for ContentChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentChecksum({})", self)
    }
}

/// Provenance evidence declared by a plugin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustEvidence {
    pub signing_identity: Option<String>,
    pub team_identifier: Option<String>,
    pub checksum: Option<ContentChecksum>,
}

/// A clickable menu entry contributed by a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuAction {
    pub id: String,
    pub title: String,
    pub shortcut: Option<String>,
}

/// Top-level menu contribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEntry {
    Action(MenuAction),
    Separator,
    Submenu { title: String, items: Vec<MenuItem> },
}

/// Entry inside a submenu; submenus do not nest further
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuItem {
    Action(MenuAction),
    Separator,
}

/// Immutable metadata for one discovered plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Stable identifier, unique within a registry
    pub id: String,
    /// Display name
    pub name: String,
    /// Plugin's own version
    pub version: Version,
    pub author: String,
    pub description: String,
    /// Artifact file name, relative to the bundle directory
    pub artifact: String,
    pub capabilities: CapabilitySet,
    /// Host versions this plugin runs on
    pub host: VersionRange,
    /// Platform entitlements the plugin holds
    pub entitlements: Vec<String>,
    pub trust: TrustEvidence,
    pub menu: Vec<MenuEntry>,
}

impl PluginDescriptor {
    /// Parse a manifest from raw bytes
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] when the bytes are not UTF-8 TOML, a
    /// required field is absent, or a capability, version, checksum or menu
    /// declaration is not recognized.
    ///
    /// # Examples
    ///
    /// ```
    /// use sdk::{Capability, PluginDescriptor};
    ///
    /// let manifest = br#"
    /// [plugin]
    /// id = "com.example.wordcount"
    /// name = "Word Count"
    /// version = "0.3.0"
    /// author = "Example"
    /// artifact = "libwordcount.so"
    /// capabilities = ["document-processing"]
    ///
    /// [host]
    /// min = "1.0.0"
    /// "#;
    ///
    /// let descriptor = PluginDescriptor::parse(manifest).unwrap();
    /// assert_eq!(descriptor.id, "com.example.wordcount");
    /// assert!(descriptor.capabilities.contains(Capability::DocumentProcessing));
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ManifestError::NotUtf8)?;
        Self::from_toml(text)
    }

    /// Parse a manifest from a TOML string
    pub fn from_toml(text: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            toml::from_str(text).map_err(|e| ManifestError::Syntax(e.message().to_string()))?;
        raw.into_descriptor()
    }

    /// Serialize back to manifest TOML
    pub fn to_manifest(&self) -> Result<String, ManifestError> {
        toml::to_string(&RawManifest::from_descriptor(self))
            .map_err(|e| ManifestError::Syntax(e.to_string()))
    }

    /// Look up a declared menu action by id, including submenu entries
    pub fn menu_action(&self, action_id: &str) -> Option<&MenuAction> {
        self.menu.iter().find_map(|entry| match entry {
            MenuEntry::Action(action) if action.id == action_id => Some(action),
            MenuEntry::Submenu { items, .. } => items.iter().find_map(|item| match item {
                MenuItem::Action(action) if action.id == action_id => Some(action),
                _ => None,
            }),
            _ => None,
        })
    }

    /// Capabilities whose required entitlement is not held
    pub fn missing_entitlements(&self) -> Vec<(Capability, &'static str)> {
        self.capabilities
            .iter()
            .filter_map(|c| c.required_entitlement().map(|e| (c, e)))
            .filter(|(_, entitlement)| !self.entitlements.iter().any(|held| held == entitlement))
            .collect()
    }
}

// Serde mirror of the manifest. Required fields are optional here so a
// missing one reports the field name instead of a generic serde message.

#[derive(Debug, Serialize, Deserialize)]
struct RawManifest {
    plugin: Option<RawPlugin>,
    host: Option<RawHost>,
    #[serde(default)]
    trust: RawTrust,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    menu: Vec<RawMenuEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawPlugin {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    author: Option<String>,
    #[serde(default)]
    description: String,
    artifact: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    entitlements: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawHost {
    min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawTrust {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signing_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    team_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawMenuKind {
    Action,
    Separator,
    Submenu,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawMenuEntry {
    #[serde(rename = "type")]
    kind: RawMenuKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shortcut: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    items: Vec<RawMenuEntry>,
}

fn parse_version(field: &'static str, value: String) -> Result<Version, ManifestError> {
    value
        .parse()
        .map_err(|e: crate::version::VersionParseError| ManifestError::InvalidVersion {
            field,
            value,
            reason: e.to_string(),
        })
}

fn validate_artifact(artifact: &str) -> Result<(), ManifestError> {
    let plain = !artifact.is_empty()
        && artifact != "."
        && artifact != ".."
        && !artifact.contains(['/', '\\'])
        && !artifact.contains('\0');

    if plain {
        Ok(())
    } else {
        Err(ManifestError::InvalidArtifact(artifact.to_string()))
    }
}

impl RawManifest {
    fn into_descriptor(self) -> Result<PluginDescriptor, ManifestError> {
        let plugin = self.plugin.ok_or(ManifestError::MissingField("plugin"))?;
        let host = self.host.ok_or(ManifestError::MissingField("host"))?;

        let id = plugin.id.ok_or(ManifestError::MissingField("plugin.id"))?;
        if !identifier_pattern().is_match(&id) {
            return Err(ManifestError::InvalidIdentifier(id));
        }

        let name = plugin.name.ok_or(ManifestError::MissingField("plugin.name"))?;
        let author = plugin
            .author
            .ok_or(ManifestError::MissingField("plugin.author"))?;
        let version = parse_version(
            "plugin.version",
            plugin
                .version
                .ok_or(ManifestError::MissingField("plugin.version"))?,
        )?;

        let artifact = plugin
            .artifact
            .ok_or(ManifestError::MissingField("plugin.artifact"))?;
        validate_artifact(&artifact)?;

        let capabilities = plugin
            .capabilities
            .into_iter()
            .map(|token| {
                token
                    .parse::<Capability>()
                    .map_err(|_| ManifestError::UnknownCapability(token))
            })
            .collect::<Result<CapabilitySet, _>>()?;

        let min = parse_version(
            "host.min",
            host.min.ok_or(ManifestError::MissingField("host.min"))?,
        )?;
        let max = host
            .max
            .map(|max| parse_version("host.max", max))
            .transpose()?;
        let range = VersionRange::new(min, max);
        if range.is_empty() {
            return Err(ManifestError::EmptyVersionRange {
                min: min.to_string(),
                max: max.map(|m| m.to_string()).unwrap_or_default(),
            });
        }

        let trust = TrustEvidence {
            signing_identity: self.trust.signing_identity,
            team_identifier: self.trust.team_identifier,
            checksum: self
                .trust
                .checksum
                .map(|c| c.parse::<ContentChecksum>())
                .transpose()?,
        };

        let menu = convert_menu(self.menu)?;
        if !menu.is_empty() && !capabilities.contains(Capability::UiContribution) {
            return Err(ManifestError::UndeclaredMenu);
        }

        Ok(PluginDescriptor {
            id,
            name,
            version,
            author,
            description: plugin.description,
            artifact,
            capabilities,
            host: range,
            entitlements: plugin.entitlements,
            trust,
            menu,
        })
    }

    fn from_descriptor(descriptor: &PluginDescriptor) -> Self {
        Self {
            plugin: Some(RawPlugin {
                id: Some(descriptor.id.clone()),
                name: Some(descriptor.name.clone()),
                version: Some(descriptor.version.to_string()),
                author: Some(descriptor.author.clone()),
                description: descriptor.description.clone(),
                artifact: Some(descriptor.artifact.clone()),
                capabilities: descriptor
                    .capabilities
                    .iter()
                    .map(|c| c.token().to_string())
                    .collect(),
                entitlements: descriptor.entitlements.clone(),
            }),
            host: Some(RawHost {
                min: Some(descriptor.host.min.to_string()),
                max: descriptor.host.max.map(|m| m.to_string()),
            }),
            trust: RawTrust {
                signing_identity: descriptor.trust.signing_identity.clone(),
                team_identifier: descriptor.trust.team_identifier.clone(),
                checksum: descriptor.trust.checksum.map(|c| c.to_string()),
            },
            menu: descriptor.menu.iter().map(RawMenuEntry::from_entry).collect(),
        }
    }
}

fn convert_menu(raw: Vec<RawMenuEntry>) -> Result<Vec<MenuEntry>, ManifestError> {
    let mut seen = HashSet::new();
    let mut menu = Vec::with_capacity(raw.len());

    for entry in raw {
        let converted = match entry.kind {
            RawMenuKind::Action => MenuEntry::Action(entry.into_action(&mut seen)?),
            RawMenuKind::Separator => MenuEntry::Separator,
            RawMenuKind::Submenu => {
                let title = entry
                    .title
                    .ok_or(ManifestError::MissingField("menu.title"))?;
                let mut items = Vec::with_capacity(entry.items.len());
                for item in entry.items {
                    items.push(match item.kind {
                        RawMenuKind::Action => MenuItem::Action(item.into_action(&mut seen)?),
                        RawMenuKind::Separator => MenuItem::Separator,
                        RawMenuKind::Submenu => return Err(ManifestError::MenuTooDeep),
                    });
                }
                MenuEntry::Submenu { title, items }
            }
        };
        menu.push(converted);
    }

    Ok(menu)
}

impl RawMenuEntry {
    fn into_action(self, seen: &mut HashSet<String>) -> Result<MenuAction, ManifestError> {
        let id = self.id.ok_or(ManifestError::MissingField("menu.id"))?;
        let title = self.title.ok_or(ManifestError::MissingField("menu.title"))?;
        if !seen.insert(id.clone()) {
            return Err(ManifestError::DuplicateMenuAction(id));
        }
        Ok(MenuAction {
            id,
            title,
            shortcut: self.shortcut,
        })
    }

    fn action(action: &MenuAction) -> Self {
        Self {
            kind: RawMenuKind::Action,
            id: Some(action.id.clone()),
            title: Some(action.title.clone()),
            shortcut: action.shortcut.clone(),
            items: Vec::new(),
        }
    }

    fn separator() -> Self {
        Self {
            kind: RawMenuKind::Separator,
            id: None,
            title: None,
            shortcut: None,
            items: Vec::new(),
        }
    }

    fn from_entry(entry: &MenuEntry) -> Self {
        match entry {
            MenuEntry::Action(action) => Self::action(action),
            MenuEntry::Separator => Self::separator(),
            MenuEntry::Submenu { title, items } => Self {
                kind: RawMenuKind::Submenu,
                id: None,
                title: Some(title.clone()),
                shortcut: None,
                items: items
                    .iter()
                    .map(|item| match item {
                        MenuItem::Action(action) => Self::action(action),
                        MenuItem::Separator => Self::separator(),
                    })
                    .collect(),
            },
        }
    }
}
