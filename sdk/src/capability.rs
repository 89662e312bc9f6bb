//! Capability model
//!
//! A plugin declares the permissions it needs as a set of capabilities drawn
//! from a closed enumeration. The set is stored as bit flags; only members of
//! the enumeration are representable.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single permission a plugin may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Reads and transforms documents
    DocumentProcessing,
    /// Renders pages to image files
    ImageExport,
    /// Runs over many documents in one request
    BatchProcessing,
    /// Contributes menu entries to the host
    UiContribution,
    /// Touches files outside the open document
    FilesystemAccess,
    /// Opens network connections
    NetworkAccess,
}

impl Capability {
    /// Every capability, in declaration order
    pub const ALL: [Capability; 6] = [
        Capability::DocumentProcessing,
        Capability::ImageExport,
        Capability::BatchProcessing,
        Capability::UiContribution,
        Capability::FilesystemAccess,
        Capability::NetworkAccess,
    ];

    /// Manifest token for this capability
    pub fn token(self) -> &'static str {
        match self {
            Self::DocumentProcessing => "document-processing",
            Self::ImageExport => "image-export",
            Self::BatchProcessing => "batch-processing",
            Self::UiContribution => "ui-contribution",
            Self::FilesystemAccess => "filesystem-access",
            Self::NetworkAccess => "network-access",
        }
    }

    /// Platform entitlement a plugin must hold to exercise this capability
    pub fn required_entitlement(self) -> Option<&'static str> {
        match self {
            Self::FilesystemAccess => Some("files.user-selected.read-write"),
            Self::NetworkAccess => Some("network.client"),
            Self::ImageExport => Some("files.downloads.read-write"),
            Self::DocumentProcessing | Self::BatchProcessing | Self::UiContribution => None,
        }
    }

    fn flag(self) -> CapabilityFlags {
        match self {
            Self::DocumentProcessing => CapabilityFlags::DOCUMENT_PROCESSING,
            Self::ImageExport => CapabilityFlags::IMAGE_EXPORT,
            Self::BatchProcessing => CapabilityFlags::BATCH_PROCESSING,
            Self::UiContribution => CapabilityFlags::UI_CONTRIBUTION,
            Self::FilesystemAccess => CapabilityFlags::FILESYSTEM_ACCESS,
            Self::NetworkAccess => CapabilityFlags::NETWORK_ACCESS,
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = ();

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.token() == token)
            .ok_or(())
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct CapabilityFlags: u8 {
        const DOCUMENT_PROCESSING = 1 << 0;
        const IMAGE_EXPORT = 1 << 1;
        const BATCH_PROCESSING = 1 << 2;
        const UI_CONTRIBUTION = 1 << 3;
        const FILESYSTEM_ACCESS = 1 << 4;
        const NETWORK_ACCESS = 1 << 5;
    }
}

/// Immutable set of declared capabilities
///
/// # Examples
///
/// ```
/// use sdk::{Capability, CapabilitySet};
///
/// let set: CapabilitySet = [Capability::NetworkAccess, Capability::ImageExport]
///     .into_iter()
///     .collect();
/// assert!(set.contains(Capability::NetworkAccess));
/// assert!(!set.contains(Capability::FilesystemAccess));
/// assert_eq!(set.len(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilitySet(CapabilityFlags);

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::empty()
    }
}

impl CapabilitySet {
    /// The empty set
    pub fn empty() -> Self {
        Self(CapabilityFlags::empty())
    }

    /// Membership test
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(capability.flag())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.bits().count_ones() as usize
    }

    /// Iterate members in declaration order
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .fold(CapabilityFlags::empty(), |acc, c| acc | c.flag()),
        )
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Unknown tokens fail here instead of being dropped
        let tokens = Vec::<Capability>::deserialize(deserializer)?;
        Ok(tokens.into_iter().collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.iter().map(Capability::token).collect();
        write!(f, "[{}]", tokens.join(", "))
    }
}
