//! Per-plugin lifecycle state

use crate::trust::TrustRejection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one instantiation of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a plugin ended up rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "kebab-case")]
pub enum RejectionReason {
    /// Trust validation refused the plugin
    Trust(TrustRejection),
    /// Plugin code failed to initialize
    InstantiationFailed,
    /// Artifact could not be read from disk
    ArtifactUnavailable,
    /// Load was cancelled before completion
    Cancelled,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trust(reason) => reason.fmt(f),
            Self::InstantiationFailed => f.write_str("instantiation-failed"),
            Self::ArtifactUnavailable => f.write_str("artifact-unavailable"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Lifecycle state of one plugin identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum PluginState {
    Discovered,
    Validating,
    Loaded { instance: InstanceId },
    Rejected { reason: RejectionReason },
    Unloaded,
}

impl PluginState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    /// Short state name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Validating => "validating",
            Self::Loaded { .. } => "loaded",
            Self::Rejected { .. } => "rejected",
            Self::Unloaded => "unloaded",
        }
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: &PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Discovered | Unloaded | Rejected { .. }, Validating)
                | (Validating, Loaded { .. } | Rejected { .. })
                | (Loaded { .. }, Unloaded)
        )
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded { instance } => write!(f, "loaded ({})", instance),
            Self::Rejected { reason } => write!(f, "rejected ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOADED: PluginState = PluginState::Loaded {
        instance: InstanceId(1),
    };
    const REJECTED: PluginState = PluginState::Rejected {
        reason: RejectionReason::Cancelled,
    };

    #[test]
    fn test_allowed_transitions() {
        use PluginState::*;
        assert!(Discovered.can_transition_to(&Validating));
        assert!(Validating.can_transition_to(&LOADED));
        assert!(Validating.can_transition_to(&REJECTED));
        assert!(LOADED.can_transition_to(&Unloaded));
        assert!(Unloaded.can_transition_to(&Validating));
        assert!(REJECTED.can_transition_to(&Validating));
    }

    #[test]
    fn test_forbidden_transitions() {
        use PluginState::*;
        assert!(!Discovered.can_transition_to(&LOADED));
        assert!(!Discovered.can_transition_to(&Unloaded));
        assert!(!LOADED.can_transition_to(&Validating));
        assert!(!Validating.can_transition_to(&Unloaded));
        assert!(!REJECTED.can_transition_to(&LOADED));
    }

    #[test]
    fn test_display() {
        assert_eq!(LOADED.to_string(), "loaded (#1)");
        assert_eq!(
            PluginState::Rejected {
                reason: RejectionReason::Trust(TrustRejection::EntitlementDenied)
            }
            .to_string(),
            "rejected (entitlement-denied)"
        );
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(REJECTED).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "state": "rejected", "reason": { "kind": "cancelled" } })
        );
    }
}
