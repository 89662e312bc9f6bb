//! Trust validation
//!
//! Every plugin passes through a fixed sequence of checks before it may be
//! instantiated:
//!
//! 1. **Host compatibility** - the host version lies inside the plugin's range
//! 2. **Checksum** - the artifact's BLAKE3 digest matches the declared one
//! 3. **Signature** - a detached signature resolves to a trusted signer
//! 4. **Entitlements** - every declared capability holds its entitlement
//!
//! The first failing stage decides the verdict. Validation is a pure function
//! of its inputs: it performs no I/O and consults no global state.

pub mod checksum;
pub mod risk;
pub mod signature;
pub mod validator;

pub use risk::{RiskLevel, RiskScore};
pub use signature::{
    CodeSignatureVerifier, Ed25519Verifier, SignatureError, SignerIdentity, UnsupportedVerifier,
};
pub use validator::{PluginArtifact, TrustValidator, ValidationPolicy};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Validation stage, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationStage {
    /// Manifest re-read at load time
    Manifest,
    HostCompatibility,
    Checksum,
    Signature,
    Entitlements,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manifest => "manifest",
            Self::HostCompatibility => "host-compatibility",
            Self::Checksum => "checksum",
            Self::Signature => "signature",
            Self::Entitlements => "entitlements",
        })
    }
}

/// Why a plugin failed trust validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustRejection {
    ChecksumMismatch,
    SignatureMissing,
    SignatureUntrusted,
    HostVersionIncompatible,
    EntitlementDenied,
    ManifestMalformed,
}

impl TrustRejection {
    /// Stage that produces this rejection
    pub fn stage(self) -> ValidationStage {
        match self {
            Self::ManifestMalformed => ValidationStage::Manifest,
            Self::HostVersionIncompatible => ValidationStage::HostCompatibility,
            Self::ChecksumMismatch => ValidationStage::Checksum,
            Self::SignatureMissing | Self::SignatureUntrusted => ValidationStage::Signature,
            Self::EntitlementDenied => ValidationStage::Entitlements,
        }
    }
}

impl fmt::Display for TrustRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ChecksumMismatch => "checksum-mismatch",
            Self::SignatureMissing => "signature-missing",
            Self::SignatureUntrusted => "signature-untrusted",
            Self::HostVersionIncompatible => "host-version-incompatible",
            Self::EntitlementDenied => "entitlement-denied",
            Self::ManifestMalformed => "manifest-malformed",
        })
    }
}

/// Outcome of trust validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustVerdict {
    Accepted,
    Rejected {
        reason: TrustRejection,
        /// Human-readable detail; free of secrets
        detail: String,
    },
}

impl TrustVerdict {
    pub fn rejected(reason: TrustRejection, detail: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn rejection(&self) -> Option<TrustRejection> {
        match self {
            Self::Accepted => None,
            Self::Rejected { reason, .. } => Some(*reason),
        }
    }
}

impl fmt::Display for TrustVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("accepted"),
            Self::Rejected { reason, detail } => {
                write!(f, "rejected at {} stage ({}): {}", reason.stage(), reason, detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_pipeline() {
        assert!(ValidationStage::HostCompatibility < ValidationStage::Checksum);
        assert!(ValidationStage::Checksum < ValidationStage::Signature);
        assert!(ValidationStage::Signature < ValidationStage::Entitlements);
    }

    #[test]
    fn test_verdict_display_names_stage() {
        let verdict = TrustVerdict::rejected(TrustRejection::ChecksumMismatch, "digest differs");
        assert_eq!(
            verdict.to_string(),
            "rejected at checksum stage (checksum-mismatch): digest differs"
        );
        assert_eq!(verdict.rejection(), Some(TrustRejection::ChecksumMismatch));
        assert!(!verdict.is_accepted());
    }
}
