//! The trust validation pipeline

use super::checksum;
use super::signature::{verifier_from_config, CodeSignatureVerifier};
use super::{TrustRejection, TrustVerdict};
use crate::config::{ConfigError, SecurityConfig};
use sdk::{PluginDescriptor, Version};

/// Evidence read from a plugin bundle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginArtifact {
    /// Artifact contents
    pub bytes: Vec<u8>,
    /// Detached signature file contents, if shipped
    pub signature: Option<Vec<u8>>,
}

impl PluginArtifact {
    pub fn new(bytes: Vec<u8>, signature: Option<Vec<u8>>) -> Self {
        Self { bytes, signature }
    }
}

/// Host-side validation policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Treat an undeclared checksum as a checksum mismatch
    pub require_checksum: bool,
}

/// Runs host, checksum, signature and entitlement checks in order
pub struct TrustValidator {
    verifier: Box<dyn CodeSignatureVerifier>,
    policy: ValidationPolicy,
}

impl TrustValidator {
    pub fn new(verifier: Box<dyn CodeSignatureVerifier>, policy: ValidationPolicy) -> Self {
        Self { verifier, policy }
    }

    /// Build from the `[security]` configuration section
    pub fn from_config(security: &SecurityConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            verifier_from_config(security)?,
            ValidationPolicy {
                require_checksum: security.require_checksum,
            },
        ))
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    /// Validate a plugin against the host
    ///
    /// Short-circuits on the first failing stage. The result depends only on
    /// the arguments and the validator's fixed configuration.
    pub fn validate(
        &self,
        descriptor: &PluginDescriptor,
        artifact: &PluginArtifact,
        host_version: &Version,
    ) -> TrustVerdict {
        let verdict = self.run_stages(descriptor, artifact, host_version);

        match &verdict {
            TrustVerdict::Accepted => {
                tracing::debug!(plugin_id = %descriptor.id, "Trust validation passed");
            }
            TrustVerdict::Rejected { reason, detail } => {
                tracing::warn!(
                    plugin_id = %descriptor.id,
                    stage = %reason.stage(),
                    %reason,
                    detail = %detail,
                    "Trust validation failed"
                );
            }
        }

        verdict
    }

    fn run_stages(
        &self,
        descriptor: &PluginDescriptor,
        artifact: &PluginArtifact,
        host_version: &Version,
    ) -> TrustVerdict {
        // 1. Host compatibility
        if !descriptor.host.contains(host_version) {
            return TrustVerdict::rejected(
                TrustRejection::HostVersionIncompatible,
                format!(
                    "host {} is outside supported range {}",
                    host_version, descriptor.host
                ),
            );
        }

        let digest = checksum::digest(&artifact.bytes);

        // 2. Checksum
        match &descriptor.trust.checksum {
            Some(expected) if !checksum::matches(expected, &digest) => {
                return TrustVerdict::rejected(
                    TrustRejection::ChecksumMismatch,
                    format!(
                        "artifact digest {} does not match declared {}",
                        checksum::to_checksum(&digest),
                        expected
                    ),
                );
            }
            Some(_) => {}
            None if self.policy.require_checksum => {
                return TrustVerdict::rejected(
                    TrustRejection::ChecksumMismatch,
                    "no checksum declared and the host requires one",
                );
            }
            None => {
                tracing::debug!(plugin_id = %descriptor.id, "No checksum declared");
            }
        }

        // 3. Signing identity
        if self.verifier.is_supported() {
            if let Some(verdict) = self.check_signature(descriptor, artifact, &digest) {
                return verdict;
            }
        }

        // 4. Entitlements
        let missing = descriptor.missing_entitlements();
        if !missing.is_empty() {
            let detail = missing
                .iter()
                .map(|(capability, entitlement)| format!("{} requires {}", capability, entitlement))
                .collect::<Vec<_>>()
                .join(", ");
            return TrustVerdict::rejected(TrustRejection::EntitlementDenied, detail);
        }

        TrustVerdict::Accepted
    }

    fn check_signature(
        &self,
        descriptor: &PluginDescriptor,
        artifact: &PluginArtifact,
        digest: &blake3::Hash,
    ) -> Option<TrustVerdict> {
        let Some(claimed) = descriptor.trust.signing_identity.as_deref() else {
            return Some(TrustVerdict::rejected(
                TrustRejection::SignatureMissing,
                "no signing identity declared",
            ));
        };

        let Some(signature) = artifact.signature.as_deref() else {
            return Some(TrustVerdict::rejected(
                TrustRejection::SignatureMissing,
                "no signature shipped with the artifact",
            ));
        };

        let signer = match self.verifier.verify(digest, signature) {
            Ok(signer) => signer,
            Err(e) => {
                return Some(TrustVerdict::rejected(
                    TrustRejection::SignatureUntrusted,
                    e.to_string(),
                ))
            }
        };

        if signer.identity != claimed {
            return Some(TrustVerdict::rejected(
                TrustRejection::SignatureUntrusted,
                format!(
                    "signed by '{}' but manifest claims '{}'",
                    signer.identity, claimed
                ),
            ));
        }

        if let Some(team) = descriptor.trust.team_identifier.as_deref() {
            if signer.team.as_deref() != Some(team) {
                return Some(TrustVerdict::rejected(
                    TrustRejection::SignatureUntrusted,
                    format!("signer is not a member of team '{}'", team),
                ));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::signature::{Ed25519Verifier, SignerIdentity, UnsupportedVerifier};
    use ed25519_dalek::{Signer, SigningKey};
    use sdk::{Capability, TrustEvidence, VersionRange};

    const ARTIFACT: &[u8] = b"\x7fELF pretend plugin";

    fn descriptor(capabilities: &[Capability], entitlements: &[&str]) -> PluginDescriptor {
        PluginDescriptor {
            id: "com.example.test".to_string(),
            name: "Test".to_string(),
            version: Version::new(1, 0, 0),
            author: "Example".to_string(),
            description: String::new(),
            artifact: "libtest.so".to_string(),
            capabilities: capabilities.iter().copied().collect(),
            host: VersionRange::new(Version::new(1, 0, 0), Some(Version::new(2, 0, 0))),
            entitlements: entitlements.iter().map(|e| e.to_string()).collect(),
            trust: TrustEvidence {
                signing_identity: Some("Example Corp".to_string()),
                team_identifier: Some("EXMPL12345".to_string()),
                checksum: Some(checksum::to_checksum(&checksum::digest(ARTIFACT))),
            },
            menu: Vec::new(),
        }
    }

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[42; 32])
    }

    fn signed_artifact() -> PluginArtifact {
        let signature = signing_key().sign(checksum::digest(ARTIFACT).as_bytes());
        PluginArtifact::new(
            ARTIFACT.to_vec(),
            Some(hex::encode(signature.to_bytes()).into_bytes()),
        )
    }

    fn validator() -> TrustValidator {
        TrustValidator::new(
            Box::new(Ed25519Verifier::from_keys([(
                SignerIdentity {
                    identity: "Example Corp".to_string(),
                    team: Some("EXMPL12345".to_string()),
                },
                signing_key().verifying_key(),
            )])),
            ValidationPolicy::default(),
        )
    }

    fn unsigned_validator(policy: ValidationPolicy) -> TrustValidator {
        TrustValidator::new(Box::new(UnsupportedVerifier), policy)
    }

    const HOST: Version = Version::new(1, 5, 0);

    #[test]
    fn test_accepts_fully_evidenced_plugin() {
        let verdict = validator().validate(
            &descriptor(&[Capability::DocumentProcessing], &[]),
            &signed_artifact(),
            &HOST,
        );
        assert_eq!(verdict, TrustVerdict::Accepted);
    }

    #[test]
    fn test_host_version_checked_first() {
        // Checksum and entitlements are also wrong; host stage wins
        let mut desc = descriptor(&[Capability::NetworkAccess], &[]);
        desc.trust.checksum = Some(checksum::to_checksum(&checksum::digest(b"other")));

        let verdict = validator().validate(&desc, &signed_artifact(), &Version::new(3, 0, 0));
        assert_eq!(
            verdict.rejection(),
            Some(TrustRejection::HostVersionIncompatible)
        );
    }

    #[test]
    fn test_checksum_before_signature() {
        let verdict = validator().validate(
            &descriptor(&[], &[]),
            &PluginArtifact::new(b"tampered".to_vec(), None),
            &HOST,
        );
        assert_eq!(verdict.rejection(), Some(TrustRejection::ChecksumMismatch));
    }

    #[test]
    fn test_missing_checksum_is_advisory_by_default() {
        let mut desc = descriptor(&[], &[]);
        desc.trust.checksum = None;

        let verdict = unsigned_validator(ValidationPolicy::default()).validate(
            &desc,
            &PluginArtifact::new(ARTIFACT.to_vec(), None),
            &HOST,
        );
        assert!(verdict.is_accepted());

        let verdict = unsigned_validator(ValidationPolicy {
            require_checksum: true,
        })
        .validate(&desc, &PluginArtifact::new(ARTIFACT.to_vec(), None), &HOST);
        assert_eq!(verdict.rejection(), Some(TrustRejection::ChecksumMismatch));
    }

    #[test]
    fn test_signature_missing() {
        let verdict = validator().validate(
            &descriptor(&[], &[]),
            &PluginArtifact::new(ARTIFACT.to_vec(), None),
            &HOST,
        );
        assert_eq!(verdict.rejection(), Some(TrustRejection::SignatureMissing));

        let mut desc = descriptor(&[], &[]);
        desc.trust.signing_identity = None;
        let verdict = validator().validate(&desc, &signed_artifact(), &HOST);
        assert_eq!(verdict.rejection(), Some(TrustRejection::SignatureMissing));
    }

    #[test]
    fn test_signature_untrusted() {
        let rogue = SigningKey::from_bytes(&[9; 32]);
        let signature = rogue.sign(checksum::digest(ARTIFACT).as_bytes());
        let artifact = PluginArtifact::new(
            ARTIFACT.to_vec(),
            Some(hex::encode(signature.to_bytes()).into_bytes()),
        );

        let verdict = validator().validate(&descriptor(&[], &[]), &artifact, &HOST);
        assert_eq!(verdict.rejection(), Some(TrustRejection::SignatureUntrusted));
    }

    #[test]
    fn test_claimed_identity_must_match_signer() {
        let mut desc = descriptor(&[], &[]);
        desc.trust.signing_identity = Some("Someone Else".to_string());
        let verdict = validator().validate(&desc, &signed_artifact(), &HOST);
        assert_eq!(verdict.rejection(), Some(TrustRejection::SignatureUntrusted));

        let mut desc = descriptor(&[], &[]);
        desc.trust.team_identifier = Some("OTHERTEAM1".to_string());
        let verdict = validator().validate(&desc, &signed_artifact(), &HOST);
        assert_eq!(verdict.rejection(), Some(TrustRejection::SignatureUntrusted));
    }

    #[test]
    fn test_signature_stage_skipped_when_unsupported() {
        let mut desc = descriptor(&[], &[]);
        desc.trust.signing_identity = None;
        let verdict = unsigned_validator(ValidationPolicy::default()).validate(
            &desc,
            &PluginArtifact::new(ARTIFACT.to_vec(), None),
            &HOST,
        );
        assert!(verdict.is_accepted());
    }

    #[test]
    fn test_network_without_entitlement_denied() {
        let verdict = validator().validate(
            &descriptor(&[Capability::NetworkAccess], &[]),
            &signed_artifact(),
            &HOST,
        );
        match verdict {
            TrustVerdict::Rejected { reason, detail } => {
                assert_eq!(reason, TrustRejection::EntitlementDenied);
                assert!(detail.contains("network.client"));
            }
            TrustVerdict::Accepted => panic!("expected entitlement denial"),
        }

        let verdict = validator().validate(
            &descriptor(&[Capability::NetworkAccess], &["network.client"]),
            &signed_artifact(),
            &HOST,
        );
        assert!(verdict.is_accepted());
    }

    #[test]
    fn test_deterministic() {
        let validator = validator();
        let desc = descriptor(&[Capability::FilesystemAccess], &[]);
        let artifact = signed_artifact();
        let first = validator.validate(&desc, &artifact, &HOST);
        for _ in 0..5 {
            assert_eq!(validator.validate(&desc, &artifact, &HOST), first);
        }
    }
}
