//! Advisory risk scoring
//!
//! Each plugin gets a numeric score for display purposes:
//!
//! - **+2** for each of `filesystem-access` and `network-access`
//! - **+1** for each missing piece of trust evidence (team identifier,
//!   signing identity, checksum)
//!
//! Scores bucket into low (0-1), medium (2-3) and high (4+). The score never
//! influences the trust verdict.

use sdk::{Capability, PluginDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display bucket for a risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn from_score(score: u8) -> Self {
        match score {
            0..=1 => RiskLevel::Low,
            2..=3 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        })
    }
}

/// Risk assessment for one descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskScore {
    pub score: u8,
    pub level: RiskLevel,
    /// What contributed to the score
    pub factors: Vec<&'static str>,
}

impl RiskScore {
    /// Score a descriptor
    ///
    /// # Examples
    ///
    /// ```
    /// use quire_engine::trust::{RiskLevel, RiskScore};
    /// use sdk::PluginDescriptor;
    ///
    /// let descriptor = PluginDescriptor::parse(br#"
    /// [plugin]
    /// id = "net"
    /// name = "Net"
    /// version = "1.0.0"
    /// author = "a"
    /// artifact = "libnet.so"
    /// capabilities = ["network-access", "filesystem-access"]
    ///
    /// [host]
    /// min = "1.0.0"
    /// "#).unwrap();
    ///
    /// let risk = RiskScore::assess(&descriptor);
    /// assert_eq!(risk.score, 7);
    /// assert_eq!(risk.level, RiskLevel::High);
    /// ```
    pub fn assess(descriptor: &PluginDescriptor) -> Self {
        let caps = &descriptor.capabilities;
        let trust = &descriptor.trust;
        let checks = [
            (caps.contains(Capability::FilesystemAccess), 2, "filesystem-access"),
            (caps.contains(Capability::NetworkAccess), 2, "network-access"),
            (trust.team_identifier.is_none(), 1, "no team identifier"),
            (trust.signing_identity.is_none(), 1, "no signing identity"),
            (trust.checksum.is_none(), 1, "no checksum"),
        ];

        let mut score = 0u8;
        let mut factors = Vec::new();
        for (applies, points, factor) in checks {
            if applies {
                score += points;
                factors.push(factor);
            }
        }

        Self {
            score,
            level: RiskLevel::from_score(score),
            factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::{ContentChecksum, TrustEvidence, Version, VersionRange};

    fn descriptor(capabilities: &[Capability], trust: TrustEvidence) -> PluginDescriptor {
        PluginDescriptor {
            id: "risk".to_string(),
            name: "Risk".to_string(),
            version: Version::new(1, 0, 0),
            author: "a".to_string(),
            description: String::new(),
            artifact: "librisk.so".to_string(),
            capabilities: capabilities.iter().copied().collect(),
            host: VersionRange::at_least(Version::new(1, 0, 0)),
            entitlements: Vec::new(),
            trust,
            menu: Vec::new(),
        }
    }

    fn full_evidence() -> TrustEvidence {
        TrustEvidence {
            signing_identity: Some("Example".to_string()),
            team_identifier: Some("TEAM".to_string()),
            checksum: Some(ContentChecksum::from_bytes([0; 32])),
        }
    }

    #[test]
    fn test_fully_evidenced_document_plugin_is_low() {
        let risk = RiskScore::assess(&descriptor(
            &[Capability::DocumentProcessing],
            full_evidence(),
        ));
        assert_eq!(risk.score, 0);
        assert_eq!(risk.level, RiskLevel::Low);
        assert!(risk.factors.is_empty());
    }

    #[test]
    fn test_single_sensitive_capability_is_medium() {
        let risk = RiskScore::assess(&descriptor(&[Capability::NetworkAccess], full_evidence()));
        assert_eq!(risk.score, 2);
        assert_eq!(risk.level, RiskLevel::Medium);
    }

    #[test]
    fn test_missing_evidence_adds_one_each() {
        let mut trust = full_evidence();
        trust.checksum = None;
        let risk = RiskScore::assess(&descriptor(&[], trust));
        assert_eq!(risk.score, 1);
        assert_eq!(risk.level, RiskLevel::Low);

        let risk = RiskScore::assess(&descriptor(&[], TrustEvidence::default()));
        assert_eq!(risk.score, 3);
        assert_eq!(risk.level, RiskLevel::Medium);
        assert_eq!(risk.factors.len(), 3);
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(RiskLevel::from_score(1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(2), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(4), RiskLevel::High);
    }
}
