//! Code signature verification
//!
//! A plugin bundle may ship a detached signature next to its artifact
//! (`<artifact>.sig`, hex-encoded, optionally prefixed with `ed25519:`). The
//! signature covers the 32-byte BLAKE3 digest of the artifact. A verifier
//! resolves a valid signature to the identity that produced it.

use crate::config::{ConfigError, SecurityConfig, TrustedSigner};
use ed25519_dalek::{Signature, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use thiserror::Error;

/// Identity a signature resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerIdentity {
    pub identity: String,
    pub team: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Signature is malformed: {0}")]
    Malformed(String),

    #[error("Signature does not verify under any trusted signer")]
    Untrusted,
}

/// Platform code-signature verifier
pub trait CodeSignatureVerifier: Send + Sync {
    /// Whether this platform can verify signatures at all
    ///
    /// When unsupported, the signature stage is skipped.
    fn is_supported(&self) -> bool;

    /// Resolve `signature` over `digest` to a trusted identity
    fn verify(
        &self,
        digest: &blake3::Hash,
        signature: &[u8],
    ) -> Result<SignerIdentity, SignatureError>;
}

/// Verifier for platforms without code signing
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedVerifier;

impl CodeSignatureVerifier for UnsupportedVerifier {
    fn is_supported(&self) -> bool {
        false
    }

    fn verify(
        &self,
        _digest: &blake3::Hash,
        _signature: &[u8],
    ) -> Result<SignerIdentity, SignatureError> {
        Err(SignatureError::Untrusted)
    }
}

struct TrustedRoot {
    identity: SignerIdentity,
    key: VerifyingKey,
}

/// Ed25519 verifier over a fixed set of trusted signers
pub struct Ed25519Verifier {
    roots: Vec<TrustedRoot>,
}

impl Ed25519Verifier {
    /// Build from configured signers
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if any signer key cannot be decoded.
    pub fn new(signers: &[TrustedSigner]) -> Result<Self, ConfigError> {
        let roots = signers
            .iter()
            .map(|signer| {
                Ok(TrustedRoot {
                    identity: SignerIdentity {
                        identity: signer.identity.clone(),
                        team: signer.team.clone(),
                    },
                    key: signer.verifying_key()?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        tracing::debug!(signers = roots.len(), "Ed25519 verifier initialized");
        Ok(Self { roots })
    }

    /// Build from already decoded keys
    pub fn from_keys(keys: impl IntoIterator<Item = (SignerIdentity, VerifyingKey)>) -> Self {
        Self {
            roots: keys
                .into_iter()
                .map(|(identity, key)| TrustedRoot { identity, key })
                .collect(),
        }
    }

    fn parse_signature(raw: &[u8]) -> Result<Signature, SignatureError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| SignatureError::Malformed("signature file is not text".to_string()))?
            .trim();
        let hex = text.strip_prefix("ed25519:").unwrap_or(text);

        let bytes = hex::decode(hex).map_err(|e| SignatureError::Malformed(e.to_string()))?;

        let sig_bytes: [u8; SIGNATURE_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            SignatureError::Malformed(format!(
                "expected {} bytes, got {}",
                SIGNATURE_LENGTH,
                b.len()
            ))
        })?;

        Ok(Signature::from_bytes(&sig_bytes))
    }
}

impl CodeSignatureVerifier for Ed25519Verifier {
    fn is_supported(&self) -> bool {
        true
    }

    fn verify(
        &self,
        digest: &blake3::Hash,
        signature: &[u8],
    ) -> Result<SignerIdentity, SignatureError> {
        let signature = Self::parse_signature(signature)?;

        self.roots
            .iter()
            .find(|root| root.key.verify(digest.as_bytes(), &signature).is_ok())
            .map(|root| root.identity.clone())
            .ok_or(SignatureError::Untrusted)
    }
}

/// Verifier selected by the security configuration
pub fn verifier_from_config(
    security: &SecurityConfig,
) -> Result<Box<dyn CodeSignatureVerifier>, ConfigError> {
    if security.verify_signatures {
        Ok(Box::new(Ed25519Verifier::new(&security.signers)?))
    } else {
        tracing::warn!("Signature verification disabled by configuration");
        Ok(Box::new(UnsupportedVerifier))
    }
}
