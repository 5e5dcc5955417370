//! Cryptographic Verification
//!
//! Two-stage package check: SHA-256 of the downloaded file must match the
//! manifest checksum, and an Ed25519 signature over that digest must verify
//! against the trusted key.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::package::{UpdatePackage, VerifiedPackage};

/// Verification errors
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Cannot read package: {0}")]
    Io(#[from] std::io::Error),
}

/// SHA-256 digest of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string (case-insensitive)
    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("invalid hex digest: {}", e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected 32 digest bytes, got {}", b.len()))?;
        Ok(Self(bytes))
    }

    /// Digest of an in-memory buffer
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Digest of a file, read in chunks
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        use std::io::Read;

        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Ed25519 public key packages must be signed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedKey(VerifyingKey);

impl TrustedKey {
    /// Decode a base64 (standard alphabet) 32-byte public key
    pub fn from_base64(encoded: &str) -> Result<Self, VerificationError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| VerificationError::InvalidPublicKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            VerificationError::InvalidPublicKey(format!("expected 32 bytes, got {}", b.len()))
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, VerificationError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| VerificationError::InvalidPublicKey(e.to_string()))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }
}

/// Trait for package verifiers
#[async_trait]
pub trait PackageVerifier: Send + Sync {
    /// Check `package` against the manifest checksum and signature
    async fn verify(
        &self,
        package: &UpdatePackage,
        expected_checksum: &Sha256Digest,
        signature: &[u8],
        trusted_key: &TrustedKey,
    ) -> Result<(), VerificationError>;
}

/// Checksum + Ed25519 signature verifier
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    pub fn new() -> Self {
        Self
    }

    /// Stage 1: recompute the digest and compare it byte-for-byte
    pub fn check_digest(
        actual: &Sha256Digest,
        expected: &Sha256Digest,
    ) -> Result<(), VerificationError> {
        if actual != expected {
            return Err(VerificationError::ChecksumMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Stage 2: the signature must cover the recomputed digest
    pub fn check_signature(
        digest: &Sha256Digest,
        signature: &[u8],
        trusted_key: &TrustedKey,
    ) -> Result<(), VerificationError> {
        let signature = Signature::from_slice(signature)
            .map_err(|e| VerificationError::MalformedSignature(e.to_string()))?;
        trusted_key
            .verifying_key()
            .verify_strict(digest.as_bytes(), &signature)
            .map_err(|_| VerificationError::InvalidSignature)
    }
}

#[async_trait]
impl PackageVerifier for Ed25519Verifier {
    async fn verify(
        &self,
        package: &UpdatePackage,
        expected_checksum: &Sha256Digest,
        signature: &[u8],
        trusted_key: &TrustedKey,
    ) -> Result<(), VerificationError> {
        let path = package.path().to_path_buf();
        let actual = tokio::task::spawn_blocking(move || Sha256Digest::of_file(&path))
            .await
            .map_err(|e| {
                VerificationError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
            })??;

        Self::check_digest(&actual, expected_checksum)?;
        Self::check_signature(&actual, signature, trusted_key)
    }
}

/// Run `verifier` and promote the package on success.
///
/// On failure the package file is deleted before the error is returned, so
/// an unverified package can never reach the installer.
pub async fn verify_package(
    verifier: &dyn PackageVerifier,
    package: UpdatePackage,
    trusted_key: &TrustedKey,
) -> Result<VerifiedPackage, VerificationError> {
    let manifest = package.manifest();
    let outcome = verifier
        .verify(
            &package,
            &manifest.package_checksum,
            &manifest.package_signature,
            trusted_key,
        )
        .await;

    match outcome {
        Ok(()) => Ok(VerifiedPackage::from_checked(package)),
        Err(e) => {
            if let Err(io) = package.discard().await {
                tracing::warn!("Failed to delete rejected package: {}", io);
            }
            Err(e)
        }
    }
}
