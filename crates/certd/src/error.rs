//! Error taxonomy for the certificate lifecycle.
//!
//! Every error here is `Clone`: one issuance outcome is delivered to every
//! caller waiting on the same domain.

use std::time::Duration;

use snicert_common::DomainName;
use thiserror::Error;

/// Record store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Storage unreachable or I/O failure; retryable
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    /// Material on disk for a domain is missing or corrupt
    #[error("Certificate for {domain} is unreadable: {reason}")]
    Unreadable { domain: String, reason: String },
}

impl StoreError {
    pub(crate) fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Unavailable(format!("{context}: {err}"))
    }
}

/// Certificate or key material that cannot back a TLS handshake
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterialError {
    #[error("No certificate found in PEM data")]
    NoCertificate,

    #[error("No private key found in PEM data")]
    NoPrivateKey,

    #[error("Malformed PEM: {0}")]
    Pem(String),

    #[error("Malformed X.509 certificate: {0}")]
    X509(String),

    #[error("Unsupported private key: {0}")]
    UnsupportedKey(String),

    #[error("Private key does not match the certificate")]
    KeyMismatch,

    #[error("Certificate does not cover {0}")]
    NotCovering(String),

    #[error("Certificate generation failed: {0}")]
    Generation(String),
}

/// Why an issuance attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IssuanceFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("domain validation failed: {0}")]
    ValidationFailed(String),

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("issued material is unusable: {0}")]
    InvalidMaterial(#[from] MaterialError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("issuance task ended without a result")]
    Abandoned,
}

impl IssuanceFailure {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::ProviderRejected(_) => "provider_rejected",
            Self::ValidationFailed(_) => "validation_failed",
            Self::KeyGenerationFailed(_) => "key_generation_failed",
            Self::InvalidMaterial(_) => "invalid_material",
            Self::Store(_) => "store_unavailable",
            Self::Cancelled => "cancelled",
            Self::Abandoned => "abandoned",
        }
    }
}

/// A failed issuance or renewal for one domain
///
/// The domain keeps its previous certificate (or none) unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Issuance for {domain} failed: {cause}")]
pub struct IssuanceError {
    pub domain: DomainName,
    pub cause: IssuanceFailure,
}

impl IssuanceError {
    pub fn new(domain: DomainName, cause: impl Into<IssuanceFailure>) -> Self {
        Self {
            domain,
            cause: cause.into(),
        }
    }
}
