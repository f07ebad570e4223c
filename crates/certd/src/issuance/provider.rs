//! The certificate authority seam

use std::fmt;

use async_trait::async_trait;
use rcgen::KeyPair;
use thiserror::Error;

use snicert_common::DomainName;

use crate::error::IssuanceFailure;

/// Key pair generated for one issuance attempt
///
/// Never reused across domains or attempts.
pub struct AccountKey {
    key_pair: KeyPair,
}

impl AccountKey {
    pub fn generate() -> Result<Self, ProviderError> {
        let key_pair =
            KeyPair::generate().map_err(|e| ProviderError::KeyGeneration(e.to_string()))?;
        Ok(Self { key_pair })
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn private_key_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("algorithm", &self.key_pair.algorithm())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Signed chain and private key returned by a provider
#[derive(Clone)]
pub struct IssuedCertificate {
    pub certificate_chain_pem: String,
    pub private_key_pem: String,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate_chain_len", &self.certificate_chain_pem.len())
            .finish_non_exhaustive()
    }
}

/// Provider failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The authority refused the account or the order
    #[error("{0}")]
    Rejected(String),

    /// Domain-control validation did not succeed
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    KeyGeneration(String),
}

impl From<ProviderError> for IssuanceFailure {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected(msg) => Self::ProviderRejected(msg),
            ProviderError::Validation(msg) => Self::ValidationFailed(msg),
            ProviderError::KeyGeneration(msg) => Self::KeyGenerationFailed(msg),
        }
    }
}

/// Obtains signed certificates from a certificate authority
///
/// Domain-control validation happens entirely inside `obtain_certificate`.
#[async_trait]
pub trait IssuanceProvider: Send + Sync + 'static {
    /// Authenticated session with the authority
    type Account: Send + Sync;

    async fn register(&self, email: &str, key: AccountKey) -> Result<Self::Account, ProviderError>;

    async fn obtain_certificate(
        &self,
        account: &Self::Account,
        domain: &DomainName,
    ) -> Result<IssuedCertificate, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_maps_to_failure() {
        assert_eq!(
            IssuanceFailure::from(ProviderError::Validation("dns".into())),
            IssuanceFailure::ValidationFailed("dns".into())
        );
        assert_eq!(
            IssuanceFailure::from(ProviderError::Rejected("rate limited".into())).kind(),
            "provider_rejected"
        );
    }

    #[test]
    fn test_account_keys_are_fresh() {
        let a = AccountKey::generate().unwrap();
        let b = AccountKey::generate().unwrap();
        assert_ne!(a.private_key_pem(), b.private_key_pem());
        assert!(!format!("{a:?}").contains("PRIVATE KEY"));
    }
}
