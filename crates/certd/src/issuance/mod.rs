//! Certificate issuance
//!
//! [`IssuanceProvider`] is the certificate authority seam;
//! [`IssuanceCoordinator`] guarantees one attempt per domain at a time and
//! persists successful results.

mod coordinator;
mod provider;

pub use coordinator::{InFlight, IssuanceCoordinator, IssuanceOutcome, DEFAULT_ISSUANCE_TIMEOUT};
pub use provider::{AccountKey, IssuanceProvider, IssuedCertificate, ProviderError};
