//! ACME certificate authority integration
//!
//! [`AcmeProvider`] implements [`IssuanceProvider`](crate::issuance::IssuanceProvider)
//! against an ACME directory (Let's Encrypt by default) and proves domain
//! control with HTTP-01 challenges served by [`serve_http01`].

mod challenge;
mod provider;

pub use challenge::{serve_http01, ChallengeManager, ACME_CHALLENGE_PREFIX};
pub use provider::{AcmeAccount, AcmeProvider};
