//! Shared building blocks for snicert.
//!
//! - [`DomainName`]: the normalized key every certificate is stored and
//!   resolved under
//! - [`observability`]: tracing subscriber bootstrap for binaries

pub mod domain;
#[cfg(feature = "runtime")]
pub mod observability;

pub use domain::{DomainError, DomainName};
