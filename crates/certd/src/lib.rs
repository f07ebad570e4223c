//! snicert: per-SNI certificate lifecycle manager
//!
//! Issues certificates on request, stores them, presents the right one for
//! each TLS handshake based on the requested server name, and renews them
//! before they expire.
//!
//! # Components
//!
//! - [`store`]: durable domain to certificate mapping with atomic replace
//! - [`default_cert`]: self-signed fallback generated at startup
//! - [`resolver`]: rustls certificate resolver that never fails a handshake
//! - [`issuance`]: per-domain serialized issuance through an [`IssuanceProvider`]
//! - [`scheduler`]: periodic renewal of certificates nearing expiry
//! - [`acme`]: ACME provider with HTTP-01 validation
//! - [`server`]: HTTPS listener and admin API
//! - [`app`]: wiring for the binary

pub mod acme;
pub mod app;
pub mod default_cert;
pub mod error;
pub mod issuance;
pub mod material;
pub mod metrics;
pub mod resolver;
pub mod scheduler;
pub mod server;
pub mod store;

pub use app::App;
pub use default_cert::DefaultCertificate;
pub use error::{IssuanceError, IssuanceFailure, MaterialError, StoreError};
pub use issuance::{AccountKey, IssuanceCoordinator, IssuanceProvider, IssuedCertificate, ProviderError};
pub use material::{CertificateMaterial, LeafInfo};
pub use metrics::Metrics;
pub use resolver::{CertificateSource, FallbackReason, Resolved, SniResolver};
pub use scheduler::{RenewalReport, RenewalScheduler, SchedulerState};
pub use store::{CertificateRecord, FileRecordStore, MemoryRecordStore, RecordStore};

pub use snicert_common::{DomainError, DomainName};
