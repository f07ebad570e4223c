//! Certificate record storage
//!
//! A [`RecordStore`] maps each domain to exactly one [`CertificateRecord`].
//! Records are immutable once built and shared as `Arc`s; a renewal replaces
//! the whole record, so readers observe either the old or the new one.

mod file;
mod memory;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use snicert_common::DomainName;

use crate::error::{MaterialError, StoreError};
use crate::material::CertificateMaterial;

pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;

/// One issued certificate for one domain
///
/// The only way to build a record is from material that parses, whose key
/// matches the leaf and whose leaf covers the domain. `not_after` always
/// comes from the certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    domain: DomainName,
    email: String,
    material: CertificateMaterial,
    issued_at: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl CertificateRecord {
    /// Build a record issued now
    pub fn new(
        domain: DomainName,
        email: impl Into<String>,
        material: CertificateMaterial,
    ) -> Result<Self, MaterialError> {
        Self::from_parts(domain, email, material, Utc::now())
    }

    /// Build a record with an explicit issue time (used when loading from disk)
    pub fn from_parts(
        domain: DomainName,
        email: impl Into<String>,
        material: CertificateMaterial,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, MaterialError> {
        let info = material.inspect()?;
        if !info.covers(&domain) {
            return Err(MaterialError::NotCovering(domain.to_string()));
        }
        material.certified_key()?;

        Ok(Self {
            domain,
            email: email.into(),
            material,
            issued_at,
            not_after: info.not_after,
        })
    }

    pub fn domain(&self) -> &DomainName {
        &self.domain
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn material(&self) -> &CertificateMaterial {
        &self.material
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Time left before expiry, negative once expired
    pub fn time_remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.not_after - now
    }
}

impl fmt::Debug for CertificateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRecord")
            .field("domain", &self.domain)
            .field("email", &self.email)
            .field("issued_at", &self.issued_at)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Durable mapping from domain to certificate record
///
/// Implementations must make `put` atomic: a concurrent `get` returns the
/// previous record or the new one, never a mix. Methods are synchronous and
/// must not touch the network; the SNI resolver calls `get` from inside the
/// TLS handshake.
pub trait RecordStore: Send + Sync + fmt::Debug {
    fn get(&self, domain: &DomainName) -> Result<Option<Arc<CertificateRecord>>, StoreError>;

    /// Insert or replace the record for its domain
    fn put(&self, record: CertificateRecord) -> Result<Arc<CertificateRecord>, StoreError>;

    /// Snapshot of every record
    fn list_all(&self) -> Result<Vec<Arc<CertificateRecord>>, StoreError>;

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.list_all()?.len())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    /// Self-signed material for `domain` valid from yesterday for `days` more days
    pub(crate) fn material_for(domain: &str, days: i64) -> CertificateMaterial {
        let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + time::Duration::days(days);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        CertificateMaterial::new(cert.pem(), key.serialize_pem())
    }

    pub(crate) fn record_for(domain: &str, email: &str, days: i64) -> CertificateRecord {
        CertificateRecord::new(
            DomainName::parse(domain).unwrap(),
            email,
            material_for(domain, days),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_not_after_comes_from_certificate() {
        let record = record_for("example.test", "a@b.test", 90);
        let expected = material_for("example.test", 90).inspect().unwrap().not_after;

        let drift = (record.not_after() - expected).num_seconds().abs();
        assert!(drift <= 5, "not_after drifted by {drift}s");
        assert_eq!(record.email(), "a@b.test");
        assert_eq!(record.domain().as_str(), "example.test");
    }

    #[test]
    fn test_rejects_certificate_for_other_domain() {
        let err = CertificateRecord::new(
            DomainName::parse("example.test").unwrap(),
            "a@b.test",
            material_for("other.test", 90),
        )
        .unwrap_err();
        assert_eq!(err, MaterialError::NotCovering("example.test".to_string()));
    }

    #[test]
    fn test_rejects_mismatched_key() {
        let a = material_for("example.test", 90);
        let b = material_for("example.test", 90);
        let err = CertificateRecord::new(
            DomainName::parse("example.test").unwrap(),
            "a@b.test",
            CertificateMaterial::new(a.certificate_pem, b.private_key_pem),
        )
        .unwrap_err();
        assert_eq!(err, MaterialError::KeyMismatch);
    }

    #[test]
    fn test_time_remaining() {
        let record = record_for("example.test", "a@b.test", 20);
        let remaining = record.time_remaining(Utc::now());
        assert!(remaining > chrono::Duration::days(19));
        assert!(remaining <= chrono::Duration::days(20));
    }
}
