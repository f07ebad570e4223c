//! SNI-based certificate selection
//!
//! [`SniResolver`] is handed to rustls as the server's certificate resolver.
//! Every lookup ends with a certificate: anything that prevents serving the
//! domain's own certificate degrades to the default one.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tracing::{trace, warn};

use snicert_common::DomainName;

use crate::default_cert::DefaultCertificate;
use crate::error::{MaterialError, StoreError};
use crate::metrics::Metrics;
use crate::store::{CertificateRecord, RecordStore};

/// Why the default certificate was presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Client sent no SNI extension
    NoServerName,
    /// SNI value is not a valid DNS name
    InvalidName,
    /// No certificate issued for the name
    NotFound,
    /// The stored material cannot back a handshake
    Unreadable,
    /// The record store failed the lookup
    StoreUnavailable,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoServerName => "no_server_name",
            Self::InvalidName => "invalid_name",
            Self::NotFound => "not_found",
            Self::Unreadable => "unreadable",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Where a resolved certificate came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    Domain(DomainName),
    Default(FallbackReason),
}

/// Result of a lookup
#[derive(Clone)]
pub struct Resolved {
    pub key: Arc<CertifiedKey>,
    pub source: CertificateSource,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Signing key built from one specific record
struct CachedKey {
    record: Arc<CertificateRecord>,
    key: Result<Arc<CertifiedKey>, MaterialError>,
}

/// Certificate resolver backed by a [`RecordStore`]
///
/// Parsed keys are cached per domain and rebuilt when the store hands back a
/// different record, so a renewal is picked up by the next handshake.
pub struct SniResolver {
    store: Arc<dyn RecordStore>,
    fallback: Arc<DefaultCertificate>,
    keys: DashMap<DomainName, CachedKey>,
    metrics: Option<Arc<Metrics>>,
}

impl SniResolver {
    pub fn new(store: Arc<dyn RecordStore>, fallback: Arc<DefaultCertificate>) -> Self {
        Self {
            store,
            fallback,
            keys: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Select the certificate for a requested server name
    ///
    /// `None` or an empty name selects the default certificate.
    pub fn resolve_name(&self, server_name: Option<&str>) -> Resolved {
        let raw = match server_name.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => return self.fallback(FallbackReason::NoServerName),
        };

        let domain = match DomainName::parse(raw) {
            Ok(domain) => domain,
            Err(e) => {
                trace!(server_name = %raw, error = %e, "Ignoring invalid SNI value");
                return self.fallback(FallbackReason::InvalidName);
            }
        };

        let record = match self.store.get(&domain) {
            Ok(Some(record)) => record,
            Ok(None) => {
                trace!(domain = %domain, "No certificate for SNI name");
                return self.fallback(FallbackReason::NotFound);
            }
            Err(StoreError::Unreadable { reason, .. }) => {
                warn!(domain = %domain, error = %reason, "Stored certificate unreadable, presenting default");
                return self.fallback(FallbackReason::Unreadable);
            }
            Err(e) => {
                warn!(domain = %domain, error = %e, "Record store lookup failed, presenting default");
                return self.fallback(FallbackReason::StoreUnavailable);
            }
        };

        match self.key_for(&domain, record) {
            Ok(key) => {
                trace!(domain = %domain, "Resolved domain certificate");
                Resolved {
                    key,
                    source: CertificateSource::Domain(domain),
                }
            }
            Err(_) => self.fallback(FallbackReason::Unreadable),
        }
    }

    fn key_for(
        &self,
        domain: &DomainName,
        record: Arc<CertificateRecord>,
    ) -> Result<Arc<CertifiedKey>, MaterialError> {
        if let Some(cached) = self.keys.get(domain) {
            if Arc::ptr_eq(&cached.record, &record) {
                return cached.key.clone();
            }
        }

        let key = record.material().certified_key();
        if let Err(e) = &key {
            // Logged once per record version; later handshakes hit the cache.
            warn!(domain = %domain, error = %e, "Stored certificate unusable, presenting default");
        }
        self.keys.insert(
            domain.clone(),
            CachedKey {
                record,
                key: key.clone(),
            },
        );
        key
    }

    fn fallback(&self, reason: FallbackReason) -> Resolved {
        if let Some(metrics) = &self.metrics {
            metrics.record_sni_fallback(reason.as_str());
        }
        Resolved {
            key: self.fallback.certified_key(),
            source: CertificateSource::Default(reason),
        }
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.resolve_name(client_hello.server_name()).key)
    }
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniResolver")
            .field("store", &self.store)
            .field("fallback", &self.fallback.name())
            .field("cached_keys", &self.keys.len())
            .finish()
    }
}
