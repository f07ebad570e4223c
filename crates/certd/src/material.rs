//! Certificate chain and private key handling.
//!
//! [`CertificateMaterial`] is the PEM pair as issued. Everything derived from
//! it (expiry, covered names, the rustls signing key) is computed here from
//! the certificate itself, never taken from the caller.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use serde::{Deserialize, Serialize};
use x509_parser::extensions::GeneralName;
use x509_parser::time::ASN1Time;

use snicert_common::DomainName;

use crate::error::MaterialError;

/// PEM-encoded certificate chain (leaf first) and its private key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMaterial {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("certificate_pem_len", &self.certificate_pem.len())
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Facts read from the leaf certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafInfo {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// DNS subject alternative names, lower-cased
    pub dns_names: Vec<String>,
    pub common_name: Option<String>,
}

impl LeafInfo {
    /// Whether the certificate is valid for `domain`
    ///
    /// SANs take precedence; the common name is only consulted when the
    /// certificate carries no DNS SANs. A `*.` wildcard matches exactly one
    /// label.
    pub fn covers(&self, domain: &DomainName) -> bool {
        let names: Vec<&str> = if self.dns_names.is_empty() {
            self.common_name.iter().map(String::as_str).collect()
        } else {
            self.dns_names.iter().map(String::as_str).collect()
        };
        names.into_iter().any(|name| name_matches(name, domain.as_str()))
    }
}

fn name_matches(pattern: &str, domain: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => domain
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == domain,
    }
}

impl CertificateMaterial {
    pub fn new(certificate_pem: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        Self {
            certificate_pem: certificate_pem.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    /// Parse the leaf certificate
    pub fn inspect(&self) -> Result<LeafInfo, MaterialError> {
        let chain = parse_chain(&self.certificate_pem)?;
        let leaf = chain.first().ok_or(MaterialError::NoCertificate)?;
        leaf_info(leaf)
    }

    /// Build the rustls key used during handshakes
    ///
    /// Fails unless the private key belongs to the leaf certificate.
    pub fn certified_key(&self) -> Result<Arc<CertifiedKey>, MaterialError> {
        let chain = parse_chain(&self.certificate_pem)?;
        let key = parse_private_key(&self.private_key_pem)?;

        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
            .map_err(|e| MaterialError::UnsupportedKey(e.to_string()))?;
        let certified = CertifiedKey::new(chain, signing_key);

        match certified.keys_match() {
            // Key types that cannot expose their public half are accepted as-is.
            Ok(()) | Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {
                Ok(Arc::new(certified))
            }
            Err(_) => Err(MaterialError::KeyMismatch),
        }
    }
}

fn parse_chain(pem: &str) -> Result<Vec<CertificateDer<'static>>, MaterialError> {
    let chain = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MaterialError::Pem(e.to_string()))?;
    if chain.is_empty() {
        return Err(MaterialError::NoCertificate);
    }
    Ok(chain)
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, MaterialError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| MaterialError::Pem(e.to_string()))?
        .ok_or(MaterialError::NoPrivateKey)
}

fn leaf_info(leaf: &CertificateDer<'_>) -> Result<LeafInfo, MaterialError> {
    let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| MaterialError::X509(e.to_string()))?;

    let validity = cert.validity();
    let not_before = asn1_to_utc(&validity.not_before)?;
    let not_after = asn1_to_utc(&validity.not_after)?;

    let dns_names = match cert.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_ascii_lowercase()),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => return Err(MaterialError::X509(e.to_string())),
    };

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|cn| cn.to_ascii_lowercase());

    Ok(LeafInfo {
        not_before,
        not_after,
        dns_names,
        common_name,
    })
}

fn asn1_to_utc(time: &ASN1Time) -> Result<DateTime<Utc>, MaterialError> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| MaterialError::X509(format!("validity timestamp out of range: {time}")))
}
