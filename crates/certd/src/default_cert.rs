//! Self-signed fallback certificate
//!
//! Generated once at startup and held in memory; never persisted or renewed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rcgen::{
    CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::sign::CertifiedKey;
use tracing::info;

use snicert_config::DefaultCertificateConfig;

use crate::error::MaterialError;
use crate::material::CertificateMaterial;

/// The certificate presented when no domain certificate applies
#[derive(Debug)]
pub struct DefaultCertificate {
    name: String,
    not_after: DateTime<Utc>,
    material: CertificateMaterial,
    key: Arc<CertifiedKey>,
}

impl DefaultCertificate {
    /// Generate a fresh self-signed certificate valid from now
    pub fn generate(config: &DefaultCertificateConfig) -> Result<Self, MaterialError> {
        let generation = |e: rcgen::Error| MaterialError::Generation(e.to_string());

        let mut params = CertificateParams::new(vec![config.name.clone()]).map_err(generation)?;
        params
            .distinguished_name
            .push(DnType::OrganizationName, config.organization.clone());
        params
            .distinguished_name
            .push(DnType::CommonName, config.name.clone());

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now
            .checked_add(time::Duration::days(i64::from(config.validity_days)))
            .ok_or_else(|| {
                MaterialError::Generation(format!(
                    "validity of {} days is out of range",
                    config.validity_days
                ))
            })?;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let key_pair = KeyPair::generate().map_err(generation)?;
        let cert = params.self_signed(&key_pair).map_err(generation)?;

        let material = CertificateMaterial::new(cert.pem(), key_pair.serialize_pem());
        let info = material.inspect()?;
        let key = material.certified_key()?;

        info!(
            name = %config.name,
            not_after = %info.not_after,
            "Generated default self-signed certificate"
        );

        Ok(Self {
            name: config.name.clone(),
            not_after: info.not_after,
            material,
            key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn material(&self) -> &CertificateMaterial {
        &self.material
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity_and_lifetime() {
        let config = DefaultCertificateConfig::default();
        let cert = DefaultCertificate::generate(&config).unwrap();
        let info = cert.material().inspect().unwrap();

        assert_eq!(cert.name(), "localhost");
        assert_eq!(info.dns_names, vec!["localhost"]);
        assert_eq!(info.common_name.as_deref(), Some("localhost"));

        let lifetime = info.not_after - info.not_before;
        assert_eq!(lifetime.num_days(), 365);
        assert!(cert.not_after() > Utc::now() + chrono::Duration::days(364));
    }

    #[test]
    fn test_custom_name_and_validity() {
        let config = DefaultCertificateConfig {
            name: "fallback.invalid".to_string(),
            organization: "Example".to_string(),
            validity_days: 30,
        };
        let cert = DefaultCertificate::generate(&config).unwrap();
        let info = cert.material().inspect().unwrap();

        assert_eq!(info.dns_names, vec!["fallback.invalid"]);
        assert_eq!((info.not_after - info.not_before).num_days(), 30);
    }

    #[test]
    fn test_out_of_range_validity_is_an_error() {
        let config = DefaultCertificateConfig {
            validity_days: u32::MAX,
            ..Default::default()
        };
        let err = DefaultCertificate::generate(&config).unwrap_err();
        assert!(matches!(err, MaterialError::Generation(ref msg) if msg.contains("out of range")));
    }

    #[test]
    fn test_key_is_shared() {
        let cert = DefaultCertificate::generate(&DefaultCertificateConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&cert.certified_key(), &cert.certified_key()));
    }
}
