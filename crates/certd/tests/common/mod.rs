//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rcgen::{CertificateParams, KeyPair};

use snicert::{AccountKey, DomainName, IssuanceProvider, IssuedCertificate, ProviderError};

/// Provider that mints self-signed certificates with a chosen lifetime
///
/// Clones share state, so a test can keep one to script and inspect the
/// provider it handed to the coordinator.
#[derive(Clone)]
pub struct ScriptedProvider {
    inner: Arc<Script>,
}

struct Script {
    lifetime_days: Mutex<i64>,
    failure: Mutex<Option<ProviderError>>,
    orders: AtomicUsize,
    registrations: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(lifetime_days: i64) -> Self {
        Self {
            inner: Arc::new(Script {
                lifetime_days: Mutex::new(lifetime_days),
                failure: Mutex::new(None),
                orders: AtomicUsize::new(0),
                registrations: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_lifetime_days(&self, days: i64) {
        *self.inner.lifetime_days.lock() = days;
    }

    pub fn fail_with(&self, err: Option<ProviderError>) {
        *self.inner.failure.lock() = err;
    }

    pub fn orders(&self) -> usize {
        self.inner.orders.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> Vec<String> {
        self.inner.registrations.lock().clone()
    }
}

#[async_trait]
impl IssuanceProvider for ScriptedProvider {
    type Account = AccountKey;

    async fn register(&self, email: &str, key: AccountKey) -> Result<AccountKey, ProviderError> {
        self.inner.registrations.lock().push(email.to_string());
        Ok(key)
    }

    async fn obtain_certificate(
        &self,
        account: &AccountKey,
        domain: &DomainName,
    ) -> Result<IssuedCertificate, ProviderError> {
        self.inner.orders.fetch_add(1, Ordering::SeqCst);
        let failure = self.inner.failure.lock().clone();
        if let Some(err) = failure {
            return Err(err);
        }

        let days = *self.inner.lifetime_days.lock();
        let mut params = CertificateParams::new(vec![domain.to_string()])
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(days);
        let cert = params
            .self_signed(account.key_pair())
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;

        Ok(IssuedCertificate {
            certificate_chain_pem: cert.pem(),
            private_key_pem: account.private_key_pem(),
        })
    }
}

/// Self-signed material for seeding a store directly
pub fn material_for(domain: &str, days: i64) -> snicert::CertificateMaterial {
    let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(1);
    params.not_after = now + time::Duration::days(days);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    snicert::CertificateMaterial::new(cert.pem(), key.serialize_pem())
}

pub fn domain(name: &str) -> DomainName {
    DomainName::parse(name).unwrap()
}
