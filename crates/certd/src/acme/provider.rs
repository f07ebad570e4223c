//! ACME issuance through `instant-acme`

use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, Order,
    OrderStatus,
};
use rcgen::CertificateParams;
use tracing::{debug, info};

use snicert_common::DomainName;
use snicert_config::AcmeConfig;

use super::challenge::ChallengeManager;
use crate::issuance::{AccountKey, IssuanceProvider, IssuedCertificate, ProviderError};

/// Status polls before an order is given up on
const MAX_POLL_ATTEMPTS: u32 = 30;

/// Registered ACME account plus the key the certificate will be issued for
pub struct AcmeAccount {
    account: Account,
    certificate_key: AccountKey,
}

impl std::fmt::Debug for AcmeAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeAccount")
            .field("certificate_key", &self.certificate_key)
            .finish_non_exhaustive()
    }
}

/// [`IssuanceProvider`] speaking ACME with HTTP-01 validation
#[derive(Debug, Clone)]
pub struct AcmeProvider {
    directory_url: String,
    challenges: ChallengeManager,
    poll_interval: Duration,
}

impl AcmeProvider {
    pub fn new(config: &AcmeConfig, challenges: ChallengeManager) -> Self {
        Self {
            directory_url: config.directory_url().to_string(),
            challenges,
            poll_interval: config.order_poll_interval(),
        }
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    async fn validate(&self, order: &mut Order, domain: &DomainName) -> Result<(), ProviderError> {
        let authorizations = order.authorizations().await.map_err(rejected)?;
        let mut tokens = Vec::new();

        let result = async {
            for authz in &authorizations {
                if authz.status == AuthorizationStatus::Valid {
                    continue;
                }
                let challenge = authz
                    .challenges
                    .iter()
                    .find(|c| c.r#type == ChallengeType::Http01)
                    .ok_or_else(|| {
                        ProviderError::Validation(format!(
                            "No HTTP-01 challenge offered for {domain}"
                        ))
                    })?;

                let key_authorization = order.key_authorization(challenge);
                self.challenges
                    .add_challenge(&challenge.token, key_authorization.as_str());
                tokens.push(challenge.token.clone());

                order
                    .set_challenge_ready(&challenge.url)
                    .await
                    .map_err(rejected)?;
            }

            self.poll_order(order, domain, OrderStatus::Ready).await
        }
        .await;

        for token in &tokens {
            self.challenges.remove_challenge(token);
        }
        result
    }

    /// Poll until the order reaches `target`
    async fn poll_order(
        &self,
        order: &mut Order,
        domain: &DomainName,
        target: OrderStatus,
    ) -> Result<(), ProviderError> {
        for attempt in 1..=MAX_POLL_ATTEMPTS {
            let status = order.refresh().await.map_err(rejected)?.status;
            debug!(domain = %domain, ?status, attempt, "Polled ACME order");

            if status == target || (target == OrderStatus::Ready && status == OrderStatus::Valid) {
                return Ok(());
            }
            if status == OrderStatus::Invalid {
                return Err(ProviderError::Validation(format!(
                    "Order for {domain} became invalid"
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(ProviderError::Validation(format!(
            "Order for {domain} did not reach {target:?} after {MAX_POLL_ATTEMPTS} polls"
        )))
    }
}

#[async_trait]
impl IssuanceProvider for AcmeProvider {
    type Account = AcmeAccount;

    /// Create an ACME account for `email`
    ///
    /// instant-acme generates the account's own signing key; `key` is not
    /// sent to the CA and becomes the key of the issued certificate.
    async fn register(&self, email: &str, key: AccountKey) -> Result<AcmeAccount, ProviderError> {
        let contact = format!("mailto:{email}");
        let (account, _credentials) = Account::create(
            &NewAccount {
                contact: &[&contact],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(rejected)?;

        debug!(email = %email, directory = %self.directory_url, "Registered ACME account");
        Ok(AcmeAccount {
            account,
            certificate_key: key,
        })
    }

    async fn obtain_certificate(
        &self,
        account: &AcmeAccount,
        domain: &DomainName,
    ) -> Result<IssuedCertificate, ProviderError> {
        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(rejected)?;

        info!(domain = %domain, "Created ACME order");

        if order.state().status == OrderStatus::Pending {
            self.validate(&mut order, domain).await?;
        }

        let mut params = CertificateParams::new(vec![domain.to_string()])
            .map_err(|e| ProviderError::KeyGeneration(e.to_string()))?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        let csr = params
            .serialize_request(account.certificate_key.key_pair())
            .map_err(|e| ProviderError::KeyGeneration(e.to_string()))?;

        order.finalize(csr.der()).await.map_err(rejected)?;
        self.poll_order(&mut order, domain, OrderStatus::Valid).await?;

        let chain = order
            .certificate()
            .await
            .map_err(rejected)?
            .ok_or_else(|| ProviderError::Rejected("No certificate returned".to_string()))?;

        info!(domain = %domain, "ACME order completed");
        Ok(IssuedCertificate {
            certificate_chain_pem: chain,
            private_key_pem: account.certificate_key.private_key_pem(),
        })
    }
}

fn rejected(err: instant_acme::Error) -> ProviderError {
    ProviderError::Rejected(err.to_string())
}
