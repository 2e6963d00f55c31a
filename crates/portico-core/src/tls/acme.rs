// ACME client for automatic certificate issuance
//
// Orders are validated with HTTP-01: tokens are published in the shared challenge store and served
// by the plaintext listener while the CA checks them.

use std::{sync::Arc, time::Duration};

use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use tokio::sync::Mutex;

use crate::{config::AcmePolicy, error::CertificateError, logging::Logger};

use super::{
    authority::{AcquireFuture, CertificateAuthority, IssuedCertificate},
    cache::DirCache,
    challenge::ChallengeStore,
};

const MAX_ORDER_POLLS: u32 = 10;
const MAX_CERTIFICATE_POLLS: u32 = 10;

/// Issues certificates from an ACME directory (Let's Encrypt by default)
pub struct AcmeAuthority {
    directory_url: String,
    contact: String,
    cache: DirCache,
    challenges: ChallengeStore,
    account: Mutex<Option<Arc<Account>>>,
    logger: Logger,
}

impl AcmeAuthority {
    pub fn new(policy: &AcmePolicy, challenges: ChallengeStore, logger: Logger) -> Self {
        AcmeAuthority {
            directory_url: policy.directory_url().to_string(),
            contact: format!("mailto:{}", policy.contact_email()),
            cache: DirCache::new(policy.cache_directory()),
            challenges,
            account: Mutex::new(None),
            logger,
        }
    }

    /// Returns the registered account, loading stored credentials or registering a new one on
    /// first use
    async fn account(&self) -> Result<Arc<Account>, String> {
        let mut slot = self.account.lock().await;
        if let Some(account) = slot.as_ref() {
            return Ok(Arc::clone(account));
        }

        let stored = match self.cache.load_account() {
            Ok(stored) => stored,
            Err(e) => {
                log_warn!(self.logger, "Ignoring stored ACME account: {}", e);
                None
            }
        };

        let restored = match stored.map(|s| serde_json::from_str::<AccountCredentials>(&s)) {
            Some(Ok(credentials)) => match Account::from_credentials(credentials).await {
                Ok(account) => {
                    log_debug!(self.logger, "Loaded existing ACME account");
                    Some(account)
                }
                Err(e) => {
                    log_warn!(self.logger, "Failed to load ACME account: {}, creating a new one", e);
                    None
                }
            },
            Some(Err(e)) => {
                log_warn!(self.logger, "Invalid stored ACME credentials: {}", e);
                None
            }
            None => None,
        };

        let account = match restored {
            Some(account) => account,
            None => self.register().await?,
        };

        let account = Arc::new(account);
        *slot = Some(Arc::clone(&account));
        Ok(account)
    }

    async fn register(&self) -> Result<Account, String> {
        log_info!(self.logger, "Registering ACME account at {}", self.directory_url);

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[self.contact.as_str()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|e| format!("account registration failed: {e}"))?;

        match serde_json::to_string(&credentials) {
            Ok(json) => {
                if let Err(e) = self.cache.store_account(&json) {
                    log_warn!(self.logger, "Failed to persist ACME account: {}", e);
                }
            }
            Err(e) => log_warn!(self.logger, "Failed to serialize ACME account: {}", e),
        }

        Ok(account)
    }

    async fn issue(&self, host: &str) -> Result<IssuedCertificate, String> {
        let account = self.account().await?;

        let identifiers = [Identifier::Dns(host.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| format!("new order failed: {e}"))?;

        let mut tokens = Vec::new();
        let result = self.validate_and_finalize(host, &mut order, &mut tokens).await;

        for token in &tokens {
            self.challenges.remove(token);
        }

        result
    }

    async fn validate_and_finalize(
        &self,
        host: &str,
        order: &mut Order,
        tokens: &mut Vec<String>,
    ) -> Result<IssuedCertificate, String> {
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| format!("failed to fetch authorizations: {e}"))?;

        for authz in authorizations {
            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                status => return Err(format!("authorization status: {status:?}")),
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| "no HTTP-01 challenge offered".to_string())?;

            let key_authorization = order.key_authorization(challenge);
            self.challenges
                .insert(challenge.token.clone(), key_authorization.as_str());
            tokens.push(challenge.token.clone());

            log_debug!(self.logger, "Published HTTP-01 token for {}", host);

            order
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(|e| format!("failed to mark challenge ready: {e}"))?;
        }

        let mut delay = Duration::from_millis(250);
        let mut tries = 0;
        loop {
            tokio::time::sleep(delay).await;
            let state = order
                .refresh()
                .await
                .map_err(|e| format!("failed to refresh order: {e}"))?;

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => break,
                OrderStatus::Invalid => return Err("order became invalid".to_string()),
                _ => {}
            }

            tries += 1;
            if tries >= MAX_ORDER_POLLS {
                return Err(format!(
                    "order status: {:?}, gave up after {tries} tries",
                    state.status
                ));
            }
            delay *= 2;
        }

        let key_pair = rcgen::KeyPair::generate().map_err(|e| e.to_string())?;
        let mut params =
            rcgen::CertificateParams::new(vec![host.to_string()]).map_err(|e| e.to_string())?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| format!("failed to create CSR: {e}"))?;

        order
            .finalize(csr.der())
            .await
            .map_err(|e| format!("failed to finalize order: {e}"))?;

        let mut polls = 0;
        let chain = loop {
            match order
                .certificate()
                .await
                .map_err(|e| format!("failed to download certificate: {e}"))?
            {
                Some(chain) => break chain,
                None if polls < MAX_CERTIFICATE_POLLS => {
                    polls += 1;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                None => return Err("certificate was not issued in time".to_string()),
            }
        };

        log_info!(self.logger, "Obtained certificate for {}", host);

        Ok(IssuedCertificate {
            cert_pem: chain.into_bytes(),
            key_pem: key_pair.serialize_pem().into_bytes(),
        })
    }
}

impl CertificateAuthority for AcmeAuthority {
    fn acquire<'a>(&'a self, host: &'a str) -> AcquireFuture<'a> {
        Box::pin(async move {
            self.issue(host)
                .await
                .map_err(|message| CertificateError::AcquisitionFailed {
                    host: host.to_string(),
                    message,
                })
        })
    }
}
