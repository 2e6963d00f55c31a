use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};

use futures_util::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use rustls::sign::CertifiedKey;

use crate::{error::CertificateError, logging::Logger};

use super::{
    authority::CertificateAuthority,
    cache::DirCache,
    manual::{certificate_expiry, certified_key_from_pem},
};

/// Certificates expiring within this many seconds are renewed in the background
pub const RENEWAL_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

/// Minimum pause between two background renewals of the same host after a failure
pub const RENEWAL_RETRY_INTERVAL: Duration = Duration::from_secs(10 * 60);

type Acquisition = Shared<BoxFuture<'static, Result<Arc<CertifiedKey>, CertificateError>>>;

#[derive(Clone)]
struct CachedCertificate {
    key: Arc<CertifiedKey>,
    not_after: i64,
}

impl CachedCertificate {
    fn new(key: Arc<CertifiedKey>) -> Self {
        let not_after = certificate_expiry(&key).unwrap_or_default();
        CachedCertificate { key, not_after }
    }

    fn is_valid(&self, now: i64) -> bool {
        self.not_after > now
    }

    fn needs_renewal(&self, now: i64) -> bool {
        !is_fresh(self.not_after, now)
    }
}

fn is_fresh(not_after: i64, now: i64) -> bool {
    not_after - now > RENEWAL_WINDOW_SECS
}

/// Hands out certificates for allow-listed hosts, acquiring them on demand.
///
/// Lookups go memory, then disk, then the certificate authority. An unexpired certificate is always
/// served; once it enters the renewal window a replacement is requested in the background and the
/// current one keeps being served until the replacement lands. Acquisitions run on their own task,
/// at most one per host, and concurrent callers share their outcome.
#[derive(Clone)]
pub struct CertificateManager {
    inner: Arc<Inner>,
}

struct Inner {
    allowed_hosts: HashSet<String>,
    authority: Arc<dyn CertificateAuthority>,
    cache: DirCache,
    memory: RwLock<HashMap<String, CachedCertificate>>,
    inflight: Mutex<HashMap<String, Acquisition>>,
    failed_renewals: Mutex<HashMap<String, Instant>>,
    logger: Logger,
}

/// Lower-cases a host name and strips the trailing dot of a fully qualified name
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl CertificateManager {
    pub fn new<I, S>(
        allowed_hosts: I,
        authority: Arc<dyn CertificateAuthority>,
        cache: DirCache,
        logger: Logger,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_hosts = allowed_hosts
            .into_iter()
            .map(|h| normalize_host(h.as_ref()))
            .collect();

        CertificateManager {
            inner: Arc::new(Inner {
                allowed_hosts,
                authority,
                cache,
                memory: RwLock::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                failed_renewals: Mutex::new(HashMap::new()),
                logger,
            }),
        }
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        self.inner.allowed_hosts.contains(&normalize_host(host))
    }

    pub fn cache(&self) -> &DirCache {
        &self.inner.cache
    }

    /// Returns a certificate for `host`.
    ///
    /// Only waits on the certificate authority when neither memory nor disk hold an unexpired
    /// certificate.
    pub async fn get_certificate(&self, host: &str) -> Result<Arc<CertifiedKey>, CertificateError> {
        let host = normalize_host(host);
        if !self.inner.allowed_hosts.contains(&host) {
            return Err(CertificateError::UnauthorizedHost(host));
        }

        let now = now();
        let current = self
            .inner
            .valid_from_memory(&host, now)
            .or_else(|| self.inner.valid_from_disk(&host, now));

        match current {
            Some(cached) => {
                if cached.needs_renewal(now) {
                    self.renew_in_background(&host);
                }
                Ok(cached.key)
            }
            None => self.acquisition(&host).await,
        }
    }

    /// Starts a renewal unless one is running or the last one failed recently
    fn renew_in_background(&self, host: &str) {
        let running = self
            .inner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(host);

        let recently_failed = self
            .inner
            .failed_renewals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .is_some_and(|at| at.elapsed() < RENEWAL_RETRY_INTERVAL);

        if running || recently_failed {
            return;
        }

        log_info!(self.inner.logger, "Certificate for {} is due for renewal", host);
        drop(self.acquisition(host));
    }

    /// The running acquisition of `host`, spawned if there is none.
    ///
    /// The acquisition lives on its own task, so callers that stop waiting never stall it.
    fn acquisition(&self, host: &str) -> Acquisition {
        let mut inflight = self
            .inner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        inflight
            .entry(host.to_string())
            .or_insert_with(|| {
                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(inner.acquire(host.to_string()));

                let host = host.to_string();
                async move {
                    task.await.unwrap_or_else(|e| {
                        Err(CertificateError::AcquisitionFailed {
                            host,
                            message: format!("acquisition task failed: {e}"),
                        })
                    })
                }
                .boxed()
                .shared()
            })
            .clone()
    }
}

impl Inner {
    fn valid_from_memory(&self, host: &str, now: i64) -> Option<CachedCertificate> {
        let memory = self.memory.read().unwrap_or_else(PoisonError::into_inner);
        memory.get(host).filter(|cached| cached.is_valid(now)).cloned()
    }

    /// Loads an unexpired certificate from disk into memory
    fn valid_from_disk(&self, host: &str, now: i64) -> Option<CachedCertificate> {
        let stored = match self.cache.load(host) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                log_warn!(self.logger, "Failed to read certificate cache for {}: {}", host, e);
                return None;
            }
        };

        let cached = match certified_key_from_pem(&stored.cert_pem, &stored.key_pem) {
            Ok(key) => CachedCertificate::new(key),
            Err(e) => {
                log_warn!(self.logger, "Ignoring unreadable cached certificate for {}: {}", host, e);
                return None;
            }
        };

        if !cached.is_valid(now) {
            log_info!(self.logger, "Cached certificate for {} has expired", host);
            return None;
        }

        log_debug!(self.logger, "Using cached certificate for {}", host);
        self.remember(host, cached.clone());
        Some(cached)
    }

    fn remember(&self, host: &str, cached: CachedCertificate) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_string(), cached);
    }

    async fn acquire(self: Arc<Self>, host: String) -> Result<Arc<CertifiedKey>, CertificateError> {
        let result = self.issue(&host).await;

        {
            let mut failed = self
                .failed_renewals
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match &result {
                Ok(_) => failed.remove(&host),
                Err(_) => failed.insert(host.clone(), Instant::now()),
            };
        }

        match &result {
            Ok(key) => self.remember(&host, CachedCertificate::new(Arc::clone(key))),
            Err(e) if self.valid_from_memory(&host, now()).is_some() => {
                log_warn!(self.logger, "Renewal failed, keeping the current certificate: {}", e);
            }
            Err(e) => log_warn!(self.logger, "{}", e),
        }

        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&host);

        result
    }

    async fn issue(&self, host: &str) -> Result<Arc<CertifiedKey>, CertificateError> {
        log_info!(self.logger, "Requesting certificate for {}", host);
        let issued = self.authority.acquire(host).await?;

        let key = certified_key_from_pem(&issued.cert_pem, &issued.key_pem).map_err(|message| {
            CertificateError::AcquisitionFailed {
                host: host.to_string(),
                message,
            }
        })?;

        if let Err(e) = self.cache.store(host, &issued) {
            log_warn!(self.logger, "Failed to persist certificate for {}: {}", host, e);
        }

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Files.Example.COM."), "files.example.com");
        assert_eq!(normalize_host("files.example.com"), "files.example.com");
    }

    #[test]
    fn test_renewal_window() {
        let now = 1_000_000_000;

        assert!(is_fresh(now + RENEWAL_WINDOW_SECS + 1, now));
        assert!(!is_fresh(now + RENEWAL_WINDOW_SECS, now));
        assert!(!is_fresh(now - 1, now));
    }

    #[test]
    fn test_valid_but_due_for_renewal() {
        let now = 1_000_000_000;
        let days = 24 * 60 * 60;

        let due = |not_after| (not_after > now, !is_fresh(not_after, now));
        assert_eq!(due(now + 10 * days), (true, true));
        assert_eq!(due(now + 60 * days), (true, false));
        assert_eq!(due(now - days), (false, true));
    }
}
