pub mod handler;
pub mod listener;
pub mod middleware;
pub mod redirect;
pub mod router;

use std::{
    net::SocketAddr,
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::{
    config::{AcmePolicy, Config, SslPolicy},
    error::{BindError, ServerError},
    logging::Logger,
    tls::{
        AcmeAuthority, CertificateAuthority, CertificateManager, ChallengeStore, DirCache,
        TlsProfile, TlsSource, manual::build_static_server_config,
    },
};

pub use handler::{Handler, HandlerFuture, RequestBody, SharedHandler, handler_fn};
pub use listener::{Listener, ListenerState, Transport};
pub use redirect::RedirectService;
pub use router::{ApplicationRoutes, Authenticator, Router, RouterBuilder};

/// Lifecycle of the whole server, derived from the states of its listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Default)]
struct Slots {
    started: bool,
    plain: Option<Arc<Listener>>,
    tls: Option<Arc<Listener>>,
}

impl Slots {
    fn listeners(&self) -> impl Iterator<Item = &Arc<Listener>> {
        self.plain.iter().chain(self.tls.iter())
    }

    fn state(&self) -> ServerState {
        let states: Vec<ListenerState> = self.listeners().map(|l| l.state()).collect();

        if states.is_empty() {
            return ServerState::Idle;
        }

        if states.iter().all(|s| *s == ListenerState::Stopped) {
            ServerState::Stopped
        } else if states
            .iter()
            .any(|s| matches!(s, ListenerState::ShuttingDown | ListenerState::Stopped))
        {
            ServerState::Draining
        } else if states.contains(&ListenerState::Running) {
            ServerState::Running
        } else {
            ServerState::Idle
        }
    }
}

/// Brings up the plaintext and TLS listeners required by the SSL policy and tears them down.
pub struct Server {
    config: Arc<Config>,
    router: Arc<dyn RouterBuilder>,
    authority: Option<Arc<dyn CertificateAuthority>>,
    challenges: ChallengeStore,
    profile: TlsProfile,
    logger: Logger,
    slots: Mutex<Slots>,
}

impl Server {
    pub fn new(config: Config, router: Arc<dyn RouterBuilder>) -> Self {
        Server {
            config: Arc::new(config),
            router,
            authority: None,
            challenges: ChallengeStore::new(),
            profile: TlsProfile::hardened(),
            logger: Logger::global(),
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Replaces the ACME client used in `auto` mode
    pub fn with_authority(mut self, authority: Arc<dyn CertificateAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The HTTP-01 challenges served by the plaintext listener in `auto` mode
    pub fn challenges(&self) -> ChallengeStore {
        self.challenges.clone()
    }

    pub async fn state(&self) -> ServerState {
        self.slots.lock().await.state()
    }

    /// Addresses the listeners are bound to, once `run` has bound them
    pub async fn local_addrs(&self) -> Vec<(Transport, SocketAddr)> {
        self.slots
            .lock()
            .await
            .listeners()
            .map(|l| (l.transport(), l.local_addr()))
            .collect()
    }

    /// Starts the listeners and blocks until the main one stops.
    ///
    /// Returns `Ok(())` after `shutdown`, or the error that kept the main listener from starting.
    /// The plaintext listener runs on its own task in `static` and `auto` mode; failing to bind it
    /// is logged and does not stop the TLS listener.
    pub async fn run(&self) -> Result<(), ServerError> {
        let (plain, tls) = {
            let mut slots = self.slots.lock().await;
            if slots.started {
                return Err(ServerError::AlreadyStarted);
            }
            slots.started = true;

            let (plain, tls) = self.prepare().await?;
            slots.plain = plain.clone();
            slots.tls = tls.clone();
            (plain, tls)
        };

        match tls {
            None => {
                if let Some(plain) = plain {
                    plain.serve().await;
                    log_warn!(self.logger, "http server terminated");
                }
            }
            Some(tls) => {
                if let Some(plain) = plain {
                    let logger = self.logger.clone();
                    tokio::spawn(async move {
                        plain.serve().await;
                        log_warn!(logger, "http redirect server terminated");
                    });
                }

                tls.serve().await;
                log_warn!(self.logger, "https server terminated");
            }
        }

        Ok(())
    }

    /// Binds the listeners of the configured mode without starting them
    async fn prepare(&self) -> Result<(Option<Arc<Listener>>, Option<Arc<Listener>>), ServerError> {
        let http_address = self.config.http_address();

        match (self.config.ssl(), self.config.https_address()) {
            (SslPolicy::Disabled, _) | (_, None) => {
                log_info!(self.logger, "activate http server on {}", http_address);

                let plain = self
                    .bind(Transport::Http, http_address, self.router.build(), None)
                    .await?;

                Ok((Some(plain), None))
            }
            (SslPolicy::Static { certificate, .. }, Some(https_address)) => {
                log_info!(self.logger, "activate https server in 'static' mode on {}", https_address);

                let tls_config = build_static_server_config(certificate, &self.profile)
                    .inspect_err(|e| log_error!(self.logger, "Failed to load TLS certificate: {}", e))?;

                let tls = self
                    .bind(
                        Transport::Https,
                        https_address,
                        self.router.build(),
                        Some(TlsSource::from_config(tls_config)),
                    )
                    .await?;

                log_info!(self.logger, "activate http redirect server on {}", http_address);
                let redirect =
                    RedirectService::new(self.config.redirect_base(), self.logger.clone());
                let plain = self
                    .bind(Transport::Http, http_address, redirect.into_handler(), None)
                    .await
                    .ok();

                Ok((plain, Some(tls)))
            }
            (SslPolicy::Auto { acme, .. }, Some(https_address)) => {
                log_info!(self.logger, "activate https server in 'auto' mode on {}", https_address);

                let manager = self.certificate_manager(acme);
                let tls = self
                    .bind(
                        Transport::Https,
                        https_address,
                        self.router.build(),
                        Some(TlsSource::on_demand(manager, self.profile.clone())),
                    )
                    .await?;

                log_info!(self.logger, "activate http challenge server on {}", http_address);
                let redirect = RedirectService::new(self.config.redirect_base(), self.logger.clone())
                    .with_challenges(self.challenges.clone());
                let plain = self
                    .bind(Transport::Http, http_address, redirect.into_handler(), None)
                    .await
                    .ok();

                Ok((plain, Some(tls)))
            }
        }
    }

    fn certificate_manager(&self, acme: &AcmePolicy) -> CertificateManager {
        let cache = DirCache::new(acme.cache_directory());
        if let Err(e) = cache.ensure() {
            log_warn!(self.logger, "Certificate cache is not writable: {}", e);
        }

        let authority = self.authority.clone().unwrap_or_else(|| {
            Arc::new(AcmeAuthority::new(
                acme,
                self.challenges.clone(),
                self.logger.clone(),
            ))
        });

        log_debug!(
            self.logger,
            "Certificates for {} are requested from {}",
            self.config.origin_host(),
            acme.directory_url()
        );

        CertificateManager::new(
            [self.config.origin_host()],
            authority,
            cache,
            self.logger.clone(),
        )
    }

    async fn bind(
        &self,
        transport: Transport,
        address: SocketAddr,
        handler: SharedHandler,
        tls: Option<TlsSource>,
    ) -> Result<Arc<Listener>, BindError> {
        Listener::bind(
            transport,
            address,
            handler,
            tls,
            self.config.shutdown_timeout,
            self.logger.clone(),
        )
        .await
        .map(Arc::new)
        .inspect_err(|e| log_error!(self.logger, "{}", e))
    }

    /// Stops the plaintext listener, then the TLS listener, each within the shutdown timeout.
    ///
    /// Safe to call at any time and any number of times: before `run` it does nothing, and once
    /// both listeners are stopped it returns immediately.
    pub async fn shutdown(&self) {
        let slots = self.slots.lock().await;

        if slots.plain.is_none() && slots.tls.is_none() {
            log_debug!(self.logger, "shutdown requested before any listener was started");
            return;
        }

        if slots.state() == ServerState::Stopped {
            return;
        }

        log_warn!(self.logger, "shutdown rest server");
        for listener in slots.listeners() {
            match listener.shutdown().await {
                Ok(()) => log_debug!(self.logger, "shutdown {} server completed", listener.transport()),
                Err(e) => log_warn!(self.logger, "{} shutdown error, {}", listener.transport(), e),
            }
        }
    }
}
