// TLS handshakes for the HTTPS listener

use std::sync::Arc;

use rustls::{
    ServerConfig,
    server::{Acceptor, ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{LazyConfigAcceptor, TlsAcceptor, server::TlsStream};

use crate::error::HandshakeError;

use super::{CertificateManager, TlsProfile};

/// Always presents the certificate it was built with
#[derive(Debug)]
struct FixedCertResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for FixedCertResolver {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// Where the TLS listener gets its certificates from
#[derive(Clone)]
pub enum TlsSource {
    /// One certificate, loaded before the listener was bound
    Static(TlsAcceptor),

    /// Certificates acquired per SNI host name during the handshake
    OnDemand {
        manager: CertificateManager,
        profile: TlsProfile,
    },
}

impl TlsSource {
    pub fn from_config(config: ServerConfig) -> Self {
        TlsSource::Static(TlsAcceptor::from(Arc::new(config)))
    }

    pub fn on_demand(manager: CertificateManager, profile: TlsProfile) -> Self {
        TlsSource::OnDemand { manager, profile }
    }

    /// Completes the server side of a TLS handshake on `stream`
    pub async fn accept<IO>(&self, stream: IO) -> Result<TlsStream<IO>, HandshakeError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            TlsSource::Static(acceptor) => Ok(acceptor.accept(stream).await?),
            TlsSource::OnDemand { manager, profile } => {
                let start = LazyConfigAcceptor::new(Acceptor::default(), stream).await?;

                let host = start
                    .client_hello()
                    .server_name()
                    .map(str::to_string)
                    .ok_or(HandshakeError::MissingServerName)?;

                let key = manager.get_certificate(&host).await?;
                let config = profile
                    .server_config_with_resolver(Arc::new(FixedCertResolver(key)))
                    .map_err(|e| HandshakeError::Config(e.to_string()))?;

                Ok(start.into_stream(Arc::new(config)).await?)
            }
        }
    }
}

impl std::fmt::Debug for TlsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsSource::Static(_) => f.write_str("TlsSource::Static"),
            TlsSource::OnDemand { .. } => f.write_str("TlsSource::OnDemand"),
        }
    }
}
