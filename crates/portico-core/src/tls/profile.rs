// Hardened TLS settings shared by every TLS listener

use std::sync::Arc;

use rustls::{
    ServerConfig, SupportedCipherSuite,
    crypto::{
        CryptoProvider, SupportedKxGroup,
        aws_lc_rs::{self, cipher_suite, kx_group},
    },
    pki_types::{CertificateDer, PrivateKeyDer},
    server::ResolvesServerCert,
    version::{TLS12, TLS13},
};

use crate::error::ServerError;

/// Forward-secret AEAD suites only, in server preference order
const ALLOWED_CIPHER_SUITES: [SupportedCipherSuite; 6] = [
    cipher_suite::TLS13_AES_256_GCM_SHA384,
    cipher_suite::TLS13_AES_128_GCM_SHA256,
    cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
];

const PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] = &[&TLS13, &TLS12];

/// The TLS profile: TLS 1.2 minimum, AES-GCM with ECDHE only, curves P-256, X25519 then P-384,
/// and the server's cipher order wins over the client's.
#[derive(Debug, Clone)]
pub struct TlsProfile {
    provider: Arc<CryptoProvider>,
}

impl TlsProfile {
    pub fn hardened() -> Self {
        let kx_groups: Vec<&'static dyn SupportedKxGroup> =
            vec![kx_group::SECP256R1, kx_group::X25519, kx_group::SECP384R1];

        let provider = CryptoProvider {
            cipher_suites: ALLOWED_CIPHER_SUITES.to_vec(),
            kx_groups,
            ..aws_lc_rs::default_provider()
        };

        TlsProfile {
            provider: Arc::new(provider),
        }
    }

    pub fn provider(&self) -> Arc<CryptoProvider> {
        Arc::clone(&self.provider)
    }

    pub fn cipher_suites(&self) -> &[SupportedCipherSuite] {
        &self.provider.cipher_suites
    }

    pub fn kx_groups(&self) -> &[&'static dyn SupportedKxGroup] {
        &self.provider.kx_groups
    }

    /// Builds a server config that always presents the same certificate chain
    pub fn server_config_with_single_cert(
        &self,
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<ServerConfig, ServerError> {
        let config = ServerConfig::builder_with_provider(self.provider())
            .with_protocol_versions(PROTOCOL_VERSIONS)
            .map_err(|e| ServerError::TlsInitializationFailed(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| {
                ServerError::TlsInitializationFailed(format!("Invalid certificate or key: {e}"))
            })?;

        Ok(self.harden(config))
    }

    /// Builds a server config that picks its certificate through `resolver`
    pub fn server_config_with_resolver(
        &self,
        resolver: Arc<dyn ResolvesServerCert>,
    ) -> Result<ServerConfig, ServerError> {
        let config = ServerConfig::builder_with_provider(self.provider())
            .with_protocol_versions(PROTOCOL_VERSIONS)
            .map_err(|e| ServerError::TlsInitializationFailed(e.to_string()))?
            .with_no_client_auth()
            .with_cert_resolver(resolver);

        Ok(self.harden(config))
    }

    fn harden(&self, mut config: ServerConfig) -> ServerConfig {
        config.ignore_client_order = true;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        config
    }
}

impl Default for TlsProfile {
    fn default() -> Self {
        TlsProfile::hardened()
    }
}
