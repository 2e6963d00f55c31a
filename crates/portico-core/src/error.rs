use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::server::Transport;

/// Errors raised while building the configuration. These are always reported before any listener
/// is started.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown SSL mode `{0}`, expected one of: none, static, auto")]
    UnknownSslMode(String),

    #[error("Path to cert.pem is required in `static` SSL mode")]
    MissingCertificate,

    #[error("Path to key.pem is required in `static` SSL mode")]
    MissingPrivateKey,

    #[error("ACME cache directory is required in `auto` SSL mode")]
    MissingAcmeCacheDirectory,

    #[error("Invalid origin URL `{url}`: {message}")]
    InvalidOrigin { url: String, message: String },

    #[error("Invalid log level `{0}`")]
    InvalidLogLevel(String),

    #[error("Error in `{field}`: {message}")]
    ParseError { field: String, message: String },

    #[error("Failed to read config file `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A listener could not be bound to its address.
#[derive(Error, Debug)]
#[error("Failed to bind {transport} listener on {address}: {source}")]
pub struct BindError {
    pub transport: Transport,
    pub address: SocketAddr,
    #[source]
    pub source: io::Error,
}

/// Errors scoped to a single TLS handshake in `auto` mode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("Host `{0}` is not allowed to request a certificate")]
    UnauthorizedHost(String),

    #[error("Failed to acquire a certificate for `{host}`: {message}")]
    AcquisitionFailed { host: String, message: String },
}

/// A single TLS handshake failed. Only that connection is dropped.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("TLS handshake failed: {0}")]
    Io(#[from] io::Error),

    #[error("Client did not send a server name")]
    MissingServerName,

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("TLS handshake timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Failed to build TLS configuration: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("Timed out after {waited:?} waiting for the {transport} listener to stop")]
    TimedOut { transport: Transport, waited: Duration },
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    #[error("Server has already been started")]
    AlreadyStarted,

    #[error("TLS initialization failed: {0}")]
    TlsInitializationFailed(String),

    #[error("Invalid certificate file `{path}`: {message}")]
    InvalidCertificateFile { path: String, message: String },

    #[error("Invalid private key file `{path}`: {message}")]
    InvalidPrivateKeyFile { path: String, message: String },

    #[error("Failed to create certificate directory `{path}`: {message}")]
    CertificateDirectoryCreationFailed { path: String, message: String },
}
