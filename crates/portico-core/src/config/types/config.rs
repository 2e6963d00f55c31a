use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use url::Url;

use crate::error::ConfigError;

use super::{LogLevel, SslPolicy, SslSettings};

/// Default time given to each listener to drain its connections on shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The raw server options, as read from the command line, environment or a config file
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// The public URL of the server, e.g. `https://files.example.com`
    pub url: String,

    /// The IP address to bind the listeners to (default: 0.0.0.0)
    #[serde(default = "Settings::default_host")]
    pub host: IpAddr,

    /// The port number of the plain HTTP listener (default: 8080)
    #[serde(default = "Settings::default_port")]
    pub port: u16,

    /// SSL options
    #[serde(default)]
    pub ssl: SslSettings,

    /// Seconds each listener may spend draining connections on shutdown (default: 5)
    #[serde(default = "Settings::default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Log every request handled by the application router
    #[serde(default)]
    pub enable_access_log: bool,

    /// The log level to use (default: "info")
    #[serde(default)]
    pub log_level: Option<LogLevel>,

    /// The revision reported by the application
    #[serde(default)]
    pub revision: Option<String>,
}

impl Settings {
    pub fn new(url: impl Into<String>) -> Self {
        Settings {
            url: url.into(),
            host: Settings::default_host(),
            port: Settings::default_port(),
            ssl: SslSettings::default(),
            shutdown_timeout: Settings::default_shutdown_timeout(),
            enable_access_log: false,
            log_level: None,
            revision: None,
        }
    }

    pub fn default_host() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
    }

    pub fn default_port() -> u16 {
        8080
    }

    pub fn default_shutdown_timeout() -> u64 {
        DEFAULT_SHUTDOWN_TIMEOUT.as_secs()
    }
}

/// Parses and validates the public origin URL of the server
pub fn parse_origin(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidOrigin {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidOrigin {
            url: raw.to_string(),
            message: format!("unsupported scheme `{}`", url.scheme()),
        });
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidOrigin {
            url: raw.to_string(),
            message: "origin URL has no host".to_string(),
        });
    }

    Ok(url)
}

/// The validated server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// The IP address to bind the listeners to
    pub host: IpAddr,

    /// The port number of the plain HTTP listener
    pub port: u16,

    /// Time each listener may spend draining connections on shutdown
    pub shutdown_timeout: Duration,

    /// Whether the application router logs every request
    pub access_log: bool,

    /// The log level to use
    pub log_level: LogLevel,

    /// The revision reported by the application
    pub revision: String,

    origin: Url,
    ssl: SslPolicy,
}

impl Config {
    pub fn new(origin: Url, ssl: SslPolicy) -> Self {
        Config {
            host: Settings::default_host(),
            port: Settings::default_port(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            access_log: false,
            log_level: LogLevel::default(),
            revision: "unknown".to_string(),
            origin,
            ssl,
        }
    }

    /// The public URL of the server
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// The host name of the origin, used for redirects and the ACME allow-list
    pub fn origin_host(&self) -> &str {
        self.origin.host_str().unwrap_or_default()
    }

    /// `scheme://host[:port]` of the origin, without any path
    pub fn redirect_base(&self) -> String {
        self.origin.origin().ascii_serialization()
    }

    /// The path the application is mounted under, e.g. `/files` for `https://example.com/files/`
    pub fn base_path(&self) -> String {
        let path = self.origin.path().trim_end_matches('/');
        if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        }
    }

    pub fn ssl(&self) -> &SslPolicy {
        &self.ssl
    }

    /// The address of the plain HTTP listener
    pub fn http_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// The address of the TLS listener, if the SSL policy has one
    pub fn https_address(&self) -> Option<SocketAddr> {
        self.ssl
            .tls_port()
            .map(|port| SocketAddr::new(self.host, port))
    }
}

impl TryFrom<Settings> for Config {
    type Error = ConfigError;

    fn try_from(settings: Settings) -> Result<Self, Self::Error> {
        let origin = parse_origin(&settings.url)?;
        let ssl = SslPolicy::from_settings(&settings.ssl, &origin)?;

        let mut config = Config::new(origin, ssl);
        config.host = settings.host;
        config.port = settings.port;
        config.shutdown_timeout = Duration::from_secs(settings.shutdown_timeout);
        config.access_log = settings.enable_access_log;
        config.log_level = settings.log_level.unwrap_or_default();
        if let Some(revision) = settings.revision {
            config.revision = revision;
        }

        Ok(config)
    }
}
