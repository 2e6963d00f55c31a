use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Default port for the TLS listener
pub const DEFAULT_TLS_PORT: u16 = 8443;

/// Default location of the ACME certificate cache
pub const DEFAULT_ACME_LOCATION: &str = "./var/acme";

/// Let's Encrypt production directory URL
pub const LETS_ENCRYPT_PRODUCTION_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory URL (for testing)
pub const LETS_ENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Determines the listener topology of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Plain HTTP only
    #[default]
    #[serde(rename = "none")]
    Disabled,

    /// HTTPS with certificate and key files, HTTP redirects to HTTPS
    Static,

    /// HTTPS with ACME certificates, HTTP answers challenges and redirects to HTTPS
    Auto,
}

impl FromStr for SslMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(SslMode::Disabled),
            "static" => Ok(SslMode::Static),
            "auto" => Ok(SslMode::Auto),
            other => Err(ConfigError::UnknownSslMode(other.to_string())),
        }
    }
}

impl Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            SslMode::Disabled => "none",
            SslMode::Static => "static",
            SslMode::Auto => "auto",
        };
        write!(f, "{mode}")
    }
}

/// A certificate and private key pair on disk, used in `static` mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Path to the certificate PEM file
    cert: PathBuf,
    /// Path to the private key PEM file
    key: PathBuf,
}

impl Certificate {
    /// Creates a new certificate from the given cert and key paths. Both must be non-empty.
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let cert = cert.into();
        let key = key.into();

        if cert.as_os_str().is_empty() {
            return Err(ConfigError::MissingCertificate);
        }

        if key.as_os_str().is_empty() {
            return Err(ConfigError::MissingPrivateKey);
        }

        Ok(Self { cert, key })
    }

    /// Returns the certificate path
    pub fn cert_path(&self) -> &Path {
        &self.cert
    }

    /// Returns the private key path
    pub fn key_path(&self) -> &Path {
        &self.key
    }
}

/// Parameters of the `auto` mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmePolicy {
    cache_directory: PathBuf,
    contact_email: String,
    directory_url: String,
}

impl AcmePolicy {
    pub fn cache_directory(&self) -> &Path {
        &self.cache_directory
    }

    pub fn contact_email(&self) -> &str {
        &self.contact_email
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }
}

/// The SSL policy of the server.
///
/// Created once at startup and never mutated; each variant only carries the parameters its mode
/// needs, and all of them are validated by the constructors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SslPolicy {
    #[default]
    Disabled,
    Static { port: u16, certificate: Certificate },
    Auto { port: u16, acme: AcmePolicy },
}

impl SslPolicy {
    pub fn disabled() -> Self {
        SslPolicy::Disabled
    }

    pub fn with_static_certificate(
        port: u16,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        Ok(SslPolicy::Static {
            port,
            certificate: Certificate::new(cert, key)?,
        })
    }

    /// Builds an `auto` policy. The contact email falls back to `admin@<origin host>` when it is
    /// missing or blank.
    pub fn with_acme(
        port: u16,
        cache_directory: impl Into<PathBuf>,
        contact_email: Option<String>,
        origin: &Url,
    ) -> Result<Self, ConfigError> {
        let cache_directory = cache_directory.into();
        if cache_directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingAcmeCacheDirectory);
        }

        let contact_email = match contact_email {
            Some(email) if !email.trim().is_empty() => email.trim().to_string(),
            _ => {
                let host = origin.host_str().ok_or_else(|| ConfigError::InvalidOrigin {
                    url: origin.to_string(),
                    message: "origin URL has no host".to_string(),
                })?;
                format!("admin@{host}")
            }
        };

        Ok(SslPolicy::Auto {
            port,
            acme: AcmePolicy {
                cache_directory,
                contact_email,
                directory_url: LETS_ENCRYPT_PRODUCTION_URL.to_string(),
            },
        })
    }

    /// Switches the ACME directory of an `auto` policy, no-op for the other modes.
    pub fn with_directory_url(mut self, url: impl Into<String>) -> Self {
        if let SslPolicy::Auto { acme, .. } = &mut self {
            acme.directory_url = url.into();
        }
        self
    }

    /// Validates raw settings against the origin and builds the policy
    pub fn from_settings(settings: &SslSettings, origin: &Url) -> Result<Self, ConfigError> {
        let mode: SslMode = settings.mode.parse()?;

        let policy = match mode {
            SslMode::Disabled => SslPolicy::Disabled,
            SslMode::Static => SslPolicy::with_static_certificate(
                settings.port,
                settings.cert.clone().unwrap_or_default(),
                settings.key.clone().unwrap_or_default(),
            )?,
            SslMode::Auto => {
                let policy = SslPolicy::with_acme(
                    settings.port,
                    &settings.acme_location,
                    settings.acme_email.clone(),
                    origin,
                )?;

                if settings.acme_staging {
                    policy.with_directory_url(LETS_ENCRYPT_STAGING_URL)
                } else {
                    policy
                }
            }
        };

        Ok(policy)
    }

    pub fn mode(&self) -> SslMode {
        match self {
            SslPolicy::Disabled => SslMode::Disabled,
            SslPolicy::Static { .. } => SslMode::Static,
            SslPolicy::Auto { .. } => SslMode::Auto,
        }
    }

    /// The TLS listener port, if the policy has a TLS listener at all
    pub fn tls_port(&self) -> Option<u16> {
        match self {
            SslPolicy::Disabled => None,
            SslPolicy::Static { port, .. } | SslPolicy::Auto { port, .. } => Some(*port),
        }
    }
}

/// The raw SSL options as they come from the CLI, the environment or a config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslSettings {
    /// One of `none`, `static` or `auto`
    #[serde(rename = "type", default = "SslSettings::default_mode")]
    pub mode: String,

    /// Port number for the HTTPS server (default: 8443)
    #[serde(default = "SslSettings::default_port")]
    pub port: u16,

    /// Path to cert.pem file
    #[serde(default)]
    pub cert: Option<String>,

    /// Path to key.pem file
    #[serde(default)]
    pub key: Option<String>,

    /// Directory where certificates will be stored by the ACME manager
    #[serde(default = "SslSettings::default_acme_location")]
    pub acme_location: String,

    /// Admin email for certificate notifications
    #[serde(default)]
    pub acme_email: Option<String>,

    /// Use the Let's Encrypt staging directory
    #[serde(default)]
    pub acme_staging: bool,
}

impl Default for SslSettings {
    fn default() -> Self {
        SslSettings {
            mode: SslSettings::default_mode(),
            port: SslSettings::default_port(),
            cert: None,
            key: None,
            acme_location: SslSettings::default_acme_location(),
            acme_email: None,
            acme_staging: false,
        }
    }
}

impl SslSettings {
    pub fn default_mode() -> String {
        SslMode::Disabled.to_string()
    }

    pub fn default_port() -> u16 {
        DEFAULT_TLS_PORT
    }

    pub fn default_acme_location() -> String {
        DEFAULT_ACME_LOCATION.to_string()
    }
}
