use std::{net::IpAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use portico::{
    Config, Logger, Server, Settings,
    config::{LogLevel, SslSettings},
    server::ApplicationRoutes,
};

use crate::{app, error::CliError, format::FormatType};

#[derive(Parser, Debug)]
#[command(name = "portico", version, about, long_about = None)]
pub struct Cli {
    /// Path to a configuration file, replaces the options below
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Public URL of the server, e.g. https://files.example.com
    #[arg(long, env = "SERVER_URL")]
    url: Option<String>,

    /// Address to bind the listeners to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port of the plain HTTP listener
    #[arg(long, env = "PORT", default_value_t = Settings::default_port())]
    port: u16,

    /// SSL mode: none, static or auto
    #[arg(long = "ssl-type", env = "SSL_TYPE", default_value = "none")]
    ssl_type: String,

    /// Port of the HTTPS listener
    #[arg(long = "ssl-port", env = "SSL_PORT", default_value_t = SslSettings::default_port())]
    ssl_port: u16,

    /// Path to cert.pem, required in static mode
    #[arg(long = "ssl-cert", env = "SSL_CERT")]
    ssl_cert: Option<String>,

    /// Path to key.pem, required in static mode
    #[arg(long = "ssl-key", env = "SSL_KEY")]
    ssl_key: Option<String>,

    /// Directory where ACME certificates are stored
    #[arg(long = "ssl-acme-location", env = "SSL_ACME_LOCATION", default_value_t = SslSettings::default_acme_location())]
    ssl_acme_location: String,

    /// Admin email for certificate notifications, defaults to admin@<host of the server URL>
    #[arg(long = "ssl-acme-email", env = "SSL_ACME_EMAIL")]
    ssl_acme_email: Option<String>,

    /// Request certificates from the Let's Encrypt staging environment
    #[arg(long = "ssl-acme-staging", env = "SSL_ACME_STAGING")]
    ssl_acme_staging: bool,

    /// Seconds each listener may spend draining connections on shutdown
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = Settings::default_shutdown_timeout())]
    shutdown_timeout: u64,

    /// Log every request
    #[arg(long, env = "ENABLE_ACCESS_LOG")]
    enable_access_log: bool,

    /// The log level for the application
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: LogLevel,
}

impl Cli {
    pub fn new() -> Self {
        Cli::parse()
    }

    /// The raw settings, read from the config file when one was given
    fn settings(&self) -> Result<Settings, CliError> {
        if let Some(path) = &self.config {
            let format = FormatType::from_path(path)
                .ok_or_else(|| CliError::UnsupportedFormat(path.display().to_string()))?;
            return Ok(format.read(path)?);
        }

        let url = self.url.clone().ok_or(CliError::MissingUrl)?;
        let mut settings = Settings::new(url);
        settings.host = self.host;
        settings.port = self.port;
        settings.shutdown_timeout = self.shutdown_timeout;
        settings.enable_access_log = self.enable_access_log;
        settings.log_level = Some(self.log_level);
        settings.revision = Some(env!("CARGO_PKG_VERSION").to_string());
        settings.ssl = SslSettings {
            mode: self.ssl_type.clone(),
            port: self.ssl_port,
            cert: self.ssl_cert.clone(),
            key: self.ssl_key.clone(),
            acme_location: self.ssl_acme_location.clone(),
            acme_email: self.ssl_acme_email.clone(),
            acme_staging: self.ssl_acme_staging,
        };

        Ok(settings)
    }

    pub async fn execute(self) -> Result<(), CliError> {
        let settings = self.settings();

        // A level from the config file wins over the flag
        let level = settings
            .as_ref()
            .ok()
            .and_then(|s| s.log_level)
            .unwrap_or(self.log_level);
        env_logger::Builder::new()
            .filter_level(level.to_log_level_filter())
            .init();

        let config = Config::try_from(settings?)?;
        log::debug!("Starting portico {} with {:?}", config.revision, config.ssl().mode());

        let routes = ApplicationRoutes::new(
            app::index(config.revision.clone()),
            app::api(),
            Arc::new(app::LockedAuthenticator),
        )
        .with_base_path(config.base_path())
        .with_access_log(config.access_log)
        .with_logger(Logger::global());

        let server = Arc::new(Server::new(config, Arc::new(routes)).with_logger(Logger::global()));

        tokio::spawn(app::shutdown_on_signal(Arc::clone(&server)));

        server.run().await?;
        Ok(())
    }
}
