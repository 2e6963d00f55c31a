use std::{path::Path, time::Duration};

use portico::{
    Config, ConfigError, Settings, SslMode, SslPolicy,
    config::{LETS_ENCRYPT_PRODUCTION_URL, LETS_ENCRYPT_STAGING_URL, LogLevel, SslSettings},
};
use url::Url;

fn origin() -> Url {
    Url::parse("https://files.example.com").unwrap()
}

#[test]
fn test_static_policy_requires_both_paths() {
    assert!(matches!(
        SslPolicy::with_static_certificate(8443, "", "key.pem"),
        Err(ConfigError::MissingCertificate)
    ));
    assert!(matches!(
        SslPolicy::with_static_certificate(8443, "cert.pem", ""),
        Err(ConfigError::MissingPrivateKey)
    ));

    let policy = SslPolicy::with_static_certificate(8443, "cert.pem", "key.pem").unwrap();
    assert_eq!(policy.mode(), SslMode::Static);
    assert_eq!(policy.tls_port(), Some(8443));
    match policy {
        SslPolicy::Static { certificate, .. } => {
            assert_eq!(certificate.cert_path(), Path::new("cert.pem"));
            assert_eq!(certificate.key_path(), Path::new("key.pem"));
        }
        other => panic!("unexpected policy {other:?}"),
    }
}

#[test]
fn test_acme_email_defaults_to_admin_of_origin() {
    let policy = SslPolicy::with_acme(8443, "./var/acme", None, &origin()).unwrap();
    let SslPolicy::Auto { acme, .. } = &policy else {
        panic!("expected auto policy");
    };
    assert_eq!(acme.contact_email(), "admin@files.example.com");
    assert_eq!(acme.directory_url(), LETS_ENCRYPT_PRODUCTION_URL);

    let policy = SslPolicy::with_acme(8443, "./var/acme", Some("   ".to_string()), &origin()).unwrap();
    let SslPolicy::Auto { acme, .. } = &policy else {
        panic!("expected auto policy");
    };
    assert_eq!(acme.contact_email(), "admin@files.example.com");

    let policy =
        SslPolicy::with_acme(8443, "./var/acme", Some("ops@example.com".to_string()), &origin())
            .unwrap();
    let SslPolicy::Auto { acme, .. } = &policy else {
        panic!("expected auto policy");
    };
    assert_eq!(acme.contact_email(), "ops@example.com");
}

#[test]
fn test_acme_requires_cache_directory() {
    assert!(matches!(
        SslPolicy::with_acme(8443, "", None, &origin()),
        Err(ConfigError::MissingAcmeCacheDirectory)
    ));
}

#[test]
fn test_disabled_policy_has_no_tls_port() {
    let policy = SslPolicy::disabled();
    assert_eq!(policy.mode(), SslMode::Disabled);
    assert_eq!(policy.tls_port(), None);
}

#[test]
fn test_ssl_mode_parsing() {
    assert_eq!("none".parse::<SslMode>().unwrap(), SslMode::Disabled);
    assert_eq!("".parse::<SslMode>().unwrap(), SslMode::Disabled);
    assert_eq!("Static".parse::<SslMode>().unwrap(), SslMode::Static);
    assert_eq!(" auto ".parse::<SslMode>().unwrap(), SslMode::Auto);
    assert!(matches!(
        "letsencrypt".parse::<SslMode>(),
        Err(ConfigError::UnknownSslMode(_))
    ));
}

#[test]
fn test_from_settings_staging() {
    let settings = SslSettings {
        mode: "auto".to_string(),
        acme_staging: true,
        ..SslSettings::default()
    };

    let policy = SslPolicy::from_settings(&settings, &origin()).unwrap();
    let SslPolicy::Auto { port, acme } = policy else {
        panic!("expected auto policy");
    };
    assert_eq!(port, 8443);
    assert_eq!(acme.directory_url(), LETS_ENCRYPT_STAGING_URL);
    assert_eq!(acme.cache_directory(), Path::new("./var/acme"));
}

#[test]
fn test_from_settings_static_without_paths() {
    let settings = SslSettings {
        mode: "static".to_string(),
        ..SslSettings::default()
    };

    assert!(matches!(
        SslPolicy::from_settings(&settings, &origin()),
        Err(ConfigError::MissingCertificate)
    ));
}

#[test]
fn test_config_from_settings() {
    let mut settings = Settings::new("https://files.example.com:9443/browse/");
    settings.port = 8000;
    settings.shutdown_timeout = 12;
    settings.enable_access_log = true;
    settings.log_level = Some(LogLevel::Debug);
    settings.ssl.mode = "auto".to_string();

    let config = Config::try_from(settings).unwrap();

    assert_eq!(config.port, 8000);
    assert_eq!(config.shutdown_timeout, Duration::from_secs(12));
    assert!(config.access_log);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.origin_host(), "files.example.com");
    assert_eq!(config.redirect_base(), "https://files.example.com:9443");
    assert_eq!(config.base_path(), "/browse");
    assert_eq!(config.ssl().mode(), SslMode::Auto);
    assert_eq!(config.https_address().map(|a| a.port()), Some(8443));
    assert_eq!(config.http_address().port(), 8000);
}

#[test]
fn test_config_defaults() {
    let config = Config::try_from(Settings::new("http://localhost")).unwrap();

    assert_eq!(config.port, 8080);
    assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    assert_eq!(config.log_level, LogLevel::Info);
    assert_eq!(config.base_path(), "/");
    assert_eq!(config.redirect_base(), "http://localhost");
    assert_eq!(config.ssl(), &SslPolicy::Disabled);
    assert_eq!(config.https_address(), None);
}

#[test]
fn test_invalid_origin() {
    for url in ["not a url", "ftp://files.example.com", "file:///tmp"] {
        assert!(
            matches!(
                Config::try_from(Settings::new(url)),
                Err(ConfigError::InvalidOrigin { .. })
            ),
            "{url} should be rejected"
        );
    }
}
