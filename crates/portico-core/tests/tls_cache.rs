use portico::{
    error::ServerError,
    tls::{IssuedCertificate, cache::{DirCache, validate_host_name}},
};
use tempfile::TempDir;

fn issued(tag: &str) -> IssuedCertificate {
    IssuedCertificate {
        cert_pem: format!("cert {tag}").into_bytes(),
        key_pem: format!("key {tag}").into_bytes(),
    }
}

#[test]
fn test_validate_host_name_valid() {
    assert!(validate_host_name("example.com").is_ok());
    assert!(validate_host_name("files.example.co.uk").is_ok());
    assert!(validate_host_name("my-host").is_ok());
}

#[test]
fn test_validate_host_name_path_traversal() {
    assert!(validate_host_name("../etc/passwd").is_err());
    assert!(validate_host_name("..").is_err());
    assert!(validate_host_name("host/../other").is_err());
    assert!(validate_host_name("host/subdir").is_err());
    assert!(validate_host_name("host\\subdir").is_err());
}

#[test]
fn test_validate_host_name_empty() {
    assert!(validate_host_name("").is_err());
    assert!(validate_host_name("   ").is_err());
}

#[test]
fn test_load_missing_certificate() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path());

    assert!(cache.load("files.example.com").unwrap().is_none());
}

#[test]
fn test_store_and_load_certificate() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path().join("acme"));
    cache.ensure().unwrap();

    cache.store("files.example.com", &issued("one")).unwrap();
    let loaded = cache.load("files.example.com").unwrap().unwrap();
    assert_eq!(loaded.cert_pem, b"cert one");
    assert_eq!(loaded.key_pem, b"key one");

    cache.store("files.example.com", &issued("two")).unwrap();
    let loaded = cache.load("files.example.com").unwrap().unwrap();
    assert_eq!(loaded.cert_pem, b"cert two");

    let host_dir = temp_dir.path().join("acme").join("files.example.com");
    assert!(host_dir.join("cert.pem").exists());
    assert!(host_dir.join("key.pem").exists());
    assert!(!host_dir.join(".key.pem.tmp").exists());
}

#[cfg(unix)]
#[test]
fn test_private_key_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path());
    cache.ensure().unwrap();
    cache.store("files.example.com", &issued("one")).unwrap();

    let host_dir = temp_dir.path().join("files.example.com");
    let key_mode = std::fs::metadata(host_dir.join("key.pem")).unwrap().permissions().mode();
    let dir_mode = std::fs::metadata(&host_dir).unwrap().permissions().mode();

    assert_eq!(key_mode & 0o777, 0o600);
    assert_eq!(dir_mode & 0o777, 0o700);
}

#[test]
fn test_store_rejects_traversal() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path());

    let result = cache.store("../evil", &issued("one"));
    assert!(matches!(result, Err(ServerError::TlsInitializationFailed(_))));
    assert!(cache.load("../evil").is_err());
}

#[test]
fn test_account_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DirCache::new(temp_dir.path().join("fresh"));

    assert!(cache.load_account().unwrap().is_none());

    cache.store_account(r#"{"id":"acct"}"#).unwrap();
    assert_eq!(cache.load_account().unwrap().as_deref(), Some(r#"{"id":"acct"}"#));
}
