// Certificate loading from PEM files and PEM buffers

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
    sign::CertifiedKey,
};
use rustls_pemfile::{certs, private_key};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::{config::Certificate, error::ServerError};

use super::TlsProfile;

/// Resolves a certificate/key path and makes sure it points at a readable file
fn validate_cert_path(path: &Path, file_type: &str) -> Result<PathBuf, ServerError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| ServerError::InvalidCertificateFile {
            path: path.display().to_string(),
            message: format!("Cannot access {file_type}: {e}"),
        })?;

    if !canonical.is_file() {
        return Err(ServerError::InvalidCertificateFile {
            path: path.display().to_string(),
            message: format!("{file_type} path is not a file"),
        });
    }

    Ok(canonical)
}

/// Load certificate chain from a PEM file
pub fn load_certificate_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let safe_path = validate_cert_path(path, "certificate")?;

    let file = File::open(&safe_path).map_err(|e| ServerError::InvalidCertificateFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    let chain = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::InvalidCertificateFile {
            path: path.display().to_string(),
            message: format!("Failed to parse certificate: {e}"),
        })?;

    if chain.is_empty() {
        return Err(ServerError::InvalidCertificateFile {
            path: path.display().to_string(),
            message: "No certificate found in file".to_string(),
        });
    }

    return Ok(chain);
}

/// Load private key from a PEM file (supports RSA and ECDSA)
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let safe_path = validate_cert_path(path, "private key").map_err(|e| match e {
        ServerError::InvalidCertificateFile { path, message } => {
            ServerError::InvalidPrivateKeyFile { path, message }
        }
        other => other,
    })?;

    let file = File::open(&safe_path).map_err(|e| ServerError::InvalidPrivateKeyFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    let key = private_key(&mut reader)
        .map_err(|e| ServerError::InvalidPrivateKeyFile {
            path: path.display().to_string(),
            message: format!("Failed to parse private key: {e}"),
        })?
        .ok_or_else(|| ServerError::InvalidPrivateKeyFile {
            path: path.display().to_string(),
            message: "No private key found in file".to_string(),
        })?;

    return Ok(key);
}

/// Builds the server config of a `static` TLS listener from the configured PEM files
pub fn build_static_server_config(
    certificate: &Certificate,
    profile: &TlsProfile,
) -> Result<ServerConfig, ServerError> {
    let chain = load_certificate_chain(certificate.cert_path())?;
    let key = load_private_key(certificate.key_path())?;

    profile.server_config_with_single_cert(chain, key)
}

/// Parses an in-memory PEM certificate chain and private key into a signing-ready key
pub fn certified_key_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<CertifiedKey>, String> {
    let chain = certs(&mut BufReader::new(cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Failed to parse certificate: {e}"))?;

    if chain.is_empty() {
        return Err("No certificate found in PEM data".to_string());
    }

    let key = private_key(&mut BufReader::new(key_pem))
        .map_err(|e| format!("Failed to parse private key: {e}"))?
        .ok_or_else(|| "No private key found in PEM data".to_string())?;

    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
        .map_err(|e| format!("Invalid private key: {e}"))?;

    return Ok(Arc::new(CertifiedKey::new(chain, signing_key)));
}

/// Unix timestamp of the `notAfter` field of the leaf certificate
pub fn certificate_expiry(key: &CertifiedKey) -> Option<i64> {
    let leaf = key.cert.first()?;
    let (_, cert) = X509Certificate::from_der(leaf.as_ref()).ok()?;
    Some(cert.validity().not_after.timestamp())
}
