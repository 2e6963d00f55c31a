// Certificate persistence and cache management

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::ServerError;

use super::authority::IssuedCertificate;

const ACCOUNT_FILE: &str = "acme_account.json";

/// Validate that a host name doesn't contain path traversal attempts
pub fn validate_host_name(host: &str) -> Result<(), ServerError> {
    if host.contains("..") || host.contains('/') || host.contains('\\') {
        return Err(ServerError::TlsInitializationFailed(
            "Invalid host name: contains path traversal characters".to_string(),
        ));
    }

    if host.trim().is_empty() {
        return Err(ServerError::TlsInitializationFailed(
            "Invalid host name: empty or whitespace-only".to_string(),
        ));
    }

    Ok(())
}

/// Helper to get a safe display path for error messages (doesn't leak full absolute paths)
fn safe_display_path(full_path: &Path) -> String {
    if let Ok(cwd) = std::env::current_dir() {
        if let Ok(relative) = full_path.strip_prefix(&cwd) {
            return relative.display().to_string();
        }
    }

    full_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| full_path.display().to_string())
}

/// Writes `contents` next to `path` and renames it into place
fn write_atomic(path: &Path, contents: &[u8], private: bool) -> Result<(), ServerError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&temp, contents).map_err(|e| {
        ServerError::TlsInitializationFailed(format!(
            "Failed to write {}: {e}",
            safe_display_path(path)
        ))
    })?;

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp, fs::Permissions::from_mode(0o600)).map_err(|e| {
            let _ = fs::remove_file(&temp);
            ServerError::TlsInitializationFailed(format!("Failed to set key file permissions: {e}"))
        })?;
    }

    #[cfg(not(unix))]
    let _ = private;

    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        ServerError::TlsInitializationFailed(format!(
            "Failed to move {}: {e}",
            safe_display_path(path)
        ))
    })?;

    return Ok(());
}

/// Directory-backed store for issued certificates and the ACME account, one subdirectory per
/// host: `<dir>/<host>/cert.pem` and `<dir>/<host>/key.pem`.
#[derive(Debug, Clone)]
pub struct DirCache {
    dir: PathBuf,
}

impl DirCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirCache { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Creates the cache directory (owner-only on unix) if it does not exist yet
    pub fn ensure(&self) -> Result<(), ServerError> {
        create_private_dir(&self.dir)
    }

    /// Loads the stored certificate of `host`, `None` when nothing has been stored yet
    pub fn load(&self, host: &str) -> Result<Option<IssuedCertificate>, ServerError> {
        validate_host_name(host)?;

        let host_dir = self.dir.join(host);
        let cert_path = host_dir.join("cert.pem");
        let key_path = host_dir.join("key.pem");

        if !cert_path.exists() || !key_path.exists() {
            return Ok(None);
        }

        let cert_pem = fs::read(&cert_path).map_err(|e| ServerError::InvalidCertificateFile {
            path: safe_display_path(&cert_path),
            message: e.to_string(),
        })?;

        let key_pem = fs::read(&key_path).map_err(|e| ServerError::InvalidPrivateKeyFile {
            path: safe_display_path(&key_path),
            message: e.to_string(),
        })?;

        Ok(Some(IssuedCertificate { cert_pem, key_pem }))
    }

    /// Persists the certificate of `host`, the private key is only readable by its owner
    pub fn store(&self, host: &str, certificate: &IssuedCertificate) -> Result<(), ServerError> {
        validate_host_name(host)?;

        let host_dir = self.dir.join(host);
        create_private_dir(&host_dir)?;

        write_atomic(&host_dir.join("cert.pem"), &certificate.cert_pem, false)?;
        write_atomic(&host_dir.join("key.pem"), &certificate.key_pem, true)?;

        return Ok(());
    }

    /// The serialized ACME account credentials, if an account was registered before
    pub fn load_account(&self) -> Result<Option<String>, ServerError> {
        let path = self.dir.join(ACCOUNT_FILE);
        if !path.exists() {
            return Ok(None);
        }

        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| ServerError::TlsInitializationFailed(format!(
                "Failed to read {}: {e}",
                safe_display_path(&path)
            )))
    }

    pub fn store_account(&self, credentials: &str) -> Result<(), ServerError> {
        self.ensure()?;
        write_atomic(&self.dir.join(ACCOUNT_FILE), credentials.as_bytes(), true)
    }
}

fn create_private_dir(dir: &Path) -> Result<(), ServerError> {
    fs::create_dir_all(dir).map_err(|e| ServerError::CertificateDirectoryCreationFailed {
        path: safe_display_path(dir),
        message: e.to_string(),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
            ServerError::CertificateDirectoryCreationFailed {
                path: safe_display_path(dir),
                message: e.to_string(),
            }
        })?;
    }

    Ok(())
}
