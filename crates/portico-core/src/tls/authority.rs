use std::{future::Future, pin::Pin};

use crate::error::CertificateError;

/// A freshly issued certificate chain and its private key, both PEM encoded
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .finish_non_exhaustive()
    }
}

pub type AcquireFuture<'a> =
    Pin<Box<dyn Future<Output = Result<IssuedCertificate, CertificateError>> + Send + 'a>>;

/// Something that can issue a certificate for a host name.
///
/// The production implementation is [`super::acme::AcmeAuthority`]; tests plug in their own to
/// count acquisitions or simulate failures without a network.
pub trait CertificateAuthority: Send + Sync {
    fn acquire<'a>(&'a self, host: &'a str) -> AcquireFuture<'a>;
}
