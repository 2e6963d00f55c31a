// TLS: hardened profile, certificate loading, on-demand ACME certificates

pub mod acceptor;
pub mod acme;
pub mod authority;
pub mod cache;
pub mod challenge;
pub mod manager;
pub mod manual;
pub mod profile;

pub use acceptor::TlsSource;
pub use acme::AcmeAuthority;
pub use authority::{AcquireFuture, CertificateAuthority, IssuedCertificate};
pub use cache::DirCache;
pub use challenge::{ACME_CHALLENGE_PREFIX, ChallengeStore};
pub use manager::CertificateManager;
pub use profile::TlsProfile;
