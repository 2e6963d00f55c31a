#![allow(dead_code)]

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use hyper::StatusCode;
use log::{Level, Log, Metadata, Record};
use portico::{
    Config, Server, ServerState, SslPolicy,
    error::CertificateError,
    server::{RouterBuilder, SharedHandler, Transport, handler::text_response, handler_fn},
    tls::{AcquireFuture, CertificateAuthority, IssuedCertificate},
};
use rustls::{
    ClientConfig, DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::aws_lc_rs,
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;
use url::Url;

pub const ORIGIN: &str = "https://files.example.com";
pub const ORIGIN_HOST: &str = "files.example.com";

/// Self-signed certificate and key for `host`, PEM encoded
pub fn self_signed(host: &str) -> (String, String) {
    let cert = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
    (cert.cert.pem(), cert.key_pair.serialize_pem())
}

/// Self-signed certificate that expires `days` from now
pub fn self_signed_expiring_in(host: &str, days: i64) -> (String, String) {
    use chrono::Datelike;

    let expiry = chrono::Utc::now() + chrono::Duration::days(days);
    let mut params = rcgen::CertificateParams::new(vec![host.to_string()]).unwrap();
    params.not_before = rcgen::date_time_ymd(2020, 1, 1);
    params.not_after = rcgen::date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// Self-signed certificate that expired long ago
pub fn expired_self_signed(host: &str) -> (String, String) {
    let mut params = rcgen::CertificateParams::new(vec![host.to_string()]).unwrap();
    params.not_before = rcgen::date_time_ymd(1999, 1, 1);
    params.not_after = rcgen::date_time_ymd(2000, 1, 1);
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// Collects every record it is given
#[derive(Default)]
pub struct Capture {
    records: Mutex<Vec<(Level, String)>>,
}

impl Capture {
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl Log for Capture {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

/// Issues self-signed certificates and counts how often it was asked
pub struct FakeAuthority {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub fail: bool,
}

impl FakeAuthority {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(FakeAuthority {
            calls: AtomicUsize::new(0),
            delay,
            fail: false,
        })
    }

    pub fn failing(delay: Duration) -> Arc<Self> {
        Arc::new(FakeAuthority {
            calls: AtomicUsize::new(0),
            delay,
            fail: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CertificateAuthority for FakeAuthority {
    fn acquire<'a>(&'a self, host: &'a str) -> AcquireFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            if self.fail {
                return Err(CertificateError::AcquisitionFailed {
                    host: host.to_string(),
                    message: "rate limited".to_string(),
                });
            }

            let (cert_pem, key_pem) = self_signed(host);
            Ok(IssuedCertificate {
                cert_pem: cert_pem.into_bytes(),
                key_pem: key_pem.into_bytes(),
            })
        })
    }
}

/// Serves a fixed handler as the application graph
pub struct StaticRoutes(pub SharedHandler);

impl RouterBuilder for StaticRoutes {
    fn build(&self) -> SharedHandler {
        Arc::clone(&self.0)
    }
}

pub fn index_routes() -> Arc<StaticRoutes> {
    Arc::new(StaticRoutes(handler_fn(|req| async move {
        text_response(StatusCode::OK, format!("index {}", req.uri().path()))
    })))
}

/// Configuration bound to ephemeral ports on the loopback interface
pub fn test_config(ssl: SslPolicy) -> Config {
    let mut config = Config::new(Url::parse(ORIGIN).unwrap(), ssl);
    config.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.port = 0;
    config.shutdown_timeout = Duration::from_secs(2);
    config
}

/// Waits until `run` has bound `listeners` listeners and at least one of them accepts
pub async fn wait_until_running(server: &Server, listeners: usize) {
    for _ in 0..200 {
        if server.local_addrs().await.len() == listeners
            && server.state().await == ServerState::Running
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("server did not start");
}

pub async fn addr_of(server: &Server, transport: Transport) -> SocketAddr {
    server
        .local_addrs()
        .await
        .into_iter()
        .find(|(t, _)| *t == transport)
        .map(|(_, addr)| addr)
        .expect("listener address")
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn parse(raw: &str) -> RawResponse {
        let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok())
            .unwrap_or_default();
        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
            .collect();

        RawResponse {
            status,
            headers,
            body: body.to_string(),
        }
    }
}

async fn exchange<S>(mut stream: S, host: &str, method: &str, path: &str) -> io::Result<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("{method} {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !raw.is_empty() => break,
            Err(e) => return Err(e),
        }
    }

    Ok(RawResponse::parse(&String::from_utf8_lossy(&raw)))
}

pub async fn http_request(addr: SocketAddr, method: &str, path: &str) -> io::Result<RawResponse> {
    let stream = TcpStream::connect(addr).await?;
    exchange(stream, ORIGIN_HOST, method, path).await
}

pub async fn http_get(addr: SocketAddr, path: &str) -> io::Result<RawResponse> {
    http_request(addr, "GET", path).await
}

pub async fn https_get(addr: SocketAddr, server_name: &str, path: &str) -> io::Result<RawResponse> {
    let connector = TlsConnector::from(Arc::new(client_config()));
    let name = ServerName::try_from(server_name.to_string()).map_err(io::Error::other)?;

    let stream = TcpStream::connect(addr).await?;
    let stream = connector.connect(name, stream).await?;
    exchange(stream, server_name, "GET", path).await
}

/// Client config that trusts any server certificate
pub fn client_config() -> ClientConfig {
    ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerify))
        .with_no_client_auth()
}

#[derive(Debug)]
pub struct NoVerify;

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
