//! Connectivity probes
//!
//! Stateless TLS-over-TCP and QUIC handshakes used by the host to check a
//! server before committing to a configuration. A probe succeeds once the
//! handshake completes; the connection is closed immediately.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as RustlsError, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// Handshake deadline used when the caller gives none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// ALPN offered by a QUIC probe when the caller gives none
pub const DEFAULT_QUIC_ALPN: &[&str] = &["h3", "tuic", "hysteria", "hysteria2"];

/// Server to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
    /// Server name for SNI and certificate checks, defaults to `host`
    pub sni: Option<String>,
    /// Accept any certificate
    pub insecure: bool,
    pub alpn: Vec<String>,
    pub timeout: Duration,
}

impl ProbeTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            sni: None,
            insecure: false,
            alpn: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_sni(mut self, sni: impl Into<String>) -> Self {
        let sni = sni.into();
        self.sni = (!sni.is_empty()).then_some(sni);
        self
    }

    pub fn with_alpn_csv(mut self, csv: &str) -> Self {
        self.alpn = parse_alpn(csv);
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Handshake deadline. Zero means [`DEFAULT_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    /// Reject targets no handshake could be attempted against
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidArgument("host is empty".into()));
        }
        if self.port == 0 {
            return Err(Error::InvalidArgument("port must be non-zero".into()));
        }
        Ok(())
    }

    fn server_name(&self) -> Result<ServerName<'static>> {
        let name = self.sni.as_deref().unwrap_or(&self.host).to_string();
        ServerName::try_from(name)
            .map_err(|e| Error::InvalidArgument(format!("invalid server name: {}", e)))
    }
}

/// Outcome of a successful probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub elapsed: Duration,
    /// Protocol agreed during the handshake
    pub alpn: Option<String>,
}

/// Split a comma-separated ALPN list, dropping empty entries
pub fn parse_alpn(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn tls_config(target: &ProbeTarget, tls13_only: bool) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = if tls13_only {
        ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
    } else {
        ClientConfig::builder_with_provider(provider).with_safe_default_protocol_versions()
    }
    .map_err(|e| Error::probe("tls", e))?;

    let mut config = if target.insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier))
            .with_no_client_auth()
    } else {
        let roots =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    config.alpn_protocols = target.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Ok(config)
}

async fn resolve(target: &ProbeTarget, kind: &'static str) -> Result<SocketAddr> {
    tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|e| Error::probe(kind, e))?
        .next()
        .ok_or_else(|| Error::probe(kind, format!("no address for {}", target.host)))
}

/// TLS handshake over TCP
pub async fn probe_tls(target: &ProbeTarget) -> Result<ProbeReport> {
    target.validate()?;
    let server_name = target.server_name()?;
    let connector = TlsConnector::from(Arc::new(tls_config(target, false)?));
    let started = Instant::now();

    let handshake = async {
        let addr = resolve(target, "tls").await?;
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::probe("tls", e))?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::probe("tls", e))?;
        let (_, session) = stream.get_ref();
        Ok::<_, Error>(
            session
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
        )
    };

    let alpn = tokio::time::timeout(target.timeout, handshake)
        .await
        .map_err(|_| Error::probe("tls", format!("timed out after {:?}", target.timeout)))??;

    Ok(ProbeReport {
        elapsed: started.elapsed(),
        alpn,
    })
}

/// QUIC handshake. Offers [`DEFAULT_QUIC_ALPN`] when no ALPN is given.
pub async fn probe_quic(target: &ProbeTarget) -> Result<ProbeReport> {
    target.validate()?;
    let mut target = target.clone();
    if target.alpn.is_empty() {
        target.alpn = DEFAULT_QUIC_ALPN.iter().map(|p| p.to_string()).collect();
    }
    let server_name = target.sni.clone().unwrap_or_else(|| target.host.clone());

    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls_config(&target, true)?)
        .map_err(|e| Error::probe("quic", e))?;
    let client_config = quinn::ClientConfig::new(Arc::new(crypto));
    let started = Instant::now();

    let handshake = async {
        let addr = resolve(&target, "quic").await?;
        let bind: SocketAddr = if addr.is_ipv6() {
            "[::]:0".parse().map_err(|e| Error::probe("quic", e))?
        } else {
            "0.0.0.0:0".parse().map_err(|e| Error::probe("quic", e))?
        };
        let endpoint = quinn::Endpoint::client(bind).map_err(|e| Error::probe("quic", e))?;
        let connection = endpoint
            .connect_with(client_config, addr, &server_name)
            .map_err(|e| Error::probe("quic", e))?
            .await
            .map_err(|e| Error::probe("quic", e))?;
        let alpn = connection
            .handshake_data()
            .and_then(|data| data.downcast::<quinn::crypto::rustls::HandshakeData>().ok())
            .and_then(|data| data.protocol)
            .map(|p| String::from_utf8_lossy(&p).into_owned());
        connection.close(0u32.into(), b"probe");
        endpoint.wait_idle().await;
        Ok::<_, Error>(alpn)
    };

    let alpn = tokio::time::timeout(target.timeout, handshake)
        .await
        .map_err(|_| Error::probe("quic", format!("timed out after {:?}", target.timeout)))??;

    Ok(ProbeReport {
        elapsed: started.elapsed(),
        alpn,
    })
}

/// Accepts any server certificate. Only used when the caller asks for an
/// insecure probe.
#[derive(Debug)]
struct InsecureServerCertVerifier;

impl ServerCertVerifier for InsecureServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
