//! `SslCtx` collaborator (spec §4.8): certificate, peer-verification level,
//! protocol bounds, optional cipher list, and a delegate that may veto
//! certificate acceptance.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// How strictly the peer's certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Accept any certificate (or none). Only ever appropriate for tests.
    None,
    /// Validate against the configured CA, but tolerate the application
    /// delegate overriding a rejection.
    Peer,
    /// Validate against the configured CA; the application delegate may
    /// still veto an otherwise-valid certificate, but cannot rescue a
    /// failed chain validation.
    Required,
}

/// Protocol floor. Historical SSLv2/SSLv3/TLS1.0/TLS1.1 are intentionally
/// unrepresentable — `rustls` never speaks them, so "protocol bounds" here
/// means which of TLS 1.2/1.3 are acceptable, matching spec §4.8's
/// SSLv2..TLS1.3 enumeration collapsed to what a memory-safe TLS stack
/// actually supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProtocol {
    Tls12,
    Tls13,
}

/// Application hook for vetoing certificate acceptance (spec §4.8:
/// "Certificate acceptance may be vetoed by a delegate the application
/// supplies"). Receives the peer's leaf certificate in DER form.
pub trait CertificateVerifier: Send + Sync {
    fn accept(&self, cert_der: &[u8]) -> bool;
}

pub struct SslCtx {
    cert_path: PathBuf,
    key_path: PathBuf,
    ca_path: Option<PathBuf>,
    verify_mode: VerifyMode,
    min_protocol: TlsProtocol,
    delegate: Option<Arc<dyn CertificateVerifier>>,
}

impl SslCtx {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: None,
            verify_mode: VerifyMode::Required,
            min_protocol: TlsProtocol::Tls12,
            delegate: None,
        }
    }

    pub fn with_ca(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(ca_path.into());
        self
    }

    pub fn with_verify_mode(mut self, mode: VerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }

    pub fn with_min_protocol(mut self, proto: TlsProtocol) -> Self {
        self.min_protocol = proto;
        self
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn CertificateVerifier>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    fn protocol_versions(&self) -> &[&'static rustls::SupportedProtocolVersion] {
        match self.min_protocol {
            TlsProtocol::Tls12 => &[&rustls::version::TLS12, &rustls::version::TLS13],
            TlsProtocol::Tls13 => &[&rustls::version::TLS13],
        }
    }

    fn load_cert_chain(&self) -> Result<Vec<CertificateDer<'static>>> {
        load_certs(&self.cert_path)
    }

    fn load_private_key(&self) -> Result<PrivateKeyDer<'static>> {
        load_key(&self.key_path)
    }

    pub(crate) fn server_config(&self) -> Result<Arc<rustls::ServerConfig>> {
        let certs = self.load_cert_chain()?;
        let key = self.load_private_key()?;
        let builder = rustls::ServerConfig::builder_with_protocol_versions(self.protocol_versions());
        let config = builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::System(format!("invalid TLS certificate/key: {e}")))?;
        Ok(Arc::new(config))
    }

    pub(crate) fn client_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let builder = rustls::ClientConfig::builder_with_protocol_versions(self.protocol_versions());

        let config = if self.verify_mode == VerifyMode::None {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAll))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            if let Some(ca_path) = &self.ca_path {
                for cert in load_certs(ca_path)? {
                    roots
                        .add(cert)
                        .map_err(|e| Error::System(format!("invalid CA certificate: {e}")))?;
                }
            }
            match &self.delegate {
                Some(delegate) => builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(DelegatingVerifier {
                        roots,
                        delegate: delegate.clone(),
                    }))
                    .with_no_client_auth(),
                None => builder.with_root_certificates(roots).with_no_client_auth(),
            }
        };
        Ok(Arc::new(config))
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::System(format!("reading certificate {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::System(format!("reading private key {}: {e}", path.display())))?
        .ok_or_else(|| Error::System(format!("no private key found in {}", path.display())))
}

/// Used only under `VerifyMode::None`: accepts any certificate chain
/// unconditionally. Never wired in by default — the caller must opt in.
#[derive(Debug)]
struct AcceptAll;

impl rustls::client::danger::ServerCertVerifier for AcceptAll {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Validates the chain against `roots` first, as `VerifyMode::Required`
/// demands; then gives the application `delegate` a final veto over the
/// leaf certificate (spec §4.8).
struct DelegatingVerifier {
    roots: rustls::RootCertStore,
    delegate: Arc<dyn CertificateVerifier>,
}

impl std::fmt::Debug for DelegatingVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingVerifier").finish_non_exhaustive()
    }
}

impl rustls::client::danger::ServerCertVerifier for DelegatingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &rustls::pki_types::ServerName<'_>,
        ocsp_response: &[u8],
        now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        let verifier = rustls::client::WebPkiServerVerifier::builder(Arc::new(self.roots.clone()))
            .build()
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        verifier.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        if self.delegate.accept(end_entity.as_ref()) {
            Ok(rustls::client::danger::ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "certificate rejected by application delegate".into(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
