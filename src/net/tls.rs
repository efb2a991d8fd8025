//! TLS configuration for both ends of the tunnel.
//!
//! # Responsibilities
//! - Server: load certificate and key (PEM) into a `TlsAcceptor`
//! - Client: build a `TlsConnector` that either trusts any peer or verifies
//!   the peer and defers the final decision to a verification hook

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::ClientTlsConfig;

/// Errors building TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("rustls rejected configuration: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("failed to build certificate verifier: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),

    #[error("invalid server name '{0}'")]
    InvalidServerName(String),
}

/// Install the process-wide rustls crypto provider.
///
/// Safe to call more than once; later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    // Basic validation
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Build the tunnel listener's TLS acceptor from PEM files.
pub async fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, std::io::Error> {
    let config = load_tls_config(cert_path, key_path).await?;
    Ok(TlsAcceptor::from(config.get_inner()))
}

/// Decides whether a server certificate is accepted.
///
/// Receives the result of standard verification and the distinguished name of
/// the certificate the server presented (for example `CN=tunnel.example.com`).
pub type VerifyHook = Arc<dyn Fn(bool, &str) -> bool + Send + Sync>;

/// The default hook: log and keep the standard verification result.
pub fn default_verify_hook() -> VerifyHook {
    Arc::new(|preverified: bool, subject: &str| {
        tracing::debug!(preverified, subject = %subject, "Verifying tunnel server certificate");
        preverified
    })
}

/// Build a client connector for the tunnel.
pub fn build_connector(config: &ClientTlsConfig, hook: Option<VerifyHook>) -> Result<TlsConnector, TlsError> {
    let verifier: Arc<dyn ServerCertVerifier> = if config.verify {
        let roots = load_roots(config.ca_cert_path.as_deref())?;
        let inner = WebPkiServerVerifier::builder(Arc::new(roots)).build()?;
        Arc::new(HookedVerifier {
            inner,
            hook: hook.unwrap_or_else(default_verify_hook),
        })
    } else {
        Arc::new(NoCertificateVerification)
    };

    let client = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(client)))
}

/// Subject distinguished name of a DER certificate. Empty if it cannot be
/// parsed.
pub fn certificate_subject(cert: &CertificateDer<'_>) -> String {
    match x509_parser::parse_x509_certificate(cert.as_ref()) {
        Ok((_, parsed)) => parsed.subject().to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse server certificate subject");
            String::new()
        }
    }
}

/// Parse the name presented for SNI and verification.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_owned()).map_err(|_| TlsError::InvalidServerName(host.to_string()))
}

fn load_roots(ca_cert_path: Option<&str>) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();

    let Some(path) = ca_cert_path else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    };

    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })?;
        roots.add(cert)?;
    }

    if roots.is_empty() {
        return Err(TlsError::NoCertificates(path.to_string()));
    }
    Ok(roots)
}

/// Standard web PKI verification, with the final say given to a hook.
struct HookedVerifier {
    inner: Arc<WebPkiServerVerifier>,
    hook: VerifyHook,
}

impl fmt::Debug for HookedVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookedVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for HookedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let outcome = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        let subject = certificate_subject(end_entity);

        if (self.hook)(outcome.is_ok(), &subject) {
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::warn!(
                subject = %subject,
                server_name = %server_name.to_str(),
                "Tunnel server certificate rejected"
            );
            Err(outcome.err().unwrap_or_else(|| {
                rustls::Error::General("certificate rejected by verification hook".into())
            }))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Trusts any server certificate.
#[derive(Debug)]
struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
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
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}
