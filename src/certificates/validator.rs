// Certificate Validator - Hostname matching and chain trust checks

use super::parser::CertificateInfo;
use crate::error::{Error, Result, VerificationError};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::net::IpAddr;
use std::sync::Arc;

/// Whether the certificate is valid for `hostname`
///
/// IP literals match IP SANs only. DNS names match a SAN DNS entry exactly
/// or through a `*.` wildcard covering exactly one leftmost label. The
/// subject CN is consulted only when the certificate has no DNS SANs.
pub fn hostname_matches(cert: &CertificateInfo, hostname: &str) -> bool {
    let hostname = hostname.trim_end_matches('.').to_lowercase();
    let bare = hostname.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = bare.parse::<IpAddr>() {
        return cert.san_ip.contains(&ip);
    }

    if cert.san_dns.is_empty() {
        return cert
            .common_name
            .as_deref()
            .is_some_and(|cn| dns_name_matches(&cn.to_lowercase(), &hostname));
    }

    cert.san_dns
        .iter()
        .any(|san| dns_name_matches(san, &hostname))
}

fn dns_name_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');
    if pattern == hostname {
        return true;
    }

    // Check wildcard match: one label, never the whole name
    if let Some(suffix) = pattern.strip_prefix("*.")
        && let Some((label, rest)) = hostname.split_once('.')
    {
        return !label.is_empty() && rest == suffix && suffix.contains('.');
    }

    false
}

/// Hostname check as a verification result
pub fn verify_hostname(
    cert: &CertificateInfo,
    hostname: &str,
) -> std::result::Result<(), VerificationError> {
    if hostname_matches(cert, hostname) {
        Ok(())
    } else {
        Err(VerificationError::HostnameMismatch {
            hostname: hostname.to_string(),
        })
    }
}

/// Load every certificate of a PEM bundle into a root store
pub fn load_pem_roots(data: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let mut reader = data;
    for cert in rustls_pemfile::certs(&mut reader) {
        roots
            .add(cert?)
            .map_err(|e| Error::config(format!("invalid CA certificate: {}", e)))?;
    }
    if roots.is_empty() {
        return Err(Error::config("CA bundle contains no certificates"));
    }
    Ok(roots)
}

/// Chain verification against a set of trust anchors
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ChainVerifier {
    /// Verifier trusting the bundled Mozilla root set
    pub fn with_webpki_roots() -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    /// Verifier trusting exactly `roots`
    pub fn with_roots(roots: RootCertStore) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| Error::Internal {
                message: format!("cannot build certificate verifier: {}", e),
            })?;
        Ok(Self { inner })
    }

    /// Verify that `leaf` chains to a trust anchor through `intermediates`
    ///
    /// Only the chain is judged here. Names are checked by [`verify_hostname`].
    pub fn verify(
        &self,
        leaf: &CertificateInfo,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<(), VerificationError> {
        let end_entity = CertificateDer::from(leaf.der_bytes.as_slice());
        let server_name = name_presented_by(leaf);

        match self
            .inner
            .verify_server_cert(&end_entity, intermediates, &server_name, &[], now)
        {
            Ok(_) => Ok(()),
            Err(rustls::Error::InvalidCertificate(e)) if is_name_error(&e) => Ok(()),
            Err(e) => Err(VerificationError::Untrusted {
                reason: e.to_string(),
            }),
        }
    }
}

/// A server name the certificate itself claims, so path validation does not
/// trip over the name
fn name_presented_by(cert: &CertificateInfo) -> ServerName<'static> {
    if let Some(ip) = cert.san_ip.first() {
        return ServerName::from(*ip);
    }

    let candidates = cert
        .san_dns
        .iter()
        .map(|san| match san.strip_prefix("*.") {
            Some(suffix) => format!("wildcard.{}", suffix),
            None => san.clone(),
        })
        .chain(cert.common_name.clone());
    for candidate in candidates {
        if let Ok(name) = ServerName::try_from(candidate) {
            return name;
        }
    }

    ServerName::from(IpAddr::from([0, 0, 0, 0]))
}

fn is_name_error(err: &CertificateError) -> bool {
    matches!(
        err,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

/// Accept any server certificate during the handshake
///
/// Handshake signatures are still checked so the peer must hold the key of
/// the certificate it presents. Trust and name are judged afterwards.
#[derive(Debug)]
pub struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyCertificate {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
