// Certificate Parser - Extract the fields a check needs from DER/PEM certificates

use crate::error::{RetrievalError, VerificationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::net::IpAddr;
use std::sync::Arc;
use x509_parser::prelude::*;

/// PEM tag a certificate file must start with
const PEM_CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub common_name: Option<String>,
    /// DNS names from the SubjectAlternativeName extension
    pub san_dns: Vec<String>,
    /// IP addresses from the SubjectAlternativeName extension
    pub san_ip: Vec<IpAddr>,
    pub der_bytes: Vec<u8>,
}

impl CertificateInfo {
    /// Parse a single certificate from DER bytes
    pub fn parse(der_bytes: &[u8]) -> Result<Self, RetrievalError> {
        let (_, cert) =
            X509Certificate::from_der(der_bytes).map_err(|_| RetrievalError::NoCertificate)?;

        // Extract Subject Alternative Names
        let mut san_dns = Vec::new();
        let mut san_ip = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => san_dns.push(dns.to_lowercase()),
                    GeneralName::IPAddress(ip) => {
                        if let Some(addr) = ip_from_octets(ip) {
                            san_ip.push(addr);
                        }
                    }
                    _ => {}
                }
            }
        }

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(|cn| cn.to_string());

        Ok(CertificateInfo {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial_number: format!("{:x}", cert.serial),
            not_before: asn1_to_utc(cert.validity().not_before),
            not_after: asn1_to_utc(cert.validity().not_after),
            common_name,
            san_dns,
            san_ip,
            der_bytes: der_bytes.to_vec(),
        })
    }

    /// Lowercase hex SHA-512 of the DER encoding
    pub fn hash(&self) -> String {
        hash_certificate(&self.der_bytes)
    }

    /// Common name followed by SAN entries, deduplicated, for display
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let candidates = self
            .common_name
            .iter()
            .cloned()
            .chain(self.san_dns.iter().cloned())
            .chain(self.san_ip.iter().map(|ip| ip.to_string()));
        for name in candidates {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

fn asn1_to_utc(time: ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn ip_from_octets(octets: &[u8]) -> Option<IpAddr> {
    match octets.len() {
        4 => <[u8; 4]>::try_from(octets).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(octets).ok().map(IpAddr::from),
        _ => None,
    }
}

/// Lowercase hex SHA-512 of raw certificate bytes
pub fn hash_certificate(der_bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(der_bytes))
}

/// Values extracted from a retrieved certificate
///
/// `verify_error` is the first verification problem found while retrieving
/// (hostname mismatch wins over an untrusted chain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertValues {
    /// Hostname used for retrieval and verification
    pub hostname: String,
    pub not_after: DateTime<Utc>,
    /// Lowercase hex SHA-512 of the leaf certificate
    pub hash: String,
    pub certificate: Arc<CertificateInfo>,
    pub verify_error: Option<VerificationError>,
}

impl CertValues {
    pub fn new(hostname: &str, certificate: CertificateInfo) -> Self {
        Self {
            hostname: hostname.to_string(),
            not_after: certificate.not_after,
            hash: certificate.hash(),
            certificate: Arc::new(certificate),
            verify_error: None,
        }
    }
}

/// Decode the first PEM block of `data` as a certificate
///
/// The first block must be tagged `CERTIFICATE` and carry no headers,
/// anything else is reported as "no certificate". When `hostname` is
/// non-empty the certificate is checked against it.
pub fn decode_pem(hostname: &str, data: &[u8]) -> Result<CertValues, RetrievalError> {
    let block = ::pem::parse(data).map_err(|_| RetrievalError::NoCertificate)?;
    if block.tag() != PEM_CERTIFICATE_TAG || block.headers().iter().next().is_some() {
        return Err(RetrievalError::NoCertificate);
    }

    let info = CertificateInfo::parse(block.contents())?;
    let mut values = CertValues::new(hostname, info);
    if !hostname.is_empty() {
        values.verify_error = super::validator::verify_hostname(&values.certificate, hostname).err();
    }
    Ok(values)
}
