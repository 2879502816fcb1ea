// Certificate Retriever - Obtain the leaf certificate of a check target
//
// tls/ssl: direct handshake. imap/smtp: STARTTLS negotiation, then handshake
// on the same connection. file: PEM from disk. command: PEM from stdout.

use super::parser::{CertValues, CertificateInfo, decode_pem};
use super::validator::{AcceptAnyCertificate, ChainVerifier, verify_hostname};
use crate::error::{Result, RetrievalError};
use crate::monitor::types::{CheckTarget, Protocol};
use crate::starttls::{ImapNegotiator, SmtpNegotiator, StarttlsNegotiator};
use crate::utils::network::{dial, parse_port};
use async_trait::async_trait;
use rustls::ClientConfig;
use rustls::pki_types::{ServerName, UnixTime};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// Source of certificate values for a check target
#[async_trait]
pub trait CertificateFetcher: Send + Sync {
    /// Retrieve and pre-verify the certificate of `target`
    ///
    /// `timeout` bounds the whole retrieval.
    async fn fetch(
        &self,
        target: &CheckTarget,
        timeout: Duration,
    ) -> std::result::Result<CertValues, RetrievalError>;
}

/// Fetcher for every supported protocol
pub struct NetworkFetcher {
    chain: ChainVerifier,
    tls_config: Arc<ClientConfig>,
    smtp: SmtpNegotiator,
    imap: ImapNegotiator,
}

impl NetworkFetcher {
    /// Fetcher judging chains with `chain`
    pub fn new(chain: ChainVerifier) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls_config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| crate::error::Error::Internal {
                message: format!("TLS client configuration: {}", e),
            })?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate::new(provider)))
            .with_no_client_auth();

        Ok(Self {
            chain,
            tls_config: Arc::new(tls_config),
            smtp: SmtpNegotiator::with_local_hostname(),
            imap: ImapNegotiator::new(),
        })
    }

    /// Fetcher trusting the bundled Mozilla root set
    pub fn with_webpki_roots() -> Result<Self> {
        Self::new(ChainVerifier::with_webpki_roots()?)
    }

    /// Name announced in SMTP EHLO
    pub fn with_smtp_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.smtp = SmtpNegotiator::new(hostname.into());
        self
    }

    async fn fetch_network(
        &self,
        target: &CheckTarget,
        negotiator: Option<&dyn StarttlsNegotiator>,
        connect_timeout: Duration,
    ) -> std::result::Result<CertValues, RetrievalError> {
        let port = parse_port(&target.param)?;
        let mut stream = dial(
            &target.hostname,
            port,
            target.proxy.as_deref(),
            connect_timeout,
        )
        .await?;

        if let Some(negotiator) = negotiator {
            tracing::debug!(
                "Negotiating {} STARTTLS with {}:{}",
                negotiator.protocol(),
                target.hostname,
                port
            );
            negotiator.negotiate_starttls(&mut stream).await?;
        }

        self.fetch_over_tls(stream, &target.hostname).await
    }

    /// Run a TLS handshake on `stream` and verify the presented leaf
    ///
    /// Any certificate is accepted during the handshake. A hostname mismatch
    /// takes precedence over an untrusted chain in `verify_error`.
    pub async fn fetch_over_tls<S>(
        &self,
        stream: S,
        hostname: &str,
    ) -> std::result::Result<CertValues, RetrievalError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let bare = hostname.trim_start_matches('[').trim_end_matches(']');
        let server_name =
            ServerName::try_from(bare.to_string()).map_err(|e| RetrievalError::InvalidTarget {
                details: format!("{}: {}", hostname, e),
            })?;

        let connector = TlsConnector::from(self.tls_config.clone());
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| RetrievalError::Handshake {
                details: e.to_string(),
            })?;

        let (_, connection) = tls_stream.get_ref();
        let peer_certs = connection
            .peer_certificates()
            .ok_or(RetrievalError::NoCertificate)?;
        let (leaf, intermediates) = peer_certs
            .split_first()
            .ok_or(RetrievalError::NoCertificate)?;

        tracing::debug!(
            "{} presented {} certificate(s)",
            hostname,
            peer_certs.len()
        );

        let info = CertificateInfo::parse(leaf.as_ref())?;
        let mut values = CertValues::new(hostname, info);

        let name_error = verify_hostname(&values.certificate, hostname).err();
        let trust_error = self
            .chain
            .verify(&values.certificate, intermediates, UnixTime::now())
            .err();
        values.verify_error = name_error.or(trust_error);

        Ok(values)
    }
}

#[async_trait]
impl CertificateFetcher for NetworkFetcher {
    async fn fetch(
        &self,
        target: &CheckTarget,
        limit: Duration,
    ) -> std::result::Result<CertValues, RetrievalError> {
        let negotiator: Option<&dyn StarttlsNegotiator> = match target.protocol {
            Protocol::Tls | Protocol::Ssl => None,
            Protocol::Imap => Some(&self.imap),
            Protocol::Smtp => Some(&self.smtp),
            Protocol::File => return fetch_file(&target.hostname, &target.param).await,
            Protocol::Command => {
                return fetch_command(&target.hostname, &target.param, limit).await;
            }
        };

        timeout(limit, self.fetch_network(target, negotiator, limit))
            .await
            .map_err(|_| RetrievalError::Timeout { duration: limit })?
    }
}

/// Read a PEM certificate from `path`
pub async fn fetch_file(
    hostname: &str,
    path: &str,
) -> std::result::Result<CertValues, RetrievalError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| RetrievalError::Io {
            details: format!("{}: {}", path, e),
        })?;
    decode_pem(hostname, &data)
}

/// Run `command_line` and read a PEM certificate from its standard output
///
/// The process is killed when `limit` elapses.
pub async fn fetch_command(
    hostname: &str,
    command_line: &str,
    limit: Duration,
) -> std::result::Result<CertValues, RetrievalError> {
    let mut parts = command_line.split_whitespace();
    let program = parts.next().ok_or_else(|| RetrievalError::InvalidTarget {
        details: "empty command".to_string(),
    })?;

    let child = Command::new(program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RetrievalError::Command {
            command: command_line.to_string(),
            details: e.to_string(),
        })?;

    let output = timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| RetrievalError::Timeout { duration: limit })?
        .map_err(|e| RetrievalError::Command {
            command: command_line.to_string(),
            details: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(RetrievalError::Command {
            command: command_line.to_string(),
            details: output.status.to_string(),
        });
    }

    decode_pem(hostname, &output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCALHOST_PEM: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/localhost.pem");

    #[tokio::test]
    async fn test_fetch_file() {
        let values = fetch_file("localhost", LOCALHOST_PEM).await.unwrap();
        assert!(values.verify_error.is_none());
        assert_eq!(values.hostname, "localhost");
    }

    #[tokio::test]
    async fn test_fetch_missing_file() {
        let err = fetch_file("localhost", "/nonexistent/cert.pem")
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Io { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_command_stdout() {
        let command = format!("cat {}", LOCALHOST_PEM);
        let values = fetch_command("localhost", &command, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(values.verify_error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_command_timeout_kills() {
        let err = fetch_command("localhost", "sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_command_failure() {
        let err = fetch_command("localhost", "false", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Command { .. }));

        let err = fetch_command("localhost", "true", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, RetrievalError::NoCertificate);
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let err = fetch_command("", "   ", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidTarget { .. }));
    }
}
