// SMTP STARTTLS Negotiator

use super::protocols::{
    AsyncStream, NegotiationStep, StarttlsNegotiator, StarttlsProtocol, at_step, step_error,
};
use crate::error::RetrievalError;
use crate::utils::LineReader;
use async_trait::async_trait;
use lettre::transport::smtp::extension::ClientId;
use tokio::io::AsyncWriteExt;

/// SMTP STARTTLS negotiator
pub struct SmtpNegotiator {
    hostname: String,
}

impl SmtpNegotiator {
    /// Negotiator announcing `hostname` in EHLO
    pub fn new(hostname: String) -> Self {
        Self { hostname }
    }

    /// Negotiator announcing the local machine's name
    pub fn with_local_hostname() -> Self {
        Self::new(local_hostname())
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

impl Default for SmtpNegotiator {
    fn default() -> Self {
        Self::with_local_hostname()
    }
}

/// Local host name as lettre would present it in EHLO
pub fn local_hostname() -> String {
    match ClientId::default() {
        ClientId::Domain(name) if !name.is_empty() => name,
        _ => "local".to_string(),
    }
}

#[async_trait]
impl StarttlsNegotiator for SmtpNegotiator {
    async fn negotiate_starttls(
        &self,
        stream: &mut dyn AsyncStream,
    ) -> Result<(), RetrievalError> {
        let protocol = StarttlsProtocol::Smtp;
        let mut reader = LineReader::new(stream);

        // 1. Read server greeting (220)
        let greeting = reader
            .read_numeric_response()
            .await
            .map_err(at_step(protocol, NegotiationStep::Greeting))?;
        if greeting.code != "220" {
            return Err(step_error(
                protocol,
                NegotiationStep::Greeting,
                format!("expected 220, got {:?}", greeting.code),
            ));
        }

        // 2. Send EHLO
        let ehlo_cmd = format!("EHLO {}\r\n", self.hostname);
        let ehlo = at_step(protocol, NegotiationStep::Capabilities);
        reader
            .get_mut()
            .write_all(ehlo_cmd.as_bytes())
            .await
            .map_err(|e| ehlo(e.into()))?;
        reader.get_mut().flush().await?;

        // 3. Read EHLO response (250), possibly multi-line
        let capabilities = reader
            .read_numeric_response()
            .await
            .map_err(at_step(protocol, NegotiationStep::Capabilities))?;
        if capabilities.code != "250" {
            return Err(step_error(
                protocol,
                NegotiationStep::Capabilities,
                format!("expected 250 after EHLO, got {:?}", capabilities.code),
            ));
        }
        if !capabilities.mentions("STARTTLS") {
            return Err(step_error(
                protocol,
                NegotiationStep::Capabilities,
                "STARTTLS not advertised",
            ));
        }

        // 4. Send STARTTLS command
        let upgrade = at_step(protocol, NegotiationStep::UpgradeRequest);
        reader
            .get_mut()
            .write_all(b"STARTTLS\r\n")
            .await
            .map_err(|e| upgrade(e.into()))?;
        reader.get_mut().flush().await?;

        // 5. Read STARTTLS response (220)
        let ack = reader
            .read_numeric_response()
            .await
            .map_err(at_step(protocol, NegotiationStep::UpgradeAck))?;
        if ack.code != "220" {
            return Err(step_error(
                protocol,
                NegotiationStep::UpgradeAck,
                format!("expected 220 after STARTTLS, got {:?}", ack.code),
            ));
        }

        tracing::debug!("SMTP STARTTLS accepted");
        Ok(())
    }

    fn protocol(&self) -> StarttlsProtocol {
        StarttlsProtocol::Smtp
    }
}
