// IMAP STARTTLS Negotiator

use super::protocols::{
    AsyncStream, NegotiationStep, StarttlsNegotiator, StarttlsProtocol, at_step, step_error,
};
use crate::error::RetrievalError;
use crate::utils::LineReader;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

const GREETING_PREFIX: &str = "* OK";
const STARTTLS_COMMAND: &[u8] = b"001 STARTTLS\r\n";
const STARTTLS_OK: &str = "001 OK";

/// IMAP STARTTLS negotiator
pub struct ImapNegotiator;

impl ImapNegotiator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImapNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the bracketed capability list of a greeting contains `STARTTLS`
///
/// `* OK [CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED] ready`
pub fn greeting_offers_starttls(greeting: &str) -> bool {
    let Some(start) = greeting.find('[') else {
        return false;
    };
    let Some(len) = greeting[start..].find(']') else {
        return false;
    };

    greeting[start + 1..start + len]
        .split_whitespace()
        .any(|cap| cap == "STARTTLS")
}

#[async_trait]
impl StarttlsNegotiator for ImapNegotiator {
    async fn negotiate_starttls(
        &self,
        stream: &mut dyn AsyncStream,
    ) -> Result<(), RetrievalError> {
        let protocol = StarttlsProtocol::Imap;
        let mut reader = LineReader::new(stream);

        // 1. Read server greeting (* OK)
        let greeting = reader
            .read_line()
            .await
            .map_err(at_step(protocol, NegotiationStep::Greeting))?;
        let greeting = String::from_utf8_lossy(&greeting);
        if !greeting.starts_with(GREETING_PREFIX) {
            return Err(step_error(
                protocol,
                NegotiationStep::Greeting,
                format!("unexpected greeting: {}", greeting.trim_end()),
            ));
        }

        // 2. STARTTLS must be in the greeting's capability list
        if !greeting_offers_starttls(&greeting[GREETING_PREFIX.len()..]) {
            return Err(step_error(
                protocol,
                NegotiationStep::Capabilities,
                "STARTTLS not advertised",
            ));
        }

        // 3. Send STARTTLS command
        let upgrade = at_step(protocol, NegotiationStep::UpgradeRequest);
        reader
            .get_mut()
            .write_all(STARTTLS_COMMAND)
            .await
            .map_err(|e| upgrade(e.into()))?;
        reader.get_mut().flush().await?;

        // 4. Read tagged response, skipping untagged status lines
        loop {
            let line = reader
                .read_line()
                .await
                .map_err(at_step(protocol, NegotiationStep::UpgradeAck))?;
            let line = String::from_utf8_lossy(&line);

            if line.starts_with("* ") {
                continue;
            }
            if line.contains(STARTTLS_OK) {
                tracing::debug!("IMAP STARTTLS accepted");
                return Ok(());
            }
            return Err(step_error(
                protocol,
                NegotiationStep::UpgradeAck,
                format!("STARTTLS refused: {}", line.trim_end()),
            ));
        }
    }

    fn protocol(&self) -> StarttlsProtocol {
        StarttlsProtocol::Imap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imap_negotiator_creation() {
        let negotiator = ImapNegotiator::new();
        assert_eq!(negotiator.protocol(), StarttlsProtocol::Imap);
    }

    #[test]
    fn test_capability_detection() {
        assert!(greeting_offers_starttls(
            " [CAPABILITY IMAP4rev1 STARTTLS AUTH=PLAIN] Dovecot ready."
        ));
        assert!(!greeting_offers_starttls(
            " [CAPABILITY IMAP4rev1 AUTH=PLAIN] Dovecot ready."
        ));
        // Token outside the brackets does not count
        assert!(!greeting_offers_starttls(" [CAPABILITY IMAP4rev1] STARTTLS"));
        // Must be a whole token
        assert!(!greeting_offers_starttls(" [CAPABILITY XSTARTTLS]"));
        assert!(!greeting_offers_starttls(" no brackets STARTTLS"));
        assert!(!greeting_offers_starttls(" [CAPABILITY STARTTLS"));
    }
}
