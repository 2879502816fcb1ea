// STARTTLS Protocol Definitions and Trait

use crate::error::RetrievalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream a negotiator can talk over (TCP socket, SOCKS tunnel, test pipe)
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// STARTTLS protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StarttlsProtocol {
    Imap,
    Smtp,
}

impl StarttlsProtocol {
    /// Get default port for protocol
    pub fn default_port(&self) -> u16 {
        match self {
            StarttlsProtocol::Imap => 143,
            StarttlsProtocol::Smtp => 25,
        }
    }

    /// Get protocol name
    pub fn name(&self) -> &'static str {
        match self {
            StarttlsProtocol::Imap => "IMAP",
            StarttlsProtocol::Smtp => "SMTP",
        }
    }
}

impl std::fmt::Display for StarttlsProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Steps of a STARTTLS negotiation, in order
///
/// greeting -> capability check -> upgrade request -> upgrade acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NegotiationStep {
    /// Server greeting after connect
    Greeting,
    /// STARTTLS must be advertised
    Capabilities,
    /// Client sends the upgrade command
    UpgradeRequest,
    /// Server accepts the upgrade
    UpgradeAck,
}

impl NegotiationStep {
    pub fn name(&self) -> &'static str {
        match self {
            NegotiationStep::Greeting => "greeting",
            NegotiationStep::Capabilities => "capabilities",
            NegotiationStep::UpgradeRequest => "upgrade request",
            NegotiationStep::UpgradeAck => "upgrade acknowledgement",
        }
    }
}

impl std::fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Build a negotiation error for `protocol` at `step`
pub(crate) fn step_error(
    protocol: StarttlsProtocol,
    step: NegotiationStep,
    details: impl Into<String>,
) -> RetrievalError {
    RetrievalError::Negotiation {
        protocol,
        step,
        details: details.into(),
    }
}

/// Attach the current step to transport failures that happen inside it
pub(crate) fn at_step(
    protocol: StarttlsProtocol,
    step: NegotiationStep,
) -> impl FnOnce(RetrievalError) -> RetrievalError {
    move |err| match err {
        RetrievalError::Io { details } => step_error(protocol, step, details),
        RetrievalError::ConnectionClosed => {
            step_error(protocol, step, "connection closed by peer")
        }
        other => other,
    }
}

/// STARTTLS negotiation trait
#[async_trait]
pub trait StarttlsNegotiator: Send + Sync {
    /// Negotiate STARTTLS on the connection
    ///
    /// On `Ok(())` the next bytes on the stream belong to the TLS handshake.
    async fn negotiate_starttls(&self, stream: &mut dyn AsyncStream)
    -> Result<(), RetrievalError>;

    /// Get the protocol type
    fn protocol(&self) -> StarttlsProtocol;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names() {
        assert_eq!(StarttlsProtocol::Imap.to_string(), "IMAP");
        assert_eq!(StarttlsProtocol::Smtp.to_string(), "SMTP");
        assert_eq!(StarttlsProtocol::Imap.default_port(), 143);
        assert_eq!(StarttlsProtocol::Smtp.default_port(), 25);
    }

    #[test]
    fn test_transport_errors_get_step() {
        let err = at_step(StarttlsProtocol::Smtp, NegotiationStep::UpgradeAck)(
            RetrievalError::ConnectionClosed,
        );
        assert!(matches!(
            err,
            RetrievalError::Negotiation {
                step: NegotiationStep::UpgradeAck,
                ..
            }
        ));

        // Other errors pass through unchanged
        let err = at_step(StarttlsProtocol::Smtp, NegotiationStep::Greeting)(
            RetrievalError::LineTooLong { limit: 8192 },
        );
        assert_eq!(err, RetrievalError::LineTooLong { limit: 8192 });
    }
}
