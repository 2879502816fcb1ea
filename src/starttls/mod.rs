// STARTTLS module - plaintext negotiation before the TLS handshake

pub mod imap;
pub mod protocols;
pub mod smtp;

pub use imap::ImapNegotiator;
pub use protocols::{AsyncStream, NegotiationStep, StarttlsNegotiator, StarttlsProtocol};
pub use smtp::SmtpNegotiator;
