// Core types for certificate checks

use crate::error::{RetrievalError, VerificationError};
use crate::starttls::StarttlsProtocol;
use crate::utils::ProxyConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Retrieval protocol of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tls,
    Ssl,
    Imap,
    Smtp,
    File,
    Command,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tls => "tls",
            Protocol::Ssl => "ssl",
            Protocol::Imap => "imap",
            Protocol::Smtp => "smtp",
            Protocol::File => "file",
            Protocol::Command => "command",
        }
    }

    /// Whether `param` is a port and the check opens a connection
    pub fn is_network(&self) -> bool {
        !matches!(self, Protocol::File | Protocol::Command)
    }

    /// Plaintext protocol upgraded with STARTTLS, if any
    pub fn starttls(&self) -> Option<StarttlsProtocol> {
        match self {
            Protocol::Imap => Some(StarttlsProtocol::Imap),
            Protocol::Smtp => Some(StarttlsProtocol::Smtp),
            _ => None,
        }
    }

    /// Port used when none is given
    pub fn default_port(&self) -> u16 {
        self.starttls().map_or(443, |p| p.default_port())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tls" => Ok(Protocol::Tls),
            "ssl" => Ok(Protocol::Ssl),
            "imap" => Ok(Protocol::Imap),
            "smtp" => Ok(Protocol::Smtp),
            "file" => Ok(Protocol::File),
            "command" => Ok(Protocol::Command),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a retrieval needs to know about a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTarget {
    pub hostname: String,
    /// Port, file path or command line depending on `protocol`
    pub param: String,
    pub protocol: Protocol,
    pub proxy: Option<Arc<ProxyConfig>>,
}

impl CheckTarget {
    /// Canonical deduplication key, `host:param/proto`
    pub fn cache_key(&self) -> String {
        format!("{}:{}/{}", self.hostname, self.param, self.protocol)
    }
}

/// One configured check and, once resolved, its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCheck {
    pub hostname: String,
    pub param: String,
    pub protocol: Protocol,
    /// Warning lead time before expiry
    pub deadline: Duration,
    /// Lowercase hex SHA-512 of the DER certificate
    pub expected_hash: Option<String>,
    pub returned_hash: Option<String>,
    /// `None` until verification appended at least one error
    pub errors: Option<Vec<VerificationError>>,
    pub execution_error: Option<RetrievalError>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Names the retrieved certificate presents
    pub presented_names: Vec<String>,
    pub proxy: Option<Arc<ProxyConfig>>,
    /// Index of the owning group
    pub group_index: usize,
    /// Index within the owning group
    pub position: usize,
}

impl ServerCheck {
    pub fn new(hostname: &str, param: &str, protocol: Protocol, deadline: Duration) -> Self {
        Self {
            hostname: hostname.to_string(),
            param: param.to_string(),
            protocol,
            deadline,
            expected_hash: None,
            returned_hash: None,
            errors: None,
            execution_error: None,
            expires_at: None,
            presented_names: Vec::new(),
            proxy: None,
            group_index: 0,
            position: 0,
        }
    }

    pub fn with_expected_hash(mut self, hash: &str) -> Self {
        self.expected_hash = Some(hash.to_lowercase());
        self
    }

    pub fn with_proxy(mut self, proxy: Option<Arc<ProxyConfig>>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Retrieval target of this check
    pub fn target(&self) -> CheckTarget {
        CheckTarget {
            hostname: self.hostname.clone(),
            param: self.param.clone(),
            protocol: self.protocol,
            proxy: self.proxy.clone(),
        }
    }

    pub fn cache_key(&self) -> String {
        self.target().cache_key()
    }

    /// Whether the check carries a verification or execution error
    pub fn has_failed(&self) -> bool {
        self.execution_error.is_some() || self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Human readable descriptions of every error on the check
    pub fn error_messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self
            .errors
            .iter()
            .flatten()
            .map(|e| e.to_string())
            .collect();
        if let Some(err) = &self.execution_error {
            messages.push(err.to_string());
        }
        messages
    }
}

/// Checks sharing one alert recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationGroup {
    /// `None` means failures are only logged
    pub recipient: Option<String>,
    pub checks: Vec<ServerCheck>,
    /// Checks not yet resolved in the current run
    pub outstanding: usize,
    /// Set once any member check fails
    pub alert: bool,
}

impl NotificationGroup {
    pub fn new(recipient: Option<String>) -> Self {
        Self {
            recipient,
            checks: Vec::new(),
            outstanding: 0,
            alert: false,
        }
    }

    /// Append a check, recording its position
    pub fn push(&mut self, mut check: ServerCheck) {
        check.position = self.checks.len();
        self.checks.push(check);
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding == 0
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &ServerCheck> {
        self.checks.iter().filter(|c| c.has_failed())
    }
}
