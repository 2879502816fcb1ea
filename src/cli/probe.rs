// One-off probe of a single target given as URL

use crate::error::{Error, Result, RetrievalError, VerificationError};
use crate::monitor::types::{Protocol, ServerCheck};
use std::time::Duration;
use url::Url;

/// Build the check described by a probe URL
///
/// `tls://host[:port]`, `ssl://`, `imap://`, `smtp://`, `file:///path` or a
/// bare filesystem path. File probes skip the hostname check.
pub fn probe_check(target: &str, warn: Duration) -> Result<ServerCheck> {
    let url = match Url::parse(target) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Ok(ServerCheck::new("", target, Protocol::File, warn));
        }
        Err(e) => return Err(Error::config(format!("invalid probe URL {}: {}", target, e))),
    };

    let protocol = match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| Error::config(format!("invalid file URL: {}", target)))?;
            return Ok(ServerCheck::new(
                "",
                &path.to_string_lossy(),
                Protocol::File,
                warn,
            ));
        }
        "https" => Protocol::Tls,
        scheme => scheme.parse::<Protocol>().map_err(Error::config)?,
    };
    if !protocol.is_network() {
        return Err(Error::config(format!(
            "{} checks cannot be probed by URL",
            protocol
        )));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::config(format!("probe URL has no host: {}", target)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_lowercase();
    let port = url.port().unwrap_or_else(|| protocol.default_port());

    Ok(ServerCheck::new(&host, &port.to_string(), protocol, warn))
}

/// Result of a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Valid,
    Expiring,
    /// Certificate retrieved but rejected
    Rejected,
    /// Certificate not retrieved
    Failed,
}

impl ProbeOutcome {
    /// Classify a resolved check
    pub fn of(check: &ServerCheck) -> Self {
        if check.execution_error.is_some() {
            return ProbeOutcome::Failed;
        }
        match check.errors.as_deref() {
            None | Some([]) => ProbeOutcome::Valid,
            Some(errors)
                if errors
                    .iter()
                    .all(|e| matches!(e, VerificationError::ExpiryWarning { .. })) =>
            {
                ProbeOutcome::Expiring
            }
            Some(_) => ProbeOutcome::Rejected,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Valid => "valid",
            ProbeOutcome::Expiring => "expiring",
            ProbeOutcome::Rejected | ProbeOutcome::Failed => "failed",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ProbeOutcome::Valid => 0,
            ProbeOutcome::Expiring | ProbeOutcome::Rejected => 1,
            ProbeOutcome::Failed => 2,
        }
    }
}

/// `valid|expiring|failed <unix-expiry> <names>`
pub fn format_probe_line(outcome: &ProbeOutcome, check: &ServerCheck) -> String {
    match check.expires_at {
        Some(expires) if check.execution_error.is_none() => format!(
            "{} {} {}",
            outcome.label(),
            expires.timestamp(),
            check.presented_names.join(",")
        ),
        _ => format!("{} 0 -", outcome.label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::NetworkFetcher;
    use crate::monitor::Verifier;
    use std::sync::Arc;

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_network_urls() {
        let check = probe_check("tls://Example.COM:8443", DAY).unwrap();
        assert_eq!(check.hostname, "example.com");
        assert_eq!(check.param, "8443");
        assert_eq!(check.protocol, Protocol::Tls);
        assert_eq!(check.deadline, DAY);

        let smtp = probe_check("smtp://mx.example.com", DAY).unwrap();
        assert_eq!(smtp.param, "25");
        assert_eq!(smtp.protocol, Protocol::Smtp);

        assert_eq!(probe_check("imap://mail.example.com", DAY).unwrap().param, "143");
        assert_eq!(probe_check("https://example.com", DAY).unwrap().param, "443");
    }

    #[test]
    fn test_ipv6_host() {
        let check = probe_check("ssl://[::1]:993", DAY).unwrap();
        assert_eq!(check.hostname, "::1");
        assert_eq!(check.param, "993");
    }

    #[test]
    fn test_file_targets() {
        let url = probe_check("file:///etc/ssl/cert.pem", DAY).unwrap();
        assert_eq!(url.protocol, Protocol::File);
        assert_eq!(url.param, "/etc/ssl/cert.pem");
        assert!(url.hostname.is_empty());

        let bare = probe_check("certs/Server.pem", DAY).unwrap();
        assert_eq!(bare.protocol, Protocol::File);
        assert_eq!(bare.param, "certs/Server.pem");
    }

    #[test]
    fn test_rejected_urls() {
        assert!(matches!(
            probe_check("gopher://example.com", DAY),
            Err(Error::Config { .. })
        ));
        assert!(probe_check("command://example.com", DAY).is_err());
    }

    #[test]
    fn test_outcome_classification() {
        let mut check = ServerCheck::new("a", "443", Protocol::Tls, DAY);
        assert_eq!(ProbeOutcome::of(&check), ProbeOutcome::Valid);

        check.errors = Some(vec![VerificationError::ExpiryWarning {
            expires: chrono::Utc::now(),
        }]);
        assert_eq!(ProbeOutcome::of(&check), ProbeOutcome::Expiring);
        assert_eq!(ProbeOutcome::of(&check).exit_code(), 1);

        check
            .errors
            .get_or_insert_with(Vec::new)
            .push(VerificationError::HashMismatch);
        assert_eq!(ProbeOutcome::of(&check).label(), "failed");

        check.execution_error = Some(RetrievalError::NoCertificate);
        assert_eq!(ProbeOutcome::of(&check).exit_code(), 2);
        assert_eq!(format_probe_line(&ProbeOutcome::Failed, &check), "failed 0 -");
    }

    #[tokio::test]
    async fn test_probe_line_from_verified_file() {
        let path = format!("{}/tests/fixtures/localhost.pem", env!("CARGO_MANIFEST_DIR"));
        let mut check = probe_check(&path, DAY).unwrap();

        let fetcher = Arc::new(NetworkFetcher::with_webpki_roots().unwrap());
        let verifier = Verifier::new(fetcher);
        verifier.verify(&mut check, Duration::from_secs(5)).await;

        let outcome = ProbeOutcome::of(&check);
        assert_eq!(outcome, ProbeOutcome::Valid);
        let line = format_probe_line(&outcome, &check);
        assert!(line.starts_with("valid "));
        assert!(line.ends_with(" localhost,127.0.0.1"));
    }
}
