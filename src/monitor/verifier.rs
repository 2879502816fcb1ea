// Verifier - Apply expiry, hash and trust rules to a check

use super::cache::SingleFlight;
use super::types::ServerCheck;
use crate::certificates::{CertValues, CertificateFetcher};
use crate::error::{RetrievalError, VerificationError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Shared outcome of one retrieval
pub type FetchOutcome = Result<CertValues, RetrievalError>;

/// Resolves checks through a fetcher, optionally deduplicated by a cache
#[derive(Clone)]
pub struct Verifier {
    fetcher: Arc<dyn CertificateFetcher>,
    cache: Option<Arc<SingleFlight<FetchOutcome>>>,
}

impl Verifier {
    /// Verifier calling `fetcher` for every check
    pub fn new(fetcher: Arc<dyn CertificateFetcher>) -> Self {
        Self {
            fetcher,
            cache: None,
        }
    }

    /// Verifier sharing one retrieval per `host:param/proto` key
    pub fn with_cache(fetcher: Arc<dyn CertificateFetcher>) -> Self {
        Self {
            fetcher,
            cache: Some(Arc::new(SingleFlight::new())),
        }
    }

    pub fn uses_cache(&self) -> bool {
        self.cache.is_some()
    }

    async fn retrieve(&self, check: &ServerCheck, timeout: Duration) -> FetchOutcome {
        let target = check.target();
        let Some(cache) = &self.cache else {
            return self.fetcher.fetch(&target, timeout).await;
        };

        let fetcher = self.fetcher.clone();
        let key = target.cache_key();
        cache
            .lookup(&key, move || async move { fetcher.fetch(&target, timeout).await })
            .await
            .unwrap_or(Err(RetrievalError::Aborted))
    }

    /// Resolve `check` in place
    pub async fn verify(&self, check: &mut ServerCheck, timeout: Duration) {
        match self.retrieve(check, timeout).await {
            Ok(values) => apply_values(check, &values, Utc::now()),
            Err(err) => {
                tracing::debug!("{}:{} not retrieved: {}", check.hostname, check.param, err);
                check.execution_error = Some(err);
            }
        }
    }
}

/// Record `values` on `check` and append every rule violation
///
/// `errors` stays `None` when nothing was appended.
pub fn apply_values(check: &mut ServerCheck, values: &CertValues, now: DateTime<Utc>) {
    check.expires_at = Some(values.not_after);
    check.returned_hash = Some(values.hash.clone());
    check.presented_names = values.certificate.names();

    let mut errors = check.errors.take().unwrap_or_default();

    if let Some(err) = &values.verify_error {
        errors.push(err.clone());
    }

    if let Some(expected) = check.expected_hash.as_deref()
        && !expected.is_empty()
        && !expected.eq_ignore_ascii_case(&values.hash)
    {
        errors.push(VerificationError::HashMismatch);
    }

    // A deadline too large to represent reaches past any expiry
    let expiring = match chrono::Duration::from_std(check.deadline)
        .ok()
        .and_then(|deadline| now.checked_add_signed(deadline))
    {
        Some(warn_at) => warn_at > values.not_after,
        None => true,
    };
    if expiring {
        errors.push(VerificationError::ExpiryWarning {
            expires: values.not_after,
        });
    }

    check.errors = if errors.is_empty() { None } else { Some(errors) };
}
