// Integration tests for the single-flight cache
// Concurrent requesters of one key share a single computation

use async_trait::async_trait;
use certsentry::RetrievalError;
use certsentry::certificates::{CertValues, CertificateFetcher, decode_pem};
use certsentry::monitor::{CheckTarget, Protocol, ServerCheck, SingleFlight, Verifier};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

const LOCALHOST_PEM: &[u8] = include_bytes!("fixtures/localhost.pem");

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_computation() {
    let cache = Arc::new(SingleFlight::<u64>::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let requests = (0..64).map(|_| {
        let cache = cache.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            cache
                .lookup("example.com:443/tls", move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        sleep(Duration::from_millis(50)).await;
                        42
                    }
                })
                .await
        })
    });

    let results = join_all(requests).await;
    for result in results {
        assert_eq!(result.unwrap().unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_failure_is_replayed_to_later_callers() {
    let cache = SingleFlight::<Result<u64, RetrievalError>>::new();
    let calls = AtomicUsize::new(0);

    let first = cache
        .lookup("down.example.com:443/tls", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RetrievalError::Timeout {
                    duration: Duration::from_secs(10),
                })
            }
        })
        .await
        .unwrap();

    // Resolved long ago, still the same outcome
    let second = cache
        .lookup("down.example.com:443/tls", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .await
        .unwrap();

    assert_eq!(first, second);
    assert!(matches!(second, Err(RetrievalError::Timeout { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_key_does_not_block_other_keys() {
    let cache = SingleFlight::<&'static str>::new();
    let (release, gate) = oneshot::channel::<()>();

    let slow = cache.lookup("slow", move || async move {
        let _ = gate.await;
        "slow"
    });

    let fast = timeout(
        Duration::from_secs(5),
        cache.lookup("fast", || async { "fast" }),
    )
    .await
    .expect("fast key waited for slow key");
    assert_eq!(fast.unwrap(), "fast");

    release.send(()).unwrap();
    assert_eq!(slow.await.unwrap(), "slow");
}

/// Counts retrievals, answers every target with the fixture certificate
struct CountingFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl CertificateFetcher for CountingFetcher {
    async fn fetch(
        &self,
        _target: &CheckTarget,
        _timeout: Duration,
    ) -> Result<CertValues, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(20)).await;
        decode_pem("localhost", LOCALHOST_PEM)
    }
}

async fn verify_many(verifier: Verifier, count: usize) -> Vec<ServerCheck> {
    let tasks = (0..count).map(|_| {
        let verifier = verifier.clone();
        tokio::spawn(async move {
            let mut check = ServerCheck::new("localhost", "443", Protocol::Tls, Duration::ZERO);
            verifier.verify(&mut check, Duration::from_secs(5)).await;
            check
        })
    });
    join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_verifier_deduplicates_identical_checks() {
    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
    });

    let checks = verify_many(Verifier::with_cache(fetcher.clone()), 16).await;

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    let hash = checks[0].returned_hash.clone();
    assert!(hash.is_some());
    assert!(checks.iter().all(|c| c.returned_hash == hash));
    assert!(checks.iter().all(|c| c.errors.is_none()));
}

#[tokio::test]
async fn test_verifier_without_cache_fetches_every_check() {
    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
    });

    let verifier = Verifier::new(fetcher.clone());
    assert!(!verifier.uses_cache());
    verify_many(verifier, 5).await;

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 5);
}
