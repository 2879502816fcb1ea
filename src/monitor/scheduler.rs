// Check Runner - Bounded worker pool feeding a single aggregator
//
// Workers resolve private copies of checks. Only the aggregator task touches
// the group tree: it writes results back, counts down each group and hands
// complete, alerting groups to the notifier.

use super::alerts::Notifier;
use super::report::Reporter;
use super::types::{NotificationGroup, ServerCheck};
use super::verifier::Verifier;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};

/// Default number of concurrent checks
pub const DEFAULT_WORKERS: usize = 10;
/// Default per-check retrieval timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

enum AggregatorMessage {
    Resolved(Box<ServerCheck>),
    /// Every worker has finished
    Stop,
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Groups with every check resolved in place
    pub groups: Vec<NotificationGroup>,
    /// Groups handed to the notifier
    pub notifications: usize,
}

/// Runs every check of a configuration once
pub struct CheckRunner {
    verifier: Verifier,
    reporter: Reporter,
    notifier: Option<Arc<dyn Notifier>>,
    workers: usize,
    timeout: Duration,
}

impl CheckRunner {
    pub fn new(verifier: Verifier, reporter: Reporter) -> Self {
        Self {
            verifier,
            reporter,
            notifier: None,
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve every check and notify failed groups
    ///
    /// Returns once all workers are done and every notification finished.
    pub async fn run(&self, mut groups: Vec<NotificationGroup>) -> RunSummary {
        for (group_index, group) in groups.iter_mut().enumerate() {
            group.outstanding = group.checks.len();
            group.alert = false;
            for (position, check) in group.checks.iter_mut().enumerate() {
                check.group_index = group_index;
                check.position = position;
            }
        }

        let total: usize = groups.iter().map(|g| g.checks.len()).sum();
        tracing::debug!(
            "Running {} checks in {} groups with {} workers",
            total,
            groups.len(),
            self.workers
        );

        let work: Vec<ServerCheck> = groups
            .iter()
            .flat_map(|g| g.checks.iter().cloned())
            .collect();

        let (tx, rx) = mpsc::channel(self.workers);
        let aggregator = tokio::spawn(aggregate(
            groups,
            rx,
            self.reporter.clone(),
            self.notifier.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(work.len());

        for mut check in work {
            let semaphore = Arc::clone(&semaphore);
            let verifier = self.verifier.clone();
            let tx = tx.clone();
            let timeout = self.timeout;

            tasks.push(tokio::spawn(async move {
                // Acquire semaphore permit
                let _permit = semaphore.acquire().await.ok();
                verifier.verify(&mut check, timeout).await;
                let _ = tx.send(AggregatorMessage::Resolved(Box::new(check))).await;
            }));
        }

        // Let the pool drain
        for result in join_all(tasks).await {
            if let Err(e) = result {
                self.reporter
                    .process_error(format!("check task failed: {}", e));
            }
        }

        let _ = tx.send(AggregatorMessage::Stop).await;
        match aggregator.await {
            Ok(summary) => summary,
            Err(e) => {
                self.reporter
                    .process_error(format!("aggregator failed: {}", e));
                RunSummary {
                    groups: Vec::new(),
                    notifications: 0,
                }
            }
        }
    }
}

async fn aggregate(
    mut groups: Vec<NotificationGroup>,
    mut rx: mpsc::Receiver<AggregatorMessage>,
    reporter: Reporter,
    notifier: Option<Arc<dyn Notifier>>,
) -> RunSummary {
    let mut handoffs = JoinSet::new();
    let mut notifications = 0;

    while let Some(message) = rx.recv().await {
        let check = match message {
            AggregatorMessage::Resolved(check) => *check,
            AggregatorMessage::Stop => break,
        };

        let Some(group) = groups.get_mut(check.group_index) else {
            reporter.process_error(format!(
                "{}:{} resolved for unknown group {}",
                check.hostname, check.param, check.group_index
            ));
            continue;
        };

        group.outstanding = group.outstanding.saturating_sub(1);

        if check.has_failed() {
            group.alert = true;
            reporter.check_failure(&check);
            if let Some(err) = &check.execution_error {
                reporter.process_error(format!("{}:{}: {}", check.hostname, check.param, err));
            }
        } else {
            reporter.check_success(&check);
        }

        match group.checks.get_mut(check.position) {
            Some(slot) => *slot = check,
            None => reporter.process_error(format!(
                "{}:{} resolved for unknown position {}",
                check.hostname, check.param, check.position
            )),
        }

        if !group.is_complete() || !group.alert {
            continue;
        }
        let Some(recipient) = group.recipient.clone() else {
            continue;
        };

        match &notifier {
            Some(notifier) => {
                let notifier = Arc::clone(notifier);
                let snapshot = group.clone();
                let reporter = reporter.clone();
                notifications += 1;

                handoffs.spawn(async move {
                    match notifier.notify(&snapshot).await {
                        Ok(()) => reporter.process_status(format!(
                            "{} report sent to {}",
                            notifier.channel_name(),
                            recipient
                        )),
                        Err(e) => reporter.process_error(format!(
                            "{} report to {} failed: {}",
                            notifier.channel_name(),
                            recipient,
                            e
                        )),
                    }
                });
            }
            None => reporter.process_status(format!(
                "No mail sender configured, report for {} not sent",
                recipient
            )),
        }
    }

    // Wait for in-flight notifications
    while let Some(result) = handoffs.join_next().await {
        if let Err(e) = result {
            reporter.process_error(format!("notification task failed: {}", e));
        }
    }

    RunSummary {
        groups,
        notifications,
    }
}
