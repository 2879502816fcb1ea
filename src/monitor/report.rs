// Run reporting
//
// All log events of a run go through one reporter task. It prints per-check
// lines to stdout, forwards process events to tracing and keeps track of the
// run's overall severity.

use super::types::ServerCheck;
use crate::error::VerificationError;
use chrono::{DateTime, Utc};
use std::io::Write;
use tokio::sync::{mpsc, oneshot};

/// Aggregate outcome of a run, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunSeverity {
    /// Every check passed
    Clean,
    /// At least one check failed
    CheckFailures,
    /// A process-level error happened, e.g. a certificate could not be loaded
    ProcessErrors,
}

impl RunSeverity {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunSeverity::Clean => 0,
            RunSeverity::CheckFailures => 1,
            RunSeverity::ProcessErrors => 2,
        }
    }
}

/// Structured fields of a failed check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub hostname: String,
    pub param: String,
    pub errors: Vec<String>,
    /// Present when the hash did not match
    pub returned_hash: Option<String>,
    /// Present when the certificate is about to expire
    pub expires: Option<DateTime<Utc>>,
}

impl CheckFailure {
    pub fn from_check(check: &ServerCheck) -> Self {
        let mut returned_hash = None;
        let mut expires = None;
        for err in check.errors.iter().flatten() {
            match err {
                VerificationError::HashMismatch => returned_hash = check.returned_hash.clone(),
                VerificationError::ExpiryWarning { expires: at } => expires = Some(*at),
                _ => {}
            }
        }

        Self {
            hostname: check.hostname.clone(),
            param: check.param.clone(),
            errors: check.error_messages(),
            returned_hash,
            expires,
        }
    }
}

/// `host:param,["e1", "e2"][,Hash=..][,Expires=YYYY-MM-DD]`
pub fn format_failure_line(failure: &CheckFailure) -> String {
    let mut line = format!(
        "{}:{},[\"{}\"]",
        failure.hostname,
        failure.param,
        failure.errors.join("\", \"")
    );
    if let Some(hash) = &failure.returned_hash {
        line.push_str(&format!(",Hash={}", hash));
    }
    if let Some(expires) = &failure.expires {
        line.push_str(&format!(",Expires={}", expires.format("%Y-%m-%d")));
    }
    line
}

/// Events understood by the reporter task
#[derive(Debug)]
pub enum ReportEvent {
    ProcessError(String),
    ProcessStatus(String),
    CheckFailure(CheckFailure),
    CheckSuccess { hostname: String, param: String },
    /// Stop and hand back the run severity
    Finish(oneshot::Sender<RunSeverity>),
}

/// Handle to the reporter task
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<ReportEvent>,
}

impl Reporter {
    /// Start a reporter printing check lines to stdout
    pub fn spawn(debug: u8, verbose: u8) -> Self {
        Self::spawn_with_output(debug, verbose, std::io::stdout())
    }

    /// Start a reporter printing check lines to `out`
    pub fn spawn_with_output<W>(debug: u8, verbose: u8, out: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_reporter(rx, debug, verbose, out));
        Self { tx }
    }

    fn send(&self, event: ReportEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("reporter already stopped, event dropped");
        }
    }

    pub fn process_error(&self, message: impl Into<String>) {
        self.send(ReportEvent::ProcessError(message.into()));
    }

    pub fn process_status(&self, message: impl Into<String>) {
        self.send(ReportEvent::ProcessStatus(message.into()));
    }

    pub fn check_failure(&self, check: &ServerCheck) {
        self.send(ReportEvent::CheckFailure(CheckFailure::from_check(check)));
    }

    pub fn check_success(&self, check: &ServerCheck) {
        self.send(ReportEvent::CheckSuccess {
            hostname: check.hostname.clone(),
            param: check.param.clone(),
        });
    }

    /// Stop the reporter after every queued event and return the severity
    pub async fn finish(&self) -> RunSeverity {
        let (tx, rx) = oneshot::channel();
        self.send(ReportEvent::Finish(tx));
        // Already finished by another handle
        rx.await.unwrap_or(RunSeverity::ProcessErrors)
    }
}

async fn run_reporter<W: Write>(
    mut rx: mpsc::UnboundedReceiver<ReportEvent>,
    debug: u8,
    verbose: u8,
    mut out: W,
) {
    let mut severity = RunSeverity::Clean;

    while let Some(event) = rx.recv().await {
        match event {
            ReportEvent::ProcessError(message) => {
                severity = severity.max(RunSeverity::ProcessErrors);
                if debug > 0 {
                    tracing::error!("{}", message);
                }
            }
            ReportEvent::ProcessStatus(message) => {
                if debug > 1 {
                    tracing::info!("{}", message);
                }
            }
            ReportEvent::CheckFailure(failure) => {
                severity = severity.max(RunSeverity::CheckFailures);
                if verbose > 0 {
                    let _ = writeln!(out, "Err,{}", format_failure_line(&failure));
                }
            }
            ReportEvent::CheckSuccess { hostname, param } => {
                if verbose > 1 {
                    let _ = writeln!(out, "Log,{}:{}", hostname, param);
                }
            }
            ReportEvent::Finish(done) => {
                let _ = out.flush();
                let _ = done.send(severity);
                return;
            }
        }
    }
}
