// CLI module - Command line interface and argument parsing
// Copyright (C) 2025 certsentry contributors
// Licensed under GPL-3.0

pub mod probe;

use crate::Result;
use crate::monitor::config::{RunSettings, parse_duration};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// certsentry - X.509 certificate expiry and hash checker
///
/// Checks are read from a configuration file. Settings may come from a TOML
/// file; flags given on the command line take precedence over it.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
#[command(name = "certsentry")]
pub struct Args {
    // ============ Input ============
    /// Check configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Mail message template file (Handlebars)
    #[arg(short = 'm', long = "mail-template", value_name = "FILE")]
    pub mail_template: Option<PathBuf>,

    /// Run settings file (TOML)
    #[arg(long = "settings", value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Write an example settings file and exit
    #[arg(long = "settings-example", value_name = "FILE")]
    pub settings_example: Option<PathBuf>,

    /// PEM bundle of trust anchors to use instead of the bundled roots
    #[arg(long = "ca-bundle", value_name = "FILE")]
    pub ca_bundle: Option<PathBuf>,

    // ============ Execution ============
    /// Do not deduplicate identical checks
    #[arg(long = "no-cache")]
    pub no_cache: bool,

    /// Check execution timeout in seconds [default: 10]
    #[arg(short = 't', long = "timeout", value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Number of concurrent checks [default: 10]
    #[arg(short = 'w', long = "workers", value_name = "NUM")]
    pub workers: Option<usize>,

    // ============ Output ============
    /// Debug level: 0 nothing, 1 processing errors, 2 errors and status [default: 1]
    #[arg(short = 'd', long = "debug", value_name = "LEVEL", value_parser = clap::value_parser!(u8).range(0..=2))]
    pub debug: Option<u8>,

    /// Verbosity: 0 nothing, 1 failed checks, 2 every check [default: 1]
    #[arg(short = 'v', long = "verbose", value_name = "LEVEL", value_parser = clap::value_parser!(u8).range(0..=2))]
    pub verbose: Option<u8>,

    /// Print the extended help and exit
    #[arg(long = "extended-help")]
    pub extended_help: bool,

    // ============ One-off probe ============
    /// Check a single target: tls://host:port, imap://, smtp://, file:///path
    #[arg(long = "probe", value_name = "URL", conflicts_with = "config")]
    pub probe: Option<String>,

    /// Warning lead time for --probe (e.g. 12h, 14d)
    #[arg(long = "warn", value_name = "DURATION", default_value = "1d", value_parser = parse_warn)]
    pub warn: Duration,
}

fn parse_warn(value: &str) -> std::result::Result<Duration, String> {
    parse_duration(value)
}

impl Args {
    /// Effective run settings: settings file, then command line overrides
    pub fn run_settings(&self) -> Result<RunSettings> {
        let mut settings = match &self.settings {
            Some(path) => RunSettings::from_file(path)?,
            None => RunSettings::default(),
        };

        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_seconds = timeout;
        }
        if self.no_cache {
            settings.use_cache = false;
        }
        if let Some(debug) = self.debug {
            settings.debug = debug;
        }
        if let Some(verbose) = self.verbose {
            settings.verbose = verbose;
        }
        if self.mail_template.is_some() {
            settings.mail_template = self.mail_template.clone();
        }
        if self.ca_bundle.is_some() {
            settings.ca_bundle = self.ca_bundle.clone();
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Text printed by --extended-help
pub const EXTENDED_HELP: &str = "\
certsentry checks the expiry date (NotAfter) and optionally the SHA-512 hash
of X.509 certificates. Certificates are loaded from a file, from the standard
output of a command, or from the network: direct TLS, IMAP STARTTLS and SMTP
STARTTLS.

CHECK FILE
  One command per line. '#' starts a comment.

  hostname:param:protocol:deadline[:hash]
      hostname  connection target and name the certificate must be valid for
      param     tls/ssl/imap/smtp: port number
                file: path of a PEM file
                command: command line whose standard output is PEM
      deadline  warning lead time before expiry: <n>[s|m|h|d|w]
      hash      lowercase hex SHA-512 of the DER certificate; run with -v 1
                to learn it from a mismatch

  =mailserver:port:from:username:password
      outgoing mail settings (STARTTLS, authenticated when username is set)

  @address
      recipient for the checks that follow

  !proxy
      SOCKS5 proxy (host:port or user:pass@host:port) for the following
      network checks; '!direct' switches it off

EXIT CODES
  0  every check passed
  1  at least one check failed
  2  a processing error occurred, e.g. a certificate could not be loaded
  3  the configuration is invalid

OUTPUT
  -v 1  Err,host:param,[\"error\", ...][,Hash=..][,Expires=YYYY-MM-DD]
  -v 2  additionally Log,host:param for every passing check
  -d    processing errors (1) and status messages (2) on stderr
";
