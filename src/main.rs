// certsentry - X.509 certificate expiry and hash checker
// Copyright (C) 2025 certsentry contributors
// Licensed under GPL-3.0
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

use anyhow::{Context, Result};
use certsentry::Args;
use certsentry::certificates::validator::load_pem_roots;
use certsentry::certificates::{CertificateFetcher, ChainVerifier, NetworkFetcher};
use certsentry::cli::EXTENDED_HELP;
use certsentry::cli::probe::{ProbeOutcome, format_probe_line, probe_check};
use certsentry::monitor::{
    CheckConfig, CheckRunner, EmailNotifier, Notifier, Reporter, RunSettings, Verifier,
};
use clap::Parser;
use colored::Colorize;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Exit code for configuration and usage errors
const EXIT_CONFIG: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = Args::parse();

    if args.extended_help {
        print!("{}", EXTENDED_HELP);
        return Ok(());
    }

    // Handle --settings-example (generate settings example and exit)
    if let Some(path) = &args.settings_example {
        RunSettings::create_example(path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        println!("✓ Example settings saved to: {}", path.display());
        return Ok(());
    }

    let settings = match args.run_settings() {
        Ok(settings) => settings,
        Err(e) => fail(e),
    };

    init_logging(settings.debug);

    let code = match &args.probe {
        Some(target) => run_probe(target, &args, &settings).await,
        None => run_checks(&args, &settings).await,
    };
    std::process::exit(code);
}

/// Initialize logging - `RUST_LOG` takes precedence over `--debug`
fn init_logging(debug: u8) {
    let level = match debug {
        0 => "off",
        1 => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: logging unavailable: {}", e);
    }
}

/// Report a configuration error and exit
fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), err);
    std::process::exit(EXIT_CONFIG);
}

fn build_fetcher(settings: &RunSettings) -> certsentry::Result<NetworkFetcher> {
    match &settings.ca_bundle {
        Some(path) => {
            let pem = std::fs::read(path).map_err(|e| certsentry::Error::FileSystem {
                path: path.display().to_string(),
                source: e,
            })?;
            NetworkFetcher::new(ChainVerifier::with_roots(load_pem_roots(&pem)?)?)
        }
        None => NetworkFetcher::with_webpki_roots(),
    }
}

fn build_notifier(
    settings: &RunSettings,
    config: &CheckConfig,
) -> certsentry::Result<Option<Arc<dyn Notifier>>> {
    let Some(mail) = config.mail.clone() else {
        if settings.mail_template.is_some() {
            debug!("Mail template given but no mail sender configured");
        }
        return Ok(None);
    };

    let notifier = match &settings.mail_template {
        Some(path) => {
            let template =
                std::fs::read_to_string(path).map_err(|e| certsentry::Error::FileSystem {
                    path: path.display().to_string(),
                    source: e,
                })?;
            EmailNotifier::with_template(mail, &template)?
        }
        None => EmailNotifier::new(mail)?,
    };
    Ok(Some(Arc::new(notifier)))
}

async fn run_checks(args: &Args, settings: &RunSettings) -> i32 {
    let Some(config_path) = &args.config else {
        fail("no check file given, use -c <FILE> or --probe <URL>");
    };

    let config = CheckConfig::from_file(config_path).unwrap_or_else(|e| fail(e));
    let notifier = build_notifier(settings, &config).unwrap_or_else(|e| fail(e));
    let fetcher = build_fetcher(settings).unwrap_or_else(|e| fail(e));

    let fetcher: Arc<dyn CertificateFetcher> = Arc::new(fetcher);
    let verifier = if settings.use_cache {
        Verifier::with_cache(fetcher)
    } else {
        Verifier::new(fetcher)
    };

    let reporter = Reporter::spawn(settings.debug, settings.verbose);
    let mut runner = CheckRunner::new(verifier, reporter.clone())
        .with_workers(settings.workers)
        .with_timeout(settings.timeout());
    if let Some(notifier) = notifier {
        runner = runner.with_notifier(notifier);
    }

    info!(
        "Checking {} certificates in {} groups",
        config.check_count(),
        config.groups.len()
    );
    let summary = runner.run(config.groups).await;
    reporter.process_status(format!(
        "Run complete, {} notifications sent",
        summary.notifications
    ));

    reporter.finish().await.exit_code()
}

async fn run_probe(target: &str, args: &Args, settings: &RunSettings) -> i32 {
    let mut check = probe_check(target, args.warn).unwrap_or_else(|e| fail(e));
    let fetcher = build_fetcher(settings).unwrap_or_else(|e| fail(e));

    Verifier::new(Arc::new(fetcher))
        .verify(&mut check, settings.timeout())
        .await;

    let outcome = ProbeOutcome::of(&check);
    println!("{}", format_probe_line(&outcome, &check));
    if settings.debug > 0 {
        for message in check.error_messages() {
            eprintln!("  {} {}", "==>".yellow(), message);
        }
    }
    outcome.exit_code()
}
