//! IASP Registration Worker
//!
//! One-shot catch-up run, started by an external scheduler:
//! 1. Selects submitted applications that still lack a protocol number
//! 2. Registers them one at a time, pausing between items
//! 3. Prints a summary
//!
//! Failed registrations are logged and picked up again by the next run, so
//! the process exits successfully once the run completes.

use iasp_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    FileStorage, VERSION,
};
use iasp_workflow::{notify, registration, CatchUpReport, HttpRegistryClient, RegistrationOutcome, Workflow};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.observability.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("Starting IASP Registration Worker v{}", VERSION);

    let assume_yes = std::env::args().skip(1).any(|arg| arg == "-y");
    if !assume_yes && !confirm()? {
        println!("Aborted");
        return Ok(());
    }

    info!("Connecting to database...");
    let pool = DbPool::new(&config.database).await?;

    let store = Arc::new(Repository::new(pool));
    let registry = Arc::new(HttpRegistryClient::from_config(
        &config.registry,
        FileStorage::new(config.storage.media_root.clone()),
    )?);
    let notifier = notify::from_config(&config.notification)?;
    let workflow = Workflow::new(
        store,
        registry,
        notifier,
        config.storage.clone(),
        config.registry.clone(),
    );

    let report = registration::run_catch_up(&workflow, config.registration.pause()).await?;
    println!("{}", summary(&report));

    if report.failed > 0 {
        warn!(failed = report.failed, "Some registrations failed, they will be retried on the next run");
    }
    info!("Registration worker finished");
    Ok(())
}

/// Ask on stdin before touching the registry
fn confirm() -> anyhow::Result<bool> {
    print!("Register all pending submitted applications? [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn summary(report: &CatchUpReport) -> String {
    let mut out = format!(
        "Candidates: {}, registered: {}, skipped: {}, failed: {}",
        report.candidates, report.registered, report.skipped, report.failed
    );
    for (application_id, outcome) in &report.outcomes {
        let line = match outcome {
            RegistrationOutcome::Registered { number, .. } => {
                format!("application {}: registered as {}", application_id, number)
            }
            RegistrationOutcome::Skipped { reason } => {
                format!("application {}: skipped ({:?})", application_id, reason)
            }
            RegistrationOutcome::Failed { error, .. } => {
                format!("application {}: failed: {}", application_id, error)
            }
        };
        out.push('\n');
        out.push_str(&line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use iasp_workflow::SkipReason;

    #[test]
    fn test_confirmation_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_summary_lists_outcomes() {
        let report = CatchUpReport {
            candidates: 2,
            registered: 1,
            skipped: 1,
            failed: 0,
            outcomes: vec![
                (
                    1,
                    RegistrationOutcome::Registered {
                        number: "4001".into(),
                        date: Utc::now(),
                        filing_message: None,
                    },
                ),
                (
                    2,
                    RegistrationOutcome::Skipped {
                        reason: SkipReason::AlreadyClaimed,
                    },
                ),
            ],
        };

        let text = summary(&report);
        assert!(text.starts_with("Candidates: 2, registered: 1, skipped: 1, failed: 0"));
        assert!(text.contains("application 1: registered as 4001"));
        assert!(text.contains("application 2: skipped (AlreadyClaimed)"));
    }
}
