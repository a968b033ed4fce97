//! Protocol registration workflow
//!
//! Per application: unregistered (`protocol_taken` unset) → claimed
//! (`protocol_taken` set before any external call) → registered (number and
//! date written together). A failed attempt releases the claim so the
//! catch-up job can retry it.
//!
//! The claim is a conditional update on `protocol_taken IS NULL`; the row is
//! read back afterwards and the attempt aborts unless it carries our claim
//! timestamp. Two truly simultaneous claims on a store without conditional
//! updates could still both proceed.

use crate::assembly::assemble_bundle;
use crate::registry::{build_request, file_registered_document};
use crate::Workflow;
use chrono::{DateTime, SubsecRound, Utc};
use iasp_common::metrics::record_registration;
use iasp_common::store::load_application;
use iasp_common::{AppError, Result};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotRequired,
    NotSubmitted,
    AlreadyRegistered,
    AlreadyClaimed,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistrationOutcome {
    Registered {
        number: String,
        date: DateTime<Utc>,
        /// Outcome of the optional folder filing
        filing_message: Option<String>,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        error: String,
        /// Needs operator attention (configuration problem)
        alert: bool,
    },
}

impl RegistrationOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationOutcome::Registered { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            RegistrationOutcome::Registered { .. } => "registered",
            RegistrationOutcome::Skipped { .. } => "skipped",
            RegistrationOutcome::Failed { .. } => "failed",
        }
    }
}

fn skipped(reason: SkipReason) -> RegistrationOutcome {
    record_registration("skipped", None);
    RegistrationOutcome::Skipped { reason }
}

/// Register one application with the external registry.
///
/// Errors are returned only when the application cannot be read before the
/// claim; everything after the claim is reported through the outcome.
#[instrument(skip(workflow))]
pub async fn register_application(workflow: &Workflow, application_id: i64) -> Result<RegistrationOutcome> {
    let store = workflow.store.as_ref();
    let (application, call) = load_application(store, application_id).await?;

    if !call.protocol_required {
        return Ok(skipped(SkipReason::NotRequired));
    }
    if !application.is_submitted() {
        return Ok(skipped(SkipReason::NotSubmitted));
    }
    if application.is_registered() {
        return Ok(skipped(SkipReason::AlreadyRegistered));
    }
    if application.protocol_taken.is_some() {
        return Ok(skipped(SkipReason::AlreadyClaimed));
    }

    // Stored with microsecond precision, compared after the read back
    let claimed_at = Utc::now().trunc_subsecs(6);
    if !store.claim_protocol(application_id, claimed_at).await? {
        info!(application_id, "Registration already claimed by another worker");
        return Ok(skipped(SkipReason::AlreadyClaimed));
    }

    match store.application(application_id).await {
        Ok(Some(current)) if current.protocol_taken == Some(claimed_at) => {}
        Ok(Some(_)) => {
            warn!(application_id, "Claim overwritten by another worker, backing off");
            return Ok(skipped(SkipReason::AlreadyClaimed));
        }
        Ok(None) => return Ok(skipped(SkipReason::Missing)),
        Err(e) => return Ok(fail(workflow, application_id, e).await),
    }

    let started = Instant::now();
    let attempt = async {
        let user = store
            .user(application.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user", application.user_id))?;
        let bundle = assemble_bundle(workflow, application_id).await?;
        let request = build_request(
            store,
            &workflow.registry_config,
            &call,
            &user,
            &bundle.principal,
            &bundle.attachments,
        )
        .await?;
        let receipt = workflow.registry.register(&request).await?;
        Ok::<_, AppError>((request, receipt))
    };

    let (request, receipt) = match attempt.await {
        Ok(done) => done,
        Err(e) => return Ok(fail(workflow, application_id, e).await),
    };

    let date = Utc::now();
    if let Err(e) = store.record_protocol(application_id, &receipt.number, date).await {
        // Registered remotely: keeping the claim prevents a second registration
        error!(
            application_id,
            number = %receipt.number,
            error = %e,
            alert = true,
            "Registry number could not be recorded; claim kept for manual recovery"
        );
        record_registration("failed", Some(started.elapsed().as_secs_f64()));
        return Ok(RegistrationOutcome::Failed {
            error: e.to_string(),
            alert: true,
        });
    }

    record_registration("registered", Some(started.elapsed().as_secs_f64()));
    info!(application_id, number = %receipt.number, "Application registered");

    let filing_message = file_registered_document(
        workflow.registry.as_ref(),
        &workflow.registry_config,
        &request,
        &receipt.number,
    )
    .await;

    Ok(RegistrationOutcome::Registered {
        number: receipt.number,
        date,
        filing_message,
    })
}

/// Release the claim and report the failure
async fn fail(workflow: &Workflow, application_id: i64, e: AppError) -> RegistrationOutcome {
    if let Err(release_error) = workflow.store.release_protocol_claim(application_id).await {
        error!(application_id, error = %release_error, "Could not release registration claim");
    }

    let alert = e.is_operational_alert();
    if alert {
        error!(application_id, error = %e, alert = true, "Registration aborted by configuration error");
    } else {
        error!(application_id, error = %e, "Registration failed");
    }
    record_registration("failed", None);

    RegistrationOutcome::Failed {
        error: e.to_string(),
        alert,
    }
}

/// Summary of one catch-up run
#[derive(Debug, Default, Clone, Serialize)]
pub struct CatchUpReport {
    pub candidates: usize,
    pub registered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<(i64, RegistrationOutcome)>,
}

impl CatchUpReport {
    fn push(&mut self, application_id: i64, outcome: RegistrationOutcome) {
        match outcome {
            RegistrationOutcome::Registered { .. } => self.registered += 1,
            RegistrationOutcome::Skipped { .. } => self.skipped += 1,
            RegistrationOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push((application_id, outcome));
    }
}

/// Register every submitted, unregistered and unclaimed application whose
/// call requires it, one at a time with `pause` between attempts
#[instrument(skip(workflow))]
pub async fn run_catch_up(workflow: &Workflow, pause: Duration) -> Result<CatchUpReport> {
    let candidates = workflow.store.pending_registrations().await?;
    let mut report = CatchUpReport {
        candidates: candidates.len(),
        ..CatchUpReport::default()
    };
    info!(candidates = candidates.len(), "Starting registration catch-up");

    for (index, candidate) in candidates.iter().enumerate() {
        if index > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        // An interactive submission may have handled it meanwhile
        let fresh = match workflow.store.application(candidate.id).await {
            Ok(fresh) => fresh,
            Err(e) => {
                error!(application_id = candidate.id, error = %e, "Could not reload application");
                report.push(
                    candidate.id,
                    RegistrationOutcome::Failed {
                        error: e.to_string(),
                        alert: false,
                    },
                );
                continue;
            }
        };
        let outcome = match fresh {
            None => RegistrationOutcome::Skipped {
                reason: SkipReason::Missing,
            },
            Some(app) if app.protocol_date.is_some() => RegistrationOutcome::Skipped {
                reason: SkipReason::AlreadyRegistered,
            },
            Some(app) if app.protocol_taken.is_some() => RegistrationOutcome::Skipped {
                reason: SkipReason::AlreadyClaimed,
            },
            Some(app) => match register_application(workflow, app.id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(application_id = app.id, error = %e, "Registration could not start");
                    RegistrationOutcome::Failed {
                        error: e.to_string(),
                        alert: e.is_operational_alert(),
                    }
                }
            },
        };

        info!(application_id = candidate.id, outcome = outcome.label(), "Catch-up item done");
        report.push(candidate.id, outcome);
    }

    info!(
        registered = report.registered,
        skipped = report.skipped,
        failed = report.failed,
        "Registration catch-up finished"
    );
    Ok(report)
}
