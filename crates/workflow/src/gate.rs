//! Submission gate
//!
//! Decides whether an application may still be edited or submitted, and
//! performs the submission itself. A registration failure after submission
//! never undoes the submission; the applicant gets a degraded success and the
//! catch-up job retries later.

use crate::ledger::LedgerSnapshot;
use crate::registration::{register_application, RegistrationOutcome, SkipReason};
use crate::documents::validate_documents;
use crate::Workflow;
use chrono::{DateTime, Datelike, Utc};
use iasp_common::db::models::{Application, Call, DocumentSlot};
use iasp_common::metrics::record_submission;
use iasp_common::store::load_application;
use iasp_common::{AppError, ApplicationStore, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const SUBMISSION_EMAIL_SUBJECT: &str = "Enrollment in years after the first";

const REGISTRATION_RETRY_MESSAGE: &str = "Your request was created anyway, even though registration failed. \
     Registration will be performed automatically in the next few hours.";

/// Open call and not yet submitted
pub fn can_edit(application: &Application, call: &Call, now: DateTime<Utc>) -> bool {
    call.is_in_progress(now) && application.submission_date.is_none()
}

fn payment_satisfied(application: &Application, call: &Call) -> bool {
    !call.payment_required || application.document(DocumentSlot::PaymentReceipt).is_some()
}

/// Precondition check in the order the applicant should fix them
pub fn check_submission(
    application: &Application,
    call: &Call,
    declared_total: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    if !can_edit(application, call, now) {
        return Err(AppError::NotEditable {
            application_id: application.id,
        });
    }
    validate_documents(application)?;
    if declared_total < call.credits_threshold {
        return Err(AppError::BelowThreshold {
            total: declared_total,
            threshold: call.credits_threshold,
        });
    }
    if !payment_satisfied(application, call) {
        return Err(AppError::PaymentMissing {
            application_id: application.id,
        });
    }
    Ok(())
}

/// Editable, documented, paid (when required) and at or above the threshold
pub async fn can_submit<S: ApplicationStore + ?Sized>(
    store: &S,
    application_id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let snapshot = LedgerSnapshot::load(store, application_id).await?;
    let (application, call) = load_application(store, application_id).await?;
    Ok(check_submission(&application, &call, snapshot.total_credits(false), now).is_ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Submitted, no registration needed
    Submitted,
    /// Submitted and registered
    Registered,
    /// Submitted; registration left to the catch-up job
    RegistrationPending,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub application_id: i64,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    pub protocol_number: Option<String>,
    pub protocol_date: Option<DateTime<Utc>>,
    /// User-facing messages, in display order
    pub messages: Vec<String>,
    pub notified: bool,
}

/// Submit an application.
///
/// Fails with `NotEditable`, `Validation` (missing mandatory document),
/// `BelowThreshold` or `PaymentMissing`. Once the
/// submission date is written the call succeeds, whatever happens to the
/// notification and the registration.
#[instrument(skip(workflow))]
pub async fn submit(workflow: &Workflow, application_id: i64, actor: Uuid) -> Result<SubmissionOutcome> {
    let store = workflow.store.as_ref();
    let snapshot = LedgerSnapshot::load(store, application_id).await?;
    let (application, call) = load_application(store, application_id).await?;
    let now = Utc::now();

    check_submission(&application, &call, snapshot.total_credits(false), now)?;

    store.mark_submitted(application_id, now).await?;
    record_submission();
    info!(application_id, call_id = call.id, user_id = %actor, "Application submitted");

    let mut messages = vec!["Application successfully submitted".to_string()];
    let notified = notify_applicant(workflow, &application, &call).await;

    let mut outcome = SubmissionOutcome {
        application_id,
        submitted_at: now,
        status: SubmissionStatus::Submitted,
        protocol_number: None,
        protocol_date: None,
        messages: Vec::new(),
        notified,
    };

    if call.protocol_required {
        match register_application(workflow, application_id).await {
            Ok(RegistrationOutcome::Registered {
                number,
                date,
                filing_message,
            }) => {
                messages.push(format!("Request successfully registered: n. {}/{}", number, date.year()));
                messages.extend(filing_message);
                outcome.status = SubmissionStatus::Registered;
                outcome.protocol_number = Some(number);
                outcome.protocol_date = Some(date);
            }
            Ok(RegistrationOutcome::Failed { error, alert }) => {
                if !alert {
                    messages.push(format!("Protocol error: {}", error));
                }
                messages.push(REGISTRATION_RETRY_MESSAGE.to_string());
                outcome.status = SubmissionStatus::RegistrationPending;
            }
            Ok(RegistrationOutcome::Skipped { reason }) => {
                // Another worker holds the claim; it will finish the job
                warn!(application_id, reason = ?reason, "Registration skipped after submission");
                outcome.status = match reason {
                    SkipReason::AlreadyRegistered => SubmissionStatus::Registered,
                    _ => SubmissionStatus::RegistrationPending,
                };
            }
            Err(e) => {
                error!(application_id, error = %e, "Registration could not start after submission");
                messages.push(REGISTRATION_RETRY_MESSAGE.to_string());
                outcome.status = SubmissionStatus::RegistrationPending;
            }
        }
    }

    outcome.messages = messages;
    Ok(outcome)
}

async fn notify_applicant(workflow: &Workflow, application: &Application, call: &Call) -> bool {
    let user = match workflow.store.user(application.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(application_id = application.id, "Applicant not found, no notification sent");
            return false;
        }
        Err(e) => {
            warn!(application_id = application.id, error = %e, "Applicant lookup failed, no notification sent");
            return false;
        }
    };

    let body = format!(
        "Dear {} {},\n\nyour application for \"{}\" has been submitted.\n\
         You can follow its status from your personal area.\n",
        user.first_name, user.last_name, call.title_en
    );
    workflow
        .notifier
        .send_email(&user.email, SUBMISSION_EMAIL_SUBJECT, &body)
        .await
}
