//! In-memory [`ApplicationStore`] for tests and local tooling

use super::ApplicationStore;
use crate::db::models::*;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    next_id: i64,
    users: HashMap<Uuid, User>,
    calls: BTreeMap<i64, Call>,
    applications: BTreeMap<i64, Application>,
    rules: BTreeMap<i64, FreeCreditsRule>,
    required: BTreeMap<i64, RequiredInsertion>,
    free: BTreeMap<i64, FreeInsertion>,
    reviews: Vec<CommissionReview>,
    audit: Vec<AuditLogEntry>,
    registry_configurations: BTreeMap<i64, RegistryConfiguration>,
    call_registry_configurations: Vec<CallRegistryConfiguration>,
    commissions: Vec<Commission>,
    members: Vec<CommissionMember>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mutex-guarded maps behaving like the database for the queries the
/// workflow issues
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1000,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| AppError::Internal {
            message: "in-memory store lock poisoned".to_string(),
        })
    }

    // Seeding. Rows keep the id they are given; generated ids start above
    // 1000 so they do not collide with seeded ones.

    pub fn add_user(&self, user: User) -> Result<()> {
        self.lock()?.users.insert(user.id, user);
        Ok(())
    }

    pub fn add_call(&self, call: Call) -> Result<()> {
        self.lock()?.calls.insert(call.id, call);
        Ok(())
    }

    /// Inserts or overwrites a whole row, protocol fields included
    pub fn add_application(&self, application: Application) -> Result<()> {
        self.lock()?.applications.insert(application.id, application);
        Ok(())
    }

    pub fn add_free_credits_rule(&self, rule: FreeCreditsRule) -> Result<()> {
        self.lock()?.rules.insert(rule.id, rule);
        Ok(())
    }

    pub fn add_registry_configuration(
        &self,
        configuration: RegistryConfiguration,
        call_configuration: CallRegistryConfiguration,
    ) -> Result<()> {
        let mut state = self.lock()?;
        state
            .registry_configurations
            .insert(configuration.id, configuration);
        state.call_registry_configurations.push(call_configuration);
        Ok(())
    }

    pub fn add_commission(&self, commission: Commission, members: Vec<CommissionMember>) -> Result<()> {
        let mut state = self.lock()?;
        state.commissions.push(commission);
        state.members.extend(members);
        Ok(())
    }
}

#[async_trait]
impl ApplicationStore for InMemoryStore {
    async fn application(&self, id: i64) -> Result<Option<Application>> {
        Ok(self.lock()?.applications.get(&id).cloned())
    }

    async fn call(&self, id: i64) -> Result<Option<Call>> {
        Ok(self.lock()?.calls.get(&id).cloned())
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn application_for_call(&self, user_id: Uuid, call_id: i64) -> Result<Option<Application>> {
        Ok(self
            .lock()?
            .applications
            .values()
            .find(|a| a.user_id == user_id && a.call_id == call_id)
            .cloned())
    }

    async fn submitted_applications(&self, call_id: i64) -> Result<Vec<Application>> {
        let state = self.lock()?;
        let mut rows: Vec<Application> = state
            .applications
            .values()
            .filter(|a| a.call_id == call_id && a.submission_date.is_some())
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.submission_date, a.id));
        Ok(rows)
    }

    async fn required_insertions(&self, application_id: i64) -> Result<Vec<RequiredInsertion>> {
        let state = self.lock()?;
        let mut rows: Vec<RequiredInsertion> = state
            .required
            .values()
            .filter(|r| r.application_id == application_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.target_teaching_year, &a.target_teaching_cod, a.id)
                .cmp(&(b.target_teaching_year, &b.target_teaching_cod, b.id))
        });
        Ok(rows)
    }

    async fn free_insertions(
        &self,
        application_id: i64,
    ) -> Result<Vec<(FreeInsertion, FreeCreditsRule)>> {
        let state = self.lock()?;
        state
            .free
            .values()
            .filter(|f| f.application_id == application_id)
            .map(|f| {
                let rule = state
                    .rules
                    .get(&f.free_credits_rule_id)
                    .cloned()
                    .ok_or_else(|| AppError::not_found("free credits rule", f.free_credits_rule_id))?;
                Ok((f.clone(), rule))
            })
            .collect()
    }

    async fn required_insertion(&self, id: i64) -> Result<Option<RequiredInsertion>> {
        Ok(self.lock()?.required.get(&id).cloned())
    }

    async fn free_insertion(&self, id: i64) -> Result<Option<FreeInsertion>> {
        Ok(self.lock()?.free.get(&id).cloned())
    }

    async fn free_credits_rule(
        &self,
        call_id: i64,
        course_year: i32,
    ) -> Result<Option<FreeCreditsRule>> {
        Ok(self
            .lock()?
            .rules
            .values()
            .find(|r| r.call_id == call_id && r.course_year == course_year)
            .cloned())
    }

    async fn reviews_for_application(&self, application_id: i64) -> Result<Vec<CommissionReview>> {
        let state = self.lock()?;
        Ok(state
            .reviews
            .iter()
            .filter(|review| match review.insertion() {
                Some(InsertionRef::Required(id)) => state
                    .required
                    .get(&id)
                    .is_some_and(|r| r.application_id == application_id),
                Some(InsertionRef::Free(id)) => state
                    .free
                    .get(&id)
                    .is_some_and(|f| f.application_id == application_id),
                None => false,
            })
            .cloned()
            .collect())
    }

    async fn review(&self, insertion: InsertionRef) -> Result<Option<CommissionReview>> {
        Ok(self
            .lock()?
            .reviews
            .iter()
            .find(|r| r.insertion() == Some(insertion))
            .cloned())
    }

    async fn required_insertion_exists(
        &self,
        application_id: i64,
        target_teaching_id: i64,
        source_teaching_cod: &str,
    ) -> Result<bool> {
        Ok(self.lock()?.required.values().any(|r| {
            r.application_id == application_id
                && r.target_teaching_id == target_teaching_id
                && r.source_teaching_cod == source_teaching_cod
        }))
    }

    async fn free_insertion_exists(
        &self,
        application_id: i64,
        free_credits_rule_id: i64,
        source_teaching_cod: &str,
    ) -> Result<bool> {
        Ok(self.lock()?.free.values().any(|f| {
            f.application_id == application_id
                && f.free_credits_rule_id == free_credits_rule_id
                && f.source_teaching_cod == source_teaching_cod
        }))
    }

    async fn insert_required(&self, mut insertion: RequiredInsertion) -> Result<RequiredInsertion> {
        let mut state = self.lock()?;
        insertion.id = state.next_id();
        state.required.insert(insertion.id, insertion.clone());
        Ok(insertion)
    }

    async fn insert_free(&self, mut insertion: FreeInsertion) -> Result<FreeInsertion> {
        let mut state = self.lock()?;
        insertion.id = state.next_id();
        state.free.insert(insertion.id, insertion.clone());
        Ok(insertion)
    }

    async fn update_required(&self, insertion: &RequiredInsertion) -> Result<()> {
        let mut state = self.lock()?;
        let clash = state.required.values().any(|r| {
            r.id != insertion.id
                && r.application_id == insertion.application_id
                && r.target_teaching_id == insertion.target_teaching_id
                && r.source_teaching_cod == insertion.source_teaching_cod
        });
        if clash {
            return Err(AppError::DuplicateInsertion {
                target: insertion.target_teaching_cod.clone(),
                source_teaching_cod: insertion.source_teaching_cod.clone(),
            });
        }
        let stored = state
            .required
            .get_mut(&insertion.id)
            .ok_or_else(|| AppError::not_found("insertion", InsertionRef::Required(insertion.id)))?;
        *stored = insertion.clone();
        Ok(())
    }

    async fn update_free(&self, insertion: &FreeInsertion) -> Result<()> {
        let mut state = self.lock()?;
        let clash = state.free.values().any(|f| {
            f.id != insertion.id
                && f.application_id == insertion.application_id
                && f.free_credits_rule_id == insertion.free_credits_rule_id
                && f.source_teaching_cod == insertion.source_teaching_cod
        });
        if clash {
            return Err(AppError::DuplicateInsertion {
                target: format!("free credits rule {}", insertion.free_credits_rule_id),
                source_teaching_cod: insertion.source_teaching_cod.clone(),
            });
        }
        let stored = state
            .free
            .get_mut(&insertion.id)
            .ok_or_else(|| AppError::not_found("insertion", InsertionRef::Free(insertion.id)))?;
        *stored = insertion.clone();
        Ok(())
    }

    async fn delete_insertion(&self, insertion: InsertionRef) -> Result<()> {
        let mut state = self.lock()?;
        // Mirrors the restricting foreign key on reviews
        if state.reviews.iter().any(|r| r.insertion() == Some(insertion)) {
            return Err(AppError::Conflict {
                message: format!("{} has a commission review", insertion),
            });
        }
        match insertion {
            InsertionRef::Required(id) => state.required.remove(&id).map(|_| ()),
            InsertionRef::Free(id) => state.free.remove(&id).map(|_| ()),
        }
        .ok_or_else(|| AppError::not_found("insertion", insertion))
    }

    async fn insert_application(&self, mut application: Application) -> Result<Application> {
        let mut state = self.lock()?;
        // Mirrors the unique (user, call) constraint
        if state
            .applications
            .values()
            .any(|a| a.user_id == application.user_id && a.call_id == application.call_id)
        {
            return Err(AppError::Conflict {
                message: format!("an application for call {} already exists", application.call_id),
            });
        }
        application.id = state.next_id();
        state.applications.insert(application.id, application.clone());
        Ok(application)
    }

    async fn update_application(&self, application: &Application) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .applications
            .get_mut(&application.id)
            .ok_or_else(|| AppError::not_found("application", application.id))?;
        // Protocol fields have their own operations
        let (number, date, taken) = (
            stored.protocol_number.clone(),
            stored.protocol_date,
            stored.protocol_taken,
        );
        *stored = application.clone();
        stored.protocol_number = number;
        stored.protocol_date = date;
        stored.protocol_taken = taken;
        Ok(())
    }

    async fn mark_submitted(&self, application_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .applications
            .get_mut(&application_id)
            .ok_or_else(|| AppError::not_found("application", application_id))?;
        stored.submission_date = Some(at);
        stored.modified_at = at;
        Ok(())
    }

    async fn delete_application(&self, application_id: i64) -> Result<()> {
        let mut state = self.lock()?;
        state
            .applications
            .remove(&application_id)
            .ok_or_else(|| AppError::not_found("application", application_id))?;
        state.required.retain(|_, r| r.application_id != application_id);
        state.free.retain(|_, f| f.application_id != application_id);
        Ok(())
    }

    async fn claim_protocol(&self, application_id: i64, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock()?;
        let stored = state
            .applications
            .get_mut(&application_id)
            .ok_or_else(|| AppError::not_found("application", application_id))?;
        if stored.protocol_taken.is_some() {
            return Ok(false);
        }
        stored.protocol_taken = Some(at);
        Ok(true)
    }

    async fn record_protocol(
        &self,
        application_id: i64,
        number: &str,
        date: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .applications
            .get_mut(&application_id)
            .ok_or_else(|| AppError::not_found("application", application_id))?;
        stored.protocol_number = number.to_string();
        stored.protocol_date = Some(date);
        Ok(())
    }

    async fn release_protocol_claim(&self, application_id: i64) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .applications
            .get_mut(&application_id)
            .ok_or_else(|| AppError::not_found("application", application_id))?;
        stored.protocol_taken = None;
        Ok(())
    }

    async fn pending_registrations(&self) -> Result<Vec<Application>> {
        let state = self.lock()?;
        Ok(state
            .applications
            .values()
            .filter(|a| {
                a.submission_date.is_some()
                    && a.protocol_date.is_none()
                    && a.protocol_taken.is_none()
                    && state
                        .calls
                        .get(&a.call_id)
                        .is_some_and(|c| c.protocol_required)
            })
            .cloned()
            .collect())
    }

    async fn active_call_registry_configuration(
        &self,
        call_id: i64,
    ) -> Result<Option<(CallRegistryConfiguration, RegistryConfiguration)>> {
        let state = self.lock()?;
        let Some(call_configuration) = state
            .call_registry_configurations
            .iter()
            .filter(|c| c.call_id == call_id && c.is_active)
            .max_by_key(|c| c.created_at)
        else {
            return Ok(None);
        };
        Ok(state
            .registry_configurations
            .get(&call_configuration.configuration_id)
            .map(|configuration| (call_configuration.clone(), configuration.clone())))
    }

    async fn save_review(&self, mut review: CommissionReview) -> Result<CommissionReview> {
        let insertion = review.insertion().ok_or_else(|| AppError::Internal {
            message: "review must reference exactly one insertion".to_string(),
        })?;
        let mut state = self.lock()?;
        if let Some(existing) = state
            .reviews
            .iter_mut()
            .find(|r| r.insertion() == Some(insertion))
        {
            review.id = existing.id;
            review.created_by = existing.created_by;
            review.created_at = existing.created_at;
            *existing = review.clone();
            return Ok(review);
        }
        review.id = state.next_id();
        state.reviews.push(review.clone());
        Ok(review)
    }

    async fn delete_review(&self, insertion: InsertionRef) -> Result<()> {
        let mut state = self.lock()?;
        let before = state.reviews.len();
        state.reviews.retain(|r| r.insertion() != Some(insertion));
        if state.reviews.len() == before {
            return Err(AppError::ReviewNotFound {
                insertion: insertion.to_string(),
            });
        }
        Ok(())
    }

    async fn append_audit_log(
        &self,
        insertion: InsertionRef,
        created_by: Uuid,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<AuditLogEntry> {
        let mut state = self.lock()?;
        let entry = AuditLogEntry {
            id: state.next_id(),
            insertion_kind: insertion.kind(),
            insertion_id: insertion.id(),
            created_by,
            text: text.to_string(),
            created_at: at,
        };
        state.audit.push(entry.clone());
        Ok(entry)
    }

    async fn audit_log(&self, insertion: InsertionRef) -> Result<Vec<AuditLogEntry>> {
        let state = self.lock()?;
        let mut entries: Vec<AuditLogEntry> = state
            .audit
            .iter()
            .filter(|e| e.insertion() == insertion)
            .cloned()
            .collect();
        entries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(entries)
    }

    async fn is_active_commission_member(
        &self,
        call_id: i64,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let state = self.lock()?;
        Ok(state
            .commissions
            .iter()
            .filter(|c| c.call_id == call_id && c.is_in_progress(now))
            .any(|c| {
                state
                    .members
                    .iter()
                    .any(|m| m.commission_id == c.id && m.user_id == user_id && m.is_active)
            }))
    }
}
