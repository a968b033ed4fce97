//! Repository pattern for database operations
//!
//! Implements [`ApplicationStore`] over PostgreSQL. Reads go to the replica
//! when one is configured, except the reads of the registration claim which
//! must observe the primary.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::store::ApplicationStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    NotSet, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, SqlErr,
    Unchanged,
};
use sea_orm::JoinType;
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

fn duplicate_or(err: DbErr, target: String, source_teaching_cod: &str) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AppError::DuplicateInsertion {
            target,
            source_teaching_cod: source_teaching_cod.to_string(),
        },
        _ => err.into(),
    }
}

fn restricted_or(err: DbErr, insertion: InsertionRef) -> AppError {
    match err.sql_err() {
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => AppError::Conflict {
            message: format!("{} has a commission review", insertion),
        },
        _ => err.into(),
    }
}

#[async_trait]
impl ApplicationStore for Repository {
    // ========================================================================
    // Reads
    // ========================================================================

    async fn application(&self, id: i64) -> Result<Option<Application>> {
        // Primary: the registration workflow re-reads its own claim here
        ApplicationEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn call(&self, id: i64) -> Result<Option<Call>> {
        CallEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>> {
        UserEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn application_for_call(&self, user_id: Uuid, call_id: i64) -> Result<Option<Application>> {
        ApplicationEntity::find()
            .filter(ApplicationColumn::UserId.eq(user_id))
            .filter(ApplicationColumn::CallId.eq(call_id))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn submitted_applications(&self, call_id: i64) -> Result<Vec<Application>> {
        ApplicationEntity::find()
            .filter(ApplicationColumn::CallId.eq(call_id))
            .filter(ApplicationColumn::SubmissionDate.is_not_null())
            .order_by_asc(ApplicationColumn::SubmissionDate)
            .order_by_asc(ApplicationColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn required_insertions(&self, application_id: i64) -> Result<Vec<RequiredInsertion>> {
        RequiredInsertionEntity::find()
            .filter(RequiredInsertionColumn::ApplicationId.eq(application_id))
            .order_by_asc(RequiredInsertionColumn::TargetTeachingYear)
            .order_by_asc(RequiredInsertionColumn::TargetTeachingCod)
            .order_by_asc(RequiredInsertionColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn free_insertions(
        &self,
        application_id: i64,
    ) -> Result<Vec<(FreeInsertion, FreeCreditsRule)>> {
        let rows = FreeInsertionEntity::find()
            .filter(FreeInsertionColumn::ApplicationId.eq(application_id))
            .find_also_related(FreeCreditsRuleEntity)
            .order_by_asc(FreeInsertionColumn::Id)
            .all(self.read_conn())
            .await?;

        rows.into_iter()
            .map(|(insertion, rule)| {
                let rule = rule.ok_or_else(|| {
                    AppError::not_found("free credits rule", insertion.free_credits_rule_id)
                })?;
                Ok((insertion, rule))
            })
            .collect()
    }

    async fn required_insertion(&self, id: i64) -> Result<Option<RequiredInsertion>> {
        RequiredInsertionEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn free_insertion(&self, id: i64) -> Result<Option<FreeInsertion>> {
        FreeInsertionEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn free_credits_rule(
        &self,
        call_id: i64,
        course_year: i32,
    ) -> Result<Option<FreeCreditsRule>> {
        FreeCreditsRuleEntity::find()
            .filter(FreeCreditsRuleColumn::CallId.eq(call_id))
            .filter(FreeCreditsRuleColumn::CourseYear.eq(course_year))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn reviews_for_application(&self, application_id: i64) -> Result<Vec<CommissionReview>> {
        let required_ids: Vec<i64> = RequiredInsertionEntity::find()
            .select_only()
            .column(RequiredInsertionColumn::Id)
            .filter(RequiredInsertionColumn::ApplicationId.eq(application_id))
            .into_tuple()
            .all(self.read_conn())
            .await?;

        let free_ids: Vec<i64> = FreeInsertionEntity::find()
            .select_only()
            .column(FreeInsertionColumn::Id)
            .filter(FreeInsertionColumn::ApplicationId.eq(application_id))
            .into_tuple()
            .all(self.read_conn())
            .await?;

        if required_ids.is_empty() && free_ids.is_empty() {
            return Ok(Vec::new());
        }

        CommissionReviewEntity::find()
            .filter(
                Condition::any()
                    .add(CommissionReviewColumn::RequiredInsertionId.is_in(required_ids))
                    .add(CommissionReviewColumn::FreeInsertionId.is_in(free_ids)),
            )
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn review(&self, insertion: InsertionRef) -> Result<Option<CommissionReview>> {
        let column = match insertion {
            InsertionRef::Required(_) => CommissionReviewColumn::RequiredInsertionId,
            InsertionRef::Free(_) => CommissionReviewColumn::FreeInsertionId,
        };
        CommissionReviewEntity::find()
            .filter(column.eq(insertion.id()))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Insertion Operations
    // ========================================================================

    async fn required_insertion_exists(
        &self,
        application_id: i64,
        target_teaching_id: i64,
        source_teaching_cod: &str,
    ) -> Result<bool> {
        let count = RequiredInsertionEntity::find()
            .filter(RequiredInsertionColumn::ApplicationId.eq(application_id))
            .filter(RequiredInsertionColumn::TargetTeachingId.eq(target_teaching_id))
            .filter(RequiredInsertionColumn::SourceTeachingCod.eq(source_teaching_cod))
            .count(self.write_conn())
            .await?;
        Ok(count > 0)
    }

    async fn free_insertion_exists(
        &self,
        application_id: i64,
        free_credits_rule_id: i64,
        source_teaching_cod: &str,
    ) -> Result<bool> {
        let count = FreeInsertionEntity::find()
            .filter(FreeInsertionColumn::ApplicationId.eq(application_id))
            .filter(FreeInsertionColumn::FreeCreditsRuleId.eq(free_credits_rule_id))
            .filter(FreeInsertionColumn::SourceTeachingCod.eq(source_teaching_cod))
            .count(self.write_conn())
            .await?;
        Ok(count > 0)
    }

    async fn insert_required(&self, insertion: RequiredInsertion) -> Result<RequiredInsertion> {
        let target = insertion.target_teaching_cod.clone();
        let source_cod = insertion.source_teaching_cod.clone();

        let mut active: RequiredInsertionActiveModel =
            RequiredInsertionActiveModel::from(insertion).reset_all();
        active.id = NotSet;

        active
            .insert(self.write_conn())
            .await
            .map_err(|e| duplicate_or(e, target, &source_cod))
    }

    async fn insert_free(&self, insertion: FreeInsertion) -> Result<FreeInsertion> {
        let target = format!("free credits rule {}", insertion.free_credits_rule_id);
        let source_cod = insertion.source_teaching_cod.clone();

        let mut active: FreeInsertionActiveModel =
            FreeInsertionActiveModel::from(insertion).reset_all();
        active.id = NotSet;

        active
            .insert(self.write_conn())
            .await
            .map_err(|e| duplicate_or(e, target, &source_cod))
    }

    async fn update_required(&self, insertion: &RequiredInsertion) -> Result<()> {
        let active = RequiredInsertionActiveModel {
            id: Unchanged(insertion.id),
            source_university: Set(insertion.source_university.clone()),
            source_university_country: Set(insertion.source_university_country.clone()),
            source_university_city: Set(insertion.source_university_city.clone()),
            source_degree_course: Set(insertion.source_degree_course.clone()),
            source_teaching_name: Set(insertion.source_teaching_name.clone()),
            source_teaching_cod: Set(insertion.source_teaching_cod.clone()),
            source_teaching_ssd: Set(insertion.source_teaching_ssd.clone()),
            source_teaching_credits: Set(insertion.source_teaching_credits),
            source_teaching_grade: Set(insertion.source_teaching_grade.clone()),
            source_teaching_attachment: Set(insertion.source_teaching_attachment.clone()),
            source_teaching_url: Set(insertion.source_teaching_url.clone()),
            notes: Set(insertion.notes.clone()),
            ..Default::default()
        };

        active.update(self.write_conn()).await.map_err(|e| {
            duplicate_or(
                e,
                insertion.target_teaching_cod.clone(),
                &insertion.source_teaching_cod,
            )
        })?;
        Ok(())
    }

    async fn update_free(&self, insertion: &FreeInsertion) -> Result<()> {
        let active = FreeInsertionActiveModel {
            id: Unchanged(insertion.id),
            source_university: Set(insertion.source_university.clone()),
            source_university_country: Set(insertion.source_university_country.clone()),
            source_university_city: Set(insertion.source_university_city.clone()),
            source_degree_course: Set(insertion.source_degree_course.clone()),
            source_teaching_name: Set(insertion.source_teaching_name.clone()),
            source_teaching_cod: Set(insertion.source_teaching_cod.clone()),
            source_teaching_ssd: Set(insertion.source_teaching_ssd.clone()),
            source_teaching_credits: Set(insertion.source_teaching_credits),
            source_teaching_grade: Set(insertion.source_teaching_grade.clone()),
            source_teaching_attachment: Set(insertion.source_teaching_attachment.clone()),
            source_teaching_url: Set(insertion.source_teaching_url.clone()),
            notes: Set(insertion.notes.clone()),
            ..Default::default()
        };

        active.update(self.write_conn()).await.map_err(|e| {
            duplicate_or(
                e,
                format!("free credits rule {}", insertion.free_credits_rule_id),
                &insertion.source_teaching_cod,
            )
        })?;
        Ok(())
    }

    async fn delete_insertion(&self, insertion: InsertionRef) -> Result<()> {
        let result = match insertion {
            InsertionRef::Required(id) => RequiredInsertionEntity::delete_by_id(id)
                .exec(self.write_conn())
                .await,
            InsertionRef::Free(id) => FreeInsertionEntity::delete_by_id(id)
                .exec(self.write_conn())
                .await,
        }
        .map_err(|e| restricted_or(e, insertion))?;

        if result.rows_affected == 0 {
            return Err(AppError::not_found("insertion", insertion));
        }
        Ok(())
    }

    // ========================================================================
    // Application Operations
    // ========================================================================

    async fn insert_application(&self, application: Application) -> Result<Application> {
        let call_id = application.call_id;
        let mut active = ApplicationActiveModel::from(application).reset_all();
        active.id = NotSet;

        active
            .insert(self.write_conn())
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => AppError::Conflict {
                    message: format!("an application for call {} already exists", call_id),
                },
                _ => e.into(),
            })
    }

    async fn update_application(&self, application: &Application) -> Result<()> {
        let active = ApplicationActiveModel {
            id: Unchanged(application.id),
            user_country: Set(application.user_country.clone()),
            home_university: Set(application.home_university.clone()),
            home_country: Set(application.home_country.clone()),
            home_city: Set(application.home_city.clone()),
            home_course: Set(application.home_course.clone()),
            exams_certification: Set(application.exams_certification.clone()),
            teaching_plan: Set(application.teaching_plan.clone()),
            votes_conversion: Set(application.votes_conversion.clone()),
            language_certification: Set(application.language_certification.clone()),
            declaration_of_value: Set(application.declaration_of_value.clone()),
            payment_receipt: Set(application.payment_receipt.clone()),
            modified_at: Set(Utc::now()),
            ..Default::default()
        };

        active.update(self.write_conn()).await?;
        Ok(())
    }

    async fn mark_submitted(&self, application_id: i64, at: DateTime<Utc>) -> Result<()> {
        let result = ApplicationEntity::update_many()
            .col_expr(ApplicationColumn::SubmissionDate, Expr::value(at))
            .col_expr(ApplicationColumn::ModifiedAt, Expr::value(at))
            .filter(ApplicationColumn::Id.eq(application_id))
            .filter(ApplicationColumn::SubmissionDate.is_null())
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::NotEditable { application_id });
        }
        Ok(())
    }

    async fn delete_application(&self, application_id: i64) -> Result<()> {
        // Insertions go with the foreign key cascade
        let result = ApplicationEntity::delete_by_id(application_id)
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::not_found("application", application_id));
        }
        Ok(())
    }

    // ========================================================================
    // Protocol Operations
    // ========================================================================

    async fn claim_protocol(&self, application_id: i64, at: DateTime<Utc>) -> Result<bool> {
        let result = ApplicationEntity::update_many()
            .col_expr(ApplicationColumn::ProtocolTaken, Expr::value(at))
            .filter(ApplicationColumn::Id.eq(application_id))
            .filter(ApplicationColumn::ProtocolTaken.is_null())
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn record_protocol(
        &self,
        application_id: i64,
        number: &str,
        date: DateTime<Utc>,
    ) -> Result<()> {
        ApplicationEntity::update_many()
            .col_expr(ApplicationColumn::ProtocolNumber, Expr::value(number))
            .col_expr(ApplicationColumn::ProtocolDate, Expr::value(date))
            .filter(ApplicationColumn::Id.eq(application_id))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    async fn release_protocol_claim(&self, application_id: i64) -> Result<()> {
        ApplicationEntity::update_many()
            .col_expr(
                ApplicationColumn::ProtocolTaken,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .filter(ApplicationColumn::Id.eq(application_id))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    async fn pending_registrations(&self) -> Result<Vec<Application>> {
        ApplicationEntity::find()
            .join(JoinType::InnerJoin, ApplicationRelation::Call.def())
            .filter(CallColumn::ProtocolRequired.eq(true))
            .filter(ApplicationColumn::SubmissionDate.is_not_null())
            .filter(ApplicationColumn::ProtocolDate.is_null())
            .filter(ApplicationColumn::ProtocolTaken.is_null())
            .order_by_asc(ApplicationColumn::Id)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn active_call_registry_configuration(
        &self,
        call_id: i64,
    ) -> Result<Option<(CallRegistryConfiguration, RegistryConfiguration)>> {
        let row = CallRegistryConfigurationEntity::find()
            .filter(CallRegistryConfigurationColumn::CallId.eq(call_id))
            .filter(CallRegistryConfigurationColumn::IsActive.eq(true))
            .order_by_desc(CallRegistryConfigurationColumn::CreatedAt)
            .find_also_related(RegistryConfigurationEntity)
            .one(self.read_conn())
            .await?;

        Ok(row.and_then(|(call_configuration, configuration)| {
            configuration.map(|configuration| (call_configuration, configuration))
        }))
    }

    // ========================================================================
    // Review Operations
    // ========================================================================

    async fn save_review(&self, review: CommissionReview) -> Result<CommissionReview> {
        let insertion = review.insertion().ok_or_else(|| AppError::Internal {
            message: "review must reference exactly one insertion".to_string(),
        })?;

        match self.review(insertion).await? {
            Some(existing) => {
                let mut active: CommissionReviewActiveModel = existing.into();
                active.changed_credits = Set(review.changed_credits);
                active.changed_grade = Set(review.changed_grade);
                active.notes = Set(review.notes);
                active.modified_by = Set(review.modified_by);
                active.modified_at = Set(review.modified_at);
                active.update(self.write_conn()).await.map_err(Into::into)
            }
            None => {
                let mut active = CommissionReviewActiveModel::from(review).reset_all();
                active.id = NotSet;
                active.insert(self.write_conn()).await.map_err(Into::into)
            }
        }
    }

    async fn delete_review(&self, insertion: InsertionRef) -> Result<()> {
        let column = match insertion {
            InsertionRef::Required(_) => CommissionReviewColumn::RequiredInsertionId,
            InsertionRef::Free(_) => CommissionReviewColumn::FreeInsertionId,
        };
        let result = CommissionReviewEntity::delete_many()
            .filter(column.eq(insertion.id()))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
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
        let entry = AuditLogActiveModel {
            id: NotSet,
            insertion_kind: Set(insertion.kind()),
            insertion_id: Set(insertion.id()),
            created_by: Set(created_by),
            text: Set(text.to_string()),
            created_at: Set(at),
        };

        entry.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn audit_log(&self, insertion: InsertionRef) -> Result<Vec<AuditLogEntry>> {
        AuditLogEntity::find()
            .filter(AuditLogColumn::InsertionKind.eq(insertion.kind()))
            .filter(AuditLogColumn::InsertionId.eq(insertion.id()))
            .order_by_desc(AuditLogColumn::CreatedAt)
            .order_by_desc(AuditLogColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Commission Operations
    // ========================================================================

    async fn is_active_commission_member(
        &self,
        call_id: i64,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let count = CommissionMemberEntity::find()
            .join(JoinType::InnerJoin, CommissionMemberRelation::Commission.def())
            .filter(CommissionColumn::CallId.eq(call_id))
            .filter(CommissionColumn::IsActive.eq(true))
            .filter(CommissionColumn::Start.lte(now))
            .filter(CommissionColumn::End.gt(now))
            .filter(CommissionMemberColumn::UserId.eq(user_id))
            .filter(CommissionMemberColumn::IsActive.eq(true))
            .count(self.read_conn())
            .await?;
        Ok(count > 0)
    }
}
