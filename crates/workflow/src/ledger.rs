//! Credit ledger
//!
//! Computes the credits an application counts toward its call threshold.
//! Every insertion is capped on its own row: required insertions at the
//! target teaching credits, free insertions at the rule's maximum. With
//! `use_review` set, a commission review replaces the declared value before
//! the cap is applied.
//!
//! [`declared_credits_by_target`] is the dashboard view: it sums per target
//! teaching without any cap or reference-year filter. The two views can
//! disagree (several source teachings mapped to one target add up past the
//! target credits on the dashboard while each row is capped in the total).

use iasp_common::db::models::{
    Call, CommissionReview, FreeCreditsRule, FreeInsertion, InsertionRef, RequiredInsertion,
};
use iasp_common::store::{load_application, ApplicationStore};
use iasp_common::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Rows the ledger works on, read once from the store
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub call: Call,
    pub required: Vec<RequiredInsertion>,
    pub free: Vec<(FreeInsertion, FreeCreditsRule)>,
    pub reviews: HashMap<InsertionRef, CommissionReview>,
}

/// One insertion with what its cap depends on
#[derive(Debug, Clone, Copy)]
pub enum LedgerEntry<'a> {
    Required {
        insertion: &'a RequiredInsertion,
        review: Option<&'a CommissionReview>,
    },
    Free {
        insertion: &'a FreeInsertion,
        rule: &'a FreeCreditsRule,
        review: Option<&'a CommissionReview>,
    },
}

impl LedgerEntry<'_> {
    pub fn declared(&self) -> Decimal {
        match self {
            LedgerEntry::Required { insertion, .. } => insertion.source_teaching_credits,
            LedgerEntry::Free { insertion, .. } => insertion.source_teaching_credits,
        }
    }

    fn review(&self) -> Option<&CommissionReview> {
        match self {
            LedgerEntry::Required { review, .. } | LedgerEntry::Free { review, .. } => *review,
        }
    }

    pub fn cap(&self) -> Decimal {
        match self {
            LedgerEntry::Required { insertion, .. } => insertion.target_teaching_credits,
            LedgerEntry::Free { rule, .. } => rule.max_value,
        }
    }

    /// Declared or reviewed credits, before the cap
    pub fn raw(&self, use_review: bool) -> Decimal {
        match self.review() {
            Some(review) if use_review => review.changed_credits,
            _ => self.declared(),
        }
    }

    pub fn effective(&self, use_review: bool) -> Decimal {
        self.raw(use_review).min(self.cap())
    }

    /// Whether the row counts for a call with the given reference year
    pub fn counts_toward(&self, reference_year: i32) -> bool {
        match self {
            LedgerEntry::Required { insertion, .. } => {
                insertion.target_teaching_year <= reference_year
            }
            LedgerEntry::Free { rule, .. } => rule.course_year <= reference_year && rule.is_active,
        }
    }
}

impl LedgerSnapshot {
    pub async fn load<S: ApplicationStore + ?Sized>(store: &S, application_id: i64) -> Result<Self> {
        let (_, call) = load_application(store, application_id).await?;
        let required = store.required_insertions(application_id).await?;
        let free = store.free_insertions(application_id).await?;
        let reviews = store
            .reviews_for_application(application_id)
            .await?
            .into_iter()
            .filter_map(|review| review.insertion().map(|insertion| (insertion, review)))
            .collect();

        Ok(Self {
            call,
            required,
            free,
            reviews,
        })
    }

    pub fn entries(&self) -> Vec<LedgerEntry<'_>> {
        let required = self.required.iter().map(|insertion| LedgerEntry::Required {
            insertion,
            review: self.reviews.get(&InsertionRef::Required(insertion.id)),
        });
        let free = self.free.iter().map(|(insertion, rule)| LedgerEntry::Free {
            insertion,
            rule,
            review: self.reviews.get(&InsertionRef::Free(insertion.id)),
        });
        required.chain(free).collect()
    }

    /// Sum of capped credits of the rows within the reference year
    pub fn total_credits(&self, use_review: bool) -> Decimal {
        let reference_year = self.call.credits_reference_year;
        self.entries()
            .iter()
            .filter(|entry| entry.counts_toward(reference_year))
            .map(|entry| entry.effective(use_review))
            .sum()
    }
}

/// Total credits of an application; zero when it has no insertions
pub async fn compute_total_credits<S: ApplicationStore + ?Sized>(
    store: &S,
    application_id: i64,
    use_review: bool,
) -> Result<Decimal> {
    Ok(LedgerSnapshot::load(store, application_id)
        .await?
        .total_credits(use_review))
}

/// Dashboard line for one target teaching
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetCredits {
    pub target_teaching_id: i64,
    pub target_teaching_cod: String,
    pub target_teaching_name: String,
    pub target_teaching_year: i32,
    pub target_teaching_credits: Decimal,
    pub declared: Decimal,
    pub declared_satisfied: bool,
    pub reviewed: Decimal,
    pub reviewed_satisfied: bool,
}

/// Uncapped per-target sums of declared and reviewed-or-declared credits,
/// in (target year, target code) order
pub fn declared_credits_by_target(snapshot: &LedgerSnapshot) -> Vec<TargetCredits> {
    let mut lines: Vec<TargetCredits> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for insertion in &snapshot.required {
        let reviewed = snapshot
            .reviews
            .get(&InsertionRef::Required(insertion.id))
            .map(|review| review.changed_credits)
            .unwrap_or(insertion.source_teaching_credits);

        let position = *index.entry(insertion.target_teaching_id).or_insert_with(|| {
            lines.push(TargetCredits {
                target_teaching_id: insertion.target_teaching_id,
                target_teaching_cod: insertion.target_teaching_cod.clone(),
                target_teaching_name: insertion.target_teaching_name.clone(),
                target_teaching_year: insertion.target_teaching_year,
                target_teaching_credits: insertion.target_teaching_credits,
                declared: Decimal::ZERO,
                declared_satisfied: false,
                reviewed: Decimal::ZERO,
                reviewed_satisfied: false,
            });
            lines.len() - 1
        });

        let line = &mut lines[position];
        line.declared += insertion.source_teaching_credits;
        line.reviewed += reviewed;
        line.declared_satisfied = line.declared >= line.target_teaching_credits;
        line.reviewed_satisfied = line.reviewed >= line.target_teaching_credits;
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn call(reference_year: i32) -> Call {
        let now = Utc::now();
        Call {
            id: 1,
            title_it: "Bando".into(),
            title_en: "Call".into(),
            is_active: true,
            start: now - Duration::days(1),
            end: now + Duration::days(1),
            credits_threshold: Decimal::from(30),
            credits_reference_year: reference_year,
            payment_required: false,
            payment_url: None,
            protocol_required: false,
            insertions_only_from_same_course: false,
            study_plan_cod: "A".into(),
            course_studyplans: None,
            created_at: now,
        }
    }

    fn required(id: i64, target: i64, year: i32, target_credits: i64, declared: Decimal) -> RequiredInsertion {
        RequiredInsertion {
            id,
            application_id: 1,
            source_university: "Uni".into(),
            source_university_country: "IT".into(),
            source_university_city: "Rende".into(),
            source_degree_course: "Course".into(),
            source_teaching_name: format!("Source {}", id),
            source_teaching_cod: format!("S{}", id),
            source_teaching_ssd: "INF/01".into(),
            source_teaching_credits: declared,
            source_teaching_grade: "28".into(),
            source_teaching_attachment: "a.pdf".into(),
            source_teaching_url: String::new(),
            notes: String::new(),
            target_teaching_id: target,
            target_teaching_cod: format!("T{}", target),
            target_teaching_name: format!("Target {}", target),
            target_teaching_credits: Decimal::from(target_credits),
            target_teaching_ssd: "INF/01".into(),
            target_teaching_year: year,
            created_by: Uuid::nil(),
            created_at: Utc::now(),
        }
    }

    fn rule(id: i64, year: i32, max: i64, is_active: bool) -> FreeCreditsRule {
        FreeCreditsRule {
            id,
            call_id: 1,
            course_year: year,
            min_value: Decimal::ZERO,
            max_value: Decimal::from(max),
            is_active,
        }
    }

    fn free(id: i64, rule_id: i64, declared: Decimal) -> FreeInsertion {
        FreeInsertion {
            id,
            application_id: 1,
            free_credits_rule_id: rule_id,
            source_university: "Uni".into(),
            source_university_country: "IT".into(),
            source_university_city: "Rende".into(),
            source_degree_course: "Course".into(),
            source_teaching_name: format!("Free {}", id),
            source_teaching_cod: format!("F{}", id),
            source_teaching_ssd: String::new(),
            source_teaching_credits: declared,
            source_teaching_grade: "30".into(),
            source_teaching_attachment: "f.pdf".into(),
            source_teaching_url: String::new(),
            notes: String::new(),
            created_by: Uuid::nil(),
            created_at: Utc::now(),
        }
    }

    fn review(insertion: InsertionRef, credits: Decimal) -> CommissionReview {
        let (required_insertion_id, free_insertion_id) = CommissionReview::columns_for(insertion);
        CommissionReview {
            id: 1,
            required_insertion_id,
            free_insertion_id,
            changed_credits: credits,
            changed_grade: "27".into(),
            notes: "checked".into(),
            created_by: Uuid::nil(),
            modified_by: Uuid::nil(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn snapshot(reference_year: i32) -> LedgerSnapshot {
        LedgerSnapshot {
            call: call(reference_year),
            required: Vec::new(),
            free: Vec::new(),
            reviews: HashMap::new(),
        }
    }

    #[test]
    fn test_empty_is_zero() {
        let s = snapshot(1);
        assert_eq!(s.total_credits(false), Decimal::ZERO);
        assert_eq!(s.total_credits(true), Decimal::ZERO);
    }

    #[test]
    fn test_required_capped_per_row() {
        let mut s = snapshot(1);
        s.required.push(required(1, 10, 1, 20, Decimal::from(25)));
        assert_eq!(s.total_credits(false), Decimal::from(20));
    }

    #[test]
    fn test_review_is_capped_too() {
        let mut s = snapshot(1);
        s.required.push(required(1, 10, 1, 6, Decimal::from(6)));
        s.reviews.insert(
            InsertionRef::Required(1),
            review(InsertionRef::Required(1), Decimal::from(9)),
        );
        assert_eq!(s.total_credits(true), Decimal::from(6));
        assert_eq!(s.total_credits(false), Decimal::from(6));
    }

    #[test]
    fn test_reference_year_filters() {
        let mut s = snapshot(1);
        s.required.push(required(1, 10, 1, 6, Decimal::from(6)));
        s.required.push(required(2, 11, 2, 9, Decimal::from(9)));
        s.free.push((free(3, 7, Decimal::from(3)), rule(7, 2, 12, true)));
        assert_eq!(s.total_credits(false), Decimal::from(6));
    }

    #[test]
    fn test_inactive_rule_not_counted() {
        let mut s = snapshot(2);
        s.free.push((free(3, 7, Decimal::from(3)), rule(7, 1, 12, false)));
        assert_eq!(s.total_credits(false), Decimal::ZERO);
    }

    #[test]
    fn test_free_capped_at_rule_max() {
        let mut s = snapshot(1);
        s.free.push((free(3, 7, Decimal::new(205, 1)), rule(7, 1, 15, true)));
        assert_eq!(s.total_credits(false), Decimal::from(15));
    }

    #[test]
    fn test_effective_never_exceeds_cap() {
        let mut s = snapshot(3);
        for (i, declared) in [3i64, 6, 9, 12, 18].iter().enumerate() {
            let id = i as i64 + 1;
            s.required.push(required(id, 10 + id, 1, 9, Decimal::from(*declared)));
            s.free.push((free(100 + id, 7, Decimal::from(*declared)), rule(7, 1, 10, true)));
            s.reviews.insert(
                InsertionRef::Free(100 + id),
                review(InsertionRef::Free(100 + id), Decimal::from(*declared * 2)),
            );
        }
        for entry in s.entries() {
            assert!(entry.effective(false) <= entry.cap());
            assert!(entry.effective(true) <= entry.cap());
        }
    }

    #[test]
    fn test_dashboard_sums_per_target_without_cap() {
        let mut s = snapshot(1);
        // Two source teachings for the same 6-credit target, one in year 2
        s.required.push(required(1, 10, 1, 6, Decimal::from(4)));
        s.required.push(required(2, 10, 1, 6, Decimal::from(5)));
        s.required.push(required(3, 11, 2, 9, Decimal::from(3)));
        s.reviews.insert(
            InsertionRef::Required(2),
            review(InsertionRef::Required(2), Decimal::from(1)),
        );

        let lines = declared_credits_by_target(&s);
        assert_eq!(lines.len(), 2);

        let first = &lines[0];
        assert_eq!(first.target_teaching_id, 10);
        assert_eq!(first.declared, Decimal::from(9));
        assert!(first.declared_satisfied);
        assert_eq!(first.reviewed, Decimal::from(5));
        assert!(!first.reviewed_satisfied);

        // Year 2 target is listed although the ledger ignores it
        assert_eq!(lines[1].target_teaching_id, 11);
        assert!(!lines[1].declared_satisfied);

        // The ledger caps each row instead: 4 + 5 (capped at 6 each) = 9
        assert_eq!(s.total_credits(false), Decimal::from(9));
    }
}
