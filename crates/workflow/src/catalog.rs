//! Curriculum catalog
//!
//! Read-only view over the study-plan snapshot stored on the call. The
//! target descriptor of a required insertion is copied from here when the
//! insertion is created and never looked up again.

use iasp_common::db::models::Call;
use iasp_common::{AppError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Target teaching (or sub-module) as listed in the degree plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogTeaching {
    pub id: i64,
    pub cod: String,
    pub name: String,
    pub credits: Decimal,
    pub ssd: String,
    pub year: i32,
    /// Teaching split into sub-modules, each selectable on its own
    pub has_modules: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Many(Vec<StudyPlans>),
    One(StudyPlans),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StudyPlans {
    #[serde(default)]
    plan_tabs: Vec<PlanTab>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlanTab {
    plan_tab_cod: String,
    #[serde(default)]
    af_required: Vec<RequiredGroup>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RequiredGroup {
    year: i32,
    #[serde(default)]
    required: Vec<Teaching>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Teaching {
    af_id: i64,
    af_cod: String,
    af_description: String,
    credit_value: Decimal,
    sett_cod: Option<String>,
    af_sub_modules: Option<Vec<SubModule>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubModule {
    #[serde(rename = "StudyActivityID")]
    id: i64,
    #[serde(rename = "StudyActivityName")]
    name: String,
    #[serde(rename = "StudyActivityCod")]
    cod: String,
    #[serde(rename = "StudyActivityCreditValue")]
    credits: Decimal,
    #[serde(rename = "StudyActivitySettCod")]
    ssd: Option<String>,
}

/// Plan tab of one call, selected by the call's study plan code
#[derive(Debug, Clone)]
pub struct Catalog {
    tabs: Vec<PlanTab>,
}

impl Catalog {
    /// Parse the snapshot of a call. A call without snapshot has an empty catalog.
    pub fn from_call(call: &Call) -> Result<Self> {
        let Some(raw) = &call.course_studyplans else {
            return Ok(Self { tabs: Vec::new() });
        };

        let snapshot: Snapshot =
            serde_json::from_value(raw.clone()).map_err(|e| AppError::Configuration {
                message: format!("Invalid study plan snapshot for call {}: {}", call.id, e),
            })?;

        let plans = match snapshot {
            Snapshot::Many(mut all) if !all.is_empty() => all.swap_remove(0),
            Snapshot::Many(_) => StudyPlans::default(),
            Snapshot::One(plans) => plans,
        };

        let tabs = plans
            .plan_tabs
            .into_iter()
            .filter(|tab| tab.plan_tab_cod.eq_ignore_ascii_case(&call.study_plan_cod))
            .collect();

        Ok(Self { tabs })
    }

    /// Teaching or sub-module with the given id
    pub fn teaching(&self, teaching_id: i64) -> Option<CatalogTeaching> {
        self.teachings().into_iter().find(|t| t.id == teaching_id)
    }

    /// Every selectable target in plan order, sub-modules right after their teaching
    pub fn teachings(&self) -> Vec<CatalogTeaching> {
        let mut out = Vec::new();
        for group in self.tabs.iter().flat_map(|tab| &tab.af_required) {
            for teaching in &group.required {
                let modules = teaching.af_sub_modules.as_deref().unwrap_or_default();
                out.push(CatalogTeaching {
                    id: teaching.af_id,
                    cod: teaching.af_cod.clone(),
                    name: teaching.af_description.clone(),
                    credits: teaching.credit_value,
                    ssd: teaching.sett_cod.clone().unwrap_or_default(),
                    year: group.year,
                    has_modules: !modules.is_empty(),
                });
                out.extend(modules.iter().map(|module| CatalogTeaching {
                    id: module.id,
                    cod: module.cod.clone(),
                    name: module.name.clone(),
                    credits: module.credits,
                    ssd: module.ssd.clone().unwrap_or_default(),
                    year: group.year,
                    has_modules: false,
                }));
            }
        }
        out
    }
}
