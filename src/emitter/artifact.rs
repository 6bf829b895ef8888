//! The runtime configuration document.

use crate::normalizer::{
    AccessPredicates, Normalized, NormalizedEntity, NormalizedHook, NormalizedJob,
    NormalizedMessage, NormalizedRule, NormalizedTest, NormalizedWebhook,
};
use crate::planner::{ActionPlan, Plan, ViewPlan};
use indexmap::IndexMap;
use serde::Serialize;

use super::schema;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub version: String,
    pub app_name: String,
    pub auth: String,
    pub database: String,
    pub entities: IndexMap<String, NormalizedEntity>,
    pub actions: IndexMap<String, ActionPlan>,
    pub rules: Vec<NormalizedRule>,
    pub access: IndexMap<String, AccessPredicates>,
    pub views: IndexMap<String, ViewPlan>,
    pub jobs: IndexMap<String, NormalizedJob>,
    pub hooks: Vec<NormalizedHook>,
    pub webhooks: IndexMap<String, NormalizedWebhook>,
    pub messages: IndexMap<String, NormalizedMessage>,
    pub tests: Vec<NormalizedTest>,
    pub migration: Option<MigrationDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationDocument {
    pub version: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl Artifact {
    pub fn new(normalized: &Normalized, plan: &Plan) -> Self {
        let migration = (!normalized.entities.is_empty()).then(|| {
            let mut up = vec![schema::PGCRYPTO.to_string(), schema::TOUCH_FUNCTION.to_string()];
            up.extend(plan.migration.up());
            let mut down = plan.migration.down();
            down.push(schema::DROP_TOUCH_FUNCTION.to_string());
            MigrationDocument {
                version: plan.migration.version.clone(),
                up,
                down,
            }
        });

        Self {
            version: normalized.version.clone(),
            app_name: normalized.app.name.clone(),
            auth: normalized.app.auth.clone(),
            database: normalized.app.database.clone(),
            entities: normalized.entities.clone(),
            actions: plan.actions.clone(),
            rules: normalized.rules.clone(),
            access: plan.access.clone(),
            views: plan.views.clone(),
            jobs: normalized.jobs.clone(),
            hooks: plan.hooks.clone(),
            webhooks: normalized.webhooks.clone(),
            messages: normalized.messages.clone(),
            tests: normalized.tests.clone(),
            migration,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
