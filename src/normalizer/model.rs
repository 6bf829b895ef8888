//! Default-filled declarations, detached from the AST.

use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Normalized {
    pub app: NormalizedApp,
    pub version: String,
    pub entities: IndexMap<String, NormalizedEntity>,
    pub rules: Vec<NormalizedRule>,
    /// One entry per access block, in source order.
    pub access: Vec<AccessBlock>,
    pub actions: IndexMap<String, NormalizedAction>,
    pub messages: IndexMap<String, NormalizedMessage>,
    pub jobs: IndexMap<String, NormalizedJob>,
    pub hooks: Vec<NormalizedHook>,
    pub views: IndexMap<String, NormalizedView>,
    pub webhooks: IndexMap<String, NormalizedWebhook>,
    pub tests: Vec<NormalizedTest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedApp {
    pub name: String,
    pub auth: String,
    pub database: String,
    pub frontend: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEntity {
    pub name: String,
    pub table: String,
    pub fields: IndexMap<String, NormalizedField>,
    pub relations: IndexMap<String, NormalizedRelation>,
}

impl NormalizedEntity {
    /// Enum-typed fields, which each need a generated SQL type.
    pub fn enum_fields(&self) -> impl Iterator<Item = &NormalizedField> {
        self.fields.values().filter(|f| f.enum_values.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub sql_type: String,
    pub nullable: bool,
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    #[serde(skip)]
    pub implicit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRelation {
    pub name: String,
    pub target: String,
    pub target_table: String,
    pub column: String,
    pub many: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRule {
    pub id: String,
    pub entity: String,
    pub operation: String,
    pub condition: String,
    pub sql_predicate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emit_code: Option<String>,
    pub is_forbid: bool,
}

/// A condition in both target forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledCondition {
    pub cel: String,
    pub sql: String,
}

/// One `access` block. A side the block leaves out is `None`, not `TRUE`,
/// so it cannot widen what another block on the same entity allows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessBlock {
    pub entity: String,
    pub table: String,
    pub read: Option<CompiledCondition>,
    pub write: Option<CompiledCondition>,
}

/// Read and write predicates for one entity in both target forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPredicates {
    pub entity: String,
    pub table: String,
    pub read_sql: String,
    pub write_sql: String,
    pub read_cel: String,
    pub write_cel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedAction {
    pub name: String,
    pub input_entity: String,
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedMessage {
    pub code: String,
    pub level: String,
    pub default: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedJob {
    pub name: String,
    pub input_entity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_filter: Option<String>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedHook {
    pub entity: String,
    pub timing: String,
    pub operation: String,
    pub jobs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedView {
    pub name: String,
    pub source: String,
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_cel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<NormalizedSort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedSort {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedWebhook {
    pub name: String,
    pub route: String,
    pub provider: String,
    pub events: Vec<String>,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedTest {
    pub name: String,
    pub entity: String,
    pub expect: String,
}
