//! Resolved declaration tables.

use crate::ast::{Action, Job, Message, Span, View, Webhook};
use indexmap::IndexMap;

pub const IMPLICIT_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub name: String,
    /// Source type name; `"enum"` for enum fields.
    pub ty: String,
    pub is_enum: bool,
    pub enum_values: Vec<String>,
    pub unique: bool,
    pub implicit: bool,
}

impl ResolvedField {
    pub(super) fn implicit(name: &str, ty: &str, unique: bool) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
            is_enum: false,
            enum_values: Vec::new(),
            unique,
            implicit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntity {
    pub name: String,
    pub fields: IndexMap<String, ResolvedField>,
    pub span: Span,
}

impl ScopeEntity {
    pub fn field(&self, name: &str) -> Option<&ResolvedField> {
        self.fields.get(name)
    }

    pub fn declared_fields(&self) -> impl Iterator<Item = &ResolvedField> {
        self.fields.values().filter(|f| !f.implicit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRelation {
    pub source: String,
    pub field: String,
    pub target: String,
    pub many: bool,
    pub span: Span,
}

impl ScopeRelation {
    pub fn key(&self) -> String {
        format!("{}.{}", self.source, self.field)
    }

    /// Foreign-key column on the source table.
    pub fn column(&self) -> String {
        format!("{}_id", self.field)
    }
}

/// Every named declaration of a compile unit, indexed first-wins.
///
/// Only the analyzer can populate a `Scope`; later stages receive it by
/// shared reference and have no way to mutate it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    entities: IndexMap<String, ScopeEntity>,
    relations: IndexMap<String, ScopeRelation>,
    actions: IndexMap<String, Action>,
    messages: IndexMap<String, Message>,
    jobs: IndexMap<String, Job>,
    views: IndexMap<String, View>,
    webhooks: IndexMap<String, Webhook>,
}

/// Inserts `value` unless `key` is taken; returns whether it was inserted.
fn insert_first<V>(map: &mut IndexMap<String, V>, key: String, value: V) -> bool {
    if map.contains_key(&key) {
        return false;
    }
    map.insert(key, value);
    true
}

impl Scope {
    pub(super) fn insert_entity(&mut self, entity: ScopeEntity) -> bool {
        insert_first(&mut self.entities, entity.name.clone(), entity)
    }

    pub(super) fn insert_relation(&mut self, relation: ScopeRelation) -> bool {
        insert_first(&mut self.relations, relation.key(), relation)
    }

    pub(super) fn insert_action(&mut self, action: Action) -> bool {
        insert_first(&mut self.actions, action.name.clone(), action)
    }

    pub(super) fn insert_message(&mut self, message: Message) -> bool {
        insert_first(&mut self.messages, message.code.clone(), message)
    }

    pub(super) fn insert_job(&mut self, job: Job) -> bool {
        insert_first(&mut self.jobs, job.name.clone(), job)
    }

    pub(super) fn insert_view(&mut self, view: View) -> bool {
        insert_first(&mut self.views, view.name.clone(), view)
    }

    pub(super) fn insert_webhook(&mut self, webhook: Webhook) -> bool {
        insert_first(&mut self.webhooks, webhook.name.clone(), webhook)
    }

    pub fn entity(&self, name: &str) -> Option<&ScopeEntity> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &ScopeEntity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation(&self, entity: &str, field: &str) -> Option<&ScopeRelation> {
        self.relations.get(&format!("{entity}.{field}"))
    }

    pub fn relation_by_key(&self, key: &str) -> Option<&ScopeRelation> {
        self.relations.get(key)
    }

    pub fn relations(&self) -> impl Iterator<Item = &ScopeRelation> {
        self.relations.values()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Relations declared on `entity`, in declaration order.
    pub fn relations_from<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a ScopeRelation> {
        self.relations.values().filter(move |r| r.source == entity)
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn message(&self, code: &str) -> Option<&Message> {
        self.messages.get(code)
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn view(&self, name: &str) -> Option<&View> {
        self.views.get(name)
    }

    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    pub fn webhook(&self, name: &str) -> Option<&Webhook> {
        self.webhooks.get(name)
    }

    pub fn webhooks(&self) -> impl Iterator<Item = &Webhook> {
        self.webhooks.values()
    }

    /// Whether `name` is a field or relation of `entity`.
    pub fn has_member(&self, entity: &str, name: &str) -> bool {
        self.entity(entity)
            .is_some_and(|e| e.fields.contains_key(name))
            || self.relation(entity, name).is_some()
    }
}
