//! Grouping and migration planning over normalized declarations.

mod migration;

pub use migration::{Migration, MigrationBuilder, Step, StepKind, dependency_order};

use crate::analyzer::Scope;
use crate::ast::{File, Span};
use crate::diagnostics::{Code, Diagnostics};
use crate::normalizer::{
    AccessBlock, AccessPredicates, CompiledCondition, Normalized, NormalizedHook, NormalizedView,
};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub actions: IndexMap<String, ActionPlan>,
    /// Combined predicates per entity.
    pub access: IndexMap<String, AccessPredicates>,
    pub views: IndexMap<String, ViewPlan>,
    /// Hooks merged per entity, timing and operation.
    pub hooks: Vec<NormalizedHook>,
    /// entity -> `"<timing>_<operation>"` -> jobs
    pub lifecycle: IndexMap<String, IndexMap<String, Vec<String>>>,
    pub migration: Migration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    pub name: String,
    pub input_entity: String,
    pub operation: String,
    pub rules: Vec<String>,
    pub hooks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewPlan {
    pub name: String,
    pub source: String,
    pub fields: Vec<String>,
    /// Selected columns, `id` first; relation fields appear as `<rel>_id`.
    pub columns: Vec<String>,
    pub query: String,
    pub dependencies: Vec<String>,
}

pub fn plan(file: &File, scope: &Scope, normalized: &Normalized) -> (Plan, Diagnostics) {
    let mut diags = Diagnostics::new();

    let hooks = merge_hooks(&normalized.hooks);
    let access = combine_access(&normalized.access);
    let plan = Plan {
        actions: plan_actions(normalized, &hooks),
        views: normalized
            .views
            .values()
            .map(|v| (v.name.clone(), plan_view(v, scope)))
            .collect(),
        lifecycle: lifecycle(&hooks),
        migration: plan_migration(file, scope, normalized, &access, &mut diags),
        access,
        hooks,
    };

    tracing::debug!(
        actions = plan.actions.len(),
        steps = plan.migration.steps().len(),
        "planning complete"
    );

    (plan, diags)
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn merge_hooks(hooks: &[NormalizedHook]) -> Vec<NormalizedHook> {
    let mut merged: IndexMap<(String, String, String), NormalizedHook> = IndexMap::new();
    for hook in hooks {
        let key = (hook.entity.clone(), hook.timing.clone(), hook.operation.clone());
        let entry = merged.entry(key).or_insert_with(|| NormalizedHook {
            jobs: Vec::new(),
            ..hook.clone()
        });
        for job in &hook.jobs {
            push_unique(&mut entry.jobs, job);
        }
    }
    merged.into_values().collect()
}

fn lifecycle(hooks: &[NormalizedHook]) -> IndexMap<String, IndexMap<String, Vec<String>>> {
    let mut map: IndexMap<String, IndexMap<String, Vec<String>>> = IndexMap::new();
    for hook in hooks {
        map.entry(hook.entity.clone()).or_default().insert(
            format!("{}_{}", hook.timing, hook.operation),
            hook.jobs.clone(),
        );
    }
    map
}

fn plan_actions(normalized: &Normalized, hooks: &[NormalizedHook]) -> IndexMap<String, ActionPlan> {
    normalized
        .actions
        .values()
        .map(|action| {
            let applies = |entity: &str, operation: &str| {
                entity == action.input_entity && operation == action.operation
            };
            let rules = normalized
                .rules
                .iter()
                .filter(|r| applies(&r.entity, &r.operation))
                .map(|r| r.id.clone())
                .collect();
            let mut jobs = Vec::new();
            for hook in hooks.iter().filter(|h| applies(&h.entity, &h.operation)) {
                for job in &hook.jobs {
                    push_unique(&mut jobs, job);
                }
            }
            (
                action.name.clone(),
                ActionPlan {
                    name: action.name.clone(),
                    input_entity: action.input_entity.clone(),
                    operation: action.operation.clone(),
                    rules,
                    hooks: jobs,
                },
            )
        })
        .collect()
}

/// Joins every access block of an entity into one predicate pair.
///
/// Each side ORs only the blocks that declare it. A side no block declares
/// is unrestricted.
fn combine_access(blocks: &[AccessBlock]) -> IndexMap<String, AccessPredicates> {
    let mut grouped: IndexMap<&str, Vec<&AccessBlock>> = IndexMap::new();
    for block in blocks {
        grouped.entry(block.entity.as_str()).or_default().push(block);
    }

    grouped
        .into_iter()
        .map(|(entity, blocks)| {
            let reads: Vec<&CompiledCondition> =
                blocks.iter().filter_map(|b| b.read.as_ref()).collect();
            let writes: Vec<&CompiledCondition> =
                blocks.iter().filter_map(|b| b.write.as_ref()).collect();
            let combined = AccessPredicates {
                entity: entity.to_string(),
                table: blocks[0].table.clone(),
                read_sql: join_any(reads.iter().map(|c| c.sql.as_str()), " OR ", "TRUE"),
                write_sql: join_any(writes.iter().map(|c| c.sql.as_str()), " OR ", "TRUE"),
                read_cel: join_any(reads.iter().map(|c| c.cel.as_str()), " || ", "true"),
                write_cel: join_any(writes.iter().map(|c| c.cel.as_str()), " || ", "true"),
            };
            (entity.to_string(), combined)
        })
        .collect()
}

/// No predicate yields `fallback`; a single one is kept as is; several are
/// parenthesised and joined.
fn join_any<'a>(parts: impl Iterator<Item = &'a str>, sep: &str, fallback: &str) -> String {
    let parts: Vec<&str> = parts.collect();
    match parts.as_slice() {
        [] => fallback.to_string(),
        [single] => single.to_string(),
        _ => {
            let parts: Vec<String> = parts.iter().map(|p| format!("({p})")).collect();
            parts.join(sep)
        }
    }
}

fn plan_view(view: &NormalizedView, scope: &Scope) -> ViewPlan {
    let column = |field: &str| match scope.relation(&view.source, field) {
        Some(relation) => relation.column(),
        None => field.to_string(),
    };

    let mut columns = vec!["id".to_string()];
    for field in &view.fields {
        push_unique(&mut columns, &column(field));
    }

    let mut query = format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        crate::naming::table_name(&view.source)
    );
    if let Some(filter) = &view.filter_sql {
        query.push_str(&format!(" WHERE {filter}"));
    }
    if let Some(sort) = &view.sort {
        let direction = if sort.descending { "DESC" } else { "ASC" };
        query.push_str(&format!(" ORDER BY {} {direction}", column(&sort.field)));
    }
    if let Some(limit) = view.limit {
        query.push_str(&format!(" LIMIT {limit}"));
    }

    ViewPlan {
        name: view.name.clone(),
        source: view.source.clone(),
        fields: view.fields.clone(),
        columns,
        query,
        dependencies: view.dependencies.clone(),
    }
}

fn plan_migration(
    file: &File,
    scope: &Scope,
    normalized: &Normalized,
    access: &IndexMap<String, AccessPredicates>,
    diags: &mut Diagnostics,
) -> Migration {
    let mut builder = MigrationBuilder::default();
    let entities: Vec<_> = normalized.entities.values().collect();

    for entity in &entities {
        for field in entity.enum_fields() {
            builder.enum_type(field);
        }
    }

    for entity in dependency_order(&entities) {
        let mut references = HashMap::new();
        for relation in entity.relations.values() {
            let target = normalized.entities.get(&relation.target).map(|t| t.table.clone());
            if target.is_none() {
                let span = scope
                    .relation(&entity.name, &relation.name)
                    .map_or_else(Span::default, |r| r.span);
                diags.error(
                    Code::PlanInconsistent,
                    span,
                    format!(
                        "relation '{}.{}' targets '{}', which has no table",
                        entity.name, relation.name, relation.target
                    ),
                );
            }
            references.insert(relation.column.clone(), target);
        }
        builder.table(entity, &references);
    }

    for entity in &entities {
        for relation in entity.relations.values() {
            builder.index(&entity.table, &relation.column);
        }
    }

    for (name, predicates) in access {
        if !normalized.entities.contains_key(name) {
            let span = file
                .access
                .iter()
                .find(|a| &a.entity == name)
                .map_or_else(Span::default, |a| a.span);
            diags.error(
                Code::PlanInconsistent,
                span,
                format!("access policy targets '{name}', which has no table"),
            );
            continue;
        }
        builder.row_level_security(predicates);
    }

    for entity in &entities {
        builder.touch_trigger(&entity.table);
    }

    builder.build(normalized.version.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::config::Config;
    use crate::normalizer::normalize;
    use crate::parser::parse;

    fn run(input: &str) -> (Plan, Diagnostics) {
        let file = parse(input).unwrap();
        let config = Config::default();
        let (scope, diags) = analyze(&file, &config.compile);
        assert!(!diags.has_errors(), "{diags:?}");
        let (normalized, _) = normalize(&file, &scope, &config);
        plan(&file, &scope, &normalized)
    }

    const HELPDESK: &str = r#"
        entity User { email: string unique role: enum(admin, agent) }
        entity Team { name: string }
        entity Ticket { subject: string status: enum(open, closed) }
        relation Ticket.author -> User
        relation Ticket.team -> Team
        relation Team.lead -> User
        rule no_edit_closed on Ticket.update { forbid if status == "closed" }
        rule needs_subject on Ticket.create { require subject != null }
        access Ticket { read: user == author }
        access Ticket { read: user.role == "admin" write: user == author }
        action close_ticket { input: Ticket operation: update }
        job notify { input: Ticket }
        job audit { input: Ticket }
        hook Ticket.after_update { enqueue notify }
        hook Ticket.after_update { enqueue notify, audit }
        hook Ticket.before_create { enqueue audit }
        view OpenTickets { source: Ticket fields: subject, author filter: status == "open" sort: created_at desc limit: 50 }
    "#;

    #[test]
    fn test_action_groupings() {
        let (plan, _) = run(HELPDESK);
        let action = &plan.actions["close_ticket"];
        assert_eq!(action.rules, vec!["no_edit_closed"]);
        assert_eq!(action.hooks, vec!["notify", "audit"]);
    }

    #[test]
    fn test_hooks_merged_and_lifecycle() {
        let (plan, _) = run(HELPDESK);
        assert_eq!(plan.hooks.len(), 2);
        assert_eq!(plan.hooks[0].jobs, vec!["notify", "audit"]);
        let ticket = &plan.lifecycle["Ticket"];
        assert_eq!(ticket["after_update"], vec!["notify", "audit"]);
        assert_eq!(ticket["before_create"], vec!["audit"]);
    }

    #[test]
    fn test_access_blocks_combined() {
        let (plan, _) = run(HELPDESK);
        let access = &plan.access["Ticket"];
        assert_eq!(
            access.read_cel,
            "(user == author) || (user.role == \"admin\")"
        );
        assert!(access.read_sql.starts_with("(current_setting('app.user_id')::uuid = author_id) OR ("));
        assert_eq!(access.write_cel, "user == author");
        assert_eq!(
            access.write_sql,
            "current_setting('app.user_id')::uuid = author_id"
        );
    }

    #[test]
    fn test_undeclared_side_does_not_widen_other_blocks() {
        let (plan, _) = run(r#"
            entity User {} entity Ticket {}
            relation Ticket.author -> User
            access Ticket { read: user == author }
            access Ticket { write: user == author }
        "#);
        let access = &plan.access["Ticket"];
        assert_eq!(access.read_sql, "current_setting('app.user_id')::uuid = author_id");
        assert_eq!(access.write_sql, "current_setting('app.user_id')::uuid = author_id");
        assert!(!access.read_sql.contains("TRUE"));
        assert!(!access.write_sql.contains("TRUE"));

        let up = plan.migration.up();
        assert!(up.iter().all(|s| !s.contains("(TRUE)")), "{up:#?}");
    }

    #[test]
    fn test_side_declared_nowhere_is_unrestricted() {
        let (plan, _) = run(r#"
            entity User {} entity Ticket {}
            relation Ticket.author -> User
            access Ticket { read: user == author }
        "#);
        let access = &plan.access["Ticket"];
        assert_eq!(access.write_sql, "TRUE");
        assert_eq!(access.write_cel, "true");
    }

    #[test]
    fn test_view_query() {
        let (plan, _) = run(HELPDESK);
        let view = &plan.views["OpenTickets"];
        assert_eq!(
            view.query,
            "SELECT id, subject, author_id FROM tickets WHERE status = 'open' ORDER BY created_at DESC LIMIT 50"
        );
        assert_eq!(view.dependencies, vec!["Ticket"]);
        assert_eq!(view.columns, vec!["id", "subject", "author_id"]);
    }

    #[test]
    fn test_migration_order() {
        let (plan, diags) = run(HELPDESK);
        assert!(diags.is_empty());
        let up = plan.migration.up();
        let position = |prefix: &str| -> Vec<usize> {
            up.iter()
                .enumerate()
                .filter(|(_, s)| s.starts_with(prefix))
                .map(|(i, _)| i)
                .collect()
        };
        let types = position("CREATE TYPE");
        let tables = position("CREATE TABLE");
        let later: Vec<usize> = [position("CREATE INDEX"), position("ALTER TABLE"), position("CREATE POLICY")]
            .concat();
        let triggers = position("CREATE TRIGGER");

        assert_eq!(types.len(), 2);
        assert_eq!(tables.len(), 3);
        assert_eq!(triggers.len(), 3);
        assert!(types.iter().max() < tables.iter().min());
        assert!(tables.iter().max() < later.iter().min());
        assert!(position("CREATE POLICY").iter().max() < triggers.iter().min());

        let table_order: Vec<&str> = tables
            .iter()
            .map(|&i| up[i].lines().next().unwrap_or_default())
            .collect();
        assert_eq!(
            table_order,
            vec![
                "CREATE TABLE IF NOT EXISTS users (",
                "CREATE TABLE IF NOT EXISTS teams (",
                "CREATE TABLE IF NOT EXISTS tickets (",
            ]
        );
        assert!(up[tables[2]].contains("  author_id uuid NOT NULL REFERENCES users(id)"));
    }

    #[test]
    fn test_down_reverses_up() {
        let (plan, _) = run(HELPDESK);
        let down = plan.migration.down();
        let steps = plan.migration.steps();
        assert_eq!(down.len(), steps.len());
        let expected: Vec<String> = steps.iter().rev().map(|s| s.down.clone()).collect();
        assert_eq!(down, expected);
        assert!(down[0].starts_with("DROP TRIGGER"));
        assert!(down.last().is_some_and(|s| s.starts_with("DROP TYPE")));
    }

    #[test]
    fn test_missing_target_table_is_inconsistent() {
        let file = parse(
            r#"
            entity Ticket {}
            relation Ticket.author -> Person
            "#,
        )
        .unwrap();
        let config = Config::default();
        // Planning an unvalidated scope directly.
        let (scope, _) = analyze(&file, &config.compile);
        let (normalized, _) = normalize(&file, &scope, &config);
        let (plan, diags) = plan(&file, &scope, &normalized);
        assert_eq!(diags.count(Code::PlanInconsistent), 1);
        assert!(!plan.migration.is_empty());
    }
}
