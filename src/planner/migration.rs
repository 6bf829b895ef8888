//! Ordered schema migration.

use crate::normalizer::{AccessPredicates, NormalizedEntity, NormalizedField};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Statement groups in the order they must be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Type,
    Table,
    Index,
    Rls,
    Policy,
    Trigger,
}

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::Type,
        StepKind::Table,
        StepKind::Index,
        StepKind::Rls,
        StepKind::Policy,
        StepKind::Trigger,
    ];
}

/// One statement and the statement that undoes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub kind: StepKind,
    pub up: String,
    pub down: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub version: String,
    steps: Vec<Step>,
}

impl Migration {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn up(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.up.clone()).collect()
    }

    /// Inverse statements, last applied first.
    pub fn down(&self) -> Vec<String> {
        self.steps.iter().rev().map(|s| s.down.clone()).collect()
    }
}

/// Collects steps per kind; [`MigrationBuilder::build`] lays the groups out
/// in [`StepKind`] order whatever order they were added in.
#[derive(Debug, Default)]
pub struct MigrationBuilder {
    groups: BTreeMap<StepKind, Vec<Step>>,
}

impl MigrationBuilder {
    pub fn push(&mut self, kind: StepKind, up: String, down: String) {
        self.groups.entry(kind).or_default().push(Step { kind, up, down });
    }

    pub fn enum_type(&mut self, field: &NormalizedField) {
        let Some(values) = &field.enum_values else {
            return;
        };
        let values: Vec<String> = values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect();
        self.push(
            StepKind::Type,
            format!("CREATE TYPE {} AS ENUM ({});", field.sql_type, values.join(", ")),
            format!("DROP TYPE IF EXISTS {};", field.sql_type),
        );
    }

    /// `references` maps each relation column to the table it points at, or
    /// `None` when that table is not part of the plan.
    pub fn table(&mut self, entity: &NormalizedEntity, references: &HashMap<String, Option<String>>) {
        let (timestamps, columns): (Vec<&NormalizedField>, Vec<&NormalizedField>) = entity
            .fields
            .values()
            .partition(|f| f.implicit && f.name != "id");

        let mut lines: Vec<String> = columns.into_iter().map(column_definition).collect();
        for relation in entity.relations.values() {
            let mut line = format!("  {} uuid NOT NULL", relation.column);
            if let Some(Some(table)) = references.get(&relation.column) {
                line.push_str(&format!(" REFERENCES {table}(id)"));
            }
            lines.push(line);
        }
        lines.extend(timestamps.into_iter().map(column_definition));

        self.push(
            StepKind::Table,
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
                entity.table,
                lines.join(",\n")
            ),
            format!("DROP TABLE IF EXISTS {};", entity.table),
        );
    }

    pub fn index(&mut self, table: &str, column: &str) {
        let name = format!("{table}_{column}_idx");
        self.push(
            StepKind::Index,
            format!("CREATE INDEX IF NOT EXISTS {name} ON {table} ({column});"),
            format!("DROP INDEX IF EXISTS {name};"),
        );
    }

    pub fn row_level_security(&mut self, access: &AccessPredicates) {
        let table = &access.table;
        self.push(
            StepKind::Rls,
            format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;"),
            format!("ALTER TABLE {table} DISABLE ROW LEVEL SECURITY;"),
        );

        let read = &access.read_sql;
        let write = &access.write_sql;
        let policies = [
            ("read", format!("FOR SELECT USING ({read})")),
            ("insert", format!("FOR INSERT WITH CHECK ({write})")),
            ("update", format!("FOR UPDATE USING ({write}) WITH CHECK ({write})")),
            ("delete", format!("FOR DELETE USING ({write})")),
        ];
        for (suffix, clause) in policies {
            let name = format!("{table}_{suffix}");
            self.push(
                StepKind::Policy,
                format!("CREATE POLICY {name} ON {table} {clause};"),
                format!("DROP POLICY IF EXISTS {name} ON {table};"),
            );
        }
    }

    pub fn touch_trigger(&mut self, table: &str) {
        let name = format!("{table}_touch_updated_at");
        self.push(
            StepKind::Trigger,
            format!(
                "CREATE TRIGGER {name} BEFORE UPDATE ON {table} FOR EACH ROW EXECUTE FUNCTION touch_updated_at();"
            ),
            format!("DROP TRIGGER IF EXISTS {name} ON {table};"),
        );
    }

    pub fn build(self, version: String) -> Migration {
        Migration {
            version,
            steps: self.groups.into_values().flatten().collect(),
        }
    }
}

fn column_definition(field: &NormalizedField) -> String {
    let mut line = format!("  {} {}", field.name, field.sql_type);
    if field.name == "id" {
        line.push_str(" PRIMARY KEY");
    } else {
        if !field.nullable {
            line.push_str(" NOT NULL");
        }
        if field.unique {
            line.push_str(" UNIQUE");
        }
    }
    if let Some(default) = &field.default {
        line.push_str(&format!(" DEFAULT {default}"));
    }

    let mut checks = Vec::new();
    if let Some(min) = field.min_length {
        checks.push(format!("char_length({}) >= {min}", field.name));
    }
    if let Some(max) = field.max_length {
        checks.push(format!("char_length({}) <= {max}", field.name));
    }
    if !checks.is_empty() {
        line.push_str(&format!(" CHECK ({})", checks.join(" AND ")));
    }
    line
}

/// Orders entities so every foreign-key target precedes the tables that
/// reference it.
///
/// Each entity gets a level one above its deepest target; entities caught in
/// a cycle land on a final level after everything else. Ties keep
/// declaration order.
pub fn dependency_order<'a>(entities: &[&'a NormalizedEntity]) -> Vec<&'a NormalizedEntity> {
    let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    let parents: HashMap<&str, HashSet<&str>> = entities
        .iter()
        .map(|e| {
            let deps = e
                .relations
                .values()
                .map(|r| r.target.as_str())
                .filter(|t| *t != e.name && names.contains(t))
                .collect();
            (e.name.as_str(), deps)
        })
        .collect();

    let mut levels: HashMap<&str, usize> = HashMap::new();
    let mut changed = true;
    while changed {
        changed = false;
        for entity in entities {
            let name = entity.name.as_str();
            if levels.contains_key(name) {
                continue;
            }
            let deps = &parents[name];
            let known: Vec<usize> = deps.iter().filter_map(|d| levels.get(d).copied()).collect();
            if known.len() == deps.len() {
                levels.insert(name, known.into_iter().max().map_or(0, |l| l + 1));
                changed = true;
            }
        }
    }

    let last = levels.values().copied().max().map_or(0, |l| l + 1);
    let mut ordered = entities.to_vec();
    ordered.sort_by_key(|e| levels.get(e.name.as_str()).copied().unwrap_or(last));
    ordered
}
