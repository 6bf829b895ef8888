pub mod analyzer;
pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod emitter;
pub mod expr;
pub mod lexer;
pub mod naming;
pub mod normalizer;
pub mod parser;
pub mod planner;

use wasm_bindgen::prelude::*;

use ast::File;
use config::Config;
use diagnostics::{Code, Diagnostics};
use emitter::Output;

/// Result of one compile: every diagnostic raised, plus the generated
/// artifacts when no stage reported an error.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub diagnostics: Diagnostics,
    pub output: Option<Output>,
}

impl Compilation {
    pub fn succeeded(&self) -> bool {
        self.output.is_some()
    }

    /// Generated schema, empty when compilation halted.
    pub fn schema_sql(&self) -> &str {
        self.output.as_ref().map_or("", |o| o.schema_sql.as_str())
    }
}

/// Parses and compiles `source`.
pub fn compile(source: &str, config: &Config) -> Compilation {
    match parser::parse(source) {
        Ok(file) => compile_file(&file, config),
        Err(err) => {
            let mut diagnostics = Diagnostics::new();
            diagnostics.error(Code::ParseError, err.span(), err.to_string());
            Compilation {
                diagnostics,
                output: None,
            }
        }
    }
}

/// Runs analysis, normalization, planning and emission over an already
/// parsed file. Stops after analysis if it reported errors.
pub fn compile_file(file: &File, config: &Config) -> Compilation {
    let (scope, mut diagnostics) = analyzer::analyze(file, &config.compile);
    if diagnostics.has_errors() {
        tracing::debug!(errors = diagnostics.error_count(), "halting after analysis");
        return Compilation {
            diagnostics,
            output: None,
        };
    }

    let (normalized, diags) = normalizer::normalize(file, &scope, config);
    diagnostics.extend(diags);
    let (plan, diags) = planner::plan(file, &scope, &normalized);
    diagnostics.extend(diags);
    let (output, diags) = emitter::emit(&scope, &normalized, &plan, &config.sdk);
    diagnostics.extend(diags);

    let output = (!diagnostics.has_errors()).then_some(output);
    Compilation {
        diagnostics,
        output,
    }
}

/// Initialize panic hook for better error messages in WASM
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

/// Compiles blueprint source to the artifact JSON. On failure the error is an
/// array of rendered diagnostics.
#[wasm_bindgen(js_name = "compileSpec")]
pub fn compile_spec(source: &str) -> Result<String, JsValue> {
    let compilation = compile(source, &Config::default());
    match compilation.output {
        Some(output) => Ok(output.artifact_json),
        None => {
            let errors = js_sys::Array::new();
            for diagnostic in compilation.diagnostics.iter() {
                errors.push(&JsValue::from_str(&diagnostic.render(source)));
            }
            Err(errors.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_default(source: &str) -> Compilation {
        compile(source, &Config::default())
    }

    #[test]
    fn test_end_to_end_access_predicate() {
        let result = compile_default(
            r#"
            entity User { email: string unique }
            entity Ticket { subject: string }
            relation Ticket.author -> User
            access Ticket { read: user == author }
            "#,
        );
        assert_eq!(result.diagnostics.error_count(), 0);
        let output = result.output.as_ref().unwrap();

        let file = parser::parse(
            "entity User {} entity Ticket {} relation Ticket.author -> User",
        )
        .unwrap();
        let (scope, _) = analyzer::analyze(&file, &Default::default());
        assert_eq!(scope.relation_count(), 1);
        assert!(scope.relation_by_key("Ticket.author").is_some());

        let access = &output.artifact.access["Ticket"];
        assert!(access.read_sql.contains("author_id"));
        assert!(!access.read_cel.contains("author_id"));
        assert!(access.read_cel.contains("author"));
        assert!(result.schema_sql().contains("CREATE POLICY tickets_read ON tickets FOR SELECT"));
    }

    #[test]
    fn test_undefined_message_halts_before_emit() {
        let result = compile_default(
            r#"
            entity Ticket { status: string }
            rule no_edit_closed on Ticket.update {
                forbid if status == "closed"
                emit TICKET_CLOSED
            }
            "#,
        );
        assert_eq!(result.diagnostics.count(Code::UndefinedMessage), 1);
        assert!(result.diagnostics.has_errors());
        assert!(!result.succeeded());
        assert_eq!(result.schema_sql(), "");
    }

    #[test]
    fn test_parse_failure_is_a_diagnostic() {
        let result = compile_default("entity User { email string }");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics.count(Code::ParseError), 1);
        assert!(result.output.is_none());
    }

    #[test]
    fn test_duplicate_entity_reports_once() {
        let result = compile_default("entity User {} entity User {}");
        assert_eq!(result.diagnostics.count(Code::DuplicateEntity), 1);
        assert!(result.diagnostics.has_errors());
    }

    #[test]
    fn test_every_entity_gets_implicit_fields() {
        let names = ["Alpha", "Beta", "Gamma", "Delta"];
        let source: String = names
            .iter()
            .map(|n| format!("entity {n} {{ label: string note: string optional }}\n"))
            .collect();
        let result = compile_default(&source);
        let output = result.output.unwrap();
        assert_eq!(output.artifact.entities.len(), names.len());
        for entity in output.artifact.entities.values() {
            assert_eq!(entity.fields.len(), 5);
            assert_eq!(entity.fields.values().filter(|f| f.implicit).count(), 3);
            for implicit in ["id", "created_at", "updated_at"] {
                assert!(entity.fields.contains_key(implicit));
            }
        }
    }

    #[test]
    fn test_statement_groups_ordered() {
        let result = compile_default(
            r#"
            entity User { role: enum(admin, member) }
            entity Project { state: enum(active, archived) }
            entity Task { title: string }
            relation Task.project -> Project
            relation Task.assignee -> User
            relation Project.owner -> User
            access Task { read: user == assignee write: user == assignee }
            access Project { read: user == owner }
            "#,
        );
        let output = result.output.unwrap();
        let up = &output.artifact.migration.as_ref().unwrap().up;
        let first = |prefix: &str| up.iter().position(|s| s.starts_with(prefix));
        let last = |prefix: &str| up.iter().rposition(|s| s.starts_with(prefix));

        assert!(last("CREATE TYPE") < first("CREATE TABLE"));
        for later in ["CREATE INDEX", "ALTER TABLE", "CREATE POLICY"] {
            assert!(last("CREATE TABLE") < first(later), "{later}");
        }
        assert!(last("CREATE POLICY") < first("CREATE TRIGGER"));
        assert!(first("CREATE TRIGGER").is_some());

        let users = first("CREATE TABLE IF NOT EXISTS users");
        let projects = first("CREATE TABLE IF NOT EXISTS projects");
        let tasks = first("CREATE TABLE IF NOT EXISTS tasks");
        assert!(users < projects && projects < tasks);
    }

    #[test]
    fn test_down_is_reverse_of_up() {
        let result = compile_default(
            r#"
            entity User { role: enum(admin, member) }
            entity Ticket {}
            relation Ticket.author -> User
            access Ticket { read: user == author }
            "#,
        );
        let output = result.output.unwrap();
        let migration = output.artifact.migration.unwrap();
        let kinds = |stmts: &[String]| -> Vec<&'static str> {
            stmts
                .iter()
                .filter_map(|s| {
                    ["ROW LEVEL", "TYPE", "TABLE", "INDEX", "POLICY", "TRIGGER"]
                        .into_iter()
                        .find(|k| s.contains(*k))
                })
                .collect()
        };
        let mut up_kinds = kinds(&migration.up[2..]);
        up_kinds.reverse();
        let down_kinds = kinds(&migration.down[..migration.down.len() - 1]);
        assert_eq!(up_kinds, down_kinds);
    }

    #[test]
    fn test_strict_mode_reports_misspelled_root() {
        let source = r#"
            entity User { email: string }
            entity Ticket { subject: string }
            relation Ticket.author -> User
            access Ticket { read: auther.email == "a" }
        "#;
        assert!(compile_default(source).succeeded());

        let mut config = Config::default();
        config.compile.strict_paths = true;
        let strict = compile(source, &config);
        assert_eq!(strict.diagnostics.count(Code::UndefinedField), 1);
        assert!(!strict.succeeded());
    }

    #[test]
    fn test_fk_column_clash_halts_before_sql() {
        let result = compile_default(
            r#"
            entity User {}
            entity Ticket { author_id: uuid }
            relation Ticket.author -> User
            "#,
        );
        assert_eq!(result.diagnostics.count(Code::DuplicateField), 1);
        assert!(!result.succeeded());
        assert_eq!(result.schema_sql().matches("author_id uuid").count(), 0);
    }

    #[test]
    fn test_warnings_do_not_halt() {
        let result = compile_default("entity User { id: int email: string }");
        assert_eq!(result.diagnostics.count(Code::ReservedField), 1);
        assert!(result.succeeded());
    }
}
