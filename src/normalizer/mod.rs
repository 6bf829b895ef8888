//! Lowering from AST + [`Scope`] to self-contained, default-filled records.
//!
//! Every condition is compiled here in both target forms, so planning and
//! emission never walk expressions again.

mod model;

pub use model::*;

use crate::analyzer::{ResolvedField, Scope, ScopeEntity};
use crate::ast::{BinaryOp, Expr, Field, FieldModifier, File, Literal, RuleKind};
use crate::config::Config;
use crate::diagnostics::{Code, Diagnostics};
use crate::expr::{self, Cel, Postgres};
use crate::naming::table_name;
use indexmap::IndexMap;

pub const DEFAULT_APP_NAME: &str = "app";
pub const DEFAULT_VERSION: &str = "0001";

/// Maps a source primitive to its column type.
pub fn sql_type(ty: &str) -> Option<&'static str> {
    match ty {
        "string" => Some("text"),
        "int" => Some("integer"),
        "float" => Some("double precision"),
        "bool" => Some("boolean"),
        "time" => Some("timestamp with time zone"),
        "uuid" => Some("uuid"),
        _ => None,
    }
}

pub fn normalize(file: &File, scope: &Scope, config: &Config) -> (Normalized, Diagnostics) {
    let mut normalizer = Normalizer {
        file,
        scope,
        config,
        current_user: config.current_user_sql(),
        diags: Diagnostics::new(),
    };
    let normalized = normalizer.run();

    tracing::debug!(
        entities = normalized.entities.len(),
        rules = normalized.rules.len(),
        views = normalized.views.len(),
        "normalization complete"
    );

    (normalized, normalizer.diags)
}

struct Normalizer<'a> {
    file: &'a File,
    scope: &'a Scope,
    config: &'a Config,
    current_user: String,
    diags: Diagnostics,
}

impl Normalizer<'_> {
    fn run(&mut self) -> Normalized {
        let scope = self.scope;
        let entities = scope
            .entities()
            .map(|e| (e.name.clone(), self.entity(e)))
            .collect();

        Normalized {
            app: self.app(),
            version: self
                .file
                .migrations
                .last()
                .map_or_else(|| DEFAULT_VERSION.to_string(), |m| m.version.clone()),
            entities,
            rules: self.rules(),
            access: self.access(),
            actions: self.actions(),
            messages: self.messages(),
            jobs: self.jobs(),
            hooks: self
                .file
                .hooks
                .iter()
                .map(|h| NormalizedHook {
                    entity: h.entity.clone(),
                    timing: h.timing.as_str().to_string(),
                    operation: h.operation.clone(),
                    jobs: h.jobs.clone(),
                })
                .collect(),
            views: self.views(),
            webhooks: self.webhooks(),
            tests: self
                .file
                .tests
                .iter()
                .map(|t| NormalizedTest {
                    name: t.name.clone(),
                    entity: t.entity.clone(),
                    expect: expr::compile(&t.expect, &Cel),
                })
                .collect(),
        }
    }

    /// Compiles `expr` on `entity` into `(cel, sql)`.
    fn compile_both(&self, expr: &Expr, entity: &str) -> (String, String) {
        let postgres = Postgres::new(
            self.scope,
            entity,
            &self.config.sql.users_table,
            &self.current_user,
        );
        (expr::compile(expr, &Cel), expr::compile(expr, &postgres))
    }

    fn app(&self) -> NormalizedApp {
        let app = self.file.apps.first();
        let or = |value: Option<&Option<String>>, fallback: &str| {
            value
                .and_then(|v| v.clone())
                .unwrap_or_else(|| fallback.to_string())
        };
        NormalizedApp {
            name: app.map_or_else(|| DEFAULT_APP_NAME.to_string(), |a| a.name.clone()),
            auth: or(app.map(|a| &a.auth), "none"),
            database: or(app.map(|a| &a.database), "postgres"),
            frontend: or(app.map(|a| &a.frontend), "web"),
        }
    }

    fn entity(&mut self, entity: &ScopeEntity) -> NormalizedEntity {
        let table = table_name(&entity.name);
        let file = self.file;
        let source = file.entities.iter().find(|e| e.name == entity.name);

        let mut fields = IndexMap::new();
        for resolved in entity.fields.values() {
            let field = if resolved.implicit {
                implicit_field(resolved)
            } else {
                let declared = source.and_then(|e| e.fields.iter().find(|f| f.name == resolved.name));
                self.declared_field(&table, resolved, declared)
            };
            fields.insert(resolved.name.clone(), field);
        }

        let relations = self
            .scope
            .relations_from(&entity.name)
            .map(|r| {
                (
                    r.field.clone(),
                    NormalizedRelation {
                        name: r.field.clone(),
                        target: r.target.clone(),
                        target_table: table_name(&r.target),
                        column: r.column(),
                        many: r.many,
                    },
                )
            })
            .collect();

        NormalizedEntity {
            name: entity.name.clone(),
            table,
            fields,
            relations,
        }
    }

    fn declared_field(
        &mut self,
        table: &str,
        resolved: &ResolvedField,
        declared: Option<&Field>,
    ) -> NormalizedField {
        let sql_type = if resolved.is_enum {
            format!("{table}_{}", resolved.name)
        } else {
            match sql_type(&resolved.ty) {
                Some(ty) => ty.to_string(),
                None => {
                    if let Some(field) = declared {
                        self.diags.warning(
                            Code::UnknownType,
                            field.span,
                            format!(
                                "type '{}' of field '{}' is passed to SQL unchanged",
                                resolved.ty, resolved.name
                            ),
                        );
                    }
                    resolved.ty.clone()
                }
            }
        };

        if let Some(field) = declared.filter(|_| resolved.is_enum) {
            let valid = match field.default_value() {
                None | Some(Literal::Null) => true,
                Some(Literal::Str(value)) => resolved.enum_values.contains(value),
                Some(_) => false,
            };
            if !valid {
                self.diags.warning(
                    Code::InvalidDefault,
                    field.span,
                    format!(
                        "default of field '{}' is not one of its variants ({})",
                        resolved.name,
                        resolved.enum_values.join(", ")
                    ),
                );
            }
        }

        let mut min_length = None;
        let mut max_length = None;
        let lengths = declared.into_iter().flat_map(|f| {
            f.modifiers.iter().filter_map(move |m| match m {
                FieldModifier::Length { op, value } => Some((f, *op, *value)),
                _ => None,
            })
        });
        for (field, op, value) in lengths {
            let bounds = match op {
                BinaryOp::Le => Some((None, Some(value))),
                BinaryOp::Lt => value.checked_sub(1).map(|max| (None, Some(max))),
                BinaryOp::Ge => Some((Some(value), None)),
                BinaryOp::Gt => value.checked_add(1).map(|min| (Some(min), None)),
                BinaryOp::Eq => Some((Some(value), Some(value))),
                other => {
                    tracing::debug!(op = ?other, field = %resolved.name, "ignoring length constraint");
                    continue;
                }
            };
            match bounds {
                Some((min, max)) if min.unwrap_or(0) >= 0 && max.unwrap_or(0) >= 0 => {
                    min_length = min.or(min_length);
                    max_length = max.or(max_length);
                }
                _ => self.diags.error(
                    Code::InvalidLength,
                    field.span,
                    format!(
                        "length bound {value} on field '{}' is out of range",
                        resolved.name
                    ),
                ),
            }
        }

        NormalizedField {
            name: resolved.name.clone(),
            ty: resolved.ty.clone(),
            sql_type,
            nullable: declared.is_some_and(Field::is_optional),
            unique: resolved.unique,
            default: declared
                .and_then(Field::default_value)
                .map(expr::sql_literal),
            enum_values: resolved.is_enum.then(|| resolved.enum_values.clone()),
            min_length,
            max_length,
            implicit: false,
        }
    }

    fn rules(&self) -> Vec<NormalizedRule> {
        self.file
            .rules
            .iter()
            .map(|rule| {
                let (condition, sql_predicate) = self.compile_both(&rule.condition, &rule.entity);
                NormalizedRule {
                    id: rule.name.clone(),
                    entity: rule.entity.clone(),
                    operation: rule.operation.clone(),
                    condition,
                    sql_predicate,
                    emit_code: rule.emit.clone(),
                    is_forbid: rule.kind == RuleKind::Forbid,
                }
            })
            .collect()
    }

    fn access(&self) -> Vec<AccessBlock> {
        self.file
            .access
            .iter()
            .map(|access| {
                let compile = |expr: &Option<Expr>| {
                    expr.as_ref().map(|e| {
                        let (cel, sql) = self.compile_both(e, &access.entity);
                        CompiledCondition { cel, sql }
                    })
                };
                AccessBlock {
                    entity: access.entity.clone(),
                    table: table_name(&access.entity),
                    read: compile(&access.read),
                    write: compile(&access.write),
                }
            })
            .collect()
    }

    fn actions(&self) -> IndexMap<String, NormalizedAction> {
        self.scope
            .actions()
            .map(|a| {
                (
                    a.name.clone(),
                    NormalizedAction {
                        name: a.name.clone(),
                        input_entity: a.input.clone(),
                        operation: a.operation.clone().unwrap_or_else(|| "create".to_string()),
                    },
                )
            })
            .collect()
    }

    fn messages(&self) -> IndexMap<String, NormalizedMessage> {
        self.scope
            .messages()
            .map(|m| {
                (
                    m.code.clone(),
                    NormalizedMessage {
                        code: m.code.clone(),
                        level: m.level.clone().unwrap_or_else(|| "error".to_string()),
                        default: m.default.clone().unwrap_or_else(|| m.code.clone()),
                    },
                )
            })
            .collect()
    }

    fn jobs(&self) -> IndexMap<String, NormalizedJob> {
        self.scope
            .jobs()
            .map(|job| {
                let needs = job.needs.as_ref();
                (
                    job.name.clone(),
                    NormalizedJob {
                        name: job.name.clone(),
                        input_entity: job.input.clone(),
                        needs_path: needs.map(|n| n.path.join(".")),
                        needs_filter: needs
                            .and_then(|n| n.filter.as_ref())
                            .map(|f| expr::compile(f, &Cel)),
                        capabilities: job.capabilities.clone(),
                    },
                )
            })
            .collect()
    }

    fn views(&self) -> IndexMap<String, NormalizedView> {
        self.scope
            .views()
            .map(|view| {
                let filter = view
                    .filter
                    .as_ref()
                    .map(|f| self.compile_both(f, &view.source));
                let (filter_cel, filter_sql) = filter.unzip();
                (
                    view.name.clone(),
                    NormalizedView {
                        name: view.name.clone(),
                        source: view.source.clone(),
                        fields: view.fields.clone(),
                        filter_cel,
                        filter_sql,
                        sort: view.sort.as_ref().map(|s| NormalizedSort {
                            field: s.field.clone(),
                            descending: s.descending,
                        }),
                        limit: view.limit,
                        // Joins through filter paths are not tracked.
                        dependencies: vec![view.source.clone()],
                    },
                )
            })
            .collect()
    }

    fn webhooks(&self) -> IndexMap<String, NormalizedWebhook> {
        self.scope
            .webhooks()
            .map(|w| {
                (
                    w.name.clone(),
                    NormalizedWebhook {
                        name: w.name.clone(),
                        route: w
                            .route
                            .clone()
                            .unwrap_or_else(|| format!("/webhooks/{}", w.name)),
                        provider: w.provider.clone().unwrap_or_default(),
                        events: w.events.clone(),
                        action: w.triggers.clone().unwrap_or_default(),
                    },
                )
            })
            .collect()
    }
}

fn implicit_field(resolved: &ResolvedField) -> NormalizedField {
    let (sql_type, default) = match resolved.name.as_str() {
        "id" => ("uuid", "gen_random_uuid()"),
        _ => ("timestamp with time zone", "now()"),
    };
    NormalizedField {
        name: resolved.name.clone(),
        ty: resolved.ty.clone(),
        sql_type: sql_type.to_string(),
        nullable: false,
        unique: resolved.unique,
        default: Some(default.to_string()),
        enum_values: None,
        min_length: None,
        max_length: None,
        implicit: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::parser::parse;

    fn run(input: &str) -> (Normalized, Diagnostics) {
        let file = parse(input).unwrap();
        let config = Config::default();
        let (scope, diags) = analyze(&file, &config.compile);
        assert!(!diags.has_errors(), "{diags:?}");
        normalize(&file, &scope, &config)
    }

    #[test]
    fn test_app_defaults() {
        let (n, _) = run("entity User {}");
        assert_eq!(
            n.app,
            NormalizedApp {
                name: "app".into(),
                auth: "none".into(),
                database: "postgres".into(),
                frontend: "web".into(),
            }
        );
        assert_eq!(n.version, "0001");

        let (n, _) = run("app Helpdesk { auth: jwt }");
        assert_eq!(n.app.name, "Helpdesk");
        assert_eq!(n.app.auth, "jwt");
        assert_eq!(n.app.database, "postgres");
    }

    #[test]
    fn test_field_types_and_modifiers() {
        let (n, diags) = run(r#"
            entity Ticket {
                subject: string length <= 80
                code: string length == 6
                note: string optional length > 2
                score: float default 1.5
                status: enum(open, closed) default "open"
                amount: money
            }
        "#);
        let fields = &n.entities["Ticket"].fields;
        let names: Vec<&str> = fields.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["id", "subject", "code", "note", "score", "status", "amount", "created_at", "updated_at"]
        );

        assert_eq!(fields["subject"].sql_type, "text");
        assert_eq!(fields["subject"].max_length, Some(80));
        assert_eq!(fields["subject"].min_length, None);
        assert_eq!(fields["code"].min_length, Some(6));
        assert_eq!(fields["code"].max_length, Some(6));
        assert_eq!(fields["note"].min_length, Some(3));
        assert!(fields["note"].nullable);
        assert!(!fields["subject"].nullable);
        assert_eq!(fields["score"].sql_type, "double precision");
        assert_eq!(fields["score"].default.as_deref(), Some("1.5"));

        let status = &fields["status"];
        assert_eq!(status.sql_type, "tickets_status");
        assert_eq!(status.default.as_deref(), Some("'open'"));
        assert_eq!(
            status.enum_values,
            Some(vec!["open".to_string(), "closed".to_string()])
        );

        assert_eq!(fields["amount"].sql_type, "money");
        assert_eq!(diags.count(Code::UnknownType), 1);
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_length_bounds_out_of_range() {
        let (n, diags) = run(r#"
            entity T {
                huge: string length > 9223372036854775807
                negative: string length < 0
                fine: string length >= 0
            }
        "#);
        assert_eq!(diags.count(Code::InvalidLength), 2);
        assert!(diags.has_errors());
        let fields = &n.entities["T"].fields;
        assert_eq!(fields["huge"].min_length, None);
        assert_eq!(fields["negative"].max_length, None);
        assert_eq!(fields["fine"].min_length, Some(0));
    }

    #[test]
    fn test_enum_default_checked_against_variants() {
        let (_, diags) = run(r#"
            entity Ticket {
                status: enum(open, closed) default "bogus"
                state: enum(open, closed) default "open"
                stage: enum(new, done) optional default null
                level: enum(low, high) default 3
            }
        "#);
        assert_eq!(diags.count(Code::InvalidDefault), 2);
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_implicit_fields() {
        let (n, _) = run("entity User { email: string unique }");
        let fields = &n.entities["User"].fields;
        assert_eq!(fields["id"].default.as_deref(), Some("gen_random_uuid()"));
        assert!(fields["id"].unique);
        assert_eq!(fields["created_at"].sql_type, "timestamp with time zone");
        assert_eq!(fields["updated_at"].default.as_deref(), Some("now()"));
        assert_eq!(fields.values().filter(|f| f.implicit).count(), 3);
        assert!(fields["email"].unique);
    }

    #[test]
    fn test_relations_carry_fk_column() {
        let (n, _) = run(r#"
            entity User {} entity Team {} entity Ticket {}
            relation Ticket.author -> User
            relation Team.members -> many User
        "#);
        let author = &n.entities["Ticket"].relations["author"];
        assert_eq!(author.column, "author_id");
        assert_eq!(author.target_table, "users");
        assert!(!author.many);
        assert!(n.entities["Team"].relations["members"].many);
    }

    #[test]
    fn test_access_compiled_in_both_forms() {
        let (n, _) = run(r#"
            entity User {} entity Ticket {}
            relation Ticket.author -> User
            access Ticket { read: user == author }
        "#);
        let access = &n.access[0];
        assert_eq!(access.table, "tickets");
        let read = access.read.as_ref().unwrap();
        assert!(read.sql.contains("author_id"));
        assert_eq!(read.cel, "user == author");
        assert!(access.write.is_none());
    }

    #[test]
    fn test_rules_messages_actions() {
        let (n, _) = run(r#"
            entity Ticket { status: string }
            rule no_edit_closed on Ticket.update { forbid if status == "closed" emit TICKET_CLOSED }
            rule has_status on Ticket.create { require status != null }
            message TICKET_CLOSED {}
            message SLOW { level: warning default: "Slow down" }
            action open_ticket { input: Ticket }
            action close_ticket { input: Ticket operation: update }
        "#);
        assert_eq!(n.rules.len(), 2);
        assert!(n.rules[0].is_forbid);
        assert_eq!(n.rules[0].sql_predicate, "status = 'closed'");
        assert_eq!(n.rules[0].emit_code.as_deref(), Some("TICKET_CLOSED"));
        assert!(!n.rules[1].is_forbid);
        assert_eq!(n.rules[1].sql_predicate, "status IS NOT NULL");

        assert_eq!(n.messages["TICKET_CLOSED"].level, "error");
        assert_eq!(n.messages["TICKET_CLOSED"].default, "TICKET_CLOSED");
        assert_eq!(n.messages["SLOW"].level, "warning");
        assert_eq!(n.messages["SLOW"].default, "Slow down");

        assert_eq!(n.actions["open_ticket"].operation, "create");
        assert_eq!(n.actions["close_ticket"].operation, "update");
    }

    #[test]
    fn test_jobs_views_webhooks() {
        let (n, _) = run(r#"
            entity User { active: bool } entity Ticket { subject: string status: string }
            relation Ticket.author -> User
            action close_ticket { input: Ticket operation: update }
            job notify { input: Ticket needs: Ticket.author where active == true capabilities: email.send }
            view Open { source: Ticket fields: subject filter: status == "open" limit: 10 }
            webhook stripe { provider: stripe events: "payment.succeeded" triggers: close_ticket }
            migrate "0001_init"
            migrate "0002_priority"
        "#);
        let job = &n.jobs["notify"];
        assert_eq!(job.needs_path.as_deref(), Some("Ticket.author"));
        assert_eq!(job.needs_filter.as_deref(), Some("active == true"));
        assert_eq!(job.capabilities, vec!["email.send"]);

        let view = &n.views["Open"];
        assert_eq!(view.filter_sql.as_deref(), Some("status = 'open'"));
        assert_eq!(view.dependencies, vec!["Ticket"]);
        assert_eq!(view.limit, Some(10));

        assert_eq!(n.webhooks["stripe"].route, "/webhooks/stripe");
        assert_eq!(n.webhooks["stripe"].action, "close_ticket");
        assert_eq!(n.version, "0002_priority");
    }
}
