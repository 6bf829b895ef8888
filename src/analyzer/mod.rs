//! Semantic analysis: AST to [`Scope`].
//!
//! Four ordered passes run over the file. Every problem is collected as a
//! diagnostic and the pass keeps scanning, so one compile reports as many
//! independent problems as it can find.

mod cycles;
mod paths;
mod scope;

pub use cycles::find_cycles;
pub use paths::{CALLER, PathEnd, PathResolution, PathValidator};
pub use scope::{IMPLICIT_FIELDS, ResolvedField, Scope, ScopeEntity, ScopeRelation};

use crate::ast::{Entity, Expr, FieldType, File};
use crate::config::CompileOptions;
use crate::diagnostics::{Code, Diagnostics};
use indexmap::IndexMap;

/// Resolves every declaration in `file` and validates cross references.
pub fn analyze(file: &File, options: &CompileOptions) -> (Scope, Diagnostics) {
    let mut analyzer = Analyzer {
        file,
        options,
        scope: Scope::default(),
        diags: Diagnostics::new(),
    };

    analyzer.collect_declarations();
    analyzer.resolve_references();
    analyzer.validate_rules_and_access();
    analyzer.validate_dependencies();

    tracing::debug!(
        entities = analyzer.scope.entity_count(),
        relations = analyzer.scope.relation_count(),
        errors = analyzer.diags.error_count(),
        "analysis complete"
    );

    (analyzer.scope, analyzer.diags)
}

struct Analyzer<'a> {
    file: &'a File,
    options: &'a CompileOptions,
    scope: Scope,
    diags: Diagnostics,
}

impl Analyzer<'_> {
    fn paths(&self) -> PathValidator<'_> {
        PathValidator::new(&self.scope, self.options.strict_paths)
    }

    /// Validates `expr` on `entity`, collecting into the analyzer's diagnostics.
    fn check_expr(&mut self, expr: &Expr, entity: &str) {
        let mut diags = Diagnostics::new();
        self.paths().validate_expr(expr, entity, &mut diags);
        self.diags.extend(diags);
    }

    fn require_entity(&mut self, name: &str, span: crate::ast::Span, what: &str) -> bool {
        if self.scope.entity(name).is_some() {
            return true;
        }
        self.diags.error(
            Code::UndefinedEntity,
            span,
            format!("{what} references undeclared entity '{name}'"),
        );
        false
    }

    // Pass 1

    fn collect_declarations(&mut self) {
        let file = self.file;

        for entity in &file.entities {
            if self.scope.entity(&entity.name).is_some() {
                self.diags.error(
                    Code::DuplicateEntity,
                    entity.span,
                    format!("entity '{}' is already declared", entity.name),
                );
                continue;
            }
            let resolved = self.resolve_entity(entity);
            self.scope.insert_entity(resolved);
        }

        for relation in &file.relations {
            let resolved = ScopeRelation {
                source: relation.source.clone(),
                field: relation.field.clone(),
                target: relation.target.clone(),
                many: relation.many,
                span: relation.span,
            };
            // The relation name and its FK column both share the field namespace.
            let column = resolved.column();
            let collision = self.scope.entity(&relation.source).and_then(|e| {
                e.field(&relation.field).or_else(|| e.field(&column))
            });
            if let Some(field) = collision {
                self.diags.error(
                    Code::DuplicateField,
                    relation.span,
                    format!(
                        "relation '{}' collides with field '{}'",
                        relation.key(),
                        field.name
                    ),
                );
                continue;
            }
            let inserted = self.scope.insert_relation(resolved);
            if !inserted {
                self.diags.error(
                    Code::DuplicateRelation,
                    relation.span,
                    format!("relation '{}' is already declared", relation.key()),
                );
            }
        }

        for action in &file.actions {
            if !self.scope.insert_action(action.clone()) {
                self.diags.error(
                    Code::DuplicateAction,
                    action.span,
                    format!("action '{}' is already declared", action.name),
                );
            }
        }

        for message in &file.messages {
            if !self.scope.insert_message(message.clone()) {
                self.diags.error(
                    Code::DuplicateMessage,
                    message.span,
                    format!("message '{}' is already declared", message.code),
                );
            }
        }

        for job in &file.jobs {
            if !self.scope.insert_job(job.clone()) {
                self.diags.error(
                    Code::DuplicateJob,
                    job.span,
                    format!("job '{}' is already declared", job.name),
                );
            }
        }

        for view in &file.views {
            if !self.scope.insert_view(view.clone()) {
                self.diags.error(
                    Code::DuplicateView,
                    view.span,
                    format!("view '{}' is already declared", view.name),
                );
            }
        }

        for webhook in &file.webhooks {
            if !self.scope.insert_webhook(webhook.clone()) {
                self.diags.error(
                    Code::DuplicateWebhook,
                    webhook.span,
                    format!("webhook '{}' is already declared", webhook.name),
                );
            }
        }
    }

    fn resolve_entity(&mut self, entity: &Entity) -> ScopeEntity {
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), ResolvedField::implicit("id", "uuid", true));

        for field in &entity.fields {
            if IMPLICIT_FIELDS.contains(&field.name.as_str()) {
                self.diags.warning(
                    Code::ReservedField,
                    field.span,
                    format!(
                        "field '{}.{}' is implicit; the declaration is ignored",
                        entity.name, field.name
                    ),
                );
                continue;
            }
            if fields.contains_key(&field.name) {
                self.diags.error(
                    Code::DuplicateField,
                    field.span,
                    format!(
                        "field '{}' is already declared on entity '{}'",
                        field.name, entity.name
                    ),
                );
                continue;
            }
            let (ty, is_enum, enum_values) = match &field.ty {
                FieldType::Named(name) => (name.clone(), false, Vec::new()),
                FieldType::Enum(values) => ("enum".to_string(), true, values.clone()),
            };
            fields.insert(
                field.name.clone(),
                ResolvedField {
                    name: field.name.clone(),
                    ty,
                    is_enum,
                    enum_values,
                    unique: field.is_unique(),
                    implicit: false,
                },
            );
        }

        fields.insert(
            "created_at".to_string(),
            ResolvedField::implicit("created_at", "time", false),
        );
        fields.insert(
            "updated_at".to_string(),
            ResolvedField::implicit("updated_at", "time", false),
        );

        ScopeEntity {
            name: entity.name.clone(),
            fields,
            span: entity.span,
        }
    }

    // Pass 2

    fn resolve_references(&mut self) {
        let file = self.file;

        for relation in &file.relations {
            let what = format!("relation '{}'", relation.key());
            self.require_entity(&relation.source, relation.span, &what);
            self.require_entity(&relation.target, relation.span, &what);
        }

        for action in &file.actions {
            self.require_entity(&action.input, action.span, &format!("action '{}'", action.name));
        }

        for job in &file.jobs {
            let what = format!("job '{}'", job.name);
            self.require_entity(&job.input, job.span, &what);

            let Some(needs) = &job.needs else {
                continue;
            };
            let mut diags = Diagnostics::new();
            let resolution = self.paths().validate_path(&needs.path, needs.span, &mut diags);
            self.diags.extend(diags);
            match resolution {
                PathResolution::Resolved(end) => {
                    if let Some(filter) = &needs.filter {
                        self.check_expr(filter, &end.entity);
                    }
                }
                PathResolution::NotEntityRooted => {
                    self.diags.error(
                        Code::InvalidPath,
                        needs.span,
                        format!(
                            "{what} needs path '{}' must start with an entity",
                            needs.path.join(".")
                        ),
                    );
                }
                PathResolution::Invalid => {}
            }
        }

        for hook in &file.hooks {
            let what = format!("hook '{}.{}_{}'", hook.entity, hook.timing.as_str(), hook.operation);
            self.require_entity(&hook.entity, hook.span, &what);
            for job in &hook.jobs {
                if self.scope.job(job).is_none() {
                    self.diags.error(
                        Code::UndefinedJob,
                        hook.span,
                        format!("{what} enqueues undeclared job '{job}'"),
                    );
                }
            }
        }

        for view in &file.views {
            if !self.require_entity(&view.source, view.span, &format!("view '{}'", view.name)) {
                continue;
            }
            let sort_field = view.sort.as_ref().map(|s| &s.field);
            for field in view.fields.iter().chain(sort_field) {
                if !self.scope.has_member(&view.source, field) {
                    self.diags.error(
                        Code::UndefinedField,
                        view.span,
                        format!(
                            "view '{}' selects field '{field}' not defined on entity '{}'",
                            view.name, view.source
                        ),
                    );
                }
            }
            if let Some(filter) = &view.filter {
                self.check_expr(filter, &view.source);
            }
        }

        for webhook in &file.webhooks {
            if webhook.provider.as_deref().is_none_or(str::is_empty) {
                self.diags.error(
                    Code::MissingProvider,
                    webhook.span,
                    format!("webhook '{}' has no provider", webhook.name),
                );
            }
            if webhook.events.is_empty() {
                self.diags.error(
                    Code::MissingEvents,
                    webhook.span,
                    format!("webhook '{}' lists no events", webhook.name),
                );
            }
            match &webhook.triggers {
                None => self.diags.error(
                    Code::MissingTriggers,
                    webhook.span,
                    format!("webhook '{}' triggers no action", webhook.name),
                ),
                Some(action) if self.scope.action(action).is_none() => self.diags.error(
                    Code::UndefinedAction,
                    webhook.span,
                    format!(
                        "webhook '{}' triggers undeclared action '{action}'",
                        webhook.name
                    ),
                ),
                Some(_) => {}
            }
        }

        for test in &file.tests {
            if self.require_entity(&test.entity, test.span, &format!("test '{}'", test.name)) {
                self.check_expr(&test.expect, &test.entity);
            }
        }
    }

    // Pass 3

    fn validate_rules_and_access(&mut self) {
        let file = self.file;

        for rule in &file.rules {
            let what = format!("rule '{}'", rule.name);
            let known = self.require_entity(&rule.entity, rule.span, &what);
            if let Some(code) = &rule.emit {
                if self.scope.message(code).is_none() {
                    self.diags.error(
                        Code::UndefinedMessage,
                        rule.span,
                        format!("{what} emits undeclared message '{code}'"),
                    );
                }
            }
            if known {
                self.check_expr(&rule.condition, &rule.entity);
            }
        }

        for access in &file.access {
            if !self.require_entity(&access.entity, access.span, "access policy") {
                continue;
            }
            for expr in [&access.read, &access.write].into_iter().flatten() {
                self.check_expr(expr, &access.entity);
            }
        }
    }

    // Pass 4

    fn validate_dependencies(&mut self) {
        let found: Vec<(String, String, crate::ast::Span)> = find_cycles(&self.scope)
            .into_iter()
            .map(|r| (r.key(), r.target.clone(), r.span))
            .collect();
        for (key, target, span) in found {
            self.diags.error(
                Code::CircularDependency,
                span,
                format!("relation '{key}' closes a dependency cycle back to '{target}'"),
            );
        }
    }
}
