//! Field and relation path validation inside expressions.

use super::scope::{Scope, ScopeEntity};
use crate::ast::{BinaryOp, Expr, Span};
use crate::diagnostics::{Code, Diagnostics};

/// Identifier that denotes the runtime caller rather than a field.
pub const CALLER: &str = "user";

/// Where a successfully walked path ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEnd {
    /// Entity owning the last walked segment.
    pub entity: String,
    /// Set when the walk stopped at a field; `None` when it ended on a relation.
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathResolution {
    Resolved(PathEnd),
    /// The first segment is not a declared entity.
    NotEntityRooted,
    /// A segment failed to resolve; already reported.
    Invalid,
}

pub struct PathValidator<'s> {
    scope: &'s Scope,
    strict: bool,
}

impl<'s> PathValidator<'s> {
    pub fn new(scope: &'s Scope, strict: bool) -> Self {
        Self { scope, strict }
    }

    /// Walks `segments` starting from the entity named by the first one.
    ///
    /// Each later segment is accepted as a field (which ends the walk) or as
    /// a relation (which descends into its target).
    pub fn validate_path(
        &self,
        segments: &[String],
        span: Span,
        diags: &mut Diagnostics,
    ) -> PathResolution {
        let Some(root) = segments.first() else {
            return PathResolution::NotEntityRooted;
        };
        let Some(entity) = self.scope.entity(root) else {
            return PathResolution::NotEntityRooted;
        };
        self.walk(&segments[1..], entity, span, diags)
    }

    fn walk(
        &self,
        rest: &[String],
        mut entity: &'s ScopeEntity,
        span: Span,
        diags: &mut Diagnostics,
    ) -> PathResolution {
        for segment in rest {
            if entity.fields.contains_key(segment) {
                return PathResolution::Resolved(PathEnd {
                    entity: entity.name.clone(),
                    field: Some(segment.clone()),
                });
            }
            if let Some(relation) = self.scope.relation(&entity.name, segment) {
                match self.scope.entity(&relation.target) {
                    Some(target) => {
                        entity = target;
                        continue;
                    }
                    // Undeclared target, reported with the relation.
                    None => return PathResolution::Invalid,
                }
            }
            diags.error(
                Code::UndefinedField,
                span,
                format!(
                    "field '{segment}' is not defined on entity '{}'",
                    entity.name
                ),
            );
            return PathResolution::Invalid;
        }
        PathResolution::Resolved(PathEnd {
            entity: entity.name.clone(),
            field: None,
        })
    }

    /// Validates every identifier and path in `expr` against `context`, the
    /// entity the expression is evaluated on.
    pub fn validate_expr(&self, expr: &Expr, context: &str, diags: &mut Diagnostics) {
        match expr {
            Expr::Literal(..) => {}
            Expr::Ident(name, span) => self.validate_ident(name, *span, context, diags),
            Expr::Path(segments, span) => self.validate_expr_path(segments, *span, context, diags),
            Expr::Unary { operand, .. } => self.validate_expr(operand, context, diags),
            Expr::Binary {
                op: BinaryOp::In,
                left,
                right,
                ..
            } => {
                self.validate_expr(left, context, diags);
                // The right side names a membership table, not a field.
                if !matches!(right.as_ref(), Expr::Ident(..) | Expr::Path(..)) {
                    diags.error(
                        Code::InvalidPath,
                        right.span(),
                        "right side of 'in' must name a membership table",
                    );
                }
            }
            Expr::Binary { left, right, .. } => {
                self.validate_expr(left, context, diags);
                self.validate_expr(right, context, diags);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    self.validate_expr(arg, context, diags);
                }
            }
        }
    }

    fn validate_ident(&self, name: &str, span: Span, context: &str, diags: &mut Diagnostics) {
        if name == CALLER || self.scope.entity(name).is_some() {
            return;
        }
        // Unknown context entity is reported by the declaration itself.
        if self.scope.entity(context).is_none() {
            return;
        }
        if !self.scope.has_member(context, name) {
            diags.error(
                Code::UndefinedField,
                span,
                format!("field '{name}' is not defined on entity '{context}'"),
            );
        }
    }

    fn validate_expr_path(
        &self,
        segments: &[String],
        span: Span,
        context: &str,
        diags: &mut Diagnostics,
    ) {
        if segments.first().is_some_and(|s| s == CALLER) {
            return;
        }
        match self.validate_path(segments, span, diags) {
            PathResolution::Resolved(_) | PathResolution::Invalid => {}
            PathResolution::NotEntityRooted if self.strict => {
                if let Some(entity) = self.scope.entity(context) {
                    self.walk(segments, entity, span, diags);
                }
            }
            PathResolution::NotEntityRooted => {
                tracing::trace!(path = %segments.join("."), "skipping path without entity root");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::config::CompileOptions;
    use crate::parser::parse;

    fn scope() -> Scope {
        let file = parse(
            r#"
            entity User { email: string }
            entity Ticket { subject: string }
            relation Ticket.author -> User
            "#,
        )
        .unwrap();
        analyze(&file, &CompileOptions::default()).0
    }

    fn path(s: &str) -> Vec<String> {
        s.split('.').map(String::from).collect()
    }

    #[test]
    fn test_path_through_relation_to_field() {
        let scope = scope();
        let mut diags = Diagnostics::new();
        let res = PathValidator::new(&scope, false).validate_path(
            &path("Ticket.author.email"),
            Span::default(),
            &mut diags,
        );
        assert_eq!(
            res,
            PathResolution::Resolved(PathEnd {
                entity: "User".into(),
                field: Some("email".into())
            })
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_path_ending_on_relation() {
        let scope = scope();
        let mut diags = Diagnostics::new();
        let res = PathValidator::new(&scope, false).validate_path(
            &path("Ticket.author"),
            Span::default(),
            &mut diags,
        );
        assert_eq!(
            res,
            PathResolution::Resolved(PathEnd {
                entity: "User".into(),
                field: None
            })
        );
    }

    #[test]
    fn test_undefined_segment_reported() {
        let scope = scope();
        let mut diags = Diagnostics::new();
        let res = PathValidator::new(&scope, false).validate_path(
            &path("Ticket.owner.email"),
            Span::default(),
            &mut diags,
        );
        assert_eq!(res, PathResolution::Invalid);
        assert_eq!(diags.count(Code::UndefinedField), 1);
    }

    #[test]
    fn test_non_entity_root_skipped_unless_strict() {
        let scope = scope();
        let expr = crate::parser::Parser::new("auther.email == \"x\"")
            .unwrap()
            .parse_expr()
            .unwrap();

        let mut lenient = Diagnostics::new();
        PathValidator::new(&scope, false).validate_expr(&expr, "Ticket", &mut lenient);
        assert!(lenient.is_empty());

        let mut strict = Diagnostics::new();
        PathValidator::new(&scope, true).validate_expr(&expr, "Ticket", &mut strict);
        assert_eq!(strict.count(Code::UndefinedField), 1);
    }

    #[test]
    fn test_caller_is_exempt() {
        let scope = scope();
        let expr = crate::parser::Parser::new("user == author && user.role == \"admin\"")
            .unwrap()
            .parse_expr()
            .unwrap();
        let mut diags = Diagnostics::new();
        PathValidator::new(&scope, true).validate_expr(&expr, "Ticket", &mut diags);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_membership_needs_table_name() {
        let scope = scope();
        let expr = crate::parser::Parser::new("user in \"admins\"")
            .unwrap()
            .parse_expr()
            .unwrap();
        let mut diags = Diagnostics::new();
        PathValidator::new(&scope, false).validate_expr(&expr, "Ticket", &mut diags);
        assert_eq!(diags.count(Code::InvalidPath), 1);
    }
}
