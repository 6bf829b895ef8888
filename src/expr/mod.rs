//! Condition expression compiler.
//!
//! One visitor walks the expression tree and asks a [`Dialect`] for every
//! symbol, literal and name it emits. The same rule or access condition is
//! compiled once per dialect.

mod dialect;

pub use dialect::{Cel, Dialect, Postgres, sql_literal};

use crate::ast::{BinaryOp, Expr};

/// Renders `expr` in the given dialect.
pub fn compile<D: Dialect + ?Sized>(expr: &Expr, dialect: &D) -> String {
    match expr {
        Expr::Literal(lit, _) => dialect.literal(lit),
        Expr::Ident(name, _) => dialect.ident(name),
        Expr::Path(segments, _) => dialect.path(segments),
        Expr::Unary { op, operand, .. } => {
            format!("{}{}", dialect.unary_symbol(*op), operand_text(operand, dialect))
        }
        Expr::Binary {
            op: BinaryOp::In,
            left,
            right,
            ..
        } => dialect.membership(operand_text(left, dialect), right),
        Expr::Binary {
            op, left, right, ..
        } => dialect.binary(
            *op,
            operand_text(left, dialect),
            operand_text(right, dialect),
            right,
        ),
        Expr::Call { name, args, .. } => {
            let args: Vec<String> = args.iter().map(|a| compile(a, dialect)).collect();
            format!("{name}({})", args.join(", "))
        }
    }
}

/// Compound operands are parenthesised so the output never depends on the
/// target's own precedence rules.
fn operand_text<D: Dialect + ?Sized>(expr: &Expr, dialect: &D) -> String {
    let text = compile(expr, dialect);
    match expr {
        Expr::Binary { .. } | Expr::Unary { .. } => format!("({text})"),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{Scope, analyze};
    use crate::ast::{Literal, Span, UnaryOp};
    use crate::config::{CompileOptions, Config};
    use crate::parser::{Parser, parse};

    const CURRENT_USER: &str = "current_setting('app.user_id')::uuid";

    fn scope() -> Scope {
        let file = parse(
            r#"
            entity User { email: string role: string }
            entity Org { name: string }
            entity Ticket { subject: string status: string }
            relation User.org -> Org
            relation Ticket.author -> User
            "#,
        )
        .unwrap();
        analyze(&file, &CompileOptions::default()).0
    }

    fn expr(src: &str) -> Expr {
        Parser::new(src).unwrap().parse_expr().unwrap()
    }

    fn sql(scope: &Scope, src: &str) -> String {
        compile(&expr(src), &Postgres::new(scope, "Ticket", "users", CURRENT_USER))
    }

    fn cel(src: &str) -> String {
        compile(&expr(src), &Cel)
    }

    #[test]
    fn test_relation_identifier_forms() {
        let scope = scope();
        let sql = sql(&scope, "user == author");
        let cel = cel("user == author");
        assert_eq!(sql, format!("{CURRENT_USER} = author_id"));
        assert!(sql.contains("author_id"));
        assert_eq!(cel, "user == author");
        assert!(!cel.contains("author_id"));
    }

    #[test]
    fn test_caller_path_is_subquery() {
        let scope = scope();
        assert_eq!(
            sql(&scope, "user.role == \"admin\""),
            format!("(SELECT role FROM users WHERE id = {CURRENT_USER}) = 'admin'")
        );
        assert_eq!(cel("user.role == \"admin\""), "user.role == \"admin\"");
    }

    #[test]
    fn test_relation_path_nests_per_hop() {
        let scope = scope();
        assert_eq!(
            sql(&scope, "author.email == \"a\""),
            "(SELECT email FROM users WHERE id = author_id) = 'a'"
        );
        assert_eq!(
            sql(&scope, "Ticket.author.org.name != null"),
            "(SELECT name FROM orgs WHERE id = (SELECT org_id FROM users WHERE id = author_id)) IS NOT NULL"
        );
    }

    #[test]
    fn test_membership() {
        let scope = scope();
        assert_eq!(
            sql(&scope, "user in admins"),
            format!("{CURRENT_USER} IN (SELECT user_id FROM admins)")
        );
        assert_eq!(cel("user in admins"), "user in admins");
    }

    #[test]
    fn test_null_comparisons() {
        let scope = scope();
        assert_eq!(sql(&scope, "status == null"), "status IS NULL");
        assert_eq!(cel("status == null"), "status == null");
    }

    #[test]
    fn test_connectives_and_grouping() {
        let scope = scope();
        let src = "!(status == \"closed\") && (user == author || user.role == \"admin\")";
        assert_eq!(
            cel(src),
            "(!(status == \"closed\")) && ((user == author) || (user.role == \"admin\"))"
        );
        assert_eq!(
            sql(&scope, src),
            format!(
                "(NOT (status = 'closed')) AND (({CURRENT_USER} = author_id) OR \
                 ((SELECT role FROM users WHERE id = {CURRENT_USER}) = 'admin'))"
            )
        );
    }

    #[test]
    fn test_string_literal_quoting() {
        let scope = scope();
        assert_eq!(sql(&scope, "subject == \"it's\""), "subject = 'it''s'");
        assert_eq!(cel("subject == \"say \\\"hi\\\"\""), "subject == \"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_calls_and_arithmetic() {
        let scope = scope();
        assert_eq!(cel("len(subject) > 3 * 2"), "len(subject) > (3 * 2)");
        assert_eq!(sql(&scope, "len(subject) % 2 == 0"), "(len(subject) % 2) = 0");
    }

    #[test]
    fn test_every_operator_renders_in_both_dialects() {
        let scope = scope();
        let config = Config::default();
        let current_user = config.current_user_sql();
        let postgres = Postgres::new(&scope, "Ticket", &config.sql.users_table, &current_user);
        let span = Span::default();
        let a = || Box::new(Expr::Ident("subject".into(), span));
        let b = || Box::new(Expr::Literal(Literal::Int(1), span));

        for op in BinaryOp::ALL {
            let e = Expr::Binary {
                op,
                left: a(),
                right: b(),
                span,
            };
            for out in [compile(&e, &Cel), compile(&e, &postgres)] {
                assert!(out.starts_with("subject "), "{op:?}: {out}");
                assert!(out.len() > "subject  1".len(), "{op:?}: {out}");
            }
            assert!(!Cel.binary_symbol(op).is_empty());
            assert!(!postgres.binary_symbol(op).is_empty());
        }

        for op in UnaryOp::ALL {
            let e = Expr::Unary {
                op,
                operand: a(),
                span,
            };
            assert!(compile(&e, &Cel).ends_with("subject"));
            assert!(compile(&e, &postgres).ends_with("subject"));
        }
    }
}
