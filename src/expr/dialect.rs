//! Target dialects for condition expressions.

use crate::analyzer::{CALLER, Scope};
use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::naming::table_name;

/// Rendering strategy consulted by [`super::compile`].
///
/// Operator tables are exhaustive matches, so a new operator does not
/// compile until every dialect gives it a symbol.
pub trait Dialect {
    fn binary_symbol(&self, op: BinaryOp) -> &'static str;

    fn unary_symbol(&self, op: UnaryOp) -> &'static str;

    fn literal(&self, lit: &Literal) -> String;

    fn ident(&self, name: &str) -> String;

    fn path(&self, segments: &[String]) -> String;

    /// `left in right`, where `right` names a membership table.
    fn membership(&self, left: String, right: &Expr) -> String;

    fn binary(&self, op: BinaryOp, left: String, right: String, _right: &Expr) -> String {
        format!("{left} {} {right}", self.binary_symbol(op))
    }
}

/// SQL text for a literal; also used for column defaults.
pub fn sql_literal(lit: &Literal) -> String {
    match lit {
        Literal::Str(s) => format!("'{}'", s.replace('\'', "''")),
        Literal::Int(n) => n.to_string(),
        Literal::Float(f) => format!("{f:?}"),
        Literal::Bool(true) => "TRUE".to_string(),
        Literal::Bool(false) => "FALSE".to_string(),
        Literal::Null => "NULL".to_string(),
    }
}

/// Table reference on the right of `in`.
fn table_ref(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(name, _) => Some(name.clone()),
        Expr::Path(segments, _) => Some(segments.join(".")),
        _ => None,
    }
}

/// Application condition language evaluated by the runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cel;

impl Dialect for Cel {
    fn binary_symbol(&self, op: BinaryOp) -> &'static str {
        match op {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::In => "in",
        }
    }

    fn unary_symbol(&self, op: UnaryOp) -> &'static str {
        match op {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
        }
    }

    fn literal(&self, lit: &Literal) -> String {
        match lit {
            Literal::Str(s) => serde_json::Value::from(s.as_str()).to_string(),
            Literal::Int(n) => n.to_string(),
            Literal::Float(f) => format!("{f:?}"),
            Literal::Bool(b) => b.to_string(),
            Literal::Null => "null".to_string(),
        }
    }

    fn ident(&self, name: &str) -> String {
        name.to_string()
    }

    fn path(&self, segments: &[String]) -> String {
        segments.join(".")
    }

    fn membership(&self, left: String, right: &Expr) -> String {
        let right = table_ref(right).unwrap_or_else(|| super::compile(right, self));
        format!("{left} {} {right}", self.binary_symbol(BinaryOp::In))
    }
}

/// Postgres predicate evaluated against a row of `entity`'s table.
#[derive(Debug, Clone, Copy)]
pub struct Postgres<'a> {
    scope: &'a Scope,
    entity: &'a str,
    users_table: &'a str,
    current_user: &'a str,
}

impl<'a> Postgres<'a> {
    pub fn new(scope: &'a Scope, entity: &'a str, users_table: &'a str, current_user: &'a str) -> Self {
        Self {
            scope,
            entity,
            users_table,
            current_user,
        }
    }

    /// Column for `name` on `entity`: relations resolve to their FK column.
    fn column(&self, entity: Option<&str>, name: &str) -> String {
        match entity.and_then(|e| self.scope.relation(e, name)) {
            Some(relation) => relation.column(),
            None => name.to_string(),
        }
    }

    /// Entity backing the users table, when one is declared.
    fn caller_entity(&self) -> Option<&'a str> {
        self.scope
            .entities()
            .find(|e| table_name(&e.name) == self.users_table)
            .map(|e| e.name.as_str())
    }

    /// Follows `rest` from the row of `table` whose id is `key`, nesting one
    /// correlated subquery per hop.
    fn follow(
        &self,
        mut entity: Option<&'a str>,
        mut table: String,
        mut key: String,
        rest: &[String],
    ) -> String {
        let Some((last, hops)) = rest.split_last() else {
            return key;
        };
        for hop in hops {
            let column = self.column(entity, hop);
            key = format!("(SELECT {column} FROM {table} WHERE id = {key})");
            match entity.and_then(|e| self.scope.relation(e, hop)) {
                Some(relation) => {
                    entity = self.scope.entity(&relation.target).map(|e| e.name.as_str());
                    table = table_name(&relation.target);
                }
                None => {
                    entity = None;
                    table = hop.clone();
                }
            }
        }
        let column = self.column(entity, last);
        format!("(SELECT {column} FROM {table} WHERE id = {key})")
    }

    /// Path evaluated relative to the current row.
    fn row_path(&self, segments: &[String]) -> String {
        let Some((first, rest)) = segments.split_first() else {
            return String::new();
        };
        if rest.is_empty() {
            return self.ident(first);
        }
        match self.scope.relation(self.entity, first) {
            Some(relation) => self.follow(
                self.scope.entity(&relation.target).map(|e| e.name.as_str()),
                table_name(&relation.target),
                relation.column(),
                rest,
            ),
            None => segments.join("."),
        }
    }
}

impl Dialect for Postgres<'_> {
    fn binary_symbol(&self, op: BinaryOp) -> &'static str {
        match op {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::In => "IN",
        }
    }

    fn unary_symbol(&self, op: UnaryOp) -> &'static str {
        match op {
            UnaryOp::Not => "NOT ",
            UnaryOp::Neg => "-",
        }
    }

    fn literal(&self, lit: &Literal) -> String {
        sql_literal(lit)
    }

    fn ident(&self, name: &str) -> String {
        if name == CALLER {
            return self.current_user.to_string();
        }
        self.column(Some(self.entity), name)
    }

    fn path(&self, segments: &[String]) -> String {
        match segments.split_first() {
            Some((root, rest)) if root == CALLER => self.follow(
                self.caller_entity(),
                self.users_table.to_string(),
                self.current_user.to_string(),
                rest,
            ),
            Some((root, rest)) if root == self.entity => self.row_path(rest),
            _ => self.row_path(segments),
        }
    }

    fn membership(&self, left: String, right: &Expr) -> String {
        let right = table_ref(right).unwrap_or_else(|| super::compile(right, self));
        format!("{left} {} (SELECT user_id FROM {right})", self.binary_symbol(BinaryOp::In))
    }

    fn binary(&self, op: BinaryOp, left: String, right: String, right_expr: &Expr) -> String {
        match (op, right_expr) {
            (BinaryOp::Eq, Expr::Literal(Literal::Null, _)) => format!("{left} IS NULL"),
            (BinaryOp::Ne, Expr::Literal(Literal::Null, _)) => format!("{left} IS NOT NULL"),
            _ => format!("{left} {} {right}", self.binary_symbol(op)),
        }
    }
}
