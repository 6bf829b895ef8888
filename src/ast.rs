//! Syntax tree for blueprint source files.
//!
//! Every declaration and expression carries the [`Span`] it was parsed from
//! so later passes can attach diagnostics to source ranges.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, serde::Serialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start.line, self.start.column)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct File {
    pub apps: Vec<App>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub rules: Vec<Rule>,
    pub access: Vec<Access>,
    pub actions: Vec<Action>,
    pub messages: Vec<Message>,
    pub jobs: Vec<Job>,
    pub hooks: Vec<Hook>,
    pub views: Vec<View>,
    pub webhooks: Vec<Webhook>,
    pub migrations: Vec<Migrate>,
    pub tests: Vec<Test>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct App {
    pub name: String,
    pub auth: Option<String>,
    pub database: Option<String>,
    pub frontend: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub fields: Vec<Field>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub modifiers: Vec<FieldModifier>,
    pub span: Span,
}

impl Field {
    pub fn is_unique(&self) -> bool {
        self.modifiers.iter().any(|m| matches!(m, FieldModifier::Unique))
    }

    pub fn is_optional(&self) -> bool {
        self.modifiers.iter().any(|m| matches!(m, FieldModifier::Optional))
    }

    pub fn default_value(&self) -> Option<&Literal> {
        self.modifiers.iter().find_map(|m| match m {
            FieldModifier::Default(lit) => Some(lit),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Named(String),
    Enum(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldModifier {
    Unique,
    Optional,
    Default(Literal),
    Length { op: BinaryOp, value: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub source: String,
    pub field: String,
    pub target: String,
    pub many: bool,
    pub span: Span,
}

impl Relation {
    /// Scope key, `"Entity.field"`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.source, self.field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Forbid,
    Require,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub entity: String,
    pub operation: String,
    pub kind: RuleKind,
    pub condition: Expr,
    pub emit: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub entity: String,
    pub read: Option<Expr>,
    pub write: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub name: String,
    pub input: String,
    pub operation: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub code: String,
    pub level: Option<String>,
    pub default: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub name: String,
    pub input: String,
    pub needs: Option<Needs>,
    pub capabilities: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Needs {
    pub path: Vec<String>,
    pub filter: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timing {
    Before,
    After,
}

impl Timing {
    pub fn as_str(self) -> &'static str {
        match self {
            Timing::Before => "before",
            Timing::After => "after",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hook {
    pub entity: String,
    pub timing: Timing,
    pub operation: String,
    pub jobs: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub name: String,
    pub source: String,
    pub fields: Vec<String>,
    pub filter: Option<Expr>,
    pub sort: Option<Sort>,
    pub limit: Option<i64>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Webhook {
    pub name: String,
    pub provider: Option<String>,
    pub events: Vec<String>,
    pub triggers: Option<String>,
    pub route: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Migrate {
    pub version: String,
    pub description: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Test {
    pub name: String,
    pub entity: String,
    pub expect: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 2] = [UnaryOp::Not, UnaryOp::Neg];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    In,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 14] = [
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::In,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal, Span),
    Ident(String, Span),
    /// Dotted path with at least two segments.
    Path(Vec<String>, Span),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, span) | Expr::Ident(_, span) | Expr::Path(_, span) => *span,
            Expr::Unary { span, .. } | Expr::Binary { span, .. } | Expr::Call { span, .. } => *span,
        }
    }
}
