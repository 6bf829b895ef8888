//! Collected compile problems.
//!
//! Semantic passes never fail fast: each problem is pushed into a
//! [`Diagnostics`] collector and the pass keeps scanning. Callers decide
//! whether to continue by checking [`Diagnostics::has_errors`].

use crate::ast::Span;
use serde::Serialize;
use std::fmt;
use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// Stable identifiers for every diagnostic the compiler can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    ParseError,
    DuplicateEntity,
    DuplicateField,
    DuplicateRelation,
    DuplicateAction,
    DuplicateMessage,
    DuplicateJob,
    DuplicateView,
    DuplicateWebhook,
    ReservedField,
    UndefinedEntity,
    UndefinedMessage,
    UndefinedJob,
    UndefinedAction,
    UndefinedField,
    InvalidPath,
    MissingProvider,
    MissingEvents,
    MissingTriggers,
    CircularDependency,
    UnknownType,
    InvalidLength,
    InvalidDefault,
    ReservedName,
    PlanInconsistent,
    SerializationFailed,
}

impl Code {
    pub fn as_str(self) -> &'static str {
        match self {
            Code::ParseError => "parse_error",
            Code::DuplicateEntity => "duplicate_entity",
            Code::DuplicateField => "duplicate_field",
            Code::DuplicateRelation => "duplicate_relation",
            Code::DuplicateAction => "duplicate_action",
            Code::DuplicateMessage => "duplicate_message",
            Code::DuplicateJob => "duplicate_job",
            Code::DuplicateView => "duplicate_view",
            Code::DuplicateWebhook => "duplicate_webhook",
            Code::ReservedField => "reserved_field",
            Code::UndefinedEntity => "undefined_entity",
            Code::UndefinedMessage => "undefined_message",
            Code::UndefinedJob => "undefined_job",
            Code::UndefinedAction => "undefined_action",
            Code::UndefinedField => "undefined_field",
            Code::InvalidPath => "invalid_path",
            Code::MissingProvider => "missing_provider",
            Code::MissingEvents => "missing_events",
            Code::MissingTriggers => "missing_triggers",
            Code::CircularDependency => "circular_dependency",
            Code::UnknownType => "unknown_type",
            Code::InvalidLength => "invalid_length",
            Code::InvalidDefault => "invalid_default",
            Code::ReservedName => "reserved_name",
            Code::PlanInconsistent => "plan_inconsistent",
            Code::SerializationFailed => "serialization_failed",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: Code,
    pub span: Span,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(code: Code, span: Span, message: impl Into<String>) -> Self {
        Self {
            code,
            span,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(code: Code, span: Span, message: impl Into<String>) -> Self {
        Self {
            code,
            span,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Renders the diagnostic with the offending source line and a caret
    /// underline. Spans that fall outside `source` render the header only.
    pub fn render(&self, source: &str) -> String {
        let mut out = format!(
            "{}[{}]: {}\n  --> {}\n",
            self.severity.as_str(),
            self.code,
            self.message,
            self.span
        );

        let line_no = self.span.start.line as usize;
        let Some(line) = line_no.checked_sub(1).and_then(|i| source.lines().nth(i)) else {
            return out;
        };

        let gutter = line_no.to_string();
        let pad = " ".repeat(gutter.len());
        let start_col = (self.span.start.column as usize).saturating_sub(1);
        let end_col = if self.span.end.line == self.span.start.line {
            (self.span.end.column as usize).saturating_sub(1)
        } else {
            line.chars().count()
        };

        let prefix: String = line.chars().take(start_col).collect();
        let marked: String = line
            .chars()
            .skip(start_col)
            .take(end_col.saturating_sub(start_col))
            .collect();
        let offset = UnicodeWidthStr::width(prefix.as_str());
        let width = UnicodeWidthStr::width(marked.as_str()).max(1);

        out.push_str(&format!("{pad} |\n"));
        out.push_str(&format!("{gutter} | {line}\n"));
        out.push_str(&format!(
            "{pad} | {}{}\n",
            " ".repeat(offset),
            "^".repeat(width)
        ));
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] at {}: {}",
            self.severity.as_str(),
            self.code,
            self.span,
            self.message
        )
    }
}

/// Append-only diagnostic collector scoped to a single compile.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::trace!(code = %diagnostic.code, span = %diagnostic.span, "{}", diagnostic.message);
        self.items.push(diagnostic);
    }

    pub fn error(&mut self, code: Code, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::error(code, span, message));
    }

    pub fn warning(&mut self, code: Code, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::warning(code, span, message));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_error()).count()
    }

    /// Number of diagnostics carrying `code`.
    pub fn count(&self, code: Code) -> usize {
        self.items.iter().filter(|d| d.code == code).count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn render(&self, source: &str) -> String {
        self.items.iter().map(|d| d.render(source)).collect()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
