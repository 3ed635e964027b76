//! Error types for the analyzer.
//!
//! Every semantic violation found while turning a raw parse tree into a
//! query tree is represented by [`AnalyzeError`]. Errors are raised at the
//! point of detection and propagated with `?`; there is no local recovery,
//! a failed analysis aborts the whole statement.
//!
//! # Error Classification
//!
//! Each variant maps onto one SQLSTATE code (see [`AnalyzeError::sqlstate`])
//! and is classified by [`AnalyzeError::kind`]:
//! - **User**: the statement is invalid. The caller should report it.
//! - **Internal**: an arity or shape mismatch the grammar should have
//!   prevented. Indicates a bug in the caller or in the analyzer.
//!
//! User errors carry a [`Diagnostic`] with the message, optional detail and
//! hint, and the byte offset into the source text when one is known.

use std::fmt;

/// Byte offset into the statement's source text.
pub type Location = Option<usize>;

/// Convenience alias used throughout the crate.
pub type AnalyzeResult<T> = Result<T, AnalyzeError>;

/// Message, detail, hint and cursor position of a user-facing error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostic {
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub location: Location,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Primary error type for analysis.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalyzeError {
    // ── Syntax-class errors ─────────────────────────────────────────────
    /// Bad clause combinations and misplaced constructs.
    #[error("{0}")]
    Syntax(Diagnostic),

    /// The construct is valid SQL but this analyzer does not accept it.
    #[error("{0}")]
    FeatureNotSupported(Diagnostic),

    /// A grouped query references an ungrouped column.
    #[error("{0}")]
    Grouping(Diagnostic),

    /// Misplaced or ill-formed window function or definition.
    #[error("{0}")]
    Windowing(Diagnostic),

    /// A recursive CTE does not have the required shape.
    #[error("{0}")]
    InvalidRecursion(Diagnostic),

    /// A column reference is not allowed in this context.
    #[error("{0}")]
    InvalidColumnReference(Diagnostic),

    /// Conflicting cursor options.
    #[error("{0}")]
    InvalidCursorDefinition(Diagnostic),

    // ── Name resolution ─────────────────────────────────────────────────
    #[error("{0}")]
    UndefinedColumn(Diagnostic),

    #[error("{0}")]
    UndefinedTable(Diagnostic),

    #[error("{0}")]
    UndefinedObject(Diagnostic),

    #[error("{0}")]
    UndefinedFunction(Diagnostic),

    #[error("{0}")]
    UndefinedParameter(Diagnostic),

    #[error("{0}")]
    AmbiguousColumn(Diagnostic),

    #[error("{0}")]
    AmbiguousAlias(Diagnostic),

    #[error("{0}")]
    DuplicateAlias(Diagnostic),

    #[error("{0}")]
    DuplicateColumn(Diagnostic),

    // ── Types and collations ────────────────────────────────────────────
    #[error("{0}")]
    DatatypeMismatch(Diagnostic),

    #[error("{0}")]
    CollationMismatch(Diagnostic),

    /// A literal could not be converted to the requested type.
    #[error("{0}")]
    InvalidTextRepresentation(Diagnostic),

    /// A parameter's type could not be deduced from its uses.
    #[error("{0}")]
    IndeterminateDatatype(Diagnostic),

    // ── Resource limits ─────────────────────────────────────────────────
    /// Nesting exceeded the configured recursion bound.
    #[error("{0}")]
    StatementTooComplex(Diagnostic),

    // ── Internal errors, should not happen ─────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Classification of errors for callers that route them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzeErrorKind {
    User,
    Internal,
}

impl fmt::Display for AnalyzeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzeErrorKind::User => write!(f, "USER"),
            AnalyzeErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

macro_rules! constructors {
    ($($fn_name:ident => $variant:ident),* $(,)?) => {
        impl AnalyzeError {
            $(
                pub fn $fn_name(message: impl Into<String>) -> Self {
                    AnalyzeError::$variant(Diagnostic::new(message))
                }
            )*
        }
    };
}

constructors! {
    syntax => Syntax,
    feature_not_supported => FeatureNotSupported,
    grouping => Grouping,
    windowing => Windowing,
    invalid_recursion => InvalidRecursion,
    invalid_column_reference => InvalidColumnReference,
    invalid_cursor_definition => InvalidCursorDefinition,
    undefined_column => UndefinedColumn,
    undefined_table => UndefinedTable,
    undefined_object => UndefinedObject,
    undefined_function => UndefinedFunction,
    undefined_parameter => UndefinedParameter,
    ambiguous_column => AmbiguousColumn,
    ambiguous_alias => AmbiguousAlias,
    duplicate_alias => DuplicateAlias,
    duplicate_column => DuplicateColumn,
    datatype_mismatch => DatatypeMismatch,
    collation_mismatch => CollationMismatch,
    invalid_text_representation => InvalidTextRepresentation,
    indeterminate_datatype => IndeterminateDatatype,
    statement_too_complex => StatementTooComplex,
}

impl AnalyzeError {
    /// An internal error. Use for shapes the grammar cannot produce.
    pub fn internal(message: impl Into<String>) -> Self {
        AnalyzeError::Internal(message.into())
    }

    fn diagnostic_mut(&mut self) -> Option<&mut Diagnostic> {
        match self {
            AnalyzeError::Syntax(d)
            | AnalyzeError::FeatureNotSupported(d)
            | AnalyzeError::Grouping(d)
            | AnalyzeError::Windowing(d)
            | AnalyzeError::InvalidRecursion(d)
            | AnalyzeError::InvalidColumnReference(d)
            | AnalyzeError::InvalidCursorDefinition(d)
            | AnalyzeError::UndefinedColumn(d)
            | AnalyzeError::UndefinedTable(d)
            | AnalyzeError::UndefinedObject(d)
            | AnalyzeError::UndefinedFunction(d)
            | AnalyzeError::UndefinedParameter(d)
            | AnalyzeError::AmbiguousColumn(d)
            | AnalyzeError::AmbiguousAlias(d)
            | AnalyzeError::DuplicateAlias(d)
            | AnalyzeError::DuplicateColumn(d)
            | AnalyzeError::DatatypeMismatch(d)
            | AnalyzeError::CollationMismatch(d)
            | AnalyzeError::InvalidTextRepresentation(d)
            | AnalyzeError::IndeterminateDatatype(d)
            | AnalyzeError::StatementTooComplex(d) => Some(d),
            AnalyzeError::Internal(_) => None,
        }
    }

    /// The diagnostic payload, `None` for internal errors.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            AnalyzeError::Syntax(d)
            | AnalyzeError::FeatureNotSupported(d)
            | AnalyzeError::Grouping(d)
            | AnalyzeError::Windowing(d)
            | AnalyzeError::InvalidRecursion(d)
            | AnalyzeError::InvalidColumnReference(d)
            | AnalyzeError::InvalidCursorDefinition(d)
            | AnalyzeError::UndefinedColumn(d)
            | AnalyzeError::UndefinedTable(d)
            | AnalyzeError::UndefinedObject(d)
            | AnalyzeError::UndefinedFunction(d)
            | AnalyzeError::UndefinedParameter(d)
            | AnalyzeError::AmbiguousColumn(d)
            | AnalyzeError::AmbiguousAlias(d)
            | AnalyzeError::DuplicateAlias(d)
            | AnalyzeError::DuplicateColumn(d)
            | AnalyzeError::DatatypeMismatch(d)
            | AnalyzeError::CollationMismatch(d)
            | AnalyzeError::InvalidTextRepresentation(d)
            | AnalyzeError::IndeterminateDatatype(d)
            | AnalyzeError::StatementTooComplex(d) => Some(d),
            AnalyzeError::Internal(_) => None,
        }
    }

    /// Attach a source position (`parser_errposition`). Keeps an existing
    /// position, so the innermost construct wins.
    pub fn at(mut self, location: Location) -> Self {
        if let Some(d) = self.diagnostic_mut() {
            if d.location.is_none() {
                d.location = location;
            }
        }
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        if let Some(d) = self.diagnostic_mut() {
            d.detail = Some(detail.into());
        }
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        if let Some(d) = self.diagnostic_mut() {
            d.hint = Some(hint.into());
        }
        self
    }

    /// The primary message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            AnalyzeError::Internal(msg) => msg,
            other => other
                .diagnostic()
                .map(|d| d.message.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn location(&self) -> Location {
        self.diagnostic().and_then(|d| d.location)
    }

    /// The five-character SQLSTATE for this error.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            AnalyzeError::Syntax(_) => "42601",
            AnalyzeError::FeatureNotSupported(_) => "0A000",
            AnalyzeError::Grouping(_) => "42803",
            AnalyzeError::Windowing(_) => "42P20",
            AnalyzeError::InvalidRecursion(_) => "42P19",
            AnalyzeError::InvalidColumnReference(_) => "42P10",
            AnalyzeError::InvalidCursorDefinition(_) => "42P11",
            AnalyzeError::UndefinedColumn(_) => "42703",
            AnalyzeError::UndefinedTable(_) => "42P01",
            AnalyzeError::UndefinedObject(_) => "42704",
            AnalyzeError::UndefinedFunction(_) => "42883",
            AnalyzeError::UndefinedParameter(_) => "42P02",
            AnalyzeError::AmbiguousColumn(_) => "42702",
            AnalyzeError::AmbiguousAlias(_) => "42P09",
            AnalyzeError::DuplicateAlias(_) => "42712",
            AnalyzeError::DuplicateColumn(_) => "42701",
            AnalyzeError::DatatypeMismatch(_) => "42804",
            AnalyzeError::CollationMismatch(_) => "42P21",
            AnalyzeError::InvalidTextRepresentation(_) => "22P02",
            AnalyzeError::IndeterminateDatatype(_) => "42P18",
            AnalyzeError::StatementTooComplex(_) => "54001",
            AnalyzeError::Internal(_) => "XX000",
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> AnalyzeErrorKind {
        match self {
            AnalyzeError::Internal(_) => AnalyzeErrorKind::Internal,
            _ => AnalyzeErrorKind::User,
        }
    }
}

// ── Configuration errors ───────────────────────────────────────────────────

/// Errors raised while loading or validating [`crate::config::AnalyzerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_message() {
        let e = AnalyzeError::syntax("VALUES lists must all be the same length");
        assert_eq!(e.to_string(), "VALUES lists must all be the same length");
    }

    #[test]
    fn test_internal_display_prefix() {
        let e = AnalyzeError::internal("UPDATE target count mismatch --- internal error");
        assert_eq!(
            e.to_string(),
            "internal error: UPDATE target count mismatch --- internal error"
        );
        assert_eq!(e.kind(), AnalyzeErrorKind::Internal);
        assert_eq!(e.sqlstate(), "XX000");
    }

    #[test]
    fn test_builder_attaches_fields() {
        let e = AnalyzeError::feature_not_supported("invalid UNION/INTERSECT/EXCEPT ORDER BY clause")
            .with_detail("Only result column names can be used, not expressions or functions.")
            .with_hint("Add the expression/function to every SELECT, or move the UNION into a FROM clause.")
            .at(Some(42));
        let d = e.diagnostic().unwrap();
        assert_eq!(d.location, Some(42));
        assert!(d.detail.as_deref().unwrap().starts_with("Only result column names"));
        assert!(d.hint.is_some());
        assert_eq!(e.sqlstate(), "0A000");
    }

    #[test]
    fn test_location_first_wins() {
        let e = AnalyzeError::syntax("x").at(Some(3)).at(Some(9));
        assert_eq!(e.location(), Some(3));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(AnalyzeErrorKind::User.to_string(), "USER");
        assert_eq!(AnalyzeErrorKind::Internal.to_string(), "INTERNAL");
        assert_eq!(AnalyzeError::undefined_table("t").kind(), AnalyzeErrorKind::User);
    }

    #[test]
    fn test_sqlstates_per_error_class() {
        assert_eq!(AnalyzeError::undefined_column("c").sqlstate(), "42703");
        assert_eq!(AnalyzeError::undefined_table("t").sqlstate(), "42P01");
        assert_eq!(AnalyzeError::invalid_cursor_definition("c").sqlstate(), "42P11");
        assert_eq!(AnalyzeError::invalid_column_reference("c").sqlstate(), "42P10");
        assert_eq!(AnalyzeError::undefined_object("n").sqlstate(), "42704");
    }
}
