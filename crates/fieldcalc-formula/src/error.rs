//! Formula error types

use fieldcalc_core::{FieldId, TableId};
use std::fmt;
use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Which resource bound was exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Nesting depth of the expression
    Depth,
    /// Number of AST nodes
    Nodes,
    /// Number of (record, field) pairs in one recompute batch
    BatchSize,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LimitKind::Depth => "expression depth",
            LimitKind::Nodes => "expression size",
            LimitKind::BatchSize => "recompute batch size",
        })
    }
}

/// Errors reported to the caller by compilation, schema edits and
/// recomputation.
///
/// Evaluation never fails with one of these: runtime problems are
/// [`ErrorKind`](fieldcalc_core::ErrorKind) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    /// Malformed token
    #[error("Lex error at {position}: {reason}")]
    Lex { position: usize, reason: String },

    /// Unexpected token
    #[error("Parse error at {position}: expected {expected}, found {found}")]
    Parse {
        position: usize,
        expected: String,
        found: String,
    },

    /// A `{Name}` reference that does not resolve
    #[error("Unknown field reference {{{name}}} at {position}")]
    UnknownField { name: String, position: usize },

    /// `{Name}.{Remote}` where `Name` is not a link field
    #[error("Field {{{name}}} at {position} is not a link field")]
    NotALinkField { name: String, position: usize },

    /// Resource bound exceeded
    #[error("{limit} limit exceeded: {actual} > {max}")]
    LimitExceeded {
        limit: LimitKind,
        max: usize,
        actual: usize,
    },

    /// The edit would make the dependency graph cyclic
    #[error("Circular dependency: {}", format_path(.path))]
    CircularDependency { path: Vec<FieldId> },

    /// Field is not a formula field, or has no registered formula
    #[error("Field {0} has no formula")]
    UnknownFormulaField(FieldId),

    /// A compiled formula reads a field it cannot reach from `table`
    #[error("Field {field} is not reachable from table {table}")]
    ForeignField { field: FieldId, table: TableId },

    /// Stored-value change reported for a computed field
    #[error("Field {0} is computed and cannot be changed directly")]
    NotASourceField(FieldId),
}

fn format_path(path: &[FieldId]) -> String {
    let mut out = String::new();
    for (idx, field) in path.iter().enumerate() {
        if idx > 0 {
            out.push_str(" -> ");
        }
        out.push_str(&field.to_string());
    }
    if let Some(first) = path.first() {
        out.push_str(" -> ");
        out.push_str(&first.to_string());
    }
    out
}

impl FormulaError {
    /// Source offset for authoring-time errors
    pub fn position(&self) -> Option<usize> {
        match self {
            FormulaError::Lex { position, .. }
            | FormulaError::Parse { position, .. }
            | FormulaError::UnknownField { position, .. }
            | FormulaError::NotALinkField { position, .. } => Some(*position),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_closes_loop() {
        let err = FormulaError::CircularDependency {
            path: vec![FieldId(3), FieldId(1)],
        };
        assert_eq!(err.to_string(), "Circular dependency: fld3 -> fld1 -> fld3");
    }
}
