//! Error types for fieldcalc-core

use crate::id::TableId;
use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while editing a schema or store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Table id not known to the schema
    #[error("Unknown table: {0}")]
    UnknownTable(TableId),

    /// A field with this name already exists in the table
    #[error("Field name already exists in table {table}: {name}")]
    DuplicateFieldName { table: TableId, name: String },

    /// Invalid field name
    #[error("Invalid field name: {0:?}")]
    InvalidFieldName(String),
}
