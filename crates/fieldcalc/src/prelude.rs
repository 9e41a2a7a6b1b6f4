//! Prelude module - common imports for fieldcalc users
//!
//! ```rust
//! use fieldcalc::prelude::*;
//! ```

pub use crate::{
    // Calculation types
    CalculationOptions,
    CompiledFormula,
    ErrorKind,
    FieldId,
    FieldKind,
    // Errors
    FormulaError,
    FormulaEngine,
    FormulaResult,
    MemoryStore,
    RecomputeBatch,
    RecordId,
    RecordStore,
    // Schema and values
    Schema,
    TableId,
    Value,
};
