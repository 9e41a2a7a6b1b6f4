//! # fieldcalc
//!
//! Formula fields for record stores: compile formulas that read other fields
//! (including fields of linked records), keep a dependency graph free of
//! cycles, and recompute exactly what a change affects.
//!
//! ## Features
//!
//! - Typed values with decimal numbers, dates and durations
//! - Formula compilation with field-name resolution and resource limits
//! - Cycle rejection at formula-save time with the offending path
//! - Dependency-ordered recompute batches, across linked records
//! - Cached reads plus a guaranteed-fresh read path
//! - Parallel recompute of independent records (`parallel` feature)
//!
//! ## Example
//!
//! ```rust
//! use fieldcalc::prelude::*;
//!
//! let mut schema = Schema::new();
//! let items = schema.add_table("Items");
//! let price = schema.add_field(items, "Price", FieldKind::Plain).unwrap();
//! let qty = schema.add_field(items, "Quantity", FieldKind::Plain).unwrap();
//! let total = schema.add_field(items, "Total", FieldKind::Formula).unwrap();
//!
//! let mut store = MemoryStore::new();
//! let rec = store.add_record(items);
//! store.set_value(rec, price, Value::from(3));
//! store.set_value(rec, qty, Value::from(4));
//!
//! let engine = FormulaEngine::new(schema, store);
//! engine.define_formula(total, "{Price} * {Quantity}").unwrap();
//! assert_eq!(engine.read_value(rec, total), Value::from(12));
//! ```

pub mod cache;
pub mod calculation;
pub mod prelude;
mod scheduler;
mod view;

// Re-export calculation types
pub use cache::{CachedValue, ValueCache};
pub use calculation::{CalculationOptions, FormulaEngine, RecomputeBatch, RecomputedValue};

// Re-export core types
pub use fieldcalc_core::{
    Error, ErrorKind, FieldDef, FieldId, FieldKind, FieldResolver, MemoryStore, RecordId,
    RecordStore, Result, Schema, TableId, Value,
};

// Re-export formula types
pub use fieldcalc_formula::{
    compile, compile_with_limits, evaluate, extract_references, get_dependencies, parse_formula,
    registry, CompileLimits, CompiledFormula, DependencyDiff, EvaluationContext, FormulaError,
    FormulaExpr, FormulaResult, FunctionDef, LimitKind, RecordValues, RecordView, Reference,
    LIBRARY_VERSION,
};
