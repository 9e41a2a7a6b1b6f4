//! # fieldcalc-formula
//!
//! Formula compiler and evaluator for fieldcalc.
//!
//! This crate provides:
//! - Tokenizing and parsing (text → AST), with field names resolved to ids
//! - Printing an AST back to canonical source
//! - Dependency extraction and the field dependency graph
//! - Evaluation (AST + record → value) over a closed function library
//!
//! ## Example
//!
//! ```rust
//! use fieldcalc_core::{FieldKind, Schema, Value};
//! use fieldcalc_formula::{compile, evaluate, EvaluationContext, RecordValues};
//!
//! let mut schema = Schema::new();
//! let t = schema.add_table("Items");
//! let price = schema.add_field(t, "Price", FieldKind::Plain).unwrap();
//! let qty = schema.add_field(t, "Quantity", FieldKind::Plain).unwrap();
//!
//! let formula = compile("{Price} * {Quantity}", &schema.resolver(t)).unwrap();
//!
//! let mut record = RecordValues::new();
//! record.set(price, 12).set(qty, 4);
//! let ctx = EvaluationContext::simple();
//! let ctx = EvaluationContext { record: Some(&record), ..ctx };
//! assert_eq!(evaluate(&formula.root, &ctx), Value::from(48));
//! ```

pub mod ast;
pub mod compile;
pub mod dependency;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOperator, FormulaExpr, UnaryOperator};
pub use compile::{compile, compile_with_limits, get_dependencies, CompileLimits, CompiledFormula};
pub use dependency::{
    extract_dependencies, extract_references, DependencyDiff, DependencyGraph, EdgeKind, Reference,
};
pub use error::{FormulaError, FormulaResult, LimitKind};
pub use evaluator::{evaluate, EvaluationContext, RecordValues, RecordView};
pub use functions::{registry, FunctionDef, FunctionRegistry, LIBRARY_VERSION};
pub use parser::{parse_formula, parse_formula_with_limits};
