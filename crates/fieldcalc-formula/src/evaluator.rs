//! Formula evaluator
//!
//! Evaluates formula ASTs to produce values. Evaluation is total: every
//! runtime problem is reported as a [`Value::Error`] and flows on like any
//! other value.

use crate::ast::FormulaExpr;
use crate::functions::coerce::{first_error, to_bool};
use crate::functions::operators::{apply_binary, apply_unary};
use crate::functions::{registry, ErrorMode};
use ahash::AHashMap;
use chrono::{NaiveDateTime, Utc};
use fieldcalc_core::{ErrorKind, FieldId, Value};

/// Read access to the record a formula is evaluated against
pub trait RecordView {
    /// Value of a field on this record (`Null` when unset)
    fn field_value(&self, field: FieldId) -> Value;

    /// Values of `field` on every record reached through link field `link`
    fn linked_values(&self, link: FieldId, field: FieldId) -> Vec<Value>;
}

/// Field values of a single record held in memory
#[derive(Debug, Clone, Default)]
pub struct RecordValues {
    values: AHashMap<FieldId, Value>,
    linked: AHashMap<(FieldId, FieldId), Vec<Value>>,
}

impl RecordValues {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value
    pub fn set(&mut self, field: FieldId, value: impl Into<Value>) -> &mut Self {
        self.values.insert(field, value.into());
        self
    }

    /// Set the values seen through `link` for `field`
    pub fn set_linked(&mut self, link: FieldId, field: FieldId, values: Vec<Value>) -> &mut Self {
        self.linked.insert((link, field), values);
        self
    }
}

impl RecordView for RecordValues {
    fn field_value(&self, field: FieldId) -> Value {
        self.values.get(&field).cloned().unwrap_or_default()
    }

    fn linked_values(&self, link: FieldId, field: FieldId) -> Vec<Value> {
        self.linked.get(&(link, field)).cloned().unwrap_or_default()
    }
}

/// Context for formula evaluation
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Record the formula reads from
    pub record: Option<&'a dyn RecordView>,
    /// Fixed "current time" seen by NOW and TODAY
    pub now: NaiveDateTime,
}

impl<'a> EvaluationContext<'a> {
    /// Create a new evaluation context
    pub fn new(record: &'a dyn RecordView, now: NaiveDateTime) -> Self {
        Self {
            record: Some(record),
            now,
        }
    }

    /// Create a simple context without a record, clocked at the current UTC
    /// time
    pub fn simple() -> Self {
        Self {
            record: None,
            now: Utc::now().naive_utc(),
        }
    }

    /// Replace the clock
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    /// Get a field value from the record
    pub fn field_value(&self, field: FieldId) -> Value {
        self.record
            .map(|r| r.field_value(field))
            .unwrap_or_default()
    }

    /// Get the values seen through a link field
    pub fn linked_values(&self, link: FieldId, field: FieldId) -> Vec<Value> {
        self.record
            .map(|r| r.linked_values(link, field))
            .unwrap_or_default()
    }
}

/// Evaluate a formula expression
pub fn evaluate(expr: &FormulaExpr, ctx: &EvaluationContext) -> Value {
    match expr {
        FormulaExpr::Literal(value) => value.clone(),

        // === References ===
        FormulaExpr::FieldRef(field) => ctx.field_value(*field),
        FormulaExpr::LinkedFieldRef { link, field } => {
            Value::List(ctx.linked_values(*link, *field))
        }

        // === Operators ===
        FormulaExpr::UnaryOp { op, operand } => apply_unary(*op, &evaluate(operand, ctx)),
        FormulaExpr::BinaryOp { op, left, right } => {
            // Both operands are always evaluated
            let left = evaluate(left, ctx);
            let right = evaluate(right, ctx);
            apply_binary(*op, &left, &right)
        }

        FormulaExpr::Conditional {
            condition,
            then,
            otherwise,
        } => match to_bool(&evaluate(condition, ctx)) {
            Ok(true) => evaluate(then, ctx),
            Ok(false) => otherwise
                .as_deref()
                .map_or(Value::Null, |e| evaluate(e, ctx)),
            Err(kind) => Value::Error(kind),
        },

        // === Functions ===
        FormulaExpr::Call { name, args } => evaluate_function(name, args, ctx),
    }
}

/// Evaluate a function call
fn evaluate_function(name: &str, args: &[FormulaExpr], ctx: &EvaluationContext) -> Value {
    let Some(func) = registry().get(name) else {
        return Value::Error(ErrorKind::UnknownFunction);
    };

    // Arity is checked before any argument is evaluated, so a bad count
    // reports ArityMismatch even when an argument would fail
    if !func.accepts(args.len()) {
        return Value::Error(ErrorKind::ArityMismatch);
    }

    // Evaluate arguments
    let evaluated: Vec<Value> = args.iter().map(|arg| evaluate(arg, ctx)).collect();

    if func.errors == ErrorMode::Propagate {
        if let Some(kind) = first_error(&evaluated) {
            return Value::Error(kind);
        }
    }

    (func.implementation)(&evaluated, ctx).unwrap_or_else(Value::Error)
}
