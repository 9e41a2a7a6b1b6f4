//! Operator semantics
//!
//! Operators never fail: type problems, division by zero and overflow all
//! come back as [`Value::Error`].

use super::coerce::{parse_number, scalar, to_number, to_text};
use crate::ast::{BinaryOperator, UnaryOperator};
use fieldcalc_core::{ErrorKind, Value};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Apply a unary operator to an evaluated operand
pub fn apply_unary(op: UnaryOperator, operand: &Value) -> Value {
    match op {
        UnaryOperator::Negate => lift(negate(operand)),
    }
}

fn negate(operand: &Value) -> Result<Value, ErrorKind> {
    match scalar(operand)? {
        Value::Error(e) => Err(*e),
        Value::Null => Err(ErrorKind::NullOperand),
        Value::Duration(d) => Ok(Value::Duration(-*d)),
        other => Ok(Value::Number(-to_number(other)?)),
    }
}

/// Apply a binary operator to evaluated operands
pub fn apply_binary(op: BinaryOperator, left: &Value, right: &Value) -> Value {
    // Propagate errors, left first
    if let Some(e) = left.error().or_else(|| right.error()) {
        return Value::Error(e);
    }

    if op == BinaryOperator::Concat {
        return lift(concat(left, right));
    }

    let (left, right) = match (scalar(left), scalar(right)) {
        (Ok(l), Ok(r)) => (l, r),
        (Err(e), _) | (_, Err(e)) => return Value::Error(e),
    };
    if let Some(e) = left.error().or_else(|| right.error()) {
        return Value::Error(e);
    }

    match op {
        BinaryOperator::Add => lift(add(left, right)),
        BinaryOperator::Subtract => lift(subtract(left, right)),
        BinaryOperator::Multiply => lift(arithmetic(left, right, |l, r| {
            l.checked_mul(r).ok_or(ErrorKind::NumericOverflow)
        })),
        BinaryOperator::Divide => lift(arithmetic(left, right, |l, r| {
            if r.is_zero() {
                return Err(ErrorKind::DivisionByZero);
            }
            l.checked_div(r).ok_or(ErrorKind::NumericOverflow)
        })),
        BinaryOperator::Concat => lift(concat(left, right)),
        BinaryOperator::Equal => Value::Boolean(values_equal(left, right)),
        BinaryOperator::NotEqual => Value::Boolean(!values_equal(left, right)),
        BinaryOperator::LessThan => lift(compare(left, right).map(|o| o.is_lt().into())),
        BinaryOperator::LessEqual => lift(compare(left, right).map(|o| o.is_le().into())),
        BinaryOperator::GreaterThan => lift(compare(left, right).map(|o| o.is_gt().into())),
        BinaryOperator::GreaterEqual => lift(compare(left, right).map(|o| o.is_ge().into())),
    }
}

fn lift(result: Result<Value, ErrorKind>) -> Value {
    result.unwrap_or_else(Value::Error)
}

fn concat(left: &Value, right: &Value) -> Result<Value, ErrorKind> {
    let mut text = to_text(left)?;
    text.push_str(&to_text(right)?);
    Ok(Value::Text(text))
}

fn arithmetic(
    left: &Value,
    right: &Value,
    f: impl FnOnce(Decimal, Decimal) -> Result<Decimal, ErrorKind>,
) -> Result<Value, ErrorKind> {
    if left.is_null() || right.is_null() {
        return Err(ErrorKind::NullOperand);
    }
    f(to_number(left)?, to_number(right)?).map(Value::Number)
}

fn add(left: &Value, right: &Value) -> Result<Value, ErrorKind> {
    match (left, right) {
        (Value::Date(d), Value::Duration(span)) | (Value::Duration(span), Value::Date(d)) => d
            .checked_add_signed(*span)
            .map(Value::Date)
            .ok_or(ErrorKind::NumericOverflow),
        (Value::Duration(a), Value::Duration(b)) => a
            .checked_add(b)
            .map(Value::Duration)
            .ok_or(ErrorKind::NumericOverflow),
        (Value::Date(_), _) | (_, Value::Date(_)) => Err(ErrorKind::TypeMismatch),
        _ => arithmetic(left, right, |l, r| {
            l.checked_add(r).ok_or(ErrorKind::NumericOverflow)
        }),
    }
}

fn subtract(left: &Value, right: &Value) -> Result<Value, ErrorKind> {
    match (left, right) {
        (Value::Date(d), Value::Duration(span)) => d
            .checked_sub_signed(*span)
            .map(Value::Date)
            .ok_or(ErrorKind::NumericOverflow),
        (Value::Date(a), Value::Date(b)) => Ok(Value::Duration(a.signed_duration_since(*b))),
        (Value::Duration(a), Value::Duration(b)) => a
            .checked_sub(b)
            .map(Value::Duration)
            .ok_or(ErrorKind::NumericOverflow),
        (Value::Date(_), _) | (_, Value::Date(_)) => Err(ErrorKind::TypeMismatch),
        _ => arithmetic(left, right, |l, r| {
            l.checked_sub(r).ok_or(ErrorKind::NumericOverflow)
        }),
    }
}

/// Equality between scalar values; mismatched types are simply unequal
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, Value::Text(s)) | (Value::Text(s), Value::Null) => s.is_empty(),
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Number(n), Value::Text(s)) | (Value::Text(s), Value::Number(n)) => {
            parse_number(s).map_or(false, |parsed| parsed == *n)
        }
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Date(a), Value::Date(b)) => a == b,
        (Value::Duration(a), Value::Duration(b)) => a == b,
        _ => false,
    }
}

/// Ordering between scalar values of the same kind
pub fn compare(left: &Value, right: &Value) -> Result<Ordering, ErrorKind> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Err(ErrorKind::NullOperand),
        (Value::Number(a), Value::Number(b)) => Ok(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
        (Value::Duration(a), Value::Duration(b)) => Ok(a.cmp(b)),
        _ => Err(ErrorKind::TypeMismatch),
    }
}
