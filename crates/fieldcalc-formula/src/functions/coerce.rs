//! Value coercion rules shared by operators and functions

use chrono::{NaiveDate, NaiveDateTime};
use fieldcalc_core::value::ISO_DATE_FORMAT;
use fieldcalc_core::{ErrorKind, Value};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

static NULL: Value = Value::Null;

/// Collapse a lookup list used where a single value is expected.
///
/// An empty list is `Null`, a one-element list is its element, anything
/// longer is a `TypeMismatch`.
pub fn scalar(value: &Value) -> Result<&Value, ErrorKind> {
    match value {
        Value::List(items) => match items.as_slice() {
            [] => Ok(&NULL),
            [single] => scalar(single),
            _ => Err(ErrorKind::TypeMismatch),
        },
        other => Ok(other),
    }
}

/// Parse text as a decimal number (surrounding whitespace ignored)
pub fn parse_number(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Coerce to a number
pub fn to_number(value: &Value) -> Result<Decimal, ErrorKind> {
    match scalar(value)? {
        Value::Number(n) => Ok(*n),
        Value::Boolean(b) => Ok(if *b { Decimal::ONE } else { Decimal::ZERO }),
        Value::Text(s) => parse_number(s).ok_or(ErrorKind::TypeMismatch),
        Value::Null => Err(ErrorKind::NullOperand),
        Value::Error(e) => Err(*e),
        _ => Err(ErrorKind::TypeMismatch),
    }
}

/// Coerce to a whole number, truncating toward zero
pub fn to_integer(value: &Value) -> Result<i64, ErrorKind> {
    to_number(value)?
        .trunc()
        .to_i64()
        .ok_or(ErrorKind::NumericOverflow)
}

/// Coerce to a non-negative count (lengths, positions)
pub fn to_count(value: &Value) -> Result<usize, ErrorKind> {
    usize::try_from(to_integer(value)?).map_err(|_| ErrorKind::InvalidArgument)
}

/// Coerce to text using the canonical stringification
pub fn to_text(value: &Value) -> Result<String, ErrorKind> {
    match value {
        Value::Error(e) => Err(*e),
        Value::List(items) => {
            if let Some(e) = first_error(items) {
                return Err(e);
            }
            Ok(value.to_string())
        }
        other => Ok(other.to_string()),
    }
}

/// Coerce to a boolean
pub fn to_bool(value: &Value) -> Result<bool, ErrorKind> {
    match scalar(value)? {
        Value::Boolean(b) => Ok(*b),
        Value::Number(n) => Ok(!n.is_zero()),
        Value::Text(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::Text(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        Value::Null => Ok(false),
        Value::Error(e) => Err(*e),
        _ => Err(ErrorKind::TypeMismatch),
    }
}

/// Parse `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, ISO_DATE_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Coerce to a date
pub fn to_date(value: &Value) -> Result<NaiveDateTime, ErrorKind> {
    match scalar(value)? {
        Value::Date(d) => Ok(*d),
        Value::Text(s) => parse_date(s).ok_or(ErrorKind::TypeMismatch),
        Value::Null => Err(ErrorKind::NullOperand),
        Value::Error(e) => Err(*e),
        _ => Err(ErrorKind::TypeMismatch),
    }
}

/// Arguments with lookup lists expanded one level
pub fn flatten(args: &[Value]) -> impl Iterator<Item = &Value> {
    args.iter().flat_map(|arg| match arg {
        Value::List(items) => items.iter(),
        other => std::slice::from_ref(other).iter(),
    })
}

/// First error among the arguments (looking inside lookup lists)
pub fn first_error(args: &[Value]) -> Option<ErrorKind> {
    flatten(args).find_map(Value::error)
}
