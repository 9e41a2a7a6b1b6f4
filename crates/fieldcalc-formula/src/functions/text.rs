//! Text functions

use super::coerce::{flatten, parse_number, to_count, to_text};
use super::FunctionResult;
use crate::evaluator::EvaluationContext;
use fieldcalc_core::{ErrorKind, Value};
use lazy_regex::regex;

fn take_left(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn take_right(s: &str, n: usize) -> String {
    let len = s.chars().count();
    if n >= len {
        return s.to_string();
    }
    s.chars().skip(len - n).collect()
}

fn take_mid(s: &str, start_1based: usize, n: usize) -> String {
    s.chars().skip(start_1based - 1).take(n).collect()
}

/// Optional count argument, defaulting to 1
fn count_arg(args: &[Value], idx: usize) -> Result<usize, ErrorKind> {
    args.get(idx).map_or(Ok(1), to_count)
}

/// 1-based position argument; zero is rejected
fn position_arg(value: &Value) -> Result<usize, ErrorKind> {
    match to_count(value)? {
        0 => Err(ErrorKind::InvalidArgument),
        pos => Ok(pos),
    }
}

/// CONCATENATE(value, ...)
pub fn fn_concatenate(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let mut out = String::new();
    for arg in args {
        out.push_str(&to_text(arg)?);
    }
    Ok(Value::Text(out))
}

/// LEFT(text, [num_chars])
pub fn fn_left(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let s = to_text(&args[0])?;
    Ok(Value::Text(take_left(&s, count_arg(args, 1)?)))
}

/// RIGHT(text, [num_chars])
pub fn fn_right(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let s = to_text(&args[0])?;
    Ok(Value::Text(take_right(&s, count_arg(args, 1)?)))
}

/// MID(text, start, num_chars)
pub fn fn_mid(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let s = to_text(&args[0])?;
    let start = position_arg(&args[1])?;
    let n = to_count(&args[2])?;
    Ok(Value::Text(take_mid(&s, start, n)))
}

/// UPPER(text)
pub fn fn_upper(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Text(to_text(&args[0])?.to_uppercase()))
}

/// LOWER(text)
pub fn fn_lower(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Text(to_text(&args[0])?.to_lowercase()))
}

/// LEN(text)
pub fn fn_len(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let len = to_text(&args[0])?.chars().count();
    Ok(Value::from(len as i64))
}

/// TRIM(text) - strip both ends and collapse inner whitespace runs
pub fn fn_trim(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let s = to_text(&args[0])?;
    Ok(Value::Text(regex!(r"\s+").replace_all(s.trim(), " ").into_owned()))
}

/// FIND(needle, haystack, [start]) - 1-based position, 0 when absent
pub fn fn_find(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let needle = to_text(&args[0])?;
    let haystack = to_text(&args[1])?;
    let start = match args.get(2) {
        Some(v) => position_arg(v)?,
        None => 1,
    };

    let byte_start = match haystack.char_indices().nth(start - 1) {
        Some((idx, _)) => idx,
        None if start - 1 == haystack.chars().count() => haystack.len(),
        None => return Ok(Value::from(0)),
    };

    let found = haystack[byte_start..]
        .find(&needle)
        .map(|byte_idx| haystack[..byte_start + byte_idx].chars().count() + 1)
        .unwrap_or(0);
    Ok(Value::from(found as i64))
}

/// SUBSTITUTE(text, old, new, [occurrence])
pub fn fn_substitute(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let text = to_text(&args[0])?;
    let old = to_text(&args[1])?;
    let new = to_text(&args[2])?;

    if old.is_empty() {
        return Ok(Value::Text(text));
    }

    match args.get(3) {
        None => Ok(Value::Text(text.replace(&old, &new))),
        Some(v) => {
            let nth = position_arg(v)?;
            match text.match_indices(&old).nth(nth - 1) {
                Some((idx, _)) => {
                    let mut out = String::with_capacity(text.len());
                    out.push_str(&text[..idx]);
                    out.push_str(&new);
                    out.push_str(&text[idx + old.len()..]);
                    Ok(Value::Text(out))
                }
                None => Ok(Value::Text(text)),
            }
        }
    }
}

/// REPLACE(text, start, num_chars, new_text)
pub fn fn_replace(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let text = to_text(&args[0])?;
    let start = position_arg(&args[1])?;
    let n = to_count(&args[2])?;
    let new = to_text(&args[3])?;

    let mut out: String = text.chars().take(start - 1).collect();
    out.push_str(&new);
    out.extend(text.chars().skip(start - 1 + n));
    Ok(Value::Text(out))
}

/// VALUE(text) - parse text as a number
pub fn fn_value(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    match &args[0] {
        Value::Number(n) => Ok(Value::Number(*n)),
        other => parse_number(&to_text(other)?)
            .map(Value::Number)
            .ok_or(ErrorKind::TypeMismatch),
    }
}

/// ARRAYJOIN(values, [separator]) - join lookup values, skipping blanks
pub fn fn_arrayjoin(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let separator = match args.get(1) {
        Some(v) => to_text(v)?,
        None => ", ".to_string(),
    };
    let parts = flatten(&args[..1])
        .filter(|v| !v.is_blank())
        .map(to_text)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Text(parts.join(&separator)))
}
