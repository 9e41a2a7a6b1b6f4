//! Math functions

use super::coerce::{flatten, to_integer, to_number};
use super::FunctionResult;
use crate::evaluator::EvaluationContext;
use fieldcalc_core::{ErrorKind, Value};
use rust_decimal::{Decimal, RoundingStrategy};

/// Numeric values of the arguments, lookup lists expanded and blanks skipped
fn numbers(args: &[Value]) -> Result<Vec<Decimal>, ErrorKind> {
    flatten(args)
        .filter(|v| !v.is_blank())
        .map(to_number)
        .collect()
}

/// SUM(number, ...)
pub fn fn_sum(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let mut sum = Decimal::ZERO;
    for n in numbers(args)? {
        sum = sum.checked_add(n).ok_or(ErrorKind::NumericOverflow)?;
    }
    Ok(Value::Number(sum))
}

/// AVERAGE(number, ...)
pub fn fn_average(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let values = numbers(args)?;
    if values.is_empty() {
        return Err(ErrorKind::DivisionByZero);
    }
    let mut sum = Decimal::ZERO;
    for n in &values {
        sum = sum.checked_add(*n).ok_or(ErrorKind::NumericOverflow)?;
    }
    sum.checked_div(Decimal::from(values.len()))
        .map(Value::Number)
        .ok_or(ErrorKind::NumericOverflow)
}

/// MIN(number, ...) - blank when there is nothing to compare
pub fn fn_min(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(numbers(args)?
        .into_iter()
        .min()
        .map_or(Value::Null, Value::Number))
}

/// MAX(number, ...) - blank when there is nothing to compare
pub fn fn_max(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(numbers(args)?
        .into_iter()
        .max()
        .map_or(Value::Null, Value::Number))
}

/// COUNT(value, ...) - number of numeric values
pub fn fn_count(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let count = flatten(args)
        .filter(|v| matches!(v, Value::Number(_)))
        .count();
    Ok(Value::from(count as i64))
}

/// ABS(number)
pub fn fn_abs(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Number(to_number(&args[0])?.abs()))
}

/// ROUND(number, [digits]) - half away from zero; negative digits round
/// to tens, hundreds, ...
pub fn fn_round(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let n = to_number(&args[0])?;
    let digits = match args.get(1) {
        Some(v) => to_integer(v)?,
        None => 0,
    };

    if digits >= 0 {
        let dp = u32::try_from(digits)
            .map_err(|_| ErrorKind::InvalidArgument)?
            .min(28);
        return Ok(Value::Number(
            n.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
        ));
    }

    let mut factor = Decimal::ONE;
    for _ in 0..digits.unsigned_abs().min(29) {
        factor = factor
            .checked_mul(Decimal::TEN)
            .ok_or(ErrorKind::NumericOverflow)?;
    }
    let scaled = (n / factor).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    scaled
        .checked_mul(factor)
        .map(Value::Number)
        .ok_or(ErrorKind::NumericOverflow)
}

/// MOD(number, divisor) - result takes the sign of the divisor
pub fn fn_mod(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let n = to_number(&args[0])?;
    let d = to_number(&args[1])?;
    if d.is_zero() {
        return Err(ErrorKind::DivisionByZero);
    }
    let mut r = n.checked_rem(d).ok_or(ErrorKind::NumericOverflow)?;
    if !r.is_zero() && (r.is_sign_negative() != d.is_sign_negative()) {
        r += d;
    }
    Ok(Value::Number(r))
}

/// INT(number) - round down to the nearest integer
pub fn fn_int(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Number(to_number(&args[0])?.floor()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn call(f: crate::functions::FunctionImpl, args: &[Value]) -> Value {
        f(args, &EvaluationContext::simple()).unwrap_or_else(Value::Error)
    }

    fn d(s: &str) -> Value {
        Value::Number(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_sum_and_average() {
        let args = [Value::from(1), Value::from(2), Value::from(3)];
        assert_eq!(call(fn_sum, &args), Value::from(6));
        assert_eq!(call(fn_average, &args), Value::from(2));

        // Lookup lists expand, blanks are skipped
        let list = Value::List(vec![Value::from(10), Value::Null, Value::from(20)]);
        assert_eq!(call(fn_sum, &[list.clone(), Value::from(1)]), Value::from(31));
        assert_eq!(call(fn_average, &[list]), Value::from(15));

        assert_eq!(call(fn_average, &[Value::Null]), Value::Error(ErrorKind::DivisionByZero));
        assert_eq!(
            call(fn_sum, &[Value::text("abc")]),
            Value::Error(ErrorKind::TypeMismatch)
        );
        assert_eq!(call(fn_sum, &[Value::text("2.5"), Value::from(1)]), d("3.5"));
    }

    #[test]
    fn test_min_max_count() {
        let args = [Value::from(4), Value::from(-2), Value::from(9)];
        assert_eq!(call(fn_min, &args), Value::from(-2));
        assert_eq!(call(fn_max, &args), Value::from(9));
        assert_eq!(call(fn_max, &[Value::List(vec![])]), Value::Null);
        assert_eq!(
            call(fn_count, &[Value::from(1), Value::text("x"), Value::List(vec![Value::from(2)])]),
            Value::from(2)
        );
    }

    #[test]
    fn test_round() {
        assert_eq!(call(fn_round, &[d("2.5")]), Value::from(3));
        assert_eq!(call(fn_round, &[d("-2.5")]), Value::from(-3));
        assert_eq!(call(fn_round, &[d("3.14159"), Value::from(2)]), d("3.14"));
        assert_eq!(call(fn_round, &[d("1250"), Value::from(-2)]), Value::from(1300));
    }

    #[test]
    fn test_mod_abs_int() {
        assert_eq!(call(fn_mod, &[Value::from(7), Value::from(3)]), Value::from(1));
        assert_eq!(call(fn_mod, &[Value::from(-7), Value::from(3)]), Value::from(2));
        assert_eq!(call(fn_mod, &[Value::from(7), Value::from(-3)]), Value::from(-2));
        assert_eq!(
            call(fn_mod, &[Value::from(1), Value::from(0)]),
            Value::Error(ErrorKind::DivisionByZero)
        );
        assert_eq!(call(fn_abs, &[Value::from(-4)]), Value::from(4));
        assert_eq!(call(fn_int, &[d("-1.5")]), Value::from(-2));
        assert_eq!(call(fn_int, &[d("1.5")]), Value::from(1));
    }
}
