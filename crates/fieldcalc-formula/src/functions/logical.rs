//! Logical functions

use super::coerce::{first_error, flatten, to_bool};
use super::FunctionResult;
use crate::evaluator::EvaluationContext;
use fieldcalc_core::{ErrorKind, Value};

/// IF(condition, then, [else])
///
/// Catalog entry only. The parser lowers every IF call with an accepted
/// argument count to a conditional, so this never sees a valid call.
pub fn fn_if(_args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Err(ErrorKind::ArityMismatch)
}

/// AND(logical, ...)
pub fn fn_and(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let mut result = true;
    for v in flatten(args) {
        result &= to_bool(v)?;
    }
    Ok(Value::Boolean(result))
}

/// OR(logical, ...)
pub fn fn_or(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let mut result = false;
    for v in flatten(args) {
        result |= to_bool(v)?;
    }
    Ok(Value::Boolean(result))
}

/// NOT(logical)
pub fn fn_not(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Boolean(!to_bool(&args[0])?))
}

/// ISBLANK(value) - errors are not blank
pub fn fn_isblank(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Boolean(args[0].is_blank()))
}

/// ISERROR(value)
pub fn fn_iserror(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Boolean(first_error(&args[..1]).is_some()))
}

/// IFERROR(value, fallback)
pub fn fn_iferror(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    if first_error(&args[..1]).is_some() {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

/// BLANK()
pub fn fn_blank(_args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Null)
}

/// TRUE()
pub fn fn_true(_args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Boolean(true))
}

/// FALSE()
pub fn fn_false(_args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Boolean(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldcalc_core::ErrorKind;
    use pretty_assertions::assert_eq;

    fn call(f: crate::functions::FunctionImpl, args: &[Value]) -> Value {
        f(args, &EvaluationContext::simple()).unwrap_or_else(Value::Error)
    }

    const T: Value = Value::Boolean(true);
    const F: Value = Value::Boolean(false);

    #[test]
    fn test_and_or_not() {
        assert_eq!(call(fn_and, &[T, T]), T);
        assert_eq!(call(fn_and, &[T, F]), F);
        assert_eq!(call(fn_or, &[F, Value::from(1)]), T);
        assert_eq!(call(fn_or, &[Value::Null]), F);
        assert_eq!(call(fn_not, &[Value::text("false")]), T);
        assert_eq!(
            call(fn_and, &[Value::text("maybe")]),
            Value::Error(ErrorKind::TypeMismatch)
        );
    }

    #[test]
    fn test_absorbing_functions() {
        let err = Value::Error(ErrorKind::DivisionByZero);
        assert_eq!(call(fn_isblank, &[Value::Null]), T);
        assert_eq!(call(fn_isblank, &[Value::text("")]), T);
        assert_eq!(call(fn_isblank, &[err.clone()]), F);
        assert_eq!(call(fn_iserror, &[err.clone()]), T);
        assert_eq!(call(fn_iserror, &[Value::List(vec![err.clone()])]), T);
        assert_eq!(call(fn_iserror, &[Value::from(1)]), F);
        assert_eq!(call(fn_iferror, &[err, Value::from(0)]), Value::from(0));
        assert_eq!(call(fn_iferror, &[Value::from(5), Value::from(0)]), Value::from(5));
    }

    #[test]
    fn test_if_and_constants() {
        assert_eq!(
            call(fn_if, &[T, Value::from(1), Value::from(2)]),
            Value::Error(ErrorKind::ArityMismatch)
        );
        assert_eq!(call(fn_blank, &[]), Value::Null);
        assert_eq!(call(fn_true, &[]), T);
        assert_eq!(call(fn_false, &[]), F);
    }
}
