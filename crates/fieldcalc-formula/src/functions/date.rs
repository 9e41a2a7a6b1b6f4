//! Date and time functions
//!
//! NOW and TODAY read the clock captured in the evaluation context, so a
//! formula's result only depends on its inputs and that instant.

use super::coerce::{to_date, to_number, to_text};
use super::FunctionResult;
use crate::evaluator::EvaluationContext;
use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, Duration, Months, NaiveDateTime};
use fieldcalc_core::value::ISO_DATE_FORMAT;
use fieldcalc_core::{ErrorKind, Value};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt::Write;

/// Calendar units accepted by DATE_DIFF and DATE_ADD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl Unit {
    fn parse(name: &str) -> Option<Self> {
        let unit = match name.trim().to_ascii_lowercase().as_str() {
            "ms" | "millisecond" | "milliseconds" => Unit::Milliseconds,
            "s" | "second" | "seconds" => Unit::Seconds,
            "m" | "minute" | "minutes" => Unit::Minutes,
            "h" | "hour" | "hours" => Unit::Hours,
            "d" | "day" | "days" => Unit::Days,
            "w" | "week" | "weeks" => Unit::Weeks,
            "month" | "months" => Unit::Months,
            "y" | "year" | "years" => Unit::Years,
            _ => return None,
        };
        Some(unit)
    }

    /// Length of a fixed-size unit in milliseconds
    fn millis(self) -> Option<i64> {
        match self {
            Unit::Milliseconds => Some(1),
            Unit::Seconds => Some(1_000),
            Unit::Minutes => Some(60_000),
            Unit::Hours => Some(3_600_000),
            Unit::Days => Some(86_400_000),
            Unit::Weeks => Some(604_800_000),
            Unit::Months | Unit::Years => None,
        }
    }
}

fn unit_arg(args: &[Value], idx: usize) -> Result<Unit, ErrorKind> {
    match args.get(idx) {
        Some(v) => Unit::parse(&to_text(v)?).ok_or(ErrorKind::InvalidArgument),
        None => Ok(Unit::Days),
    }
}

/// Whole calendar months from `earlier` to `later` (negative when reversed)
fn months_between(later: NaiveDateTime, earlier: NaiveDateTime) -> i64 {
    if later < earlier {
        return -months_between(earlier, later);
    }
    let mut months = i64::from(later.year() - earlier.year()) * 12
        + i64::from(later.month()) - i64::from(earlier.month());
    // Not a full month yet if the day/time has not been reached
    let reached = (later.day(), later.time()) >= (earlier.day(), earlier.time());
    if !reached {
        months -= 1;
    }
    months
}

/// NOW()
pub fn fn_now(_args: &[Value], ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::Date(ctx.now))
}

/// TODAY() - midnight of the current day
pub fn fn_today(_args: &[Value], ctx: &EvaluationContext) -> FunctionResult {
    ctx.now
        .date()
        .and_hms_opt(0, 0, 0)
        .map(Value::Date)
        .ok_or(ErrorKind::InvalidArgument)
}

/// DATE_DIFF(date1, date2, [unit]) - whole units from date2 to date1
pub fn fn_date_diff(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let later = to_date(&args[0])?;
    let earlier = to_date(&args[1])?;
    let unit = unit_arg(args, 2)?;

    let diff = match unit.millis() {
        Some(ms) => later.signed_duration_since(earlier).num_milliseconds() / ms,
        None if unit == Unit::Years => months_between(later, earlier) / 12,
        None => months_between(later, earlier),
    };
    Ok(Value::from(diff))
}

/// DATE_ADD(date, count, [unit]) or DATE_ADD(date, duration)
pub fn fn_date_add(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let date = to_date(&args[0])?;

    if let (Value::Duration(span), None) = (&args[1], args.get(2)) {
        return date
            .checked_add_signed(*span)
            .map(Value::Date)
            .ok_or(ErrorKind::NumericOverflow);
    }

    let count = to_number(&args[1])?;
    let unit = unit_arg(args, 2)?;

    let result = match unit.millis() {
        Some(ms) => {
            let millis = count
                .checked_mul(Decimal::from(ms))
                .and_then(|m| m.trunc().to_i64())
                .ok_or(ErrorKind::NumericOverflow)?;
            let span = Duration::try_milliseconds(millis).ok_or(ErrorKind::NumericOverflow)?;
            date.checked_add_signed(span)
        }
        None => {
            let per = if unit == Unit::Years { 12 } else { 1 };
            let months = count
                .trunc()
                .to_i64()
                .and_then(|c| c.checked_mul(per))
                .ok_or(ErrorKind::NumericOverflow)?;
            let step = Months::new(
                u32::try_from(months.unsigned_abs()).map_err(|_| ErrorKind::NumericOverflow)?,
            );
            if months >= 0 {
                date.checked_add_months(step)
            } else {
                date.checked_sub_months(step)
            }
        }
    };

    result.map(Value::Date).ok_or(ErrorKind::NumericOverflow)
}

/// FORMAT_DATE(date, [format]) - strftime-style format, ISO-8601 by default
pub fn fn_format_date(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    let date = to_date(&args[0])?;
    let format = match args.get(1) {
        Some(v) => to_text(v)?,
        None => ISO_DATE_FORMAT.to_string(),
    };

    let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ErrorKind::InvalidArgument);
    }
    // Specifiers that need an offset (%z, %Z) fail while formatting a naive date
    let mut out = String::new();
    write!(out, "{}", date.format_with_items(items.iter()))
        .map_err(|_| ErrorKind::InvalidArgument)?;
    Ok(Value::Text(out))
}

/// YEAR(date)
pub fn fn_year(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::from(i64::from(to_date(&args[0])?.year())))
}

/// MONTH(date)
pub fn fn_month(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::from(i64::from(to_date(&args[0])?.month())))
}

/// DAY(date)
pub fn fn_day(args: &[Value], _ctx: &EvaluationContext) -> FunctionResult {
    Ok(Value::from(i64::from(to_date(&args[0])?.day())))
}
