//! Value types flowing through formula evaluation

use chrono::{Duration, NaiveDateTime};
use rust_decimal::Decimal;
use std::fmt;

/// A typed field value.
///
/// This is the only type flowing through evaluation: field values supplied by a
/// record store, literals in a formula, function arguments and results are all
/// `Value`s. Evaluation errors are values too (see [`ErrorKind`]) so they can be
/// stored as a field's result and propagate through downstream formulas.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "type", content = "value", rename_all = "snake_case")
)]
pub enum Value {
    /// Blank value
    #[default]
    Null,

    /// Boolean value
    Boolean(bool),

    /// Decimal number
    Number(Decimal),

    /// Text value
    Text(String),

    /// Date and time (no time zone)
    Date(NaiveDateTime),

    /// Signed span of time
    Duration(#[cfg_attr(feature = "serde", serde(with = "duration_millis"))] Duration),

    /// Values gathered from linked records by a lookup
    List(Vec<Value>),

    /// Evaluation error
    Error(ErrorKind),
}

/// Runtime evaluation errors, stored as [`Value::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ErrorKind {
    /// Division (or modulo) by zero
    DivisionByZero,
    /// Operand of the wrong type for the operator or function
    TypeMismatch,
    /// Call to a function that is not in the library
    UnknownFunction,
    /// Wrong number of arguments for a function
    ArityMismatch,
    /// Blank operand where a value is required
    NullOperand,
    /// Argument of the right type but outside the accepted domain
    InvalidArgument,
    /// Decimal arithmetic overflowed
    NumericOverflow,
}

impl ErrorKind {
    /// Short display code shown to users in place of a value
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::DivisionByZero => "#DIV/0!",
            ErrorKind::TypeMismatch => "#TYPE!",
            ErrorKind::UnknownFunction => "#NAME?",
            ErrorKind::ArityMismatch => "#ARGS!",
            ErrorKind::NullOperand => "#NULL!",
            ErrorKind::InvalidArgument => "#ARG!",
            ErrorKind::NumericOverflow => "#NUM!",
        }
    }

    /// Parse a display code back into an error kind
    pub fn from_code(code: &str) -> Option<Self> {
        [
            ErrorKind::DivisionByZero,
            ErrorKind::TypeMismatch,
            ErrorKind::UnknownFunction,
            ErrorKind::ArityMismatch,
            ErrorKind::NullOperand,
            ErrorKind::InvalidArgument,
            ErrorKind::NumericOverflow,
        ]
        .into_iter()
        .find(|kind| kind.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Value {
    /// Create a new text value
    pub fn text<S: Into<String>>(s: S) -> Self {
        Value::Text(s.into())
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Get the error if this is one
    pub fn error(&self) -> Option<ErrorKind> {
        match self {
            Value::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// Check if the value is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Blank means null, empty text, or an empty lookup list
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }
}

/// Format a duration as an ISO-8601 duration (`PT1H30M`, `-PT0.5S`, `PT0S`)
pub fn format_duration(d: &Duration) -> String {
    let mut millis = d.num_milliseconds();
    let mut out = String::new();
    if millis < 0 {
        out.push('-');
        millis = -millis;
    }
    out.push_str("PT");

    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let secs = (millis / 1000) % 60;
    let frac = millis % 1000;

    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if secs > 0 || frac > 0 || (hours == 0 && minutes == 0) {
        if frac > 0 {
            let frac = format!("{frac:03}");
            out.push_str(&format!("{secs}.{}S", frac.trim_end_matches('0')));
        } else {
            out.push_str(&format!("{secs}S"));
        }
    }
    out
}

/// ISO-8601 date format used for canonical stringification
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

impl fmt::Display for Value {
    /// Canonical stringification used by concatenation and text functions
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Number(n) => write!(f, "{}", n.normalize()),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format(ISO_DATE_FORMAT)),
            Value::Duration(d) => f.write_str(&format_duration(d)),
            Value::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Error(e) => write!(f, "{e}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Decimal::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(Decimal::from(n))
    }
}

impl From<Decimal> for Value {
    fn from(n: Decimal) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Value::Duration(d)
    }
}

impl From<ErrorKind> for Value {
    fn from(e: ErrorKind) -> Self {
        Value::Error(e)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(feature = "serde")]
mod duration_millis {
    use chrono::Duration;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(d.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Duration::try_milliseconds(millis)
            .ok_or_else(|| D::Error::custom(format!("duration out of range: {millis}ms")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn test_display_canonical() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(Value::Boolean(false).to_string(), "false");
        assert_eq!(
            Value::Number(Decimal::from_str("50.0").unwrap()).to_string(),
            "50"
        );
        assert_eq!(
            Value::Number(Decimal::from_str("12.50").unwrap()).to_string(),
            "12.5"
        );
        let date = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap();
        assert_eq!(Value::Date(date).to_string(), "2024-03-09T14:05:00");
        assert_eq!(
            Value::List(vec![Value::from(1), Value::text("a")]).to_string(),
            "1, a"
        );
        assert_eq!(Value::Error(ErrorKind::DivisionByZero).to_string(), "#DIV/0!");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::zero()), "PT0S");
        assert_eq!(format_duration(&Duration::minutes(90)), "PT1H30M");
        assert_eq!(format_duration(&Duration::milliseconds(-500)), "-PT0.5S");
        assert_eq!(format_duration(&Duration::seconds(3661)), "PT1H1M1S");
    }

    #[test]
    fn test_is_blank() {
        assert!(Value::Null.is_blank());
        assert!(Value::text("").is_blank());
        assert!(Value::List(vec![]).is_blank());
        assert!(!Value::from(0).is_blank());
        assert!(!Value::Error(ErrorKind::TypeMismatch).is_blank());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorKind::from_code("#div/0!"), Some(ErrorKind::DivisionByZero));
        assert_eq!(ErrorKind::from_code("#BOGUS"), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_duration_serde() {
        let value = Value::Duration(Duration::minutes(90));
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"type":"duration","value":5400000}"#);
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), value);

        let out_of_range = format!(r#"{{"type":"duration","value":{}}}"#, i64::MIN);
        assert!(serde_json::from_str::<Value>(&out_of_range).is_err());
    }

    #[test]
    fn test_numeric_equality_ignores_scale() {
        assert_eq!(
            Value::Number(Decimal::from_str("50.0").unwrap()),
            Value::from(50)
        );
    }
}
