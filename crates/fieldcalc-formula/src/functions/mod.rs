//! Built-in function library
//!
//! The catalog is closed and versioned: formulas are validated against
//! [`LIBRARY_VERSION`] and a function is only ever added in a new version.

pub mod coerce;
pub mod date;
pub mod logical;
pub mod math;
pub mod operators;
pub mod text;

use crate::evaluator::EvaluationContext;
use ahash::AHashMap;
use fieldcalc_core::{ErrorKind, Value};
use std::fmt;
use std::sync::OnceLock;

/// Version of the function catalog
pub const LIBRARY_VERSION: u32 = 1;

/// Result of a function implementation; `Err` becomes a [`Value::Error`]
pub type FunctionResult = Result<Value, ErrorKind>;

/// Function implementation signature
///
/// Implementations receive already evaluated arguments. Unless the function
/// absorbs errors, none of the arguments is an error value.
pub type FunctionImpl = fn(&[Value], &EvaluationContext) -> FunctionResult;

/// What a function expects in an argument position
///
/// Only used to render [`FunctionDef::signature`]. Arguments are not checked
/// against it; each implementation coerces its own inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Any value, errors included
    Any,
    Number,
    Integer,
    Text,
    Boolean,
    Date,
    Duration,
    /// A lookup list or scalar
    List,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgKind::Any => "any",
            ArgKind::Number => "number",
            ArgKind::Integer => "integer",
            ArgKind::Text => "text",
            ArgKind::Boolean => "boolean",
            ArgKind::Date => "date",
            ArgKind::Duration => "duration",
            ArgKind::List => "list",
        })
    }
}

/// How a function treats error-valued arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// The first error argument becomes the result without calling the function
    Propagate,
    /// The function sees error arguments and decides
    Absorb,
}

/// Function definition
pub struct FunctionDef {
    /// Function name (uppercase)
    pub name: &'static str,
    /// Minimum arguments
    pub min_args: usize,
    /// Maximum arguments (None = unlimited)
    pub max_args: Option<usize>,
    /// Argument kinds shown in the signature; the last entry repeats for
    /// variadic functions
    pub args: &'static [ArgKind],
    /// Error handling
    pub errors: ErrorMode,
    /// Implementation
    pub implementation: FunctionImpl,
    /// Is volatile (depends on the clock)
    pub volatile: bool,
}

impl FunctionDef {
    fn new(
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        args: &'static [ArgKind],
        implementation: FunctionImpl,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            args,
            errors: ErrorMode::Propagate,
            implementation,
            volatile: false,
        }
    }

    fn absorbing(mut self) -> Self {
        self.errors = ErrorMode::Absorb;
        self
    }

    fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Whether `count` arguments are accepted
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }

    /// Human readable signature, e.g. `LEFT(text, [integer])`
    pub fn signature(&self) -> String {
        let mut params = Vec::new();
        let shown = self.max_args.unwrap_or(self.min_args.max(self.args.len()));
        for idx in 0..shown {
            let kind = self
                .args
                .get(idx)
                .or_else(|| self.args.last())
                .copied()
                .unwrap_or(ArgKind::Any);
            if idx < self.min_args {
                params.push(kind.to_string());
            } else {
                params.push(format!("[{kind}]"));
            }
        }
        if self.max_args.is_none() {
            params.push("...".to_string());
        }
        format!("{}({})", self.name, params.join(", "))
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("errors", &self.errors)
            .field("volatile", &self.volatile)
            .finish()
    }
}

/// Function registry
pub struct FunctionRegistry {
    functions: AHashMap<&'static str, FunctionDef>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Create a new registry with all built-in functions
    pub fn new() -> Self {
        let mut registry = Self {
            functions: AHashMap::new(),
        };

        registry.register_text_functions();
        registry.register_math_functions();
        registry.register_logical_functions();
        registry.register_date_functions();

        registry
    }

    /// Look up a function by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name.to_ascii_uppercase().as_str())
    }

    /// All definitions sorted by name
    pub fn definitions(&self) -> Vec<&FunctionDef> {
        let mut defs: Vec<_> = self.functions.values().collect();
        defs.sort_by_key(|def| def.name);
        defs
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn register(&mut self, def: FunctionDef) {
        self.functions.insert(def.name, def);
    }

    fn register_text_functions(&mut self) {
        use ArgKind::*;
        self.register(FunctionDef::new("CONCATENATE", 1, None, &[Any], text::fn_concatenate));
        self.register(FunctionDef::new("LEFT", 1, Some(2), &[Text, Integer], text::fn_left));
        self.register(FunctionDef::new("RIGHT", 1, Some(2), &[Text, Integer], text::fn_right));
        self.register(FunctionDef::new("MID", 3, Some(3), &[Text, Integer, Integer], text::fn_mid));
        self.register(FunctionDef::new("UPPER", 1, Some(1), &[Text], text::fn_upper));
        self.register(FunctionDef::new("LOWER", 1, Some(1), &[Text], text::fn_lower));
        self.register(FunctionDef::new("LEN", 1, Some(1), &[Text], text::fn_len));
        self.register(FunctionDef::new("TRIM", 1, Some(1), &[Text], text::fn_trim));
        self.register(FunctionDef::new("FIND", 2, Some(3), &[Text, Text, Integer], text::fn_find));
        self.register(FunctionDef::new(
            "SUBSTITUTE",
            3,
            Some(4),
            &[Text, Text, Text, Integer],
            text::fn_substitute,
        ));
        self.register(FunctionDef::new(
            "REPLACE",
            4,
            Some(4),
            &[Text, Integer, Integer, Text],
            text::fn_replace,
        ));
        self.register(FunctionDef::new("VALUE", 1, Some(1), &[Text], text::fn_value));
        self.register(FunctionDef::new("ARRAYJOIN", 1, Some(2), &[List, Text], text::fn_arrayjoin));
    }

    fn register_math_functions(&mut self) {
        use ArgKind::*;
        self.register(FunctionDef::new("ROUND", 1, Some(2), &[Number, Integer], math::fn_round));
        self.register(FunctionDef::new("ABS", 1, Some(1), &[Number], math::fn_abs));
        self.register(FunctionDef::new("MIN", 1, None, &[Number], math::fn_min));
        self.register(FunctionDef::new("MAX", 1, None, &[Number], math::fn_max));
        self.register(FunctionDef::new("SUM", 1, None, &[Number], math::fn_sum));
        self.register(FunctionDef::new("AVERAGE", 1, None, &[Number], math::fn_average));
        self.register(FunctionDef::new("COUNT", 1, None, &[Any], math::fn_count));
        self.register(FunctionDef::new("MOD", 2, Some(2), &[Number, Number], math::fn_mod));
        self.register(FunctionDef::new("INT", 1, Some(1), &[Number], math::fn_int));
    }

    fn register_logical_functions(&mut self) {
        use ArgKind::*;
        // Listed for its signature; the parser lowers IF to a conditional
        self.register(FunctionDef::new("IF", 2, Some(3), &[Boolean, Any, Any], logical::fn_if));
        self.register(FunctionDef::new("AND", 1, None, &[Boolean], logical::fn_and));
        self.register(FunctionDef::new("OR", 1, None, &[Boolean], logical::fn_or));
        self.register(FunctionDef::new("NOT", 1, Some(1), &[Boolean], logical::fn_not));
        self.register(FunctionDef::new("ISBLANK", 1, Some(1), &[Any], logical::fn_isblank).absorbing());
        self.register(FunctionDef::new("ISERROR", 1, Some(1), &[Any], logical::fn_iserror).absorbing());
        self.register(FunctionDef::new("IFERROR", 2, Some(2), &[Any, Any], logical::fn_iferror).absorbing());
        self.register(FunctionDef::new("BLANK", 0, Some(0), &[], logical::fn_blank));
        self.register(FunctionDef::new("TRUE", 0, Some(0), &[], logical::fn_true));
        self.register(FunctionDef::new("FALSE", 0, Some(0), &[], logical::fn_false));
    }

    fn register_date_functions(&mut self) {
        use ArgKind::*;
        self.register(FunctionDef::new("NOW", 0, Some(0), &[], date::fn_now).volatile());
        self.register(FunctionDef::new("TODAY", 0, Some(0), &[], date::fn_today).volatile());
        self.register(FunctionDef::new(
            "DATE_DIFF",
            2,
            Some(3),
            &[Date, Date, Text],
            date::fn_date_diff,
        ));
        self.register(FunctionDef::new(
            "DATE_ADD",
            2,
            Some(3),
            &[Date, Any, Text],
            date::fn_date_add,
        ));
        self.register(FunctionDef::new(
            "FORMAT_DATE",
            1,
            Some(2),
            &[Date, Text],
            date::fn_format_date,
        ));
        self.register(FunctionDef::new("YEAR", 1, Some(1), &[Date], date::fn_year));
        self.register(FunctionDef::new("MONTH", 1, Some(1), &[Date], date::fn_month));
        self.register(FunctionDef::new("DAY", 1, Some(1), &[Date], date::fn_day));
    }
}

/// Global function registry (lazily initialized)
static FUNCTION_REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();

/// The built-in function catalog
pub fn registry() -> &'static FunctionRegistry {
    FUNCTION_REGISTRY.get_or_init(FunctionRegistry::new)
}
