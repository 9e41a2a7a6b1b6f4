//! Compiling formula source into a reusable, dependency-annotated form

use crate::ast::FormulaExpr;
use crate::dependency::{contains_volatile_function, extract_references, flatten_references, Reference};
use crate::error::FormulaResult;
use crate::parser::parse_formula_with_limits;
use fieldcalc_core::{FieldId, FieldResolver};
use std::collections::BTreeSet;
use tracing::debug;

/// Resource bounds enforced while parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompileLimits {
    /// Maximum nesting depth of the expression tree
    pub max_depth: usize,
    /// Maximum number of AST nodes
    pub max_nodes: usize,
}

impl Default for CompileLimits {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_nodes: 10_000,
        }
    }
}

/// A parsed formula together with everything it reads.
///
/// Compiled formulas are immutable once produced and can be shared freely
/// between threads.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompiledFormula {
    /// Source text as written by the user
    pub source: String,
    /// Parsed expression
    pub root: FormulaExpr,
    /// References exactly as they appear in the expression
    pub references: BTreeSet<Reference>,
    /// Every field id the formula reads (link fields included)
    pub declared_dependencies: BTreeSet<FieldId>,
    /// Whether the formula calls NOW or TODAY
    pub volatile: bool,
}

impl CompiledFormula {
    /// Build from an already parsed expression
    pub fn from_expr(source: impl Into<String>, root: FormulaExpr) -> Self {
        let references = extract_references(&root);
        let declared_dependencies = flatten_references(&references);
        let volatile = contains_volatile_function(&root);
        Self {
            source: source.into(),
            root,
            references,
            declared_dependencies,
            volatile,
        }
    }

    /// Whether the formula reads `field` in any way
    pub fn reads(&self, field: FieldId) -> bool {
        self.declared_dependencies.contains(&field)
    }
}

/// Compile formula source with the default limits
pub fn compile(source: &str, resolver: &dyn FieldResolver) -> FormulaResult<CompiledFormula> {
    compile_with_limits(source, resolver, &CompileLimits::default())
}

/// Compile formula source, enforcing `limits`
pub fn compile_with_limits(
    source: &str,
    resolver: &dyn FieldResolver,
    limits: &CompileLimits,
) -> FormulaResult<CompiledFormula> {
    let root = parse_formula_with_limits(source, resolver, limits)?;
    let compiled = CompiledFormula::from_expr(source, root);
    debug!(
        source,
        dependencies = compiled.declared_dependencies.len(),
        volatile = compiled.volatile,
        "compiled formula"
    );
    Ok(compiled)
}

/// Field ids read by a compiled formula
pub fn get_dependencies(formula: &CompiledFormula) -> &BTreeSet<FieldId> {
    &formula.declared_dependencies
}
