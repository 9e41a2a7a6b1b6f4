//! Formula Abstract Syntax Tree types

use fieldcalc_core::{FieldId, FieldResolver, Value};
use std::fmt;

/// Formula expression AST
///
/// A tree: every node is owned by its parent and there is no sharing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FormulaExpr {
    /// Constant value
    Literal(Value),

    /// Field of the current record
    FieldRef(FieldId),
    /// Field of the records reached through link field `link`
    LinkedFieldRef { link: FieldId, field: FieldId },

    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<FormulaExpr>,
    },
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },

    /// `IF(condition, then[, otherwise])`; only the selected branch is evaluated
    Conditional {
        condition: Box<FormulaExpr>,
        then: Box<FormulaExpr>,
        otherwise: Option<Box<FormulaExpr>>,
    },

    /// Function call (name is upper case)
    Call { name: String, args: Vec<FormulaExpr> },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,

    // Text
    Concat,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOperator {
    Negate,
}

/// Binding strength, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Precedence {
    Comparison,
    Concat,
    Additive,
    Multiplicative,
    Unary,
    Primary,
}

impl BinaryOperator {
    /// Source symbol
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Concat => "&",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterEqual => ">=",
        }
    }

    pub(crate) fn precedence(self) -> Precedence {
        match self {
            BinaryOperator::Add | BinaryOperator::Subtract => Precedence::Additive,
            BinaryOperator::Multiply | BinaryOperator::Divide => Precedence::Multiplicative,
            BinaryOperator::Concat => Precedence::Concat,
            BinaryOperator::Equal
            | BinaryOperator::NotEqual
            | BinaryOperator::LessThan
            | BinaryOperator::LessEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterEqual => Precedence::Comparison,
        }
    }
}

impl FormulaExpr {
    pub(crate) fn precedence(&self) -> Precedence {
        match self {
            FormulaExpr::BinaryOp { op, .. } => op.precedence(),
            FormulaExpr::UnaryOp { .. } => Precedence::Unary,
            FormulaExpr::Literal(Value::Number(n)) if n.is_sign_negative() => Precedence::Unary,
            _ => Precedence::Primary,
        }
    }

    /// Direct children, in evaluation order
    pub fn children(&self) -> Vec<&FormulaExpr> {
        match self {
            FormulaExpr::Literal(_)
            | FormulaExpr::FieldRef(_)
            | FormulaExpr::LinkedFieldRef { .. } => Vec::new(),
            FormulaExpr::UnaryOp { operand, .. } => vec![&**operand],
            FormulaExpr::BinaryOp { left, right, .. } => vec![&**left, &**right],
            FormulaExpr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let mut children = vec![&**condition, &**then];
                if let Some(otherwise) = otherwise {
                    children.push(&**otherwise);
                }
                children
            }
            FormulaExpr::Call { args, .. } => args.iter().collect(),
        }
    }

    /// Visit every node in pre-order
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a FormulaExpr)) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            visit(node);
            let children = node.children();
            stack.extend(children.into_iter().rev());
        }
    }

    /// Total number of nodes
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    /// Depth of the tree (a leaf has depth 1)
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            for child in node.children() {
                stack.push((child, depth + 1));
            }
        }
        max
    }

    /// Print the expression back to formula source, naming fields through
    /// `resolver`.
    ///
    /// Parsing the output with the same resolver yields an equal tree.
    pub fn to_source(&self, resolver: &dyn FieldResolver) -> String {
        let name_of = |id: FieldId| {
            resolver
                .field_name(id)
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string())
        };
        let mut out = String::new();
        write_expr(&mut out, self, &name_of);
        out
    }
}

impl fmt::Display for FormulaExpr {
    /// Source form with field ids in place of names
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_expr(&mut out, self, &|id: FieldId| id.to_string());
        f.write_str(&out)
    }
}

fn write_expr(out: &mut String, expr: &FormulaExpr, name_of: &dyn Fn(FieldId) -> String) {
    match expr {
        FormulaExpr::Literal(value) => write_literal(out, value),
        FormulaExpr::FieldRef(id) => write_field(out, &name_of(*id)),
        FormulaExpr::LinkedFieldRef { link, field } => {
            write_field(out, &name_of(*link));
            out.push('.');
            write_field(out, &name_of(*field));
        }
        FormulaExpr::UnaryOp { op, operand } => {
            match op {
                UnaryOperator::Negate => out.push('-'),
            }
            write_operand(out, operand, operand.precedence() < Precedence::Unary, name_of);
        }
        FormulaExpr::BinaryOp { op, left, right } => {
            let prec = op.precedence();
            // Left-associative: equal precedence on the right needs parentheses
            write_operand(out, left, left.precedence() < prec, name_of);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            write_operand(out, right, right.precedence() <= prec, name_of);
        }
        FormulaExpr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            out.push_str("IF(");
            write_expr(out, condition, name_of);
            out.push_str(", ");
            write_expr(out, then, name_of);
            if let Some(otherwise) = otherwise {
                out.push_str(", ");
                write_expr(out, otherwise, name_of);
            }
            out.push(')');
        }
        FormulaExpr::Call { name, args } => {
            out.push_str(name);
            out.push('(');
            for (idx, arg) in args.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                write_expr(out, arg, name_of);
            }
            out.push(')');
        }
    }
}

fn write_operand(
    out: &mut String,
    expr: &FormulaExpr,
    parenthesize: bool,
    name_of: &dyn Fn(FieldId) -> String,
) {
    if parenthesize {
        out.push('(');
        write_expr(out, expr, name_of);
        out.push(')');
    } else {
        write_expr(out, expr, name_of);
    }
}

fn write_literal(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("BLANK()"),
        Value::Boolean(true) => out.push_str("TRUE"),
        Value::Boolean(false) => out.push_str("FALSE"),
        Value::Number(n) => out.push_str(&n.normalize().to_string()),
        Value::Text(s) => write_text(out, s),
        // Not produced by the parser; printed as their text form
        other => write_text(out, &other.to_string()),
    }
}

fn write_text(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_field(out: &mut String, name: &str) {
    out.push('{');
    for c in name.chars() {
        if matches!(c, '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn num(n: i64) -> FormulaExpr {
        FormulaExpr::Literal(Value::Number(Decimal::from(n)))
    }

    fn bin(op: BinaryOperator, left: FormulaExpr, right: FormulaExpr) -> FormulaExpr {
        FormulaExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn test_display_minimal_parentheses() {
        let expr = bin(
            BinaryOperator::Multiply,
            bin(BinaryOperator::Add, num(1), num(2)),
            num(3),
        );
        assert_eq!(expr.to_string(), "(1 + 2) * 3");

        let expr = bin(
            BinaryOperator::Subtract,
            num(1),
            bin(BinaryOperator::Subtract, num(2), num(3)),
        );
        assert_eq!(expr.to_string(), "1 - (2 - 3)");

        let expr = bin(
            BinaryOperator::Subtract,
            bin(BinaryOperator::Subtract, num(1), num(2)),
            num(3),
        );
        assert_eq!(expr.to_string(), "1 - 2 - 3");
    }

    #[test]
    fn test_display_unary_and_text() {
        let expr = FormulaExpr::UnaryOp {
            op: UnaryOperator::Negate,
            operand: Box::new(bin(BinaryOperator::Multiply, num(2), num(3))),
        };
        assert_eq!(expr.to_string(), "-(2 * 3)");

        let expr = FormulaExpr::Literal(Value::text("say \"hi\"\n"));
        assert_eq!(expr.to_string(), r#""say \"hi\"\n""#);
    }

    #[test]
    fn test_node_count_and_depth() {
        let expr = FormulaExpr::Conditional {
            condition: Box::new(bin(
                BinaryOperator::Equal,
                FormulaExpr::FieldRef(FieldId(1)),
                num(0),
            )),
            then: Box::new(num(1)),
            otherwise: Some(Box::new(bin(
                BinaryOperator::Divide,
                num(100),
                FormulaExpr::FieldRef(FieldId(1)),
            ))),
        };
        assert_eq!(expr.node_count(), 8);
        assert_eq!(expr.depth(), 3);
        assert_eq!(expr.to_string(), "IF({fld1} = 0, 1, 100 / {fld1})");
    }
}
