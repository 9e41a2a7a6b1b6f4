//! Formula parser
//!
//! A recursive descent parser over the lexer's token stream with proper
//! operator precedence. Field names are resolved to ids through the injected
//! [`FieldResolver`] while parsing.

use crate::ast::{BinaryOperator, FormulaExpr, UnaryOperator};
use crate::compile::CompileLimits;
use crate::error::{FormulaError, FormulaResult, LimitKind};
use crate::lexer::{tokenize, Token, TokenKind};
use fieldcalc_core::{FieldResolver, Value};

/// Parse formula source into an AST using the default limits
///
/// # Example
/// ```rust
/// use fieldcalc_core::{FieldKind, Schema};
/// use fieldcalc_formula::parse_formula;
///
/// let mut schema = Schema::new();
/// let t = schema.add_table("Items");
/// schema.add_field(t, "Price", FieldKind::Plain).unwrap();
///
/// let ast = parse_formula("{Price} * 2", &schema.resolver(t)).unwrap();
/// assert_eq!(ast.node_count(), 3);
/// ```
pub fn parse_formula(source: &str, resolver: &dyn FieldResolver) -> FormulaResult<FormulaExpr> {
    parse_formula_with_limits(source, resolver, &CompileLimits::default())
}

/// Parse formula source into an AST, enforcing `limits`
pub fn parse_formula_with_limits(
    source: &str,
    resolver: &dyn FieldResolver,
    limits: &CompileLimits,
) -> FormulaResult<FormulaExpr> {
    let tokens = tokenize(source)?;
    let mut parser = FormulaParser {
        tokens,
        pos: 0,
        resolver,
        limits,
        nesting: 0,
        nodes: 0,
    };

    let expr = parser.parse_expression()?;

    // Make sure we consumed all input
    if parser.current().kind != TokenKind::Eof {
        return Err(parser.unexpected("end of input"));
    }

    let depth = expr.depth();
    if depth > limits.max_depth {
        return Err(FormulaError::LimitExceeded {
            limit: LimitKind::Depth,
            max: limits.max_depth,
            actual: depth,
        });
    }

    Ok(expr)
}

/// Formula parser
struct FormulaParser<'a, 'r> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    resolver: &'r dyn FieldResolver,
    limits: &'r CompileLimits,
    nesting: usize,
    nodes: usize,
}

impl<'a, 'r> FormulaParser<'a, 'r> {
    // === Helper methods ===

    fn current(&self) -> &Token<'a> {
        // The stream always ends with Eof, which is never consumed
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn consume(&mut self) -> Token<'a> {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &TokenKind, description: &str) -> FormulaResult<Token<'a>> {
        if &self.current().kind == expected {
            Ok(self.consume())
        } else {
            Err(self.unexpected(description))
        }
    }

    fn unexpected(&self, expected: &str) -> FormulaError {
        let token = self.current();
        FormulaError::Parse {
            position: token.offset,
            expected: expected.to_string(),
            found: token.kind.to_string(),
        }
    }

    /// Count a new AST node against the size limit
    fn node(&mut self, expr: FormulaExpr) -> FormulaResult<FormulaExpr> {
        self.nodes += 1;
        if self.nodes > self.limits.max_nodes {
            return Err(FormulaError::LimitExceeded {
                limit: LimitKind::Nodes,
                max: self.limits.max_nodes,
                actual: self.nodes,
            });
        }
        Ok(expr)
    }

    /// Track recursion so pathological nesting fails before the stack does
    fn enter(&mut self) -> FormulaResult<()> {
        self.nesting += 1;
        if self.nesting > self.limits.max_depth {
            return Err(FormulaError::LimitExceeded {
                limit: LimitKind::Depth,
                max: self.limits.max_depth,
                actual: self.nesting,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    // === Expression parsing with precedence ===
    // Precedence (lowest to highest):
    // 1. Comparison: =, !=, <, <=, >, >=
    // 2. Concatenation: &
    // 3. Addition/Subtraction: +, -
    // 4. Multiplication/Division: *, /
    // 5. Unary: -
    // 6. Primary: literals, field references, function calls, parentheses

    fn parse_expression(&mut self) -> FormulaResult<FormulaExpr> {
        self.enter()?;
        let expr = self.parse_comparison();
        self.leave();
        expr
    }

    fn parse_comparison(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match self.current().kind {
                TokenKind::Equal => BinaryOperator::Equal,
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                TokenKind::LessThan => BinaryOperator::LessThan,
                TokenKind::LessEqual => BinaryOperator::LessEqual,
                TokenKind::GreaterThan => BinaryOperator::GreaterThan,
                TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };

            self.consume();
            let right = self.parse_concatenation()?;
            left = self.binary(op, left, right)?;
        }

        Ok(left)
    }

    fn parse_concatenation(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_additive()?;

        while self.current().kind == TokenKind::Ampersand {
            self.consume();
            let right = self.parse_additive()?;
            left = self.binary(BinaryOperator::Concat, left, right)?;
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Subtract,
                _ => break,
            };

            self.consume();
            let right = self.parse_multiplicative()?;
            left = self.binary(op, left, right)?;
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOperator::Multiply,
                TokenKind::Slash => BinaryOperator::Divide,
                _ => break,
            };

            self.consume();
            let right = self.parse_unary()?;
            left = self.binary(op, left, right)?;
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> FormulaResult<FormulaExpr> {
        if self.current().kind == TokenKind::Minus {
            self.consume();
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return self.node(FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(operand?),
            });
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> FormulaResult<FormulaExpr> {
        match self.current().kind.clone() {
            TokenKind::Number(n) => {
                self.consume();
                self.node(FormulaExpr::Literal(Value::Number(n)))
            }

            TokenKind::Text(s) => {
                self.consume();
                self.node(FormulaExpr::Literal(Value::Text(s)))
            }

            TokenKind::Boolean(b) => {
                self.consume();
                self.node(FormulaExpr::Literal(Value::Boolean(b)))
            }

            TokenKind::LeftParen => {
                self.consume();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RightParen, "')'")?;
                Ok(expr)
            }

            TokenKind::Field(name) => {
                let token = self.consume();
                self.parse_field_reference(name, token.offset)
            }

            TokenKind::Identifier(name) => {
                self.consume();
                self.parse_function_call(name)
            }

            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_field_reference(&mut self, name: String, offset: usize) -> FormulaResult<FormulaExpr> {
        let field = self
            .resolver
            .resolve(&name)
            .ok_or_else(|| FormulaError::UnknownField {
                name: name.clone(),
                position: offset,
            })?;

        if self.current().kind != TokenKind::Dot {
            return self.node(FormulaExpr::FieldRef(field));
        }

        // Link traversal: {Link}.{Remote Field}
        self.consume();
        let remote = self.current().clone();
        let remote_name = match remote.kind {
            TokenKind::Field(remote_name) => remote_name,
            _ => return Err(self.unexpected("field reference after '.'")),
        };
        self.consume();

        if !self.resolver.is_link(field) {
            return Err(FormulaError::NotALinkField {
                name,
                position: offset,
            });
        }

        let remote_field = self
            .resolver
            .resolve_linked(field, &remote_name)
            .ok_or(FormulaError::UnknownField {
                name: remote_name,
                position: remote.offset,
            })?;

        self.node(FormulaExpr::LinkedFieldRef {
            link: field,
            field: remote_field,
        })
    }

    fn parse_function_call(&mut self, name: String) -> FormulaResult<FormulaExpr> {
        self.expect(&TokenKind::LeftParen, "'(' after function name")?;

        let mut args = Vec::new();

        // Parse arguments
        if self.current().kind != TokenKind::RightParen {
            args.push(self.parse_expression()?);

            while self.current().kind == TokenKind::Comma {
                self.consume();
                args.push(self.parse_expression()?);
            }
        }

        self.expect(&TokenKind::RightParen, "',' or ')'")?;

        let name = name.to_uppercase();

        // IF with a valid arity becomes a short-circuiting conditional; other
        // arities stay calls so the library reports the arity error
        if name == "IF" && (2..=3).contains(&args.len()) {
            let otherwise = if args.len() == 3 { args.pop() } else { None };
            let then = args.pop();
            let condition = args.pop();
            if let (Some(condition), Some(then)) = (condition, then) {
                return self.node(FormulaExpr::Conditional {
                    condition: Box::new(condition),
                    then: Box::new(then),
                    otherwise: otherwise.map(Box::new),
                });
            }
        }

        self.node(FormulaExpr::Call { name, args })
    }

    fn binary(
        &mut self,
        op: BinaryOperator,
        left: FormulaExpr,
        right: FormulaExpr,
    ) -> FormulaResult<FormulaExpr> {
        self.node(FormulaExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }
}
