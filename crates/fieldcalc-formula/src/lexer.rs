//! Formula lexer
//!
//! Turns formula source text into a token stream. Every token carries the byte
//! offset it starts at so the parser can report positions.

use crate::error::{FormulaError, FormulaResult};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(Decimal),
    Text(String),
    Boolean(bool),

    /// `{Field Name}`, with escapes removed
    Field(String),
    /// Function name
    Identifier(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Ampersand,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Delimiters
    LeftParen,
    RightParen,
    Comma,
    Dot,

    // End of input
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "number {n}"),
            TokenKind::Text(s) => write!(f, "text {s:?}"),
            TokenKind::Boolean(b) => write!(f, "boolean {}", if *b { "TRUE" } else { "FALSE" }),
            TokenKind::Field(name) => write!(f, "field {{{name}}}"),
            TokenKind::Identifier(name) => write!(f, "identifier {name}"),
            TokenKind::Plus => f.write_str("'+'"),
            TokenKind::Minus => f.write_str("'-'"),
            TokenKind::Star => f.write_str("'*'"),
            TokenKind::Slash => f.write_str("'/'"),
            TokenKind::Ampersand => f.write_str("'&'"),
            TokenKind::Equal => f.write_str("'='"),
            TokenKind::NotEqual => f.write_str("'!='"),
            TokenKind::LessThan => f.write_str("'<'"),
            TokenKind::LessEqual => f.write_str("'<='"),
            TokenKind::GreaterThan => f.write_str("'>'"),
            TokenKind::GreaterEqual => f.write_str("'>='"),
            TokenKind::LeftParen => f.write_str("'('"),
            TokenKind::RightParen => f.write_str("')'"),
            TokenKind::Comma => f.write_str("','"),
            TokenKind::Dot => f.write_str("'.'"),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

/// A token and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// Source text of the token
    pub lexeme: &'a str,
    /// Byte offset of the token in the source
    pub offset: usize,
}

/// Tokenize formula source.
///
/// The returned stream always ends with an [`TokenKind::Eof`] token whose
/// offset is the source length. Whitespace is discarded.
///
/// # Example
/// ```rust
/// use fieldcalc_formula::lexer::{tokenize, TokenKind};
///
/// let tokens = tokenize("{Price} * 2").unwrap();
/// assert_eq!(tokens[0].kind, TokenKind::Field("Price".into()));
/// assert_eq!(tokens[1].offset, 8);
/// ```
pub fn tokenize(source: &str) -> FormulaResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn next_token(&mut self) -> FormulaResult<Token<'a>> {
        self.skip_whitespace();
        let start = self.pos;

        let c = match self.peek_char() {
            Some(c) => c,
            None => return Ok(self.token(TokenKind::Eof, start)),
        };

        let kind = match c {
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' => self.single(TokenKind::Star),
            '/' => self.single(TokenKind::Slash),
            '&' => self.single(TokenKind::Ampersand),
            '=' => self.single(TokenKind::Equal),
            '(' => self.single(TokenKind::LeftParen),
            ')' => self.single(TokenKind::RightParen),
            ',' => self.single(TokenKind::Comma),
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::NotEqual
                } else {
                    return Err(self.error(start, "expected '=' after '!'"));
                }
            }
            '<' => {
                self.advance();
                match self.peek_char() {
                    Some('=') => {
                        self.advance();
                        TokenKind::LessEqual
                    }
                    Some('>') => {
                        self.advance();
                        TokenKind::NotEqual
                    }
                    _ => TokenKind::LessThan,
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::GreaterThan
                }
            }
            '"' | '\'' => self.scan_string(c)?,
            '{' => self.scan_field()?,
            '.' if self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit()) => {
                self.scan_number()?
            }
            '.' => self.single(TokenKind::Dot),
            c if c.is_ascii_digit() => self.scan_number()?,
            c if c.is_alphabetic() || c == '_' => self.scan_identifier(),
            other => {
                return Err(self.error(start, format!("unexpected character {other:?}")));
            }
        };

        Ok(self.token(kind, start))
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token<'a> {
        Token {
            kind,
            lexeme: &self.input[start..self.pos],
            offset: start,
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn scan_string(&mut self, quote: char) -> FormulaResult<TokenKind> {
        let start = self.pos;
        self.advance(); // Skip opening quote

        let mut s = String::new();
        loop {
            let escape_pos = self.pos;
            match self.peek_char() {
                None => return Err(self.error(start, "unterminated string literal")),
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(TokenKind::Text(s));
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.peek_char() {
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('\\') => '\\',
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(other) => {
                            return Err(
                                self.error(escape_pos, format!("unknown escape sequence \\{other}"))
                            )
                        }
                        None => return Err(self.error(start, "unterminated string literal")),
                    };
                    s.push(escaped);
                    self.advance();
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
    }

    fn scan_field(&mut self) -> FormulaResult<TokenKind> {
        let start = self.pos;
        self.advance(); // Skip '{'

        let mut name = String::new();
        loop {
            match self.peek_char() {
                None => return Err(self.error(start, "unterminated field reference")),
                Some('}') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    let escape_pos = self.pos;
                    self.advance();
                    match self.peek_char() {
                        Some(c @ ('}' | '{' | '\\')) => {
                            name.push(c);
                            self.advance();
                        }
                        Some(other) => {
                            return Err(
                                self.error(escape_pos, format!("unknown escape sequence \\{other}"))
                            )
                        }
                        None => return Err(self.error(start, "unterminated field reference")),
                    }
                }
                Some(c) => {
                    name.push(c);
                    self.advance();
                }
            }
        }

        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(self.error(start, "empty field reference"));
        }
        Ok(TokenKind::Field(name))
    }

    fn scan_number(&mut self) -> FormulaResult<TokenKind> {
        let start = self.pos;

        // Integer part
        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }

        // Decimal part
        if self.peek_char() == Some('.')
            && self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit())
        {
            self.advance();
            while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // Exponent part, only when digits follow
        let mut scientific = false;
        if self.peek_char().map_or(false, |c| c == 'e' || c == 'E') {
            let digits_at = match self.peek_char_at(1) {
                Some('+') | Some('-') => 2,
                _ => 1,
            };
            if self
                .peek_char_at(digits_at)
                .map_or(false, |c| c.is_ascii_digit())
            {
                scientific = true;
                for _ in 0..digits_at {
                    self.advance();
                }
                while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let num_str = &self.input[start..self.pos];
        let parsed = if scientific {
            Decimal::from_scientific(num_str)
        } else {
            Decimal::from_str(num_str)
        };
        parsed
            .map(TokenKind::Number)
            .map_err(|_| self.error(start, format!("number out of range: {num_str}")))
    }

    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek_char()
            .map_or(false, |c| c.is_alphanumeric() || c == '_')
        {
            self.advance();
        }
        let text = &self.input[start..self.pos];

        // TRUE/FALSE are literals unless called as functions
        let followed_by_paren = self.input[self.pos..].trim_start().starts_with('(');
        if !followed_by_paren {
            if text.eq_ignore_ascii_case("TRUE") {
                return TokenKind::Boolean(true);
            }
            if text.eq_ignore_ascii_case("FALSE") {
                return TokenKind::Boolean(false);
            }
        }

        TokenKind::Identifier(text.to_string())
    }

    // === Helper methods ===

    fn error(&self, position: usize, reason: impl Into<String>) -> FormulaError {
        FormulaError::Lex {
            position,
            reason: reason.into(),
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_whitespace()) {
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("42 3.14 .5 1e3"),
            vec![
                TokenKind::Number(Decimal::from(42)),
                TokenKind::Number(Decimal::from_str("3.14").unwrap()),
                TokenKind::Number(Decimal::from_str("0.5").unwrap()),
                TokenKind::Number(Decimal::from(1000)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_with_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\"" 'it\'s' "a\\b\n""#),
            vec![
                TokenKind::Text("say \"hi\"".into()),
                TokenKind::Text("it's".into()),
                TokenKind::Text("a\\b\n".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_fields_and_identifiers() {
        assert_eq!(
            kinds("UPPER({First Name}) & {Orders}.{Amount}"),
            vec![
                TokenKind::Identifier("UPPER".into()),
                TokenKind::LeftParen,
                TokenKind::Field("First Name".into()),
                TokenKind::RightParen,
                TokenKind::Ampersand,
                TokenKind::Field("Orders".into()),
                TokenKind::Dot,
                TokenKind::Field("Amount".into()),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds(r"{a\}b}"),
            vec![TokenKind::Field("a}b".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_booleans() {
        assert_eq!(
            kinds("TRUE false TRUE()"),
            vec![
                TokenKind::Boolean(true),
                TokenKind::Boolean(false),
                TokenKind::Identifier("TRUE".into()),
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("+ - * / & = != <> > < >= <="),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Ampersand,
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::NotEqual,
                TokenKind::GreaterThan,
                TokenKind::LessThan,
                TokenKind::GreaterEqual,
                TokenKind::LessEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_offsets_and_lexemes() {
        let tokens = tokenize("  {A} >= 10").unwrap();
        assert_eq!(tokens[0].offset, 2);
        assert_eq!(tokens[0].lexeme, "{A}");
        assert_eq!(tokens[1].offset, 6);
        assert_eq!(tokens[1].lexeme, ">=");
        assert_eq!(tokens[2].lexeme, "10");
        assert_eq!(tokens[3].offset, 11);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("1 & \"abc").unwrap_err();
        assert_eq!(
            err,
            FormulaError::Lex {
                position: 4,
                reason: "unterminated string literal".into()
            }
        );
    }

    #[test]
    fn test_unterminated_field() {
        assert_eq!(tokenize("{Price * 2").unwrap_err().position(), Some(0));
        assert_eq!(tokenize("{ }").unwrap_err().position(), Some(0));
    }

    #[test]
    fn test_unknown_character() {
        assert_eq!(tokenize("1 + #").unwrap_err().position(), Some(4));
        assert_eq!(tokenize("1 ! 2").unwrap_err().position(), Some(2));
    }

    #[test]
    fn test_number_out_of_range() {
        assert_eq!(
            tokenize("2 * 1e99999999999").unwrap_err(),
            FormulaError::Lex {
                position: 4,
                reason: "number out of range: 1e99999999999".into()
            }
        );
    }

    #[test]
    fn test_unknown_escape() {
        assert_eq!(tokenize(r#""a\qb""#).unwrap_err().position(), Some(2));
    }
}
