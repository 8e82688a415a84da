//! Arithmetic formulas over a reading.
//!
//! `x` is the diastolic pressure and `y` the systolic. Only numbers, the two
//! variables, `+ - * /`, parentheses and whitespace are accepted.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("no formula configured")]
    MissingFormula,

    #[error("no valid threshold configured")]
    MissingThreshold,

    #[error("formula contains disallowed character {0:?}")]
    DisallowedContent(char),

    #[error("formula syntax error: {0}")]
    Syntax(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("formula result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    X,
    Y,
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    X,
    Y,
    Negate(Box<Expr>),
    Binary(Box<Expr>, Token, Box<Expr>),
}

/// A parsed formula, ready to be evaluated against any reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parses `text`. A leading `=` (spreadsheet style) is ignored.
    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        let trimmed = text.trim();
        let body = trimmed.strip_prefix('=').unwrap_or(trimmed).trim();
        if body.is_empty() {
            return Err(FormulaError::MissingFormula);
        }

        let tokens = tokenize(body)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression()?;
        if let Some(token) = parser.peek() {
            return Err(FormulaError::Syntax(format!("unexpected {:?}", token)));
        }

        Ok(Self {
            source: body.to_string(),
            expr,
        })
    }

    /// The formula text without the leading `=`.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, x: f64, y: f64) -> Result<f64, FormulaError> {
        let value = eval(&self.expr, x, y)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::NonFinite)
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &text[start..end];
                let value = literal
                    .parse()
                    .map_err(|_| FormulaError::Syntax(format!("bad number {:?}", literal)))?;
                tokens.push(Token::Number(value));
            }
            _ => {
                let token = match c {
                    'x' => Token::X,
                    'y' => Token::Y,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::Open,
                    ')' => Token::Close,
                    other => return Err(FormulaError::DisallowedContent(other)),
                };
                tokens.push(token);
                chars.next();
            }
        }
    }

    Ok(tokens)
}

/// Recursive descent over:
///
/// ```text
/// expression = term (("+" | "-") term)*
/// term       = unary (("*" | "/") unary)*
/// unary      = ("+" | "-") unary | primary
/// primary    = number | "x" | "y" | "(" expression ")"
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Negate(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::X) => Ok(Expr::X),
            Some(Token::Y) => Ok(Expr::Y),
            Some(Token::Open) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(FormulaError::Syntax("missing closing parenthesis".into())),
                }
            }
            Some(token) => Err(FormulaError::Syntax(format!("unexpected {:?}", token))),
            None => Err(FormulaError::Syntax("unexpected end of formula".into())),
        }
    }
}

fn eval(expr: &Expr, x: f64, y: f64) -> Result<f64, FormulaError> {
    Ok(match expr {
        Expr::Number(n) => *n,
        Expr::X => x,
        Expr::Y => y,
        Expr::Negate(inner) => -eval(inner, x, y)?,
        Expr::Binary(left, op, right) => {
            let (a, b) = (eval(left, x, y)?, eval(right, x, y)?);
            match op {
                Token::Plus => a + b,
                Token::Minus => a - b,
                Token::Star => a * b,
                Token::Slash if b == 0.0 => return Err(FormulaError::DivisionByZero),
                Token::Slash => a / b,
                other => return Err(FormulaError::Syntax(format!("bad operator {:?}", other))),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(text: &str, x: f64, y: f64) -> Result<f64, FormulaError> {
        Formula::parse(text)?.evaluate(x, y)
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(eval_str("x + y * 2", 80.0, 120.0), Ok(320.0));
        assert_eq!(eval_str("(x + y) * 2", 80.0, 120.0), Ok(400.0));
        assert_eq!(eval_str("y - x - 10", 80.0, 120.0), Ok(30.0));
        assert_eq!(eval_str("x / 4 / 2", 80.0, 0.0), Ok(10.0));
    }

    #[test]
    fn test_unary_and_decimals() {
        assert_eq!(eval_str("-x + 1.5", 2.0, 0.0), Ok(-0.5));
        assert_eq!(eval_str("--y", 0.0, 3.0), Ok(3.0));
        assert_eq!(eval_str("+.5*y", 0.0, 4.0), Ok(2.0));
    }

    #[test]
    fn test_leading_equals_and_whitespace() {
        let formula = Formula::parse("  = x*1.5 +  40 ").unwrap();
        assert_eq!(formula.source(), "x*1.5 +  40");
        assert_eq!(formula.evaluate(50.0, 0.0), Ok(115.0));
    }

    #[test]
    fn test_missing_formula() {
        assert_eq!(Formula::parse(""), Err(FormulaError::MissingFormula));
        assert_eq!(Formula::parse(" = "), Err(FormulaError::MissingFormula));
    }

    #[test]
    fn test_disallowed_content() {
        assert_eq!(
            Formula::parse("x; alert(1)"),
            Err(FormulaError::DisallowedContent(';'))
        );
        assert_eq!(
            Formula::parse("Math.max(x, y)"),
            Err(FormulaError::DisallowedContent('M'))
        );
        assert_eq!(Formula::parse("x ^ 2"), Err(FormulaError::DisallowedContent('^')));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(Formula::parse("x +"), Err(FormulaError::Syntax(_))));
        assert!(matches!(Formula::parse("(x + y"), Err(FormulaError::Syntax(_))));
        assert!(matches!(Formula::parse("x y"), Err(FormulaError::Syntax(_))));
        assert!(matches!(Formula::parse("1.2.3"), Err(FormulaError::Syntax(_))));
        assert!(matches!(Formula::parse(")"), Err(FormulaError::Syntax(_))));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_str("y / (x - x)", 80.0, 120.0), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn test_non_finite_result() {
        assert_eq!(
            eval_str("y * 1e", 1.0, 1.0).unwrap_err(),
            FormulaError::DisallowedContent('e')
        );
        let huge = "9".repeat(400);
        assert_eq!(
            eval_str(&format!("{} * y", huge), 0.0, 2.0),
            Err(FormulaError::NonFinite)
        );
    }
}
