//! Attribute filter parsing using datafusion-sqlparser-rs
//!
//! A filter is a single SQL boolean expression, the text that would follow
//! `WHERE`. Only the subset the evaluator understands is accepted, so a
//! parsed filter can always be evaluated locally.

use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value};
use sqlparser::dialect::{Dialect, GenericDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

/// Filter parsing and validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("filter parse error: {0}")]
    Parse(String),

    #[error("unexpected input after filter expression: {0}")]
    TrailingInput(String),

    #[error("unsupported filter construct: {0}")]
    Unsupported(String),

    #[error("filter references unknown column '{0}'")]
    UnknownColumn(String),
}

/// Attribute filter parser
pub struct FilterParser {
    dialect: Box<dyn Dialect>,
}

impl FilterParser {
    /// Create a new filter parser with the generic dialect
    pub fn new() -> Self {
        Self {
            dialect: Box::new(GenericDialect {}),
        }
    }

    /// Parse filter text into an expression
    pub fn parse(&self, text: &str) -> Result<Expr, FilterError> {
        let mut parser = Parser::new(&*self.dialect)
            .try_with_sql(text)
            .map_err(|e| FilterError::Parse(e.to_string()))?;

        let expr = parser
            .parse_expr()
            .map_err(|e| FilterError::Parse(e.to_string()))?;

        let next = parser.peek_token();
        if next.token != Token::EOF {
            return Err(FilterError::TrailingInput(next.token.to_string()));
        }

        check_supported(&expr)?;
        Ok(expr)
    }
}

impl Default for FilterParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject anything the evaluator cannot handle
fn check_supported(expr: &Expr) -> Result<(), FilterError> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => Ok(()),
        Expr::Value(value) => match value {
            Value::Number(_, _)
            | Value::SingleQuotedString(_)
            | Value::Boolean(_)
            | Value::Null => Ok(()),
            other => Err(FilterError::Unsupported(format!("literal {}", other))),
        },
        Expr::Nested(inner) | Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
            check_supported(inner)
        }
        Expr::UnaryOp { op, expr } => match op {
            UnaryOperator::Not | UnaryOperator::Minus | UnaryOperator::Plus => {
                check_supported(expr)
            }
            other => Err(FilterError::Unsupported(format!("operator {}", other))),
        },
        Expr::BinaryOp { left, op, right } => {
            match op {
                BinaryOperator::And
                | BinaryOperator::Or
                | BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
                | BinaryOperator::Plus
                | BinaryOperator::Minus
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulo
                | BinaryOperator::StringConcat => {}
                other => return Err(FilterError::Unsupported(format!("operator {}", other))),
            }
            check_supported(left)?;
            check_supported(right)
        }
        Expr::InList { expr, list, .. } => {
            check_supported(expr)?;
            list.iter().try_for_each(check_supported)
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            check_supported(expr)?;
            check_supported(low)?;
            check_supported(high)
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            check_supported(expr)?;
            check_supported(pattern)
        }
        other => Err(FilterError::Unsupported(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_expressions() {
        let parser = FilterParser::new();
        for text in [
            "id = 1",
            "name LIKE 'A%' AND NOT (val BETWEEN 1 AND 5)",
            "code IN ('a', 'b') OR code IS NULL",
            "x * 2 + 1 >= -3.5",
        ] {
            assert!(parser.parse(text).is_ok(), "{}", text);
        }
    }

    #[test]
    fn rejects_trailing_input() {
        let parser = FilterParser::new();
        assert!(matches!(
            parser.parse("id = 1 id"),
            Err(FilterError::TrailingInput(_))
        ));
    }

    #[test]
    fn rejects_unsupported_constructs() {
        let parser = FilterParser::new();
        assert!(matches!(
            parser.parse("upper(name) = 'A'"),
            Err(FilterError::Unsupported(_))
        ));
        assert!(matches!(parser.parse("id = "), Err(FilterError::Parse(_))));
    }
}
