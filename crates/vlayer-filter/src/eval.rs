//! Local evaluation of attribute filters
//!
//! SQL three-valued logic: comparisons involving NULL are unknown, and a
//! feature only matches when the whole predicate is true.

use crate::resolver::column_name;
use regex::Regex;
use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use vlayer_core::{Feature, FieldValue};

/// Intermediate value during evaluation
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Scalar {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Scalar {
    fn from_field(value: &FieldValue) -> Scalar {
        match value {
            FieldValue::Null => Scalar::Null,
            FieldValue::Integer(v) => Scalar::Number(*v as f64),
            FieldValue::Real(v) => Scalar::Number(*v),
            FieldValue::String(s) => Scalar::Text(s.clone()),
            FieldValue::Binary(_) => Scalar::Text(value.to_string()),
        }
    }

    fn truth(&self) -> Option<bool> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(b) => Some(*b),
            Scalar::Number(n) => Some(*n != 0.0),
            Scalar::Text(s) => Some(!s.is_empty()),
        }
    }

    fn number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Null => None,
        }
    }

    fn text(&self) -> Option<String> {
        match self {
            Scalar::Null => None,
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Number(n) => Some(n.to_string()),
            Scalar::Bool(b) => Some(b.to_string()),
        }
    }
}

/// Compare two non-null values; numbers compare numerically, text
/// compares with a number when it parses as one
fn compare(a: &Scalar, b: &Scalar) -> Option<Ordering> {
    match (a, b) {
        (Scalar::Null, _) | (_, Scalar::Null) => None,
        (Scalar::Text(x), Scalar::Text(y)) => Some(x.cmp(y)),
        _ => match (a.number(), b.number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(a.text()?.cmp(&b.text()?)),
        },
    }
}

/// Translate a LIKE pattern into an anchored, case-insensitive regex
pub(crate) fn like_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("(?is)^");
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

/// Evaluation context for one feature
pub(crate) struct Evaluator<'a> {
    pub feature: &'a Feature,
    pub patterns: &'a HashMap<String, Regex>,
}

impl<'a> Evaluator<'a> {
    fn column(&self, name: &str) -> Scalar {
        match self.feature.field(name) {
            Some(value) => Scalar::from_field(value),
            None if name.eq_ignore_ascii_case("fid") => self
                .feature
                .fid()
                .map(|fid| Scalar::Number(fid as f64))
                .unwrap_or(Scalar::Null),
            None => Scalar::Null,
        }
    }

    pub fn eval(&self, expr: &Expr) -> Scalar {
        if let Some(name) = column_name(expr) {
            return self.column(name);
        }
        match expr {
            Expr::Value(value) => match value {
                Value::Number(n, _) => n.parse().map(Scalar::Number).unwrap_or(Scalar::Null),
                Value::SingleQuotedString(s) => Scalar::Text(s.clone()),
                Value::Boolean(b) => Scalar::Bool(*b),
                _ => Scalar::Null,
            },
            Expr::Nested(inner) => self.eval(inner),
            Expr::IsNull(inner) => Scalar::Bool(self.eval(inner) == Scalar::Null),
            Expr::IsNotNull(inner) => Scalar::Bool(self.eval(inner) != Scalar::Null),
            Expr::UnaryOp { op, expr } => {
                let value = self.eval(expr);
                match op {
                    UnaryOperator::Not => bool_scalar(value.truth().map(|b| !b)),
                    UnaryOperator::Minus => value
                        .number()
                        .map(|n| Scalar::Number(-n))
                        .unwrap_or(Scalar::Null),
                    _ => value,
                }
            }
            Expr::BinaryOp { left, op, right } => self.binary(left, op, right),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let value = self.eval(expr);
                if value == Scalar::Null {
                    return Scalar::Null;
                }
                let mut saw_null = false;
                for item in list {
                    match compare(&value, &self.eval(item)) {
                        Some(Ordering::Equal) => return Scalar::Bool(!negated),
                        None => saw_null = true,
                        _ => {}
                    }
                }
                if saw_null {
                    Scalar::Null
                } else {
                    Scalar::Bool(*negated)
                }
            }
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let value = self.eval(expr);
                let above = compare(&value, &self.eval(low)).map(|o| o != Ordering::Less);
                let below = compare(&value, &self.eval(high)).map(|o| o != Ordering::Greater);
                let inside = and3(above, below);
                bool_scalar(inside.map(|b| b != *negated))
            }
            Expr::Like {
                negated,
                expr,
                pattern,
                ..
            }
            | Expr::ILike {
                negated,
                expr,
                pattern,
                ..
            } => {
                let (Some(text), Some(pattern)) = (self.eval(expr).text(), self.eval(pattern).text())
                else {
                    return Scalar::Null;
                };
                let matched = match self.patterns.get(&pattern) {
                    Some(re) => re.is_match(&text),
                    None => like_regex(&pattern).is_some_and(|re| re.is_match(&text)),
                };
                Scalar::Bool(matched != *negated)
            }
            _ => Scalar::Null,
        }
    }

    fn binary(&self, left: &Expr, op: &BinaryOperator, right: &Expr) -> Scalar {
        match op {
            BinaryOperator::And => {
                let l = self.eval(left).truth();
                if l == Some(false) {
                    return Scalar::Bool(false);
                }
                bool_scalar(and3(l, self.eval(right).truth()))
            }
            BinaryOperator::Or => {
                let l = self.eval(left).truth();
                if l == Some(true) {
                    return Scalar::Bool(true);
                }
                let r = self.eval(right).truth();
                bool_scalar(match (l, r) {
                    (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                })
            }
            BinaryOperator::StringConcat => {
                match (self.eval(left).text(), self.eval(right).text()) {
                    (Some(a), Some(b)) => Scalar::Text(a + &b),
                    _ => Scalar::Null,
                }
            }
            BinaryOperator::Plus
            | BinaryOperator::Minus
            | BinaryOperator::Multiply
            | BinaryOperator::Divide
            | BinaryOperator::Modulo => {
                let (Some(a), Some(b)) = (self.eval(left).number(), self.eval(right).number())
                else {
                    return Scalar::Null;
                };
                let result = match op {
                    BinaryOperator::Plus => a + b,
                    BinaryOperator::Minus => a - b,
                    BinaryOperator::Multiply => a * b,
                    BinaryOperator::Divide if b != 0.0 => a / b,
                    BinaryOperator::Modulo if b != 0.0 => a % b,
                    _ => return Scalar::Null,
                };
                Scalar::Number(result)
            }
            comparison => {
                let ordering = compare(&self.eval(left), &self.eval(right));
                bool_scalar(ordering.map(|o| match comparison {
                    BinaryOperator::Eq => o == Ordering::Equal,
                    BinaryOperator::NotEq => o != Ordering::Equal,
                    BinaryOperator::Lt => o == Ordering::Less,
                    BinaryOperator::LtEq => o != Ordering::Greater,
                    BinaryOperator::Gt => o == Ordering::Greater,
                    BinaryOperator::GtEq => o != Ordering::Less,
                    _ => false,
                }))
            }
        }
    }
}

fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn bool_scalar(value: Option<bool>) -> Scalar {
    value.map(Scalar::Bool).unwrap_or(Scalar::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns() {
        let re = like_regex("A_c%").unwrap();
        assert!(re.is_match("abcdef"));
        assert!(!re.is_match("xabc"));
        assert!(like_regex("1.5%").unwrap().is_match("1.5 m"));
        assert!(!like_regex("1.5%").unwrap().is_match("115"));
    }

    #[test]
    fn three_valued_logic() {
        assert_eq!(and3(Some(true), None), None);
        assert_eq!(and3(Some(false), None), Some(false));
        assert_eq!(compare(&Scalar::Text("10".into()), &Scalar::Number(9.0)), Some(Ordering::Greater));
        assert_eq!(compare(&Scalar::Null, &Scalar::Number(1.0)), None);
    }
}
