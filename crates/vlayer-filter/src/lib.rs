//! Attribute filters
//!
//! This crate handles:
//! - Parsing attribute predicates with datafusion-sqlparser-rs
//! - Resolving and renaming the columns a predicate references
//! - Evaluating predicates against features

pub mod eval;
pub mod parser;
pub mod resolver;

pub use parser::{FilterError, FilterParser};
pub use resolver::{column_ident, referenced_columns, rename_columns};

use regex::Regex;
use sqlparser::ast::{Expr, Value};
use std::collections::HashMap;
use vlayer_core::{Feature, LayerSchema};

/// A parsed attribute filter ready for evaluation
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    text: String,
    expr: Expr,
    patterns: HashMap<String, Regex>,
}

impl CompiledFilter {
    /// Parse filter text
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let expr = FilterParser::new().parse(text)?;
        Ok(Self::from_expr(text.trim().to_string(), expr))
    }

    fn from_expr(text: String, expr: Expr) -> Self {
        let mut patterns = HashMap::new();
        collect_patterns(&expr, &mut patterns);
        Self {
            text,
            expr,
            patterns,
        }
    }

    /// Text as given by the caller
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Columns the filter reads
    pub fn columns(&self) -> Vec<String> {
        referenced_columns(&self.expr)
    }

    /// Check that every referenced column exists; `fid` is always allowed
    pub fn validate(&self, schema: &LayerSchema) -> Result<(), FilterError> {
        match self
            .columns()
            .into_iter()
            .find(|c| schema.field_index(c).is_none() && !c.eq_ignore_ascii_case("fid"))
        {
            Some(missing) => Err(FilterError::UnknownColumn(missing)),
            None => Ok(()),
        }
    }

    /// Three-valued result: `None` when the predicate is unknown
    pub fn evaluate(&self, feature: &Feature) -> Option<bool> {
        let evaluator = eval::Evaluator {
            feature,
            patterns: &self.patterns,
        };
        match evaluator.eval(&self.expr) {
            eval::Scalar::Bool(b) => Some(b),
            eval::Scalar::Null => None,
            eval::Scalar::Number(n) => Some(n != 0.0),
            eval::Scalar::Text(s) => Some(!s.is_empty()),
        }
    }

    /// Whether the feature passes the filter
    pub fn matches(&self, feature: &Feature) -> bool {
        self.evaluate(feature).unwrap_or(false)
    }

    /// Copy with renamed columns; the text is re-rendered from the expression
    pub fn rename(&self, rename: &dyn Fn(&str) -> Option<String>) -> CompiledFilter {
        let mut expr = self.expr.clone();
        rename_columns(&mut expr, rename);
        Self::from_expr(expr.to_string(), expr)
    }
}

impl std::fmt::Display for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

fn collect_patterns(expr: &Expr, patterns: &mut HashMap<String, Regex>) {
    match expr {
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            if let Expr::Value(Value::SingleQuotedString(p)) = pattern.as_ref() {
                if let Some(re) = eval::like_regex(p) {
                    patterns.insert(p.clone(), re);
                }
            }
            collect_patterns(expr, patterns);
        }
        Expr::Nested(inner)
        | Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::UnaryOp { expr: inner, .. } => collect_patterns(inner, patterns),
        Expr::BinaryOp { left, right, .. } => {
            collect_patterns(left, patterns);
            collect_patterns(right, patterns);
        }
        _ => {}
    }
}

/// Join predicates with AND, parenthesising each
pub fn conjunction<'a>(parts: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let parts: Vec<&str> = parts.into_iter().filter(|p| !p.trim().is_empty()).collect();
    match parts.len() {
        0 => None,
        1 => Some(parts[0].to_string()),
        _ => Some(
            parts
                .iter()
                .map(|p| format!("({})", p))
                .collect::<Vec<_>>()
                .join(" AND "),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use vlayer_core::{FieldDefn, FieldType};

    fn feature() -> Feature {
        let schema = Arc::new(
            LayerSchema::new("t")
                .with_field(FieldDefn::new("id", FieldType::Integer))
                .with_field(FieldDefn::new("name", FieldType::String))
                .with_field(FieldDefn::new("val", FieldType::Real)),
        );
        Feature::new(schema)
            .with_fid(7)
            .with_field("id", 3)
            .with_field("name", "Alpha")
    }

    #[test]
    fn evaluates_predicates() {
        let f = feature();
        let cases = [
            ("id = 3", true),
            ("id <> 3", false),
            ("name LIKE 'al%'", true),
            ("name NOT LIKE 'al%'", false),
            ("id IN (1, 2, 3)", true),
            ("id BETWEEN 4 AND 9", false),
            ("val IS NULL", true),
            ("val > 1", false),
            ("NOT (val > 1)", false),
            ("val > 1 OR id = 3", true),
            ("fid = 7", true),
            ("id * 2 + 1 = 7", true),
            ("name || 'x' = 'Alphax'", true),
        ];
        for (text, expected) in cases {
            let filter = CompiledFilter::parse(text).unwrap();
            assert_eq!(filter.matches(&f), expected, "{}", text);
        }
    }

    #[test]
    fn unknown_is_not_a_match() {
        let filter = CompiledFilter::parse("val = 1").unwrap();
        assert_eq!(filter.evaluate(&feature()), None);
        assert!(!filter.matches(&feature()));
    }

    #[test]
    fn validates_columns() {
        let f = feature();
        assert!(CompiledFilter::parse("fid > 1 AND id = 1")
            .unwrap()
            .validate(f.schema())
            .is_ok());
        assert_eq!(
            CompiledFilter::parse("missing = 1").unwrap().validate(f.schema()),
            Err(FilterError::UnknownColumn("missing".to_string()))
        );
    }

    #[test]
    fn renamed_text_is_rendered() {
        let filter = CompiledFilter::parse("fid = 2").unwrap();
        let renamed = filter.rename(&|c| c.eq_ignore_ascii_case("fid").then(|| "gid".to_string()));
        assert_eq!(renamed.text(), "gid = 2");
    }

    #[test]
    fn joins_predicates() {
        assert_eq!(conjunction(["a = 1", ""]), Some("a = 1".to_string()));
        assert_eq!(
            conjunction(["a = 1", "b = 2"]),
            Some("(a = 1) AND (b = 2)".to_string())
        );
        assert_eq!(conjunction(Vec::<&str>::new()), None);
    }
}
