//! Column references in filter expressions
//!
//! Collects the columns an expression reads and renames them in place, so a
//! filter written against exposed field names can be handed to a source
//! that knows the same columns under other names.

use sqlparser::ast::{Expr, Ident};

/// Name a column reference resolves to; qualified names use their last part
pub fn column_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.as_str()),
        Expr::CompoundIdentifier(idents) => idents.last().map(|i| i.value.as_str()),
        _ => None,
    }
}

/// Columns referenced by an expression, first-seen order, case-insensitively unique
pub fn referenced_columns(expr: &Expr) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    visit(expr, &mut |e| {
        if let Some(name) = column_name(e) {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                columns.push(name.to_string());
            }
        }
    });
    columns
}

fn visit(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    f(expr);
    match expr {
        Expr::Nested(inner)
        | Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::UnaryOp { expr: inner, .. } => visit(inner, f),
        Expr::BinaryOp { left, right, .. } => {
            visit(left, f);
            visit(right, f);
        }
        Expr::InList { expr, list, .. } => {
            visit(expr, f);
            list.iter().for_each(|e| visit(e, f));
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            visit(expr, f);
            visit(low, f);
            visit(high, f);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            visit(expr, f);
            visit(pattern, f);
        }
        _ => {}
    }
}

/// Identifier for a column, quoted when it is not a plain SQL word
pub fn column_ident(name: &str) -> Ident {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        Ident::new(name)
    } else {
        Ident::with_quote('"', name)
    }
}

/// Rename column references in place; `rename` returns `None` to keep a name
pub fn rename_columns(expr: &mut Expr, rename: &dyn Fn(&str) -> Option<String>) {
    let replacement = column_name(expr).and_then(rename);
    if let Some(new_name) = replacement {
        *expr = Expr::Identifier(column_ident(&new_name));
        return;
    }

    match expr {
        Expr::Nested(inner)
        | Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::UnaryOp { expr: inner, .. } => rename_columns(inner, rename),
        Expr::BinaryOp { left, right, .. } => {
            rename_columns(left, rename);
            rename_columns(right, rename);
        }
        Expr::InList { expr, list, .. } => {
            rename_columns(expr, rename);
            list.iter_mut().for_each(|e| rename_columns(e, rename));
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            rename_columns(expr, rename);
            rename_columns(low, rename);
            rename_columns(high, rename);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            rename_columns(expr, rename);
            rename_columns(pattern, rename);
        }
        _ => {}
    }
}
