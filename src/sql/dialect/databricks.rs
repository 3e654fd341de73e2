//! Databricks (Spark SQL) dialect.
//!
//! Databricks features:
//! - Backtick identifier quoting
//! - Backslash-escaped string literals
//! - `?` bind placeholders
//! - `PERCENTILE(x, p)` aggregate

use super::helpers;
use super::{PlaceholderStyle, SqlDialect};
use crate::model::types::DataType;
use crate::sql::expr::{func, lit_float, Expr};

/// Databricks (Spark SQL) dialect.
#[derive(Debug, Clone, Copy)]
pub struct Databricks;

impl SqlDialect for Databricks {
    fn name(&self) -> &'static str {
        "databricks"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_backslash(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }

    fn percentile(&self, p: f64, expr: Expr) -> Option<Expr> {
        Some(func("PERCENTILE", vec![expr, lit_float(p)]))
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_databricks(dt)
    }
}
