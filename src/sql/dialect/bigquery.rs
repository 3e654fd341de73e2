//! BigQuery SQL dialect.
//!
//! BigQuery features:
//! - Backtick identifier quoting
//! - Backslash-escaped string literals
//! - `@name` query parameters
//! - `DATE_TRUNC(x, UNIT)` with a bare date part
//! - PERCENTILE_CONT exists only as an analytic function, so the
//!   aggregate form is unsupported

use super::helpers;
use super::{PlaceholderStyle, SqlDialect};
use crate::model::types::{DataType, TimeUnit};
use crate::sql::expr::Expr;

/// BigQuery SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct BigQuery;

impl SqlDialect for BigQuery {
    fn name(&self) -> &'static str {
        "bigquery"
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
        PlaceholderStyle::Named
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_bigquery(name)
    }

    fn date_trunc(&self, unit: TimeUnit, expr: Expr) -> Option<Expr> {
        Some(helpers::date_trunc_bigquery(unit, expr))
    }

    fn percentile(&self, _p: f64, _expr: Expr) -> Option<Expr> {
        None
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_bigquery(dt)
    }
}
