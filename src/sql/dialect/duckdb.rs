//! DuckDB SQL dialect.
//!
//! DuckDB is PostgreSQL-compatible with extensions:
//! - ANSI identifier quoting (`"`)
//! - `$n` bind placeholders
//! - `QUANTILE_CONT(x, p)` instead of the ordered-set form

use super::helpers;
use super::SqlDialect;
use crate::sql::expr::{func, lit_float, Expr};

/// DuckDB SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn percentile(&self, p: f64, expr: Expr) -> Option<Expr> {
        Some(func("QUANTILE_CONT", vec![expr, lit_float(p)]))
    }
}
