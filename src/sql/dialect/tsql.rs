//! T-SQL (SQL Server / Azure SQL) dialect.
//!
//! T-SQL has significant differences from ANSI:
//! - Square bracket identifier quoting (`[name]`)
//! - N'...' prefix for Unicode strings
//! - String concatenation with `+`
//! - `@name` bind parameters
//! - `DATETRUNC(part, x)` (SQL Server 2022)
//! - STDEV/VAR instead of STDDEV_SAMP/VAR_SAMP
//! - PERCENTILE_CONT is window-only, so the aggregate form is unsupported

use super::helpers;
use super::{PlaceholderStyle, SqlDialect};
use crate::model::types::{AggregationKind, DataType, TimeUnit};
use crate::sql::expr::Expr;

/// T-SQL (SQL Server) dialect.
#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_bracket(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        if !s.is_ascii() {
            helpers::quote_string_unicode(s)
        } else {
            helpers::quote_string_single(s)
        }
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Named
    }

    fn concat_operator(&self) -> &'static str {
        "+"
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_tsql(name)
    }

    fn date_trunc(&self, unit: TimeUnit, expr: Expr) -> Option<Expr> {
        Some(helpers::date_trunc_tsql(unit, expr))
    }

    fn aggregate_name(&self, kind: AggregationKind) -> Option<&'static str> {
        helpers::aggregate_name_tsql(kind)
    }

    fn percentile(&self, _p: f64, _expr: Expr) -> Option<Expr> {
        None
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_tsql(dt)
    }
}
