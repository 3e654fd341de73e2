//! MySQL SQL dialect.
//!
//! MySQL differences from ANSI:
//! - Backtick identifier quoting (`` `name` ``)
//! - Boolean is TINYINT(1), returns 1/0
//! - `||` is logical OR by default (use CONCAT())
//! - Backslash escapes inside string literals
//! - `?` bind placeholders
//! - No DATE_TRUNC, no FULL OUTER JOIN, no continuous percentile aggregate

use super::helpers;
use super::{PlaceholderStyle, SqlDialect};
use crate::model::types::{DataType, TimeUnit};
use crate::sql::expr::Expr;

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_escaped(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }

    fn supports_concat_operator(&self) -> bool {
        false
    }

    fn supports_full_outer_join(&self) -> bool {
        false
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_mysql(name)
    }

    fn date_trunc(&self, _unit: TimeUnit, _expr: Expr) -> Option<Expr> {
        None
    }

    fn percentile(&self, _p: f64, _expr: Expr) -> Option<Expr> {
        None
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_mysql(dt)
    }
}
