//! Amazon Redshift SQL dialect.
//!
//! Redshift features:
//! - PostgreSQL-based syntax
//! - ANSI identifier quoting (`"`)
//! - Backslash escapes inside string literals
//! - `$n` bind placeholders

use super::helpers;
use super::SqlDialect;

/// Amazon Redshift SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Redshift;

impl SqlDialect for Redshift {
    fn name(&self) -> &'static str {
        "redshift"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_escaped(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }
}
