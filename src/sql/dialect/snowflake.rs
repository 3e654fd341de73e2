//! Snowflake SQL dialect.
//!
//! Snowflake features:
//! - ANSI identifier quoting (`"`)
//! - Backslash escapes inside string literals
//! - `?` bind placeholders
//! - `PERCENTILE_CONT ... WITHIN GROUP`

use super::helpers;
use super::{PlaceholderStyle, SqlDialect};
use crate::model::types::DataType;

/// Snowflake SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Snowflake;

impl SqlDialect for Snowflake {
    fn name(&self) -> &'static str {
        "snowflake"
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

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_snowflake(dt)
    }
}
