//! SQL Dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect differences.
//! Each dialect implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (ANSI/PG/DuckDB), `` ` `` (MySQL), `[]` (T-SQL)
//! - Boolean literals: true/false vs 1/0
//! - String concatenation: `||` vs `+` vs CONCAT()
//! - Bind placeholders: `$1` vs `?` vs `@name`
//! - Canonical function and aggregate spelling
//!
//! # Usage
//!
//! ```ignore
//! use metrica::sql::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::Postgres;
//! let quoted = dialect.quote_identifier("user");  // "user"
//! ```
//!
//! # Function coverage
//!
//! | Function | PostgreSQL | SQL Server | MySQL | DuckDB | Snowflake | BigQuery | Redshift | Databricks |
//! |----------|-----------|------------|-------|--------|-----------|----------|----------|------------|
//! | date_trunc | ✓ | 2022+ | ❌ | ✓ | ✓ | ✓ | ✓ | ✓ |
//! | percentile | ✓ | ❌ | ❌ | ✓ | ✓ | ❌ | ✓ | ✓ |
//!
//! A mapping that returns `None` surfaces as `DialectUnsupportedFunction`.

mod bigquery;
mod databricks;
mod duckdb;
pub mod helpers;
mod mysql;
mod postgres;
mod redshift;
mod snowflake;
mod tsql;

pub use bigquery::BigQuery;
pub use databricks::Databricks;
pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use redshift::Redshift;
pub use snowflake::Snowflake;
pub use tsql::TSql;

use super::expr::Expr;
use crate::model::types::{AggregationKind, DataType, TimeUnit};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a dialect spells bind parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ...; a repeated name reuses its slot.
    Numbered,
    /// `?`; one slot per occurrence.
    Positional,
    /// `@name`.
    Named,
}

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// Implementations handle dialect-specific syntax differences.
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    ///
    /// - ANSI/PostgreSQL/DuckDB: `"identifier"`
    /// - MySQL: `` `identifier` ``
    /// - T-SQL: `[identifier]`
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    ///
    /// All dialects use single quotes with `''` for escaping.
    /// Override for Unicode prefix (T-SQL N'...') or backslash escapes.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    ///
    /// - PostgreSQL/DuckDB: `true`/`false`
    /// - MySQL/T-SQL: `1`/`0`
    fn format_bool(&self, b: bool) -> &'static str;

    /// Format a NULL literal.
    fn format_null(&self) -> &'static str {
        "NULL"
    }

    // =========================================================================
    // Bind Parameters
    // =========================================================================

    /// Placeholder spelling for bind parameters.
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered
    }

    // =========================================================================
    // Operators
    // =========================================================================

    /// String concatenation operator.
    ///
    /// - ANSI/PostgreSQL/DuckDB: `||`
    /// - T-SQL: `+`
    /// - MySQL: `CONCAT()` (|| is OR by default)
    fn concat_operator(&self) -> &'static str {
        "||"
    }

    /// Whether this dialect supports the concat operator.
    ///
    /// MySQL uses `||` as logical OR by default.
    fn supports_concat_operator(&self) -> bool {
        true
    }

    /// Whether this dialect supports FULL OUTER JOIN.
    fn supports_full_outer_join(&self) -> bool {
        true
    }

    // =========================================================================
    // Canonical Functions
    // =========================================================================

    /// Remap a canonical function name for this dialect.
    ///
    /// Returns `Some(new_name)` if the function should be remapped, `None` to
    /// keep the canonical name. The input is matched case-insensitively.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }

    /// Truncate a date or timestamp to `unit`.
    ///
    /// Default: `DATE_TRUNC('unit', expr)`.
    fn date_trunc(&self, unit: TimeUnit, expr: Expr) -> Option<Expr> {
        Some(helpers::date_trunc_string_unit(unit, expr))
    }

    /// Function name for a plain aggregate.
    ///
    /// Percentile is handled by [`SqlDialect::percentile`].
    fn aggregate_name(&self, kind: AggregationKind) -> Option<&'static str> {
        helpers::aggregate_name_standard(kind)
    }

    /// Continuous percentile `p` of `expr`.
    ///
    /// Default: `PERCENTILE_CONT(p) WITHIN GROUP (ORDER BY expr)`.
    fn percentile(&self, p: f64, expr: Expr) -> Option<Expr> {
        Some(helpers::percentile_within_group(p, expr))
    }

    /// Emit a data type for this dialect.
    fn emit_data_type(&self, dt: &DataType) -> String {
        helpers::emit_data_type_ansi(dt)
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    DuckDb,
    TSql,
    MySql,
    #[default]
    Postgres,
    Snowflake,
    BigQuery,
    Redshift,
    Databricks,
}

impl Dialect {
    /// Every supported dialect, in a stable order.
    pub const ALL: [Dialect; 8] = [
        Dialect::Postgres,
        Dialect::DuckDb,
        Dialect::MySql,
        Dialect::TSql,
        Dialect::Snowflake,
        Dialect::BigQuery,
        Dialect::Redshift,
        Dialect::Databricks,
    ];

    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::DuckDb => &DuckDb,
            Dialect::Postgres => &Postgres,
            Dialect::TSql => &TSql,
            Dialect::MySql => &MySql,
            Dialect::Snowflake => &Snowflake,
            Dialect::BigQuery => &BigQuery,
            Dialect::Redshift => &Redshift,
            Dialect::Databricks => &Databricks,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn format_null(&self) -> &'static str {
        self.dialect().format_null()
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        self.dialect().placeholder_style()
    }

    fn concat_operator(&self) -> &'static str {
        self.dialect().concat_operator()
    }

    fn supports_concat_operator(&self) -> bool {
        self.dialect().supports_concat_operator()
    }

    fn supports_full_outer_join(&self) -> bool {
        self.dialect().supports_full_outer_join()
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }

    fn date_trunc(&self, unit: TimeUnit, expr: Expr) -> Option<Expr> {
        self.dialect().date_trunc(unit, expr)
    }

    fn aggregate_name(&self, kind: AggregationKind) -> Option<&'static str> {
        self.dialect().aggregate_name(kind)
    }

    fn percentile(&self, p: f64, expr: Expr) -> Option<Expr> {
        self.dialect().percentile(p, expr)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        self.dialect().emit_data_type(dt)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "duckdb" => Ok(Dialect::DuckDb),
            "mysql" => Ok(Dialect::MySql),
            "tsql" | "mssql" | "sqlserver" => Ok(Dialect::TSql),
            "snowflake" => Ok(Dialect::Snowflake),
            "bigquery" => Ok(Dialect::BigQuery),
            "redshift" => Ok(Dialect::Redshift),
            "databricks" | "spark" => Ok(Dialect::Databricks),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}

impl Serialize for Dialect {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Dialect {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
