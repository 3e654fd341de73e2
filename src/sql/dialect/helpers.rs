//! Shared helper functions for SQL dialect implementations.
//!
//! This module provides reusable building blocks that dialects can compose
//! to implement the `SqlDialect` trait with minimal duplication.

use crate::model::types::{AggregationKind, DataType, TimeUnit};
use crate::sql::expr::{func, lit_float, lit_str, Expr};

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with double quotes (ANSI style).
/// Used by: Postgres, DuckDB, Snowflake, Redshift
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
/// Used by: MySQL, BigQuery, Databricks
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote identifier with square brackets.
/// Used by: T-SQL
pub fn quote_bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

// =============================================================================
// String Quoting
// =============================================================================

/// Quote string with single quotes (standard SQL).
/// Used by: Postgres, DuckDB
pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote string with N prefix for Unicode (T-SQL).
pub fn quote_string_unicode(s: &str) -> String {
    format!("N'{}'", s.replace('\'', "''"))
}

/// Standard quoting for dialects that also honour backslash escapes.
/// Used by: MySQL, Snowflake, Redshift
pub fn quote_string_escaped(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

/// Backslash-escaped quoting, no doubled quotes.
/// Used by: BigQuery, Databricks
pub fn quote_string_backslash(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

// =============================================================================
// Boolean Formatting
// =============================================================================

/// Format boolean as literal true/false.
/// Used by: Postgres, DuckDB, Snowflake, BigQuery, Spark
pub fn format_bool_literal(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Format boolean as numeric 1/0.
/// Used by: T-SQL, MySQL
pub fn format_bool_numeric(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

// =============================================================================
// Date Truncation
// =============================================================================

/// `DATE_TRUNC('unit', expr)`
/// Used by: Postgres, DuckDB, Snowflake, Redshift, Databricks
pub fn date_trunc_string_unit(unit: TimeUnit, expr: Expr) -> Expr {
    func("DATE_TRUNC", vec![lit_str(unit.as_str()), expr])
}

/// `DATETRUNC(UNIT, expr)`
/// Used by: T-SQL (2022+)
pub fn date_trunc_tsql(unit: TimeUnit, expr: Expr) -> Expr {
    func("DATETRUNC", vec![Expr::Keyword(unit.keyword()), expr])
}

/// `DATE_TRUNC(expr, UNIT)`
/// Used by: BigQuery
pub fn date_trunc_bigquery(unit: TimeUnit, expr: Expr) -> Expr {
    func("DATE_TRUNC", vec![expr, Expr::Keyword(unit.keyword())])
}

// =============================================================================
// Aggregates
// =============================================================================

/// Standard aggregate names.
pub fn aggregate_name_standard(kind: AggregationKind) -> Option<&'static str> {
    match kind {
        AggregationKind::Sum => Some("SUM"),
        AggregationKind::Avg => Some("AVG"),
        AggregationKind::Count => Some("COUNT"),
        AggregationKind::Min => Some("MIN"),
        AggregationKind::Max => Some("MAX"),
        AggregationKind::Stddev => Some("STDDEV_SAMP"),
        AggregationKind::Variance => Some("VAR_SAMP"),
        AggregationKind::Percentile => None,
    }
}

/// T-SQL aggregate names.
pub fn aggregate_name_tsql(kind: AggregationKind) -> Option<&'static str> {
    match kind {
        AggregationKind::Stddev => Some("STDEV"),
        AggregationKind::Variance => Some("VAR"),
        other => aggregate_name_standard(other),
    }
}

/// `PERCENTILE_CONT(p) WITHIN GROUP (ORDER BY expr)`
/// Used by: Postgres, Snowflake, Redshift
pub fn percentile_within_group(p: f64, expr: Expr) -> Expr {
    Expr::WithinGroup {
        function: Box::new(func("PERCENTILE_CONT", vec![lit_float(p)])),
        order_by: Box::new(expr),
    }
}

// =============================================================================
// Function Remapping
// =============================================================================

/// Remap canonical functions for T-SQL.
pub fn remap_function_tsql(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "LENGTH" => Some("LEN"),
        "CEIL" => Some("CEILING"),
        _ => None,
    }
}

/// Remap canonical functions for BigQuery.
pub fn remap_function_bigquery(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        "LENGTH" => Some("CHAR_LENGTH"),
        _ => None,
    }
}

/// Remap canonical functions for MySQL.
pub fn remap_function_mysql(name: &str) -> Option<&'static str> {
    match name.to_uppercase().as_str() {
        // LENGTH counts bytes in MySQL.
        "LENGTH" => Some("CHAR_LENGTH"),
        _ => None,
    }
}

// =============================================================================
// Data Type Emission
// =============================================================================

/// Emit data type for ANSI/Postgres style.
/// Used by: Postgres, DuckDB, Redshift
pub fn emit_data_type_ansi(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BOOLEAN".into(),
        DataType::Int => "BIGINT".into(),
        DataType::Float => "DOUBLE PRECISION".into(),
        DataType::Decimal => "DECIMAL(18, 2)".into(),
        DataType::String => "TEXT".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "TIMESTAMP".into(),
    }
}

/// Emit data type for MySQL (CAST targets only).
pub fn emit_data_type_mysql(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "UNSIGNED".into(),
        DataType::Int => "SIGNED".into(),
        DataType::Float => "DOUBLE".into(),
        DataType::Decimal => "DECIMAL(18, 2)".into(),
        DataType::String => "CHAR".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "DATETIME".into(),
    }
}

/// Emit data type for T-SQL.
pub fn emit_data_type_tsql(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BIT".into(),
        DataType::Int => "BIGINT".into(),
        DataType::Float => "FLOAT".into(),
        DataType::Decimal => "DECIMAL(18, 2)".into(),
        DataType::String => "NVARCHAR(MAX)".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "DATETIME2".into(),
    }
}

/// Emit data type for Snowflake.
pub fn emit_data_type_snowflake(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BOOLEAN".into(),
        DataType::Int => "BIGINT".into(),
        DataType::Float => "DOUBLE".into(),
        DataType::Decimal => "NUMBER(18, 2)".into(),
        DataType::String => "VARCHAR".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "TIMESTAMP_NTZ".into(),
    }
}

/// Emit data type for BigQuery.
pub fn emit_data_type_bigquery(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BOOL".into(),
        DataType::Int => "INT64".into(),
        DataType::Float => "FLOAT64".into(),
        DataType::Decimal => "NUMERIC(18, 2)".into(),
        DataType::String => "STRING".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "TIMESTAMP".into(),
    }
}

/// Emit data type for Databricks (Spark SQL).
pub fn emit_data_type_databricks(dt: &DataType) -> String {
    match dt {
        DataType::Bool => "BOOLEAN".into(),
        DataType::Int => "BIGINT".into(),
        DataType::Float => "DOUBLE".into(),
        DataType::Decimal => "DECIMAL(18, 2)".into(),
        DataType::String => "STRING".into(),
        DataType::Date => "DATE".into(),
        DataType::Timestamp => "TIMESTAMP".into(),
    }
}
