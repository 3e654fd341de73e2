//! Parse-back check for generated SQL.
//!
//! Runs emitted SQL through sqlparser with the closest parser dialect. Used
//! by `metrica validate --check-sql` and throughout the tests.

use sqlparser::dialect::{
    BigQueryDialect, DatabricksDialect, DuckDbDialect, MsSqlDialect, MySqlDialect,
    PostgreSqlDialect, RedshiftSqlDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;

use super::dialect::Dialect;

/// Check that `sql` parses for `dialect`. The error carries the parser message and the SQL.
pub fn check_syntax(sql: &str, dialect: Dialect) -> Result<(), String> {
    let parser_dialect: Box<dyn sqlparser::dialect::Dialect> = match dialect {
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::TSql => Box::new(MsSqlDialect {}),
        Dialect::Snowflake => Box::new(SnowflakeDialect {}),
        Dialect::BigQuery => Box::new(BigQueryDialect {}),
        Dialect::Redshift => Box::new(RedshiftSqlDialect {}),
        Dialect::Databricks => Box::new(DatabricksDialect {}),
    };

    Parser::parse_sql(&*parser_dialect, sql)
        .map(|_| ())
        .map_err(|e| format!("invalid {} SQL: {}\n{}", dialect, e, sql))
}
