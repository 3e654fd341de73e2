//! SQL generation module.
//!
//! This module provides a type-safe SQL builder that generates multi-dialect SQL.
//! It includes:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation, including bind placeholders
//! - [`dialect`] - SQL dialect implementations
//! - [`adapter`] - lowering of planned metric queries into one dialect
//! - [`syntax`] - parse-back check of generated SQL

pub mod adapter;
pub mod dialect;
pub mod expr;
pub mod query;
pub mod syntax;
pub mod token;

pub use adapter::{render_plan, IrConverter, RenderedQuery};
pub use dialect::{Dialect, PlaceholderStyle, SqlDialect};
pub use expr::{
    col, count_star, func, lit_float, lit_int, lit_str, param, sum,
    table_col, BinaryOperator, Expr, ExprExt, Literal, UnaryOperator,
};
pub use query::{Join, Query, SelectExpr};
pub use token::{RenderedSql, Token, TokenStream};
