//! Expression AST - the core of SQL expression building.
//!
//! This module provides a strongly-typed AST for SQL expressions
//! with exhaustive pattern matching enforced by the compiler.
//! There is no raw-SQL variant: every piece of text either comes from a
//! `'static` string or passes through dialect quoting.

use super::dialect::{Dialect, SqlDialect};
use super::token::{Token, TokenStream};
use crate::model::types::DataType;

// =============================================================================
// Expression AST
// =============================================================================

/// A SQL expression.
///
/// Every variant must be handled in `to_tokens_for_dialect()`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference: optional_table.column
    Column {
        table: Option<String>,
        column: String,
    },

    /// Literal values
    Literal(Literal),

    /// Bind parameter placeholder.
    Param(String),

    /// Binary operation: left op right
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },

    /// Unary operation: op expr
    UnaryOp { op: UnaryOperator, expr: Box<Expr> },

    /// Function call: name(args...)
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },

    /// Ordered-set aggregate: `function WITHIN GROUP (ORDER BY order_by)`
    WithinGroup {
        function: Box<Expr>,
        order_by: Box<Expr>,
    },

    /// CASE WHEN... THEN... ELSE... END
    ///
    /// Clauses render in vector order; the first match wins at runtime.
    Case {
        when_clauses: Vec<(Expr, Expr)>,
        else_clause: Option<Box<Expr>>,
    },

    /// CAST(expr AS type)
    Cast {
        expr: Box<Expr>,
        data_type: DataType,
    },

    /// IN: expr IN (values...)
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// BETWEEN: expr BETWEEN low AND high
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// Wildcard: * or table.*
    Star { table: Option<String> },

    /// Bare keyword argument, e.g. the date part in `DATETRUNC(month, x)`.
    Keyword(&'static str),

    /// Parenthesized expression
    Paren(Box<Expr>),
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    // Logical
    And,
    Or,
    // Arithmetic
    Plus,
    Minus,
    Mul,
    Div,
    // String
    Concat,
    Like,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

impl Expr {
    /// Convert this expression to a token stream for a specific dialect.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        match self {
            Expr::Column { table, column } => {
                if let Some(t) = table {
                    ts.push(Token::Ident(t.clone()));
                    ts.push(Token::Dot);
                }
                ts.push(Token::Ident(column.clone()));
            }

            Expr::Literal(lit) => {
                ts.push(match lit {
                    Literal::Int(n) => Token::LitInt(*n),
                    Literal::Float(f) => Token::LitFloat(*f),
                    Literal::String(s) => Token::LitString(s.clone()),
                    Literal::Bool(b) => Token::LitBool(*b),
                    Literal::Null => Token::LitNull,
                });
            }

            Expr::Param(name) => {
                ts.push(Token::Param(name.clone()));
            }

            Expr::BinaryOp { left, op, right } => {
                if *op == BinaryOperator::Concat && !dialect.supports_concat_operator() {
                    ts.push(Token::FunctionName("CONCAT".into()));
                    ts.lparen();
                    ts.append(&left.to_tokens_for_dialect(dialect));
                    ts.comma().space();
                    ts.append(&right.to_tokens_for_dialect(dialect));
                    ts.rparen();
                } else {
                    ts.append(&left.to_tokens_for_dialect(dialect));
                    ts.space();
                    ts.push(binary_op_to_token(*op));
                    ts.space();
                    ts.append(&right.to_tokens_for_dialect(dialect));
                }
            }

            Expr::UnaryOp { op, expr } => {
                match op {
                    UnaryOperator::Not => {
                        ts.push(Token::Not).space();
                    }
                    UnaryOperator::Minus => {
                        ts.push(Token::Minus);
                    }
                }
                ts.append(&expr.to_tokens_for_dialect(dialect));
            }

            Expr::Function {
                name,
                args,
                distinct,
            } => {
                ts.push(Token::FunctionName(name.clone()));
                ts.lparen();
                if *distinct {
                    ts.push(Token::Distinct).space();
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.append(&arg.to_tokens_for_dialect(dialect));
                }
                ts.rparen();
            }

            Expr::WithinGroup { function, order_by } => {
                ts.append(&function.to_tokens_for_dialect(dialect));
                ts.space().push(Token::WithinGroup).space().lparen();
                ts.push(Token::OrderBy).space();
                ts.append(&order_by.to_tokens_for_dialect(dialect));
                ts.rparen();
            }

            Expr::Case {
                when_clauses,
                else_clause,
            } => {
                ts.push(Token::Case);
                for (when, then) in when_clauses {
                    ts.space().push(Token::When).space();
                    ts.append(&when.to_tokens_for_dialect(dialect));
                    ts.space().push(Token::Then).space();
                    ts.append(&then.to_tokens_for_dialect(dialect));
                }
                if let Some(else_expr) = else_clause {
                    ts.space().push(Token::Else).space();
                    ts.append(&else_expr.to_tokens_for_dialect(dialect));
                }
                ts.space().push(Token::End);
            }

            Expr::Cast { expr, data_type } => {
                ts.push(Token::Cast).lparen();
                ts.append(&expr.to_tokens_for_dialect(dialect));
                ts.space().push(Token::As).space();
                ts.push(Token::DataType(*data_type));
                ts.rparen();
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                // "x IN ()" is invalid SQL; render the constant it would mean.
                if values.is_empty() {
                    ts.push(Token::LitBool(*negated));
                } else {
                    ts.append(&expr.to_tokens_for_dialect(dialect));
                    if *negated {
                        ts.space().push(Token::Not);
                    }
                    ts.space().push(Token::In).space().lparen();
                    for (i, val) in values.iter().enumerate() {
                        if i > 0 {
                            ts.comma().space();
                        }
                        ts.append(&val.to_tokens_for_dialect(dialect));
                    }
                    ts.rparen();
                }
            }

            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                ts.append(&expr.to_tokens_for_dialect(dialect));
                if *negated {
                    ts.space().push(Token::Not);
                }
                ts.space().push(Token::Between).space();
                ts.append(&low.to_tokens_for_dialect(dialect));
                ts.space().push(Token::And).space();
                ts.append(&high.to_tokens_for_dialect(dialect));
            }

            Expr::IsNull { expr, negated } => {
                ts.append(&expr.to_tokens_for_dialect(dialect));
                ts.space();
                ts.push(if *negated {
                    Token::IsNotNull
                } else {
                    Token::IsNull
                });
            }

            Expr::Star { table } => {
                if let Some(t) = table {
                    ts.push(Token::Ident(t.clone()));
                    ts.push(Token::Dot);
                }
                ts.push(Token::Star);
            }

            Expr::Keyword(word) => {
                ts.push(Token::Keyword(word));
            }

            Expr::Paren(inner) => {
                ts.lparen();
                ts.append(&inner.to_tokens_for_dialect(dialect));
                ts.rparen();
            }
        }

        ts
    }
}

fn binary_op_to_token(op: BinaryOperator) -> Token {
    match op {
        BinaryOperator::Eq => Token::Eq,
        BinaryOperator::Ne => Token::Ne,
        BinaryOperator::Lt => Token::Lt,
        BinaryOperator::Gt => Token::Gt,
        BinaryOperator::Lte => Token::Lte,
        BinaryOperator::Gte => Token::Gte,
        BinaryOperator::And => Token::And,
        BinaryOperator::Or => Token::Or,
        BinaryOperator::Plus => Token::Plus,
        BinaryOperator::Minus => Token::Minus,
        BinaryOperator::Mul => Token::Mul,
        BinaryOperator::Div => Token::Div,
        BinaryOperator::Concat => Token::Concat,
        BinaryOperator::Like => Token::Like,
    }
}

// =============================================================================
// Expression Constructors
// =============================================================================

/// Create a column reference.
pub fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        column: name.into(),
    }
}

/// Create a table-qualified column reference.
pub fn table_col(table: &str, column: &str) -> Expr {
    Expr::Column {
        table: Some(table.into()),
        column: column.into(),
    }
}

pub fn lit_int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

pub fn lit_float(f: f64) -> Expr {
    Expr::Literal(Literal::Float(f))
}

pub fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::String(s.into()))
}

/// Bind parameter placeholder.
pub fn param(name: &str) -> Expr {
    Expr::Param(name.into())
}

pub fn star() -> Expr {
    Expr::Star { table: None }
}

/// COUNT(*)
pub fn count_star() -> Expr {
    Expr::Function {
        name: "COUNT".into(),
        args: vec![star()],
        distinct: false,
    }
}

/// Generic function call.
pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function {
        name: name.into(),
        args,
        distinct: false,
    }
}

/// Aggregate call with an optional DISTINCT.
pub fn aggregate(name: &str, arg: Expr, distinct: bool) -> Expr {
    Expr::Function {
        name: name.into(),
        args: vec![arg],
        distinct,
    }
}

pub fn sum(expr: Expr) -> Expr {
    aggregate("SUM", expr, false)
}

pub fn cast(expr: Expr, data_type: DataType) -> Expr {
    Expr::Cast {
        expr: Box::new(expr),
        data_type,
    }
}

// =============================================================================
// Fluent Builder
// =============================================================================

/// Fluent operators on expressions.
pub trait ExprExt: Sized {
    fn into_expr(self) -> Expr;

    fn binary(self, op: BinaryOperator, other: impl Into<Expr>) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self.into_expr()),
            op,
            right: Box::new(other.into()),
        }
    }

    fn eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Eq, other)
    }

    fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Gt, other)
    }

    fn gte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Gte, other)
    }

    fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::And, other)
    }

    fn concat(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Concat, other)
    }

    fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: false,
        }
    }

    fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: true,
        }
    }

    fn in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: false,
        }
    }

    fn not_in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: true,
        }
    }

    fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Expr {
        Expr::Between {
            expr: Box::new(self.into_expr()),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: false,
        }
    }

    fn paren(self) -> Expr {
        Expr::Paren(Box::new(self.into_expr()))
    }

    fn alias(self, name: &str) -> super::query::SelectExpr {
        super::query::SelectExpr::new(self.into_expr()).with_alias(name)
    }
}

impl ExprExt for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        lit_int(n)
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        lit_int(n as i64)
    }
}

impl From<f64> for Expr {
    fn from(f: f64) -> Self {
        lit_float(f)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        lit_str(s)
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Literal::String(s))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Literal::Bool(b))
    }
}

// =============================================================================
// Tests
// =============================================================================
