//! The single SELECT shape a metric plan lowers to.
//!
//! One base table, optional joins, ANDed filters, and grouping plus
//! ascending ordering by select-list expressions.

use super::dialect::Dialect;
use super::expr::{Expr, ExprExt};
use super::token::{RenderedSql, Token, TokenStream};
use crate::model::metric::{JoinKind, TableSpec};

/// A SELECT list item.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.expr.to_tokens_for_dialect(dialect);
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

fn table_tokens(table: &TableSpec) -> TokenStream {
    let mut ts = TokenStream::new();
    ts.push(Token::QualifiedIdent {
        schema: table.schema.clone(),
        name: table.name.clone(),
    });
    ts
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableSpec,
    pub on: Expr,
}

impl Join {
    fn tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        match self.kind {
            JoinKind::Inner => ts.push(Token::Inner),
            JoinKind::Left => ts.push(Token::Left),
            JoinKind::Right => ts.push(Token::Right),
            JoinKind::Full => ts.push(Token::Full).space().push(Token::Outer),
        };
        ts.space().push(Token::Join).space();
        ts.append(&table_tokens(&self.table));
        ts.space().push(Token::On).space();
        ts.append(&self.on.to_tokens_for_dialect(dialect));
        ts
    }
}

/// A SELECT statement over `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub select: Vec<SelectExpr>,
    pub from: TableSpec,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    /// Always ascending.
    pub order_by: Vec<Expr>,
}

impl Query {
    pub fn new(from: TableSpec, select: Vec<SelectExpr>) -> Self {
        Self {
            select,
            from,
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn join(mut self, kind: JoinKind, table: TableSpec, on: Expr) -> Self {
        self.joins.push(Join { kind, table, on });
        self
    }

    /// ANDed with any earlier condition.
    pub fn filter(mut self, condition: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn order_by(mut self, exprs: Vec<Expr>) -> Self {
        self.order_by = exprs;
        self
    }

    fn tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Select);
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                ts.comma();
            }
            ts.newline().indent(1);
            ts.append(&item.tokens(dialect));
        }

        ts.newline().push(Token::From).space();
        ts.append(&table_tokens(&self.from));

        for join in &self.joins {
            ts.newline();
            ts.append(&join.tokens(dialect));
        }

        if let Some(condition) = &self.where_clause {
            ts.newline().push(Token::Where).space();
            ts.append(&condition.to_tokens_for_dialect(dialect));
        }

        if !self.group_by.is_empty() {
            ts.newline().push(Token::GroupBy).space();
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&expr.to_tokens_for_dialect(dialect));
            }
        }

        if !self.order_by.is_empty() {
            ts.newline().push(Token::OrderBy).space();
            for (i, expr) in self.order_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&expr.to_tokens_for_dialect(dialect));
                ts.space().push(Token::Asc);
            }
        }

        ts
    }

    /// SQL plus placeholder order for `dialect`.
    pub fn render(&self, dialect: Dialect) -> RenderedSql {
        self.tokens(dialect).render(dialect)
    }
}
