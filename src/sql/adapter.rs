//! Lowering of planned queries into one SQL dialect.
//!
//! [`IrConverter`] maps each [`IrExpr`] node onto the SQL builder AST,
//! asking the dialect for every construct whose spelling varies. A missing
//! mapping is a [`MetricError::DialectUnsupportedFunction`], never a guess.

use serde::Serialize;

use super::dialect::{Dialect, SqlDialect};
use super::expr::{self, BinaryOperator, Expr, ExprExt, Literal, UnaryOperator};
use super::query::{Query, SelectExpr};
use crate::compiler::{CanonicalFunction, IrBinaryOp, IrExpr};
use crate::error::{ComponentPath, MetricError, MetricResult};
use crate::model::metric::JoinKind;
use crate::model::types::{AggregationKind, ScalarValue};
use crate::planner::PlannedQuery;

/// Dialect SQL plus the placeholder name for each bind slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedQuery {
    pub sql: String,
    /// One entry per bind slot, in slot order. For `$n` dialects a repeated
    /// name appears once.
    pub placeholders: Vec<String>,
    pub dialect: Dialect,
}

/// Converts IR trees into SQL expressions for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct IrConverter {
    dialect: Dialect,
}

impl IrConverter {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Convert `ir`; `path` names the owning component in errors.
    pub fn convert(&self, ir: &IrExpr, path: &ComponentPath) -> MetricResult<Expr> {
        match ir {
            IrExpr::Column { table, column } => Ok(expr::table_col(table, column)),
            IrExpr::Literal { value } => Ok(literal(value)),
            IrExpr::Param { name } => Ok(expr::param(name)),
            IrExpr::Call { function, args } => self.convert_call(*function, args, path),
            IrExpr::Aggregate {
                kind,
                arg,
                distinct,
                percentile,
            } => self.convert_aggregate(*kind, arg.as_deref(), *distinct, *percentile, path),
            IrExpr::Binary { op, left, right } => {
                let left = self.operand(left, path)?;
                let right = self.operand(right, path)?;
                Ok(left.binary(binary_operator(*op), right))
            }
            IrExpr::Not { expr } => Ok(Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr: Box::new(self.operand(expr, path)?),
            }),
            IrExpr::In {
                expr,
                values,
                negated,
            } => {
                let target = self.operand(expr, path)?;
                let values = self.convert_all(values, path)?;
                Ok(if *negated {
                    target.not_in_list(values)
                } else {
                    target.in_list(values)
                })
            }
            IrExpr::Between { expr, low, high } => Ok(self
                .operand(expr, path)?
                .between(self.operand(low, path)?, self.operand(high, path)?)),
            IrExpr::IsNull { expr, negated } => {
                let target = self.operand(expr, path)?;
                Ok(if *negated {
                    target.is_not_null()
                } else {
                    target.is_null()
                })
            }
            IrExpr::Case {
                branches,
                otherwise,
            } => {
                let when_clauses = branches
                    .iter()
                    .map(|(when, then)| Ok((self.convert(when, path)?, self.convert(then, path)?)))
                    .collect::<MetricResult<Vec<_>>>()?;
                Ok(Expr::Case {
                    when_clauses,
                    else_clause: Some(Box::new(self.convert(otherwise, path)?)),
                })
            }
            IrExpr::Concat { parts, delimiter } => self.convert_concat(parts, delimiter, path),
        }
    }

    fn convert_all(&self, irs: &[IrExpr], path: &ComponentPath) -> MetricResult<Vec<Expr>> {
        irs.iter().map(|ir| self.convert(ir, path)).collect()
    }

    /// Nested binary expressions are parenthesized so tree shape survives rendering.
    fn operand(&self, ir: &IrExpr, path: &ComponentPath) -> MetricResult<Expr> {
        let converted = self.convert(ir, path)?;
        Ok(match ir {
            IrExpr::Binary { .. } | IrExpr::Between { .. } | IrExpr::In { .. } => {
                converted.paren()
            }
            _ => converted,
        })
    }

    fn convert_call(
        &self,
        function: CanonicalFunction,
        args: &[IrExpr],
        path: &ComponentPath,
    ) -> MetricResult<Expr> {
        let mut args = self.convert_all(args, path)?;
        match function {
            CanonicalFunction::DateTrunc(unit) => {
                let target = args.pop().ok_or_else(|| {
                    MetricError::validation(path.clone(), "date_trunc needs an argument")
                })?;
                self.dialect
                    .date_trunc(unit, target)
                    .ok_or_else(|| self.unsupported("date_trunc", path))
            }
            CanonicalFunction::Cast(data_type) => {
                let target = args.pop().ok_or_else(|| {
                    MetricError::validation(path.clone(), "cast needs an argument")
                })?;
                Ok(expr::cast(target, data_type))
            }
            // Per-dialect spelling is applied when the function name token is emitted.
            other => Ok(expr::func(other.sql_name(), args)),
        }
    }

    fn convert_aggregate(
        &self,
        kind: AggregationKind,
        arg: Option<&IrExpr>,
        distinct: bool,
        percentile: Option<f64>,
        path: &ComponentPath,
    ) -> MetricResult<Expr> {
        let arg = arg.map(|a| self.convert(a, path)).transpose()?;

        if kind == AggregationKind::Percentile {
            let (Some(arg), Some(p)) = (arg, percentile) else {
                return Err(MetricError::validation(
                    path.clone(),
                    "percentile needs an expression and a fraction",
                ));
            };
            return self
                .dialect
                .percentile(p, arg)
                .ok_or_else(|| self.unsupported("percentile", path));
        }

        let name = self
            .dialect
            .aggregate_name(kind)
            .ok_or_else(|| self.unsupported(kind.as_str(), path))?;
        Ok(match arg {
            Some(arg) => expr::aggregate(name, arg, distinct),
            None => expr::count_star(),
        })
    }

    fn convert_concat(
        &self,
        parts: &[IrExpr],
        delimiter: &str,
        path: &ComponentPath,
    ) -> MetricResult<Expr> {
        let mut pieces = Vec::with_capacity(parts.len() * 2);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 && !delimiter.is_empty() {
                pieces.push(expr::lit_str(delimiter));
            }
            pieces.push(self.operand(part, path)?);
        }

        if !self.dialect.supports_concat_operator() {
            return Ok(expr::func("CONCAT", pieces));
        }
        let mut pieces = pieces.into_iter();
        let first = pieces.next().ok_or_else(|| {
            MetricError::validation(path.clone(), "combine needs at least one column")
        })?;
        Ok(pieces.fold(first, |acc, piece| acc.concat(piece)))
    }

    fn unsupported(&self, function: &str, path: &ComponentPath) -> MetricError {
        MetricError::DialectUnsupportedFunction {
            path: path.clone(),
            function: function.to_string(),
            dialect: self.dialect.to_string(),
        }
    }
}

fn literal(value: &ScalarValue) -> Expr {
    Expr::Literal(match value {
        ScalarValue::Bool(b) => Literal::Bool(*b),
        ScalarValue::Int(n) => Literal::Int(*n),
        ScalarValue::Float(f) => Literal::Float(*f),
        ScalarValue::String(s) => Literal::String(s.clone()),
        ScalarValue::Null => Literal::Null,
    })
}

fn binary_operator(op: IrBinaryOp) -> BinaryOperator {
    match op {
        IrBinaryOp::Add => BinaryOperator::Plus,
        IrBinaryOp::Sub => BinaryOperator::Minus,
        IrBinaryOp::Mul => BinaryOperator::Mul,
        IrBinaryOp::Div => BinaryOperator::Div,
        IrBinaryOp::Eq => BinaryOperator::Eq,
        IrBinaryOp::Ne => BinaryOperator::Ne,
        IrBinaryOp::Gt => BinaryOperator::Gt,
        IrBinaryOp::Gte => BinaryOperator::Gte,
        IrBinaryOp::Lt => BinaryOperator::Lt,
        IrBinaryOp::Lte => BinaryOperator::Lte,
        IrBinaryOp::Like => BinaryOperator::Like,
        IrBinaryOp::And => BinaryOperator::And,
    }
}

/// Render a planned query for `dialect`.
pub fn render_plan(plan: &PlannedQuery, dialect: Dialect) -> MetricResult<RenderedQuery> {
    let converter = IrConverter::new(dialect);

    let mut select_exprs = Vec::with_capacity(plan.select.len());
    for item in &plan.select {
        select_exprs.push(converter.convert(&item.expr, &item.path)?);
    }

    let select: Vec<SelectExpr> = select_exprs
        .iter()
        .zip(&plan.select)
        .map(|(e, item)| e.clone().alias(&item.output))
        .collect();
    let mut query = Query::new(plan.base.clone(), select);

    for (i, join) in plan.joins.iter().enumerate() {
        if join.kind == JoinKind::Full && !dialect.supports_full_outer_join() {
            return Err(converter.unsupported(
                "full outer join",
                &ComponentPath::root().index("joins", i),
            ));
        }
        let on = join
            .on
            .iter()
            .map(|c| {
                expr::table_col(&c.left_table, &c.left_column)
                    .eq(expr::table_col(&c.right_table, &c.right_column))
            })
            .reduce(|acc, cond| acc.and(cond))
            .ok_or_else(|| {
                MetricError::validation(
                    ComponentPath::root().index("joins", i).field("on"),
                    "join needs at least one key pair",
                )
            })?;
        query = query.join(join.kind, join.table.clone(), on);
    }

    for filter in &plan.filters {
        query = query.filter(converter.convert(&filter.expr, &filter.path)?);
    }

    if !plan.group_by.is_empty() {
        query = query.group_by(plan.group_by.iter().map(|&i| select_exprs[i].clone()).collect());
    }
    if !plan.order_by.is_empty() {
        query = query.order_by(plan.order_by.iter().map(|&i| select_exprs[i].clone()).collect());
    }

    let rendered = query.render(dialect);
    Ok(RenderedQuery {
        sql: rendered.sql,
        placeholders: rendered.placeholders,
        dialect,
    })
}
