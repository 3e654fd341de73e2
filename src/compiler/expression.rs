//! Model expression -> IR compilation.

use super::ir::{CanonicalFunction, IrBinaryOp, IrExpr};
use crate::binder::CONTEXT_PREFIX;
use crate::error::{ComponentPath, MetricError, MetricResult};
use crate::model::expression::{
    ArithmeticOp, CombineSpec, Conditional, ExprNode, Expression, FunctionCall, FunctionName,
    Operand, Operator, Predicate,
};
use crate::model::is_identifier;
use crate::model::metric::{
    Derivation, Dimension, DimensionSource, Filter, Measure, Metric,
};
use crate::model::types::AggregationKind;
use std::collections::HashMap;

/// What an expression may refer to while it is compiled.
#[derive(Debug, Clone)]
pub struct CompileContext<'a> {
    tables: Vec<&'a str>,
    default_table: Option<&'a str>,
    measures: Option<&'a HashMap<String, IrExpr>>,
}

impl<'a> CompileContext<'a> {
    /// Context over every table of `metric`.
    pub fn for_metric(metric: &'a Metric) -> Self {
        Self::new(metric.table_keys())
    }

    pub fn new(tables: Vec<&'a str>) -> Self {
        Self {
            tables,
            default_table: None,
            measures: None,
        }
    }

    /// Table used for unqualified columns.
    pub fn with_default_table(mut self, table: Option<&'a str>) -> Self {
        self.default_table = table;
        self
    }

    /// Already-compiled measures, making `measure` nodes legal.
    pub fn with_measures(mut self, measures: &'a HashMap<String, IrExpr>) -> Self {
        self.measures = Some(measures);
        self
    }

    fn resolve_table(
        &self,
        table: Option<&str>,
        column: &str,
        path: &ComponentPath,
    ) -> MetricResult<String> {
        match table.or(self.default_table) {
            Some(t) if self.tables.contains(&t) => Ok(t.to_string()),
            Some(t) => Err(MetricError::validation(
                path.clone(),
                format!("column '{}' names unknown table '{}'", column, t),
            )),
            None => match self.tables.as_slice() {
                [only] => Ok(only.to_string()),
                tables => Err(MetricError::AmbiguousTableReference {
                    path: path.clone(),
                    column: column.to_string(),
                    tables: tables.iter().map(|t| t.to_string()).collect(),
                }),
            },
        }
    }
}

/// Compile one expression.
pub fn compile_expression(
    expr: &Expression,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    match expr {
        Expression::Reference(reference) => {
            let (table, column) = Expression::split_reference(reference).ok_or_else(|| {
                MetricError::validation(
                    path.clone(),
                    format!("'{}' is not a column reference", reference),
                )
            })?;
            column_node(table, column, ctx, path)
        }
        Expression::Node(node) => compile_node(node, ctx, path),
    }
}

fn compile_node(
    node: &ExprNode,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    match node {
        ExprNode::Column { column, table } => column_node(table.as_deref(), column, ctx, path),

        ExprNode::Literal { value } => Ok(IrExpr::Literal {
            value: value.clone(),
        }),

        ExprNode::Param { param } => param_node(param, path),

        ExprNode::Context { attribute } => context_node(attribute, path),

        ExprNode::Function(call) => {
            compile_function(call, None, ctx, &path.field("function"))
        }

        ExprNode::Arithmetic { op, left, right } => {
            let left = compile_expression(left, ctx, &path.field("left"))?;
            let right = compile_expression(right, ctx, &path.field("right"))?;
            let op = match op {
                ArithmeticOp::Add => IrBinaryOp::Add,
                ArithmeticOp::Sub => IrBinaryOp::Sub,
                ArithmeticOp::Mul => IrBinaryOp::Mul,
                ArithmeticOp::Div => IrBinaryOp::Div,
            };
            Ok(IrExpr::binary(op, left, right))
        }

        ExprNode::Combine(spec) => compile_combine(spec, ctx, &path.field("combine")),

        ExprNode::Conditional(cond) => {
            compile_conditional(cond, ctx, &path.field("conditional"))
        }

        ExprNode::Measure { measure } => {
            let Some(measures) = ctx.measures else {
                return Err(MetricError::validation(
                    path.clone(),
                    format!(
                        "measure reference '{}' is only allowed in derivations",
                        measure
                    ),
                ));
            };
            measures.get(measure).cloned().ok_or_else(|| {
                MetricError::validation(path.clone(), format!("unknown measure '{}'", measure))
            })
        }
    }
}

fn column_node(
    table: Option<&str>,
    column: &str,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    let table = ctx.resolve_table(table, column, path)?;
    Ok(IrExpr::Column {
        table,
        column: column.to_string(),
    })
}

fn param_node(name: &str, path: &ComponentPath) -> MetricResult<IrExpr> {
    if !is_identifier(name) {
        return Err(MetricError::validation(
            path.clone(),
            format!("'{}' is not a valid parameter name", name),
        ));
    }
    Ok(IrExpr::param(name))
}

fn context_node(attribute: &str, path: &ComponentPath) -> MetricResult<IrExpr> {
    if !is_identifier(attribute) {
        return Err(MetricError::validation(
            path.clone(),
            format!("'{}' is not a valid context attribute", attribute),
        ));
    }
    Ok(IrExpr::param(&format!("{}{}", CONTEXT_PREFIX, attribute)))
}

/// Compile an allow-listed function call.
///
/// `leading` is prepended to the call's own arguments; predicates use it to
/// apply `wrap_function` to their field.
pub fn compile_function(
    call: &FunctionCall,
    leading: Option<IrExpr>,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    let mut args: Vec<IrExpr> = leading.into_iter().collect();
    for (i, arg) in call.args.iter().enumerate() {
        args.push(compile_expression(arg, ctx, &path.index("args", i))?);
    }

    let (min, max) = call.name.arity();
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(MetricError::validation(
            path.clone(),
            format!(
                "{} takes {} argument(s), got {}",
                call.name,
                expected,
                args.len()
            ),
        ));
    }

    let function = match call.name {
        FunctionName::DateTrunc => {
            let unit = call.unit.ok_or_else(|| {
                MetricError::validation(path.field("unit"), "date_trunc requires a unit")
            })?;
            CanonicalFunction::DateTrunc(unit)
        }
        FunctionName::Cast => {
            let to = call.to.ok_or_else(|| {
                MetricError::validation(path.field("to"), "cast requires a target type")
            })?;
            CanonicalFunction::Cast(to)
        }
        FunctionName::Coalesce => plain(call, CanonicalFunction::Coalesce, path)?,
        FunctionName::Nullif => plain(call, CanonicalFunction::Nullif, path)?,
        FunctionName::Lower => plain(call, CanonicalFunction::Lower, path)?,
        FunctionName::Upper => plain(call, CanonicalFunction::Upper, path)?,
        FunctionName::Trim => plain(call, CanonicalFunction::Trim, path)?,
        FunctionName::Length => plain(call, CanonicalFunction::Length, path)?,
        FunctionName::Abs => plain(call, CanonicalFunction::Abs, path)?,
        FunctionName::Round => plain(call, CanonicalFunction::Round, path)?,
        FunctionName::Floor => plain(call, CanonicalFunction::Floor, path)?,
        FunctionName::Ceil => plain(call, CanonicalFunction::Ceil, path)?,
    };

    Ok(IrExpr::Call { function, args })
}

/// Functions without a unit or target type.
fn plain(
    call: &FunctionCall,
    function: CanonicalFunction,
    path: &ComponentPath,
) -> MetricResult<CanonicalFunction> {
    if call.unit.is_some() {
        return Err(MetricError::validation(
            path.field("unit"),
            format!("{} does not take a unit", call.name),
        ));
    }
    if call.to.is_some() {
        return Err(MetricError::validation(
            path.field("to"),
            format!("{} does not take a target type", call.name),
        ));
    }
    Ok(function)
}

/// Compile a predicate into a boolean IR expression.
pub fn compile_predicate(
    pred: &Predicate,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    let mut field = compile_expression(&pred.field, ctx, &path.field("field"))?;
    if let Some(wrap) = &pred.wrap_function {
        field = compile_function(wrap, Some(field), ctx, &path.field("wrap_function"))?;
    }

    let (min, max) = pred.operator.arity();
    let count = pred.values.len();
    if count < min || count > max {
        let expected = match (min, max) {
            (0, 0) => "no values".to_string(),
            (n, m) if n == m => format!("exactly {}", n),
            (n, _) => format!("at least {}", n),
        };
        return Err(MetricError::validation(
            path.field("values"),
            format!(
                "operator '{}' expects {} value(s), got {}",
                pred.operator, expected, count
            ),
        ));
    }

    let values = pred
        .values
        .iter()
        .enumerate()
        .map(|(i, v)| compile_operand(v, &path.index("values", i)))
        .collect::<MetricResult<Vec<_>>>()?;
    let mut values = values.into_iter();
    let values_path = path.field("values");

    let comparison = |op: IrBinaryOp, field: IrExpr, values: &mut std::vec::IntoIter<IrExpr>| {
        next_value(values, &values_path).map(|v| IrExpr::binary(op, field, v))
    };

    match pred.operator {
        Operator::Eq => comparison(IrBinaryOp::Eq, field, &mut values),
        Operator::Ne => comparison(IrBinaryOp::Ne, field, &mut values),
        Operator::Gt => comparison(IrBinaryOp::Gt, field, &mut values),
        Operator::Gte => comparison(IrBinaryOp::Gte, field, &mut values),
        Operator::Lt => comparison(IrBinaryOp::Lt, field, &mut values),
        Operator::Lte => comparison(IrBinaryOp::Lte, field, &mut values),
        Operator::Like => comparison(IrBinaryOp::Like, field, &mut values),
        Operator::In | Operator::NotIn => Ok(IrExpr::In {
            expr: Box::new(field),
            values: values.collect(),
            negated: pred.operator == Operator::NotIn,
        }),
        Operator::Between => {
            let low = next_value(&mut values, &values_path)?;
            let high = next_value(&mut values, &values_path)?;
            Ok(IrExpr::Between {
                expr: Box::new(field),
                low: Box::new(low),
                high: Box::new(high),
            })
        }
        Operator::IsNull | Operator::IsNotNull => Ok(IrExpr::IsNull {
            expr: Box::new(field),
            negated: pred.operator == Operator::IsNotNull,
        }),
    }
}

fn next_value(
    values: &mut std::vec::IntoIter<IrExpr>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    values
        .next()
        .ok_or_else(|| MetricError::validation(path.clone(), "missing comparison value"))
}

fn compile_operand(operand: &Operand, path: &ComponentPath) -> MetricResult<IrExpr> {
    match operand {
        Operand::Param { param } => param_node(param, path),
        Operand::Context { context } => context_node(context, path),
        Operand::Literal(value) => Ok(IrExpr::Literal {
            value: value.clone(),
        }),
    }
}

/// Compile a conditional into one CASE, keeping clause order.
pub fn compile_conditional(
    cond: &Conditional,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    if cond.when.is_empty() {
        return Err(MetricError::validation(
            path.field("when"),
            "conditional needs at least one when clause",
        ));
    }

    let mut branches = Vec::with_capacity(cond.when.len());
    for (i, clause) in cond.when.iter().enumerate() {
        let clause_path = path.index("when", i);
        let condition = compile_predicate(&clause.predicate, ctx, &clause_path)?;
        let then = compile_expression(&clause.then, ctx, &clause_path.field("then"))?;
        branches.push((condition, then));
    }
    let otherwise = compile_expression(&cond.otherwise, ctx, &path.field("else"))?;

    Ok(IrExpr::Case {
        branches,
        otherwise: Box::new(otherwise),
    })
}

/// Compile a combine-list into a delimited concatenation.
pub fn compile_combine(
    spec: &CombineSpec,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    if spec.columns.is_empty() {
        return Err(MetricError::validation(
            path.field("columns"),
            "combine needs at least one column",
        ));
    }
    let parts = spec
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| compile_expression(c, ctx, &path.index("columns", i)))
        .collect::<MetricResult<Vec<_>>>()?;
    Ok(IrExpr::Concat {
        parts,
        delimiter: spec.delimiter.clone(),
    })
}

/// Compile a measure into its aggregate.
pub fn compile_measure(
    measure: &Measure,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    let arg = match &measure.expr {
        Some(expr) => {
            let arg = compile_expression(expr, ctx, &path.field("expr"))?;
            if arg.is_aggregate() {
                return Err(MetricError::validation(
                    path.field("expr"),
                    "aggregates cannot be nested",
                ));
            }
            Some(Box::new(arg))
        }
        None if measure.aggregation == AggregationKind::Count => None,
        None => {
            return Err(MetricError::validation(
                path.field("expr"),
                format!("{} measures need an expression", measure.aggregation),
            ))
        }
    };

    let percentile = match (measure.aggregation, measure.percentile) {
        (AggregationKind::Percentile, Some(p)) if p > 0.0 && p < 1.0 => Some(p),
        (AggregationKind::Percentile, _) => {
            return Err(MetricError::validation(
                path.field("percentile"),
                "percentile must be strictly between 0 and 1",
            ))
        }
        _ => None,
    };

    Ok(IrExpr::Aggregate {
        kind: measure.aggregation,
        arg,
        distinct: measure.distinct,
        percentile,
    })
}

/// Compile a derivation against already-compiled measures.
pub fn compile_derivation(
    derivation: &Derivation,
    ctx: &CompileContext<'_>,
    measures: &HashMap<String, IrExpr>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    let ctx = ctx.clone().with_measures(measures);
    let expr = compile_expression(&derivation.expr, &ctx, &path.field("expr"))?;
    if !expr.is_aggregate() {
        return Err(MetricError::validation(
            path.field("expr"),
            "a derivation must reference at least one measure",
        ));
    }
    Ok(expr)
}

/// Compile a dimension, honouring its table binding.
pub fn compile_dimension(
    dimension: &Dimension,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    let ctx = ctx.clone().with_default_table(dimension.table.as_deref());
    match &dimension.source {
        DimensionSource::Expr(expr) => compile_expression(expr, &ctx, &path.field("expr")),
        DimensionSource::Combine(spec) => compile_combine(spec, &ctx, &path.field("combine")),
        DimensionSource::Conditional(cond) => {
            compile_conditional(cond, &ctx, &path.field("conditional"))
        }
    }
}

pub fn compile_filter(
    filter: &Filter,
    ctx: &CompileContext<'_>,
    path: &ComponentPath,
) -> MetricResult<IrExpr> {
    compile_predicate(&filter.predicate, ctx, path)
}
