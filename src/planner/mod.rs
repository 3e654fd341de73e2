//! Query planner: effective metric -> dialect-neutral query plan.
//!
//! The plan carries compiled [`IrExpr`] trees, the join sequence needed to
//! reach every referenced table, grouping and ordering, and the formatting
//! to apply to result rows after execution. SQL text comes later, from
//! [`crate::sql::adapter::render_plan`].

pub mod join_graph;

pub use join_graph::{JoinGraph, JoinHop};

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::compiler::{compile_metric, CompiledComponent, IrExpr};
use crate::error::{ComponentKind, ComponentPath, MetricError, MetricResult};
use crate::model::format::Format;
use crate::model::metric::{JoinKind, Metric, TableSpec};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinCondition {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedJoin {
    pub kind: JoinKind,
    pub table: TableSpec,
    pub on: Vec<JoinCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectItem {
    pub output: String,
    pub kind: ComponentKind,
    pub path: ComponentPath,
    pub expr: IrExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredicateItem {
    pub path: ComponentPath,
    pub expr: IrExpr,
}

/// Display formatting for one result column. Never rendered into SQL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostTransform {
    pub column: String,
    pub format: Format,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedQuery {
    pub metric_id: String,
    pub version: u32,
    pub data_source: String,
    pub base: TableSpec,
    pub joins: Vec<PlannedJoin>,
    pub select: Vec<SelectItem>,
    pub filters: Vec<PredicateItem>,
    /// Indexes into `select`.
    pub group_by: Vec<usize>,
    /// Indexes into `select`.
    pub order_by: Vec<usize>,
    pub post_transforms: Vec<PostTransform>,
    /// Placeholder names, first appearance first.
    pub parameters: Vec<String>,
}

impl PlannedQuery {
    pub fn output_columns(&self) -> Vec<&str> {
        self.select.iter().map(|s| s.output.as_str()).collect()
    }
}

/// Plan an effective metric.
pub fn plan_query(metric: &Metric) -> MetricResult<PlannedQuery> {
    let compiled = compile_metric(metric)?;
    debug!(
        target: "planner",
        metric = %metric.id,
        dimensions = compiled.dimensions.len(),
        measures = compiled.measures.len(),
        derivations = compiled.derivations.len(),
        "compiled metric components"
    );

    let has_aggregates = compiled.has_aggregates();
    let select = select_list(
        compiled.dimensions,
        compiled.measures,
        compiled.derivations,
    )?;
    let filters: Vec<PredicateItem> = compiled
        .filters
        .into_iter()
        .map(|f| PredicateItem {
            path: f.path,
            expr: f.expr,
        })
        .collect();

    let joins = plan_joins(metric, &select, &filters)?;

    let dimension_indexes: Vec<usize> = select
        .iter()
        .enumerate()
        .filter(|(_, item)| item.kind == ComponentKind::Dimension)
        .map(|(i, _)| i)
        .collect();
    let group_by = if has_aggregates {
        dimension_indexes.clone()
    } else {
        Vec::new()
    };

    let mut parameters: Vec<String> = Vec::new();
    for expr in select.iter().map(|s| &s.expr).chain(filters.iter().map(|f| &f.expr)) {
        for name in expr.params() {
            if !parameters.iter().any(|p| p == name) {
                parameters.push(name.to_string());
            }
        }
    }

    let post_transforms = post_transforms(metric, &select);

    debug!(
        target: "planner",
        metric = %metric.id,
        joins = joins.len(),
        filters = filters.len(),
        parameters = parameters.len(),
        "planned query"
    );

    Ok(PlannedQuery {
        metric_id: metric.id.clone(),
        version: metric.version,
        data_source: metric.data_model.data_source.clone(),
        base: metric.table.clone(),
        joins,
        select,
        filters,
        group_by,
        order_by: dimension_indexes,
        post_transforms,
        parameters,
    })
}

/// Own dimensions, measures and derivations, then the combined ones in the same order.
fn select_list(
    dimensions: Vec<CompiledComponent>,
    measures: Vec<CompiledComponent>,
    derivations: Vec<CompiledComponent>,
) -> MetricResult<Vec<SelectItem>> {
    let (own, combined): (Vec<_>, Vec<_>) = dimensions
        .into_iter()
        .chain(measures)
        .chain(derivations)
        .partition(|c| c.origin.is_none());

    let mut outputs = HashSet::new();
    let mut select = Vec::with_capacity(own.len() + combined.len());
    for component in own.into_iter().chain(combined) {
        if !outputs.insert(component.output.clone()) {
            return Err(MetricError::validation(
                component.path,
                format!("output column '{}' appears twice", component.output),
            ));
        }
        select.push(SelectItem {
            output: component.output,
            kind: component.kind,
            path: component.path,
            expr: component.expr,
        });
    }
    Ok(select)
}

/// Joins for every table referenced by the select list or the filters,
/// in path order and without repeats.
fn plan_joins(
    metric: &Metric,
    select: &[SelectItem],
    filters: &[PredicateItem],
) -> MetricResult<Vec<PlannedJoin>> {
    let graph = JoinGraph::new(metric);
    let mut joined: Vec<String> = vec![graph.base().to_string()];
    let mut joins = Vec::new();

    let referenced = select
        .iter()
        .map(|s| (&s.path, &s.expr))
        .chain(filters.iter().map(|f| (&f.path, &f.expr)));

    for (path, expr) in referenced {
        for table in expr.tables() {
            if joined.iter().any(|t| t == table) {
                continue;
            }
            for hop in graph.route(table, path)? {
                if joined.contains(&hop.to) {
                    continue;
                }
                joins.push(planned_join(metric, &hop)?);
                joined.push(hop.to);
            }
        }
    }
    Ok(joins)
}

fn planned_join(metric: &Metric, hop: &JoinHop) -> MetricResult<PlannedJoin> {
    let spec = &metric.joins[hop.join];
    let table = metric.table_spec(&hop.to).cloned().ok_or_else(|| {
        MetricError::validation(
            ComponentPath::root().index("joins", hop.join),
            format!("unknown table '{}'", hop.to),
        )
    })?;
    let on = spec
        .on
        .iter()
        .map(|key| JoinCondition {
            left_table: spec.from.clone(),
            left_column: key.left.clone(),
            right_table: spec.table.name.clone(),
            right_column: key.right.clone(),
        })
        .collect();
    Ok(PlannedJoin {
        kind: if hop.reversed {
            spec.kind.flipped()
        } else {
            spec.kind
        },
        table,
        on,
    })
}

fn post_transforms(metric: &Metric, select: &[SelectItem]) -> Vec<PostTransform> {
    let component_formats = metric
        .dimensions
        .iter()
        .map(|d| (d.output_name(), &d.format))
        .chain(metric.measures.iter().map(|m| (m.output_name(), &m.format)))
        .chain(metric.derivations.iter().map(|d| (d.output_name(), &d.format)))
        .filter_map(|(column, format)| format.as_ref().map(|f| (column, f)));

    let rules = metric
        .formatting
        .iter()
        .filter_map(|r| r.column.as_deref().map(|c| (c, &r.format)));

    component_formats
        .chain(rules)
        .filter(|(column, _)| select.iter().any(|s| s.output == *column))
        .map(|(column, format)| PostTransform {
            column: column.to_string(),
            format: format.clone(),
        })
        .collect()
}
