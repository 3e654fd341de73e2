//! Expression compiler.
//!
//! Lowers the model's expression language into [`IrExpr`], a dialect-neutral
//! tree with resolved table bindings and canonical function names. Dialect
//! translation happens later, in [`crate::sql::adapter`].

pub mod expression;
pub mod ir;

pub use expression::{
    compile_combine, compile_conditional, compile_derivation, compile_dimension,
    compile_expression, compile_filter, compile_function, compile_measure, compile_predicate,
    CompileContext,
};
pub use ir::{CanonicalFunction, IrBinaryOp, IrExpr};

use crate::error::{ComponentKind, ComponentPath, MetricResult};
use crate::model::format::Format;
use crate::model::metric::Metric;
use std::collections::HashMap;

/// One compiled metric component.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledComponent {
    pub kind: ComponentKind,
    pub name: String,
    /// Result column name (alias or name).
    pub output: String,
    pub path: ComponentPath,
    pub expr: IrExpr,
    pub format: Option<Format>,
    /// Combine alias when the component was joined in from another metric.
    pub origin: Option<String>,
}

/// Every component of a metric, compiled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledMetric {
    pub dimensions: Vec<CompiledComponent>,
    pub measures: Vec<CompiledComponent>,
    pub derivations: Vec<CompiledComponent>,
    pub filters: Vec<CompiledComponent>,
}

impl CompiledMetric {
    pub fn has_aggregates(&self) -> bool {
        !self.measures.is_empty() || !self.derivations.is_empty()
    }
}

fn origin_of(name: &str) -> Option<String> {
    name.split_once('.').map(|(alias, _)| alias.to_string())
}

/// Compile every component of an (effective) metric.
pub fn compile_metric(metric: &Metric) -> MetricResult<CompiledMetric> {
    let ctx = CompileContext::for_metric(metric);
    let root = ComponentPath::root();
    let mut compiled = CompiledMetric::default();

    for dimension in &metric.dimensions {
        let path = root.field("dimensions").field(&dimension.name);
        let expr = compile_dimension(dimension, &ctx, &path)?;
        compiled.dimensions.push(CompiledComponent {
            kind: ComponentKind::Dimension,
            name: dimension.name.clone(),
            output: dimension.output_name().to_string(),
            path,
            expr,
            format: dimension.format.clone(),
            origin: origin_of(&dimension.name),
        });
    }

    let mut by_name: HashMap<String, IrExpr> = HashMap::new();
    for measure in &metric.measures {
        let path = root.field("measures").field(&measure.name);
        let expr = compile_measure(measure, &ctx, &path)?;
        by_name.insert(measure.name.clone(), expr.clone());
        compiled.measures.push(CompiledComponent {
            kind: ComponentKind::Measure,
            name: measure.name.clone(),
            output: measure.output_name().to_string(),
            path,
            expr,
            format: measure.format.clone(),
            origin: origin_of(&measure.name),
        });
    }

    // Each derivation sees the measures plus the derivations before it.
    for derivation in &metric.derivations {
        let path = root.field("derivations").field(&derivation.name);
        let expr = compile_derivation(derivation, &ctx, &by_name, &path)?;
        by_name.insert(derivation.name.clone(), expr.clone());
        compiled.derivations.push(CompiledComponent {
            kind: ComponentKind::Derivation,
            name: derivation.name.clone(),
            output: derivation.output_name().to_string(),
            path,
            expr,
            format: derivation.format.clone(),
            origin: origin_of(&derivation.name),
        });
    }

    for filter in &metric.filters {
        let path = root.field("filters").field(&filter.name);
        let expr = compile_filter(filter, &ctx, &path)?;
        compiled.filters.push(CompiledComponent {
            kind: ComponentKind::Filter,
            name: filter.name.clone(),
            output: filter.name.clone(),
            path,
            expr,
            format: None,
            origin: origin_of(&filter.name),
        });
    }

    Ok(compiled)
}
