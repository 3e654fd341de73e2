//! Published metric definitions.
//!
//! A `Metric` is immutable once published: changes produce a new
//! `(id, version)` or a variant, never an in-place edit.

use super::expression::{CombineSpec, Conditional, Expression, Predicate};
use super::format::{Format, FormattingRule};
use super::is_identifier;
use super::types::{AggregationKind, ParamType};
use crate::error::{ComponentKind, ComponentPath, MetricError, MetricResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Data model that owns a metric; `data_source` picks the connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataModelRef {
    pub id: String,
    pub data_source: String,
}

/// A physical table. `name` doubles as the key used to qualify columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl TableSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }
}

/// One equality condition of a join: `from.left = table.right`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinKey {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    #[default]
    Left,
    Right,
    Full,
}

impl JoinKind {
    /// The same join seen from the other side.
    pub fn flipped(self) -> Self {
        match self {
            JoinKind::Left => JoinKind::Right,
            JoinKind::Right => JoinKind::Left,
            other => other,
        }
    }
}

/// Declared edge of the join graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinSpec {
    pub table: TableSpec,
    /// Key of the table this join hangs off.
    pub from: String,
    pub on: Vec<JoinKey>,
    #[serde(default)]
    pub kind: JoinKind,
}

/// Explicit route to `table`: `base -> via[0] -> ... -> table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedPath {
    pub table: String,
    #[serde(default)]
    pub via: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub name: String,
    pub aggregation: AggregationKind,
    /// Absent only for `count`, meaning `COUNT(*)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expression>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub distinct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Measure {
    pub fn new(name: &str, aggregation: AggregationKind, expr: Expression) -> Self {
        Self {
            name: name.to_string(),
            aggregation,
            expr: Some(expr),
            distinct: false,
            percentile: None,
            format: None,
            alias: None,
        }
    }

    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn bind_default_table(&mut self, table: &str) {
        if let Some(expr) = &mut self.expr {
            expr.bind_default_table(table);
        }
    }
}

/// A measure computed from other measures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Derivation {
    pub name: String,
    pub expr: Expression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Derivation {
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Where a dimension's value comes from. Exactly one per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionSource {
    Expr(Expression),
    Combine(CombineSpec),
    Conditional(Conditional),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    /// Default table for unqualified columns in this dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(flatten)]
    pub source: DimensionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Dimension {
    pub fn new(name: &str, expr: Expression) -> Self {
        Self {
            name: name.to_string(),
            table: None,
            source: DimensionSource::Expr(expr),
            format: None,
            alias: None,
        }
    }

    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Qualify unqualified columns with the dimension's own table, or `table`.
    pub fn bind_default_table(&mut self, table: &str) {
        let table = self.table.clone().unwrap_or_else(|| table.to_string());
        match &mut self.source {
            DimensionSource::Expr(expr) => expr.bind_default_table(&table),
            DimensionSource::Combine(spec) => {
                for column in &mut spec.columns {
                    column.bind_default_table(&table);
                }
            }
            DimensionSource::Conditional(cond) => {
                for clause in &mut cond.when {
                    clause.predicate.bind_default_table(&table);
                    clause.then.bind_default_table(&table);
                }
                cond.otherwise.bind_default_table(&table);
            }
        }
    }
}

/// Named WHERE predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    #[serde(flatten)]
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A published, versioned metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data_model: DataModelRef,
    pub table: TableSpec,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub derivations: Vec<Derivation>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub formatting: Vec<FormattingRule>,
    #[serde(default)]
    pub pinned_paths: Vec<PinnedPath>,
}

fn default_version() -> u32 {
    1
}

impl Metric {
    /// Keys of every table the metric can reach: base first, then joins.
    pub fn table_keys(&self) -> Vec<&str> {
        let mut keys = vec![self.table.name.as_str()];
        for join in &self.joins {
            if !keys.contains(&join.table.name.as_str()) {
                keys.push(&join.table.name);
            }
        }
        keys
    }

    pub fn table_spec(&self, key: &str) -> Option<&TableSpec> {
        if self.table.name == key {
            return Some(&self.table);
        }
        self.joins
            .iter()
            .find(|j| j.table.name == key)
            .map(|j| &j.table)
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Result column names in select order.
    pub fn output_columns(&self) -> Vec<&str> {
        self.dimensions
            .iter()
            .map(Dimension::output_name)
            .chain(self.measures.iter().map(Measure::output_name))
            .chain(self.derivations.iter().map(Derivation::output_name))
            .collect()
    }

    /// Structural checks that do not need the expression compiler.
    pub fn validate(&self) -> MetricResult<()> {
        self.validate_names_and_structure(false)
    }

    /// Like [`Metric::validate`], but also accepts `<alias>.<name>` component
    /// names produced by combining metrics.
    pub fn validate_effective(&self) -> MetricResult<()> {
        self.validate_names_and_structure(true)
    }

    fn validate_names_and_structure(&self, qualified: bool) -> MetricResult<()> {
        let root = ComponentPath::root();

        if self.id.trim().is_empty() {
            return Err(MetricError::validation(root.field("id"), "metric id is empty"));
        }

        let mut names = HashSet::new();
        for (i, m) in self.measures.iter().enumerate() {
            let path = root.index("measures", i);
            check_name(&path, ComponentKind::Measure, &m.name, &mut names, qualified)?;
            check_measure(&path, m)?;
        }
        for (i, d) in self.derivations.iter().enumerate() {
            let path = root.index("derivations", i);
            check_name(&path, ComponentKind::Derivation, &d.name, &mut names, qualified)?;
        }
        for (i, d) in self.dimensions.iter().enumerate() {
            let path = root.index("dimensions", i);
            check_name(&path, ComponentKind::Dimension, &d.name, &mut names, qualified)?;
            if let DimensionSource::Conditional(cond) = &d.source {
                if cond.when.is_empty() {
                    return Err(MetricError::validation(
                        path.field("conditional").field("when"),
                        "conditional needs at least one when clause",
                    ));
                }
            }
            if let DimensionSource::Combine(spec) = &d.source {
                if spec.columns.is_empty() {
                    return Err(MetricError::validation(
                        path.field("combine").field("columns"),
                        "combine needs at least one column",
                    ));
                }
            }
        }

        let mut filter_names = HashSet::new();
        for (i, f) in self.filters.iter().enumerate() {
            check_name(
                &root.index("filters", i),
                ComponentKind::Filter,
                &f.name,
                &mut filter_names,
                qualified,
            )?;
        }

        self.validate_parameters()?;
        self.validate_joins()?;
        self.validate_formatting()?;
        Ok(())
    }

    fn validate_parameters(&self) -> MetricResult<()> {
        let mut seen = HashSet::new();
        for (i, p) in self.parameters.iter().enumerate() {
            let path = ComponentPath::root().index("parameters", i);
            if !is_identifier(&p.name) {
                return Err(MetricError::validation(
                    path,
                    format!("'{}' is not a valid identifier", p.name),
                ));
            }
            if p.name.starts_with(crate::binder::CONTEXT_PREFIX) {
                return Err(MetricError::validation(
                    path,
                    format!(
                        "parameter names may not start with '{}'",
                        crate::binder::CONTEXT_PREFIX
                    ),
                ));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(MetricError::validation(
                    path,
                    format!("parameter '{}' is declared twice", p.name),
                ));
            }
        }
        Ok(())
    }

    fn validate_joins(&self) -> MetricResult<()> {
        let known: HashSet<&str> = self.table_keys().into_iter().collect();
        // A table may be joined from several tables; those are alternative routes.
        let mut edges: HashSet<(&str, &str)> = HashSet::new();
        for (i, join) in self.joins.iter().enumerate() {
            let path = ComponentPath::root().index("joins", i);
            if join.table.name == self.table.name {
                return Err(MetricError::validation(
                    path.field("table"),
                    format!("cannot join the base table '{}'", join.table.name),
                ));
            }
            if !edges.insert((join.from.as_str(), join.table.name.as_str())) {
                return Err(MetricError::validation(
                    path.field("table"),
                    format!(
                        "table '{}' is joined from '{}' twice",
                        join.table.name, join.from
                    ),
                ));
            }
            if join.on.is_empty() {
                return Err(MetricError::validation(
                    path.field("on"),
                    "join needs at least one key pair",
                ));
            }
        }
        for (i, join) in self.joins.iter().enumerate() {
            if !known.contains(join.from.as_str()) {
                return Err(MetricError::validation(
                    ComponentPath::root().index("joins", i).field("from"),
                    format!("unknown table '{}'", join.from),
                ));
            }
        }
        for (i, pin) in self.pinned_paths.iter().enumerate() {
            let path = ComponentPath::root().index("pinned_paths", i);
            if let Some(unknown) = std::iter::once(&pin.table)
                .chain(pin.via.iter())
                .find(|t| !known.contains(t.as_str()))
            {
                return Err(MetricError::validation(
                    path,
                    format!("unknown table '{}'", unknown),
                ));
            }
        }
        Ok(())
    }

    fn validate_formatting(&self) -> MetricResult<()> {
        let columns = self.output_columns();
        for (i, rule) in self.formatting.iter().enumerate() {
            let path = ComponentPath::root().index("formatting", i);
            match &rule.column {
                None => {
                    return Err(MetricError::validation(
                        path,
                        "metric-level formatting rules must name a column",
                    ))
                }
                Some(column) if !columns.contains(&column.as_str()) => {
                    return Err(MetricError::validation(
                        path.field("column"),
                        format!("no output column named '{}'", column),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn check_name<'a>(
    path: &ComponentPath,
    kind: ComponentKind,
    name: &'a str,
    seen: &mut HashSet<&'a str>,
    qualified: bool,
) -> MetricResult<()> {
    let valid = if qualified {
        name.split('.').all(is_identifier)
    } else {
        is_identifier(name)
    };
    if !valid {
        return Err(MetricError::validation(
            path.field("name"),
            format!("'{}' is not a valid identifier", name),
        ));
    }
    if !seen.insert(name) {
        return Err(MetricError::DuplicateComponentName {
            path: path.clone(),
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn check_measure(path: &ComponentPath, m: &Measure) -> MetricResult<()> {
    match (m.aggregation, m.percentile) {
        (AggregationKind::Percentile, Some(p)) if p > 0.0 && p < 1.0 => {}
        (AggregationKind::Percentile, _) => {
            return Err(MetricError::validation(
                path.field("percentile"),
                "percentile measures need a percentile strictly between 0 and 1",
            ))
        }
        (_, Some(_)) => {
            return Err(MetricError::validation(
                path.field("percentile"),
                format!("percentile is only valid for percentile measures, not {}", m.aggregation),
            ))
        }
        (_, None) => {}
    }
    if m.expr.is_none() && m.aggregation != AggregationKind::Count {
        return Err(MetricError::validation(
            path.field("expr"),
            format!("{} measures need an expression", m.aggregation),
        ));
    }
    Ok(())
}
