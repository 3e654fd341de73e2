//! Variant resolver.
//!
//! Applies a variant request to its source metric and produces an
//! [`EffectiveMetric`]: a plain [`Metric`] value the planner can consume.
//! The steps run in a fixed order (include, exclude, replace, add,
//! derivations, combine), which decides the outcome when rules interact.
//!
//! Combined metrics are resolved through a per-run arena keyed by
//! `id@version` (or variant id), with an explicit stack of in-progress
//! keys for cycle detection.

pub mod catalog;
pub mod diagnose;

pub use catalog::{CatalogFile, InMemoryCatalog, MetricCatalog};
pub use diagnose::{diagnose, Diagnosis, Fix};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::cache::hash::compute_hash;
use crate::error::{ComponentKind, ComponentPath, MetricError, MetricResult};
use crate::model::is_identifier;
use crate::model::metric::{JoinKey, JoinSpec, Metric, TableSpec};
use crate::model::variant::{
    CombineRef, ComponentNames, ComponentSelection, ComponentSet, MetricVariantRequest,
};
use crate::model::Derivation;

pub const DEFAULT_MAX_COMBINE_DEPTH: usize = 8;

/// A fully resolved metric definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveMetric {
    pub metric: Metric,
    /// Where the definition came from, source first.
    pub lineage: Vec<String>,
    /// SHA-256 of the metric's JSON form.
    pub content_hash: String,
}

impl EffectiveMetric {
    fn new(metric: Metric, lineage: Vec<String>) -> MetricResult<Self> {
        let content_hash = compute_hash(&metric).map_err(|e| {
            MetricError::validation(ComponentPath::root(), format!("cannot hash metric: {}", e))
        })?;
        Ok(Self {
            metric,
            lineage,
            content_hash,
        })
    }
}

pub struct Resolver<'a> {
    catalog: &'a dyn MetricCatalog,
    max_depth: usize,
    arena: HashMap<String, Arc<EffectiveMetric>>,
    stack: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a dyn MetricCatalog) -> Self {
        Self {
            catalog,
            max_depth: DEFAULT_MAX_COMBINE_DEPTH,
            arena: HashMap::new(),
            stack: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Resolve an ad-hoc variant request.
    pub fn resolve(&mut self, request: &MetricVariantRequest) -> MetricResult<EffectiveMetric> {
        require_identifier(&request.name, &ComponentPath::root().field("name"))?;
        self.stack.push(request.name.clone());
        let result = self.resolve_request(request);
        self.stack.pop();
        result
    }

    /// Resolve a published metric or a stored variant by id.
    ///
    /// A published metric resolves as a variant with no rules.
    pub fn resolve_id(
        &mut self,
        id: &str,
        version: Option<u32>,
    ) -> MetricResult<Arc<EffectiveMetric>> {
        self.resolve_reference(id, version, &ComponentPath::root().field("source"))
    }

    fn resolve_reference(
        &mut self,
        id: &str,
        version: Option<u32>,
        path: &ComponentPath,
    ) -> MetricResult<Arc<EffectiveMetric>> {
        if let Some(metric) = self.catalog.metric(id, version) {
            let key = format!("{}@{}", metric.id, metric.version);
            if let Some(done) = self.arena.get(&key) {
                return Ok(Arc::clone(done));
            }
            metric.validate()?;
            let effective = Arc::new(EffectiveMetric::new(
                metric.as_ref().clone(),
                vec![format!("metric:{}", key)],
            )?);
            self.arena.insert(key, Arc::clone(&effective));
            return Ok(effective);
        }

        let variant = match version {
            None => self.catalog.variant(id),
            Some(_) => None,
        };
        let Some(variant) = variant else {
            return Err(MetricError::UnknownMetric {
                path: path.clone(),
                metric_id: id.to_string(),
                version,
            });
        };

        if let Some(done) = self.arena.get(&variant.id) {
            return Ok(Arc::clone(done));
        }
        self.enter(&variant.id, path)?;
        let result = self.resolve_request(&variant.request);
        self.stack.pop();

        let effective = Arc::new(result?);
        self.arena.insert(variant.id.clone(), Arc::clone(&effective));
        Ok(effective)
    }

    /// Push `key` onto the in-progress stack, rejecting cycles and runaway nesting.
    fn enter(&mut self, key: &str, path: &ComponentPath) -> MetricResult<()> {
        let chain = || {
            self.stack
                .iter()
                .cloned()
                .chain(std::iter::once(key.to_string()))
                .collect::<Vec<_>>()
        };
        if self.stack.iter().any(|k| k == key) {
            return Err(MetricError::VariantCycleError {
                path: path.clone(),
                chain: chain(),
                reason: "cycle".to_string(),
            });
        }
        if self.stack.len() >= self.max_depth {
            return Err(MetricError::VariantCycleError {
                path: path.clone(),
                chain: chain(),
                reason: format!("combine depth exceeds {}", self.max_depth),
            });
        }
        self.stack.push(key.to_string());
        Ok(())
    }

    fn resolve_request(&mut self, request: &MetricVariantRequest) -> MetricResult<EffectiveMetric> {
        let root = ComponentPath::root();
        let source = self.resolve_reference(
            &request.source.metric_id,
            request.source.version,
            &root.field("source"),
        )?;

        let mut metric = source.metric.clone();
        let mut lineage = source.lineage.clone();
        lineage.push(format!("variant:{}", request.name));

        if let Some(include) = &request.include {
            apply_include(&mut metric, include)?;
        }
        apply_exclude(&mut metric, &source.metric, &request.overrides.exclude)?;
        apply_replace(&mut metric, &request.overrides.replace)?;
        apply_add(&mut metric, &request.overrides.add)?;
        apply_derivations(&mut metric, &request.derivations)?;

        for (i, combine) in request.combine.iter().enumerate() {
            let path = root.index("combine", i);
            self.apply_combine(&mut metric, combine, &path)?;
            lineage.push(format!("combine:{} as {}", combine.metric_id, combine.alias));
        }

        metric.name = request.name.clone();
        if request.alias.is_some() {
            metric.alias = request.alias.clone();
        }
        if request.description.is_some() {
            metric.description = request.description.clone();
        }
        metric.validate_effective()?;

        debug!(
            target: "resolver",
            variant = %request.name,
            source = %request.source.metric_id,
            measures = metric.measures.len(),
            dimensions = metric.dimensions.len(),
            "resolved variant"
        );
        EffectiveMetric::new(metric, lineage)
    }

    fn apply_combine(
        &mut self,
        metric: &mut Metric,
        combine: &CombineRef,
        path: &ComponentPath,
    ) -> MetricResult<()> {
        require_identifier(&combine.alias, &path.field("alias"))?;
        let combined = self.resolve_reference(&combine.metric_id, combine.version, path)?;

        if combined.metric.data_model.data_source != metric.data_model.data_source {
            return Err(MetricError::validation(
                path.clone(),
                format!(
                    "'{}' reads from data source '{}', not '{}'",
                    combine.metric_id,
                    combined.metric.data_model.data_source,
                    metric.data_model.data_source
                ),
            ));
        }

        let mut other = combined.metric.clone();
        let base = other.table.name.clone();
        let alias = combine.alias.as_str();

        merge_joins(metric, &other, path)?;
        merge_parameters(metric, &other, path)?;

        let mut taken: HashSet<String> = component_names(metric).map(String::from).collect();
        let mut claim = |kind: ComponentKind, name: &str| -> MetricResult<()> {
            if taken.insert(name.to_string()) {
                Ok(())
            } else {
                Err(MetricError::DuplicateComponentName {
                    path: path.clone(),
                    kind,
                    name: name.to_string(),
                })
            }
        };

        for mut dimension in std::mem::take(&mut other.dimensions) {
            dimension.bind_default_table(&base);
            dimension.name = qualify(alias, &dimension.name);
            dimension.alias = dimension.alias.map(|a| qualify(alias, &a));
            claim(ComponentKind::Dimension, &dimension.name)?;
            metric.dimensions.push(dimension);
        }
        for mut measure in std::mem::take(&mut other.measures) {
            measure.bind_default_table(&base);
            measure.name = qualify(alias, &measure.name);
            measure.alias = measure.alias.map(|a| qualify(alias, &a));
            claim(ComponentKind::Measure, &measure.name)?;
            metric.measures.push(measure);
        }
        for mut derivation in std::mem::take(&mut other.derivations) {
            derivation.expr.bind_default_table(&base);
            derivation.expr.qualify_measure_refs(alias);
            derivation.name = qualify(alias, &derivation.name);
            derivation.alias = derivation.alias.map(|a| qualify(alias, &a));
            claim(ComponentKind::Derivation, &derivation.name)?;
            metric.derivations.push(derivation);
        }
        for mut rule in std::mem::take(&mut other.formatting) {
            rule.column = rule.column.map(|c| qualify(alias, &c));
            metric.formatting.push(rule);
        }

        if !other.filters.is_empty() {
            debug!(
                target: "resolver",
                combined = %combine.metric_id,
                filters = other.filters.len(),
                "combined metric filters are not carried over"
            );
        }
        Ok(())
    }
}

fn qualify(alias: &str, name: &str) -> String {
    format!("{}.{}", alias, name)
}

fn require_identifier(name: &str, path: &ComponentPath) -> MetricResult<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(MetricError::validation(
            path.clone(),
            format!("'{}' is not a valid identifier", name),
        ))
    }
}

/// Measure, derivation and dimension names: one namespace.
fn component_names(metric: &Metric) -> impl Iterator<Item = &str> {
    metric
        .measures
        .iter()
        .map(|m| m.name.as_str())
        .chain(metric.derivations.iter().map(|d| d.name.as_str()))
        .chain(metric.dimensions.iter().map(|d| d.name.as_str()))
}

fn has_component(metric: &Metric, name: &str) -> bool {
    component_names(metric).any(|n| n == name)
}

fn has_measure(metric: &Metric, name: &str) -> bool {
    metric.measures.iter().any(|m| m.name == name)
        || metric.derivations.iter().any(|d| d.name == name)
}

/// Every name in `names` must exist in `known`.
fn require_known(
    names: &[String],
    mut known: impl FnMut(&str) -> bool,
    path: &ComponentPath,
    section: &str,
) -> MetricResult<()> {
    for (i, name) in names.iter().enumerate() {
        if !known(name) {
            return Err(MetricError::validation(
                path.index(section, i),
                format!("no {} named '{}' in the source metric", section, name),
            ));
        }
    }
    Ok(())
}

/// `include` lists name measures (and derivations), dimensions and filters to keep.
fn apply_include(metric: &mut Metric, include: &ComponentSelection) -> MetricResult<()> {
    let path = ComponentPath::root().field("include");
    if let Some(names) = &include.measures {
        require_known(names, |n| has_measure(metric, n), &path, "measures")?;
        metric.measures.retain(|m| names.contains(&m.name));
        metric.derivations.retain(|d| names.contains(&d.name));
    }
    if let Some(names) = &include.dimensions {
        require_known(
            names,
            |n| metric.dimensions.iter().any(|d| d.name == n),
            &path,
            "dimensions",
        )?;
        metric.dimensions.retain(|d| names.contains(&d.name));
    }
    if let Some(names) = &include.filters {
        require_known(
            names,
            |n| metric.filters.iter().any(|f| f.name == n),
            &path,
            "filters",
        )?;
        metric.filters.retain(|f| names.contains(&f.name));
    }
    Ok(())
}

/// Exclusions are checked against the source, so excluding something
/// `include` already dropped is fine.
fn apply_exclude(
    metric: &mut Metric,
    source: &Metric,
    exclude: &ComponentNames,
) -> MetricResult<()> {
    let path = ComponentPath::root().field("overrides").field("exclude");
    require_known(&exclude.measures, |n| has_measure(source, n), &path, "measures")?;
    require_known(
        &exclude.dimensions,
        |n| source.dimensions.iter().any(|d| d.name == n),
        &path,
        "dimensions",
    )?;
    require_known(
        &exclude.filters,
        |n| source.filters.iter().any(|f| f.name == n),
        &path,
        "filters",
    )?;

    metric.measures.retain(|m| !exclude.measures.contains(&m.name));
    metric.derivations.retain(|d| !exclude.measures.contains(&d.name));
    metric
        .dimensions
        .retain(|d| !exclude.dimensions.contains(&d.name));
    metric.filters.retain(|f| !exclude.filters.contains(&f.name));
    Ok(())
}

fn apply_replace(metric: &mut Metric, replace: &ComponentSet) -> MetricResult<()> {
    let path = ComponentPath::root().field("overrides").field("replace");
    let not_found = |kind: ComponentKind, i: usize, name: &str| MetricError::ReplaceTargetNotFound {
        path: path.index(kind.section(), i),
        kind,
        name: name.to_string(),
    };

    for (i, measure) in replace.measures.iter().enumerate() {
        if let Some(slot) = metric.measures.iter_mut().find(|m| m.name == measure.name) {
            *slot = measure.clone();
            continue;
        }
        // A derivation becomes a base measure; measures precede every derivation,
        // so later derivations that reference it still resolve.
        let position = metric
            .derivations
            .iter()
            .position(|d| d.name == measure.name)
            .ok_or_else(|| not_found(ComponentKind::Measure, i, &measure.name))?;
        metric.derivations.remove(position);
        metric.measures.push(measure.clone());
    }
    for (i, dimension) in replace.dimensions.iter().enumerate() {
        let slot = metric
            .dimensions
            .iter_mut()
            .find(|d| d.name == dimension.name)
            .ok_or_else(|| not_found(ComponentKind::Dimension, i, &dimension.name))?;
        *slot = dimension.clone();
    }
    for (i, filter) in replace.filters.iter().enumerate() {
        let slot = metric
            .filters
            .iter_mut()
            .find(|f| f.name == filter.name)
            .ok_or_else(|| not_found(ComponentKind::Filter, i, &filter.name))?;
        *slot = filter.clone();
    }
    Ok(())
}

fn apply_add(metric: &mut Metric, add: &ComponentSet) -> MetricResult<()> {
    let path = ComponentPath::root().field("overrides").field("add");
    let duplicate = |kind: ComponentKind, i: usize, name: &str| MetricError::DuplicateComponentName {
        path: path.index(kind.section(), i),
        kind,
        name: name.to_string(),
    };

    for (i, measure) in add.measures.iter().enumerate() {
        require_identifier(&measure.name, &path.index("measures", i).field("name"))?;
        if has_component(metric, &measure.name) {
            return Err(duplicate(ComponentKind::Measure, i, &measure.name));
        }
        metric.measures.push(measure.clone());
    }
    for (i, dimension) in add.dimensions.iter().enumerate() {
        require_identifier(&dimension.name, &path.index("dimensions", i).field("name"))?;
        if has_component(metric, &dimension.name) {
            return Err(duplicate(ComponentKind::Dimension, i, &dimension.name));
        }
        metric.dimensions.push(dimension.clone());
    }
    for (i, filter) in add.filters.iter().enumerate() {
        require_identifier(&filter.name, &path.index("filters", i).field("name"))?;
        if metric.filters.iter().any(|f| f.name == filter.name) {
            return Err(duplicate(ComponentKind::Filter, i, &filter.name));
        }
        metric.filters.push(filter.clone());
    }
    Ok(())
}

/// Derivations may only reference measures and derivations defined before them.
fn apply_derivations(metric: &mut Metric, derivations: &[Derivation]) -> MetricResult<()> {
    for (i, derivation) in derivations.iter().enumerate() {
        let path = ComponentPath::root().index("derivations", i);
        require_identifier(&derivation.name, &path.field("name"))?;
        if has_component(metric, &derivation.name) {
            return Err(MetricError::DuplicateComponentName {
                path,
                kind: ComponentKind::Derivation,
                name: derivation.name.clone(),
            });
        }
        for reference in derivation.expr.measure_refs() {
            if has_measure(metric, reference) {
                continue;
            }
            let later = reference == derivation.name
                || derivations[i + 1..].iter().any(|d| d.name == reference);
            if later {
                return Err(MetricError::DerivationOrderError {
                    path,
                    derivation: derivation.name.clone(),
                    reference: reference.to_string(),
                });
            }
            return Err(MetricError::validation(
                path.field("expr"),
                format!("unknown measure '{}'", reference),
            ));
        }
        metric.derivations.push(derivation.clone());
    }
    Ok(())
}

/// Connect `other`'s tables to `metric`'s join graph.
///
/// Joins are taken in breadth-first order from the tables `metric` already
/// reaches; a join seen from its `table` side is flipped. Tables `metric`
/// already reaches keep their existing routes.
fn merge_joins(metric: &mut Metric, other: &Metric, path: &ComponentPath) -> MetricResult<()> {
    let mut known: HashSet<String> = metric.table_keys().into_iter().map(String::from).collect();
    let mut pending: Vec<&JoinSpec> = other.joins.iter().collect();

    loop {
        let before = pending.len();
        let mut rest = Vec::new();
        for join in pending {
            let from_known = known.contains(&join.from);
            let table_known = known.contains(&join.table.name);
            match (from_known, table_known) {
                (true, true) => {
                    let conflicting = metric.joins.iter().any(|j| {
                        j.from == join.from && j.table.name == join.table.name && j.on != join.on
                    });
                    if conflicting {
                        return Err(MetricError::validation(
                            path.clone(),
                            format!(
                                "join {} -> {} conflicts with an existing join",
                                join.from, join.table.name
                            ),
                        ));
                    }
                }
                (true, false) => {
                    known.insert(join.table.name.clone());
                    metric.joins.push(join.clone());
                }
                (false, true) => {
                    known.insert(join.from.clone());
                    metric.joins.push(JoinSpec {
                        table: other
                            .table_spec(&join.from)
                            .cloned()
                            .unwrap_or_else(|| TableSpec::new(&join.from)),
                        from: join.table.name.clone(),
                        on: join
                            .on
                            .iter()
                            .map(|k| JoinKey {
                                left: k.right.clone(),
                                right: k.left.clone(),
                            })
                            .collect(),
                        kind: join.kind.flipped(),
                    });
                }
                (false, false) => rest.push(join),
            }
        }
        pending = rest;
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    if !known.contains(&other.table.name) {
        return Err(MetricError::validation(
            path.clone(),
            format!(
                "'{}' shares no joinable table with '{}'",
                other.id, metric.id
            ),
        ));
    }
    Ok(())
}

fn merge_parameters(metric: &mut Metric, other: &Metric, path: &ComponentPath) -> MetricResult<()> {
    for param in &other.parameters {
        match metric.parameter(&param.name) {
            Some(existing) if existing.kind != param.kind => {
                return Err(MetricError::validation(
                    path.clone(),
                    format!(
                        "parameter '{}' is {} here but {} in '{}'",
                        param.name, existing.kind, param.kind, other.id
                    ),
                ))
            }
            Some(_) => {}
            None => metric.parameters.push(param.clone()),
        }
    }
    Ok(())
}
