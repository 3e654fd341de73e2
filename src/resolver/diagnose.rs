//! Structural repair suggestions for variant requests that fail to resolve.
//!
//! Each round resolves the request, maps the failure to at most one fix,
//! applies it to a working copy and tries again.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::catalog::MetricCatalog;
use super::Resolver;
use crate::error::{ComponentKind, ComponentPath, ErrorReport, MetricError};
use crate::model::variant::{ComponentSet, MetricVariantRequest};
use crate::model::Derivation;

const MAX_ROUNDS: usize = 8;

/// `include.measures[2]`, `overrides.exclude.filters[0]`, ...
static NAME_LIST_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(include|overrides\.exclude)\.(measures|dimensions|filters)\[(\d+)\]$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fix {
    pub path: ComponentPath,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnosis {
    /// The failure of the request as given; `None` if it resolved.
    pub error: Option<ErrorReport>,
    pub fixes: Vec<Fix>,
    /// The request with every fix applied, when that version resolves.
    pub corrected: Option<MetricVariantRequest>,
}

/// Diagnose `request` against `catalog`.
pub fn diagnose(
    catalog: &dyn MetricCatalog,
    request: &MetricVariantRequest,
    max_combine_depth: usize,
) -> Diagnosis {
    let mut current = request.clone();
    let mut original: Option<MetricError> = None;
    let mut fixes = Vec::new();

    for round in 0..MAX_ROUNDS {
        let err = match Resolver::new(catalog)
            .with_max_depth(max_combine_depth)
            .resolve(&current)
        {
            Ok(_) => {
                return Diagnosis {
                    error: original.as_ref().map(ErrorReport::from),
                    fixes,
                    corrected: Some(current),
                }
            }
            Err(err) => err,
        };
        debug!(target: "resolver", round, kind = err.kind(), "diagnosing failure");

        let fix = suggest_fix(catalog, &mut current, &err);
        original.get_or_insert(err);
        match fix {
            Some(fix) => fixes.push(fix),
            None => break,
        }
    }

    Diagnosis {
        error: original.as_ref().map(ErrorReport::from),
        fixes,
        corrected: None,
    }
}

/// Apply one fix for `err` to `request`, if one is known.
fn suggest_fix(
    catalog: &dyn MetricCatalog,
    request: &mut MetricVariantRequest,
    err: &MetricError,
) -> Option<Fix> {
    match err {
        MetricError::UnknownMetric { metric_id, .. } => repair_reference(catalog, request, metric_id),
        MetricError::ReplaceTargetNotFound { path, kind, name } => {
            let moved = take_component(&mut request.overrides.replace, *kind, name)?;
            put_component(&mut request.overrides.add, moved);
            Some(Fix {
                path: path.clone(),
                description: format!(
                    "no {} named '{}' to replace; adding it instead",
                    kind, name
                ),
            })
        }
        MetricError::DuplicateComponentName { path, kind, name }
            if path.as_str().starts_with("overrides.add") =>
        {
            let moved = take_component(&mut request.overrides.add, *kind, name)?;
            put_component(&mut request.overrides.replace, moved);
            Some(Fix {
                path: path.clone(),
                description: format!(
                    "{} '{}' already exists; replacing it instead",
                    kind, name
                ),
            })
        }
        MetricError::DerivationOrderError { .. } => {
            let ordered = topological_order(&request.derivations)?;
            request.derivations = ordered;
            Some(Fix {
                path: ComponentPath::root().field("derivations"),
                description: "reordered derivations so each follows what it references"
                    .to_string(),
            })
        }
        MetricError::VariantCycleError { chain, .. } => {
            let position = request
                .combine
                .iter()
                .position(|c| chain.iter().skip(1).any(|k| *k == c.metric_id))?;
            let removed = request.combine.remove(position);
            Some(Fix {
                path: ComponentPath::root().index("combine", position),
                description: format!(
                    "dropped combine of '{}' ({})",
                    removed.metric_id,
                    chain.join(" -> ")
                ),
            })
        }
        MetricError::Validation { path, .. } => remove_name_entry(request, path),
        _ => None,
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Point an unknown source or combine reference at the metric whose id or
/// name matches once case and punctuation are ignored.
fn repair_reference(
    catalog: &dyn MetricCatalog,
    request: &mut MetricVariantRequest,
    missing: &str,
) -> Option<Fix> {
    let wanted = normalize(missing);
    let candidate = catalog
        .metrics()
        .into_iter()
        .find(|m| normalize(&m.id) == wanted || normalize(&m.name) == wanted)?;

    if request.source.metric_id == missing {
        request.source.metric_id = candidate.id.clone();
        request.source.version = None;
        return Some(Fix {
            path: ComponentPath::root().field("source").field("metric_id"),
            description: format!("unknown source '{}'; using '{}'", missing, candidate.id),
        });
    }

    let position = request.combine.iter().position(|c| c.metric_id == missing)?;
    let entry = &mut request.combine[position];
    entry.metric_id = candidate.id.clone();
    entry.version = None;
    Some(Fix {
        path: ComponentPath::root()
            .index("combine", position)
            .field("metric_id"),
        description: format!("unknown metric '{}'; using '{}'", missing, candidate.id),
    })
}

enum Component {
    Measure(crate::model::Measure),
    Dimension(crate::model::Dimension),
    Filter(crate::model::Filter),
}

fn take_component(set: &mut ComponentSet, kind: ComponentKind, name: &str) -> Option<Component> {
    match kind {
        ComponentKind::Measure => {
            let i = set.measures.iter().position(|m| m.name == name)?;
            Some(Component::Measure(set.measures.remove(i)))
        }
        ComponentKind::Dimension => {
            let i = set.dimensions.iter().position(|d| d.name == name)?;
            Some(Component::Dimension(set.dimensions.remove(i)))
        }
        ComponentKind::Filter => {
            let i = set.filters.iter().position(|f| f.name == name)?;
            Some(Component::Filter(set.filters.remove(i)))
        }
        ComponentKind::Derivation => None,
    }
}

fn put_component(set: &mut ComponentSet, component: Component) {
    match component {
        Component::Measure(m) => set.measures.push(m),
        Component::Dimension(d) => set.dimensions.push(d),
        Component::Filter(f) => set.filters.push(f),
    }
}

/// Stable topological order: each round takes the first derivation whose
/// in-request references are already placed. `None` on a reference cycle.
fn topological_order(derivations: &[Derivation]) -> Option<Vec<Derivation>> {
    let names: Vec<&str> = derivations.iter().map(|d| d.name.as_str()).collect();
    let mut remaining: Vec<&Derivation> = derivations.iter().collect();
    let mut placed: Vec<&str> = Vec::new();
    let mut ordered = Vec::with_capacity(derivations.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|d| {
            d.expr
                .measure_refs()
                .into_iter()
                .filter(|r| names.contains(r))
                .all(|r| placed.contains(&r) && r != d.name)
        })?;
        let next = remaining.remove(ready);
        placed.push(&next.name);
        ordered.push(next.clone());
    }
    Some(ordered)
}

/// Drop an include/exclude entry that names nothing.
fn remove_name_entry(request: &mut MetricVariantRequest, path: &ComponentPath) -> Option<Fix> {
    let captures = NAME_LIST_ENTRY.captures(path.as_str())?;
    let index: usize = captures[3].parse().ok()?;
    let list = match (&captures[1], &captures[2]) {
        ("include", section) => {
            let include = request.include.as_mut()?;
            match section {
                "measures" => include.measures.as_mut()?,
                "dimensions" => include.dimensions.as_mut()?,
                _ => include.filters.as_mut()?,
            }
        }
        (_, "measures") => &mut request.overrides.exclude.measures,
        (_, "dimensions") => &mut request.overrides.exclude.dimensions,
        _ => &mut request.overrides.exclude.filters,
    };
    if index >= list.len() {
        return None;
    }
    let name = list.remove(index);
    Some(Fix {
        path: path.clone(),
        description: format!("removed unknown name '{}'", name),
    })
}
