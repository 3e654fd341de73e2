//! Metric catalog: where published metrics and stored variants come from.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ComponentPath, MetricError, MetricResult};
use crate::model::metric::Metric;
use crate::model::variant::MetricVariant;

/// Read access to published definitions.
///
/// Implementations front whatever persistence layer owns the definitions.
pub trait MetricCatalog: Send + Sync {
    /// A published metric; the latest version when `version` is `None`.
    fn metric(&self, id: &str, version: Option<u32>) -> Option<Arc<Metric>>;

    /// A stored variant.
    fn variant(&self, id: &str) -> Option<Arc<MetricVariant>>;

    /// Latest version of every metric, ordered by id.
    fn metrics(&self) -> Vec<Arc<Metric>>;
}

/// On-disk catalog layout: `{ "metrics": [..], "variants": [..] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub variants: Vec<MetricVariant>,
}

/// Append-only in-memory catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    metrics: DashMap<String, BTreeMap<u32, Arc<Metric>>>,
    variants: DashMap<String, Arc<MetricVariant>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a parsed catalog file, publishing in file order.
    pub fn from_file(file: CatalogFile) -> MetricResult<Self> {
        let catalog = Self::new();
        for metric in file.metrics {
            catalog.publish(metric)?;
        }
        for variant in file.variants {
            catalog.store_variant(variant)?;
        }
        Ok(catalog)
    }

    /// Publish a metric version.
    ///
    /// Publishing identical content again is a no-op; different content
    /// under an existing `(id, version)` is rejected.
    pub fn publish(&self, metric: Metric) -> MetricResult<()> {
        metric.validate()?;
        let mut versions = self.metrics.entry(metric.id.clone()).or_default();
        if let Some(existing) = versions.get(&metric.version) {
            if **existing == metric {
                return Ok(());
            }
            return Err(MetricError::validation(
                ComponentPath::root().field("version"),
                format!(
                    "metric '{}' version {} is already published with different content",
                    metric.id, metric.version
                ),
            ));
        }
        versions.insert(metric.version, Arc::new(metric));
        Ok(())
    }

    /// Store a variant. Same append-only rule as [`InMemoryCatalog::publish`].
    pub fn store_variant(&self, variant: MetricVariant) -> MetricResult<()> {
        if let Some(existing) = self.variants.get(&variant.id) {
            if **existing == variant {
                return Ok(());
            }
            return Err(MetricError::validation(
                ComponentPath::root().field("id"),
                format!(
                    "variant '{}' is already stored with different content",
                    variant.id
                ),
            ));
        }
        self.variants.insert(variant.id.clone(), Arc::new(variant));
        Ok(())
    }
}

impl MetricCatalog for InMemoryCatalog {
    fn metric(&self, id: &str, version: Option<u32>) -> Option<Arc<Metric>> {
        let versions = self.metrics.get(id)?;
        match version {
            Some(v) => versions.get(&v).cloned(),
            None => versions.values().next_back().cloned(),
        }
    }

    fn variant(&self, id: &str) -> Option<Arc<MetricVariant>> {
        self.variants.get(id).map(|v| Arc::clone(v.value()))
    }

    fn metrics(&self) -> Vec<Arc<Metric>> {
        let mut latest: Vec<Arc<Metric>> = self
            .metrics
            .iter()
            .filter_map(|entry| entry.value().values().next_back().cloned())
            .collect();
        latest.sort_by(|a, b| a.id.cmp(&b.id));
        latest
    }
}
