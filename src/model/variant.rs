//! Variant requests: structured overrides on top of a published metric.

use super::metric::{Derivation, Dimension, Filter, Measure};
use serde::{Deserialize, Serialize};

/// Immutable pointer to a source metric (or stored variant) by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub metric_id: String,
    /// Latest published version when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl SourceRef {
    pub fn new(metric_id: &str) -> Self {
        Self {
            metric_id: metric_id.to_string(),
            version: None,
        }
    }
}

/// `include`: per-type allow-lists. A missing list keeps every component of that type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measures: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<String>>,
}

/// Per-type name lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentNames {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measures: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
}

impl ComponentNames {
    pub fn is_empty(&self) -> bool {
        self.measures.is_empty() && self.dimensions.is_empty() && self.filters.is_empty()
    }
}

/// Per-type component definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measures: Vec<Measure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<Dimension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

impl ComponentSet {
    pub fn is_empty(&self) -> bool {
        self.measures.is_empty() && self.dimensions.is_empty() && self.filters.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "ComponentSet::is_empty")]
    pub add: ComponentSet,
    #[serde(default, skip_serializing_if = "ComponentSet::is_empty")]
    pub replace: ComponentSet,
    #[serde(default, skip_serializing_if = "ComponentNames::is_empty")]
    pub exclude: ComponentNames,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.replace.is_empty() && self.exclude.is_empty()
    }
}

/// Another metric whose columns are joined in under `alias`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CombineRef {
    pub metric_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricVariantRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: SourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<ComponentSelection>,
    #[serde(default, skip_serializing_if = "Overrides::is_empty")]
    pub overrides: Overrides,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derivations: Vec<Derivation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub combine: Vec<CombineRef>,
    #[serde(default)]
    pub public: bool,
}

/// A stored variant, addressable by id like a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricVariant {
    pub id: String,
    #[serde(flatten)]
    pub request: MetricVariantRequest,
}
