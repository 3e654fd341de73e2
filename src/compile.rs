//! End-to-end compilation from a variant request to dialect SQL.
//!
//! ```text
//! Variant request → Resolve → Effective metric → Plan → Bind → Render → CompiledQuery
//! ```
//!
//! # Example
//!
//! ```ignore
//! use metrica::compile::{compile_variant, CompileOptions};
//! use metrica::binder::TenantContext;
//! use metrica::sql::Dialect;
//!
//! let options = CompileOptions::default().with_dialect(Dialect::Snowflake);
//! let compiled = compile_variant(&catalog, &request, &params, &TenantContext::new("prod"), &options)?;
//! println!("{}", compiled.sql);
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::binder::{bind, BoundParameters, TenantContext, CONTEXT_PREFIX};
use crate::cache::{compute_hash, CacheKey, CacheResult, TenantScope};
use crate::error::{ComponentPath, MetricError, MetricResult};
use crate::model::types::ParamValue;
use crate::model::variant::{MetricVariantRequest, SourceRef};
use crate::planner::{plan_query, PostTransform};
use crate::resolver::{EffectiveMetric, MetricCatalog, Resolver, DEFAULT_MAX_COMBINE_DEPTH};
use crate::sql::{render_plan, Dialect};

// ============================================================================
// Options
// ============================================================================

/// Options for compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// SQL dialect to generate.
    pub dialect: Dialect,

    /// How deeply `combine` references may nest.
    pub max_combine_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgres,
            max_combine_depth: DEFAULT_MAX_COMBINE_DEPTH,
        }
    }
}

impl CompileOptions {
    /// Set the SQL dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_max_combine_depth(mut self, depth: usize) -> Self {
        self.max_combine_depth = depth;
        self
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// A query ready to hand to a connector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub metric_id: String,
    pub version: u32,
    pub data_source: String,
    pub dialect: Dialect,
    pub sql: String,
    /// Placeholder name per bind slot.
    pub placeholders: Vec<String>,
    pub parameters: BoundParameters,
    pub output_columns: Vec<String>,
    pub post_transforms: Vec<PostTransform>,
    /// Hash of the effective definition, dialect and parameter shapes.
    pub content_hash: String,
    pub lineage: Vec<String>,
}

impl CompiledQuery {
    /// Bound values in slot order.
    pub fn positional(&self) -> MetricResult<Vec<ParamValue>> {
        self.parameters.ordered(&self.placeholders)
    }

    pub fn cache_key(&self, scope: &TenantScope) -> CacheResult<CacheKey> {
        CacheKey::compute(&self.content_hash, self.dialect, &self.parameters, scope)
    }
}

#[derive(Serialize)]
struct ParameterShape<'a> {
    name: &'a str,
    kind: &'a str,
}

// ============================================================================
// Compilation Functions
// ============================================================================

/// Resolve a variant request to its effective metric.
pub fn resolve(
    catalog: &dyn MetricCatalog,
    request: &MetricVariantRequest,
    options: &CompileOptions,
) -> MetricResult<EffectiveMetric> {
    Resolver::new(catalog)
        .with_max_depth(options.max_combine_depth)
        .resolve(request)
}

/// Compile a published metric (or stored variant) by id, unchanged.
pub fn compile_metric_id(
    catalog: &dyn MetricCatalog,
    source: &SourceRef,
    params: &Map<String, Value>,
    tenant: &TenantContext,
    options: &CompileOptions,
) -> MetricResult<CompiledQuery> {
    let effective = Resolver::new(catalog)
        .with_max_depth(options.max_combine_depth)
        .resolve_id(&source.metric_id, source.version)?;
    compile_effective(&effective, params, tenant, options.dialect)
}

/// Compile a variant request.
pub fn compile_variant(
    catalog: &dyn MetricCatalog,
    request: &MetricVariantRequest,
    params: &Map<String, Value>,
    tenant: &TenantContext,
    options: &CompileOptions,
) -> MetricResult<CompiledQuery> {
    let effective = resolve(catalog, request, options)?;
    compile_effective(&effective, params, tenant, options.dialect)
}

/// Plan, bind and render an already resolved metric.
pub fn compile_effective(
    effective: &EffectiveMetric,
    params: &Map<String, Value>,
    tenant: &TenantContext,
    dialect: Dialect,
) -> MetricResult<CompiledQuery> {
    let metric = &effective.metric;
    let plan = plan_query(metric)?;
    let parameters = bind(metric, &plan.parameters, params, tenant)?;
    let rendered = render_plan(&plan, dialect)?;

    let shapes: Vec<ParameterShape> = plan
        .parameters
        .iter()
        .map(|name| ParameterShape {
            name,
            kind: match metric.parameter(name) {
                Some(param) => param.kind.as_str(),
                None if name.starts_with(CONTEXT_PREFIX) => "context",
                None => "undeclared",
            },
        })
        .collect();
    let content_hash = compute_hash(&(&effective.content_hash, dialect, &shapes)).map_err(|e| {
        MetricError::validation(ComponentPath::root(), format!("cannot hash query: {}", e))
    })?;

    debug!(
        metric = %metric.id,
        %dialect,
        slots = rendered.placeholders.len(),
        "compiled metric"
    );

    Ok(CompiledQuery {
        metric_id: metric.id.clone(),
        version: metric.version,
        data_source: plan.data_source.clone(),
        dialect,
        sql: rendered.sql,
        placeholders: rendered.placeholders,
        parameters,
        output_columns: plan.select.iter().map(|s| s.output.clone()).collect(),
        post_transforms: plan.post_transforms,
        content_hash,
        lineage: effective.lineage.clone(),
    })
}
