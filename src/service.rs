//! Service façade: compile, preview, execute and diagnose metric queries.
//!
//! `MetricService` owns the catalog, settings, result cache and connectors.
//! The infallible methods fold failures into an [`ExecutionResult`] with
//! `success: false`; the `try_*` methods return the typed error instead.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::binder::TenantContext;
use crate::cache::{CacheStore, MemoryStore, ResultCache, TenantScope};
use crate::compile::{compile_effective, CompiledQuery};
use crate::config::{ConfigError, Settings};
use crate::error::MetricResult;
use crate::execution::{ConnectorRegistry, ExecutionEngine, ExecutionResult, ResultMetadata};
use crate::model::variant::{MetricVariantRequest, SourceRef};
use crate::resolver::{diagnose, Diagnosis, MetricCatalog, Resolver};
use crate::sql::Dialect;

/// What to query: a published metric (or stored variant) as-is, or an
/// ad-hoc variant request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTarget {
    Metric(SourceRef),
    Variant(MetricVariantRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub target: QueryTarget,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Overrides the data source's configured dialect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<Dialect>,
    #[serde(default)]
    pub tenant: TenantContext,
}

impl QueryRequest {
    pub fn metric(id: &str, tenant: TenantContext) -> Self {
        Self {
            target: QueryTarget::Metric(SourceRef::new(id)),
            parameters: Map::new(),
            dialect: None,
            tenant,
        }
    }

    pub fn variant(request: MetricVariantRequest, tenant: TenantContext) -> Self {
        Self {
            target: QueryTarget::Variant(request),
            parameters: Map::new(),
            dialect: None,
            tenant,
        }
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }
}

pub struct MetricService {
    catalog: Arc<dyn MetricCatalog>,
    settings: Settings,
    cache: Option<ResultCache>,
    engine: Arc<ExecutionEngine>,
}

impl MetricService {
    /// Build a service with an in-memory result cache sized from `settings`.
    pub fn new(
        catalog: Arc<dyn MetricCatalog>,
        settings: Settings,
        connectors: ConnectorRegistry,
    ) -> Result<Self, ConfigError> {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new(settings.cache.max_entries));
        Self::with_cache_store(catalog, settings, connectors, store)
    }

    /// Build a service on a caller-supplied cache store.
    pub fn with_cache_store(
        catalog: Arc<dyn MetricCatalog>,
        settings: Settings,
        connectors: ConnectorRegistry,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let cache = if settings.cache.enabled {
            Some(ResultCache::new(store, settings.cache.ttl()?))
        } else {
            None
        };
        let engine = Arc::new(ExecutionEngine::new(connectors, &settings.execution)?);
        Ok(Self {
            catalog,
            settings,
            cache,
            engine,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &dyn MetricCatalog {
        self.catalog.as_ref()
    }

    /// Resolve, plan, bind and render without executing.
    pub fn compile(&self, request: &QueryRequest) -> MetricResult<CompiledQuery> {
        let mut resolver = Resolver::new(self.catalog.as_ref())
            .with_max_depth(self.settings.compiler.max_combine_depth);
        let effective = match &request.target {
            QueryTarget::Metric(source) => {
                resolver.resolve_id(&source.metric_id, source.version)?
            }
            QueryTarget::Variant(variant) => Arc::new(resolver.resolve(variant)?),
        };
        let dialect = request.dialect.unwrap_or_else(|| {
            self.settings
                .dialect_for(&effective.metric.data_model.data_source)
        });
        compile_effective(&effective, &request.parameters, &request.tenant, dialect)
    }

    /// The SQL and bound parameters as an `ExecutionResult` with no rows.
    pub fn try_preview(&self, request: &QueryRequest) -> MetricResult<ExecutionResult> {
        let compiled = self.compile(request)?;
        Ok(ExecutionResult::success(
            Vec::new(),
            ResultMetadata {
                query: compiled.sql,
                duration_ms: 0,
                row_count: 0,
                parameters: compiled.parameters.echo(),
                dialect: compiled.dialect,
                cache_hit: false,
                executed_at: Utc::now(),
            },
        ))
    }

    pub fn preview(&self, request: &QueryRequest) -> ExecutionResult {
        self.try_preview(request)
            .unwrap_or_else(|err| ExecutionResult::failure(&err))
    }

    /// Compile and run through the cache.
    pub async fn try_execute(&self, request: &QueryRequest) -> MetricResult<ExecutionResult> {
        let compiled = self.compile(request)?;

        let Some(cache) = &self.cache else {
            return self.engine.execute(&compiled).await;
        };

        let keyed = TenantScope::from_tenant(&request.tenant)
            .and_then(|scope| compiled.cache_key(&scope).map(|key| (key, scope)));
        let (key, scope) = match keyed {
            Ok(keyed) => keyed,
            Err(err) => {
                warn!(target: "cache", error = %err, "cannot build cache key; executing directly");
                return self.engine.execute(&compiled).await;
            }
        };

        let engine = Arc::clone(&self.engine);
        let lookup = cache
            .get_or_compute(key, scope, move || async move {
                engine.execute(&compiled).await
            })
            .await?;

        let mut result = lookup.result.as_ref().clone();
        if let Some(metadata) = &mut result.metadata {
            metadata.cache_hit = lookup.hit;
        }
        Ok(result)
    }

    pub async fn execute(&self, request: &QueryRequest) -> ExecutionResult {
        match self.try_execute(request).await {
            Ok(result) => result,
            Err(err) => {
                debug!(kind = err.kind(), error = %err, "query failed");
                ExecutionResult::failure(&err)
            }
        }
    }

    /// Suggest structural fixes for a variant request.
    pub fn diagnose(&self, request: &MetricVariantRequest) -> Diagnosis {
        diagnose(
            self.catalog.as_ref(),
            request,
            self.settings.compiler.max_combine_depth,
        )
    }
}
