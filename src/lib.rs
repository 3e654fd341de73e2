//! # Metrica
//!
//! A semantic-layer metric compiler that turns versioned metric definitions
//! and their variants into dialect-correct SQL, then executes it through a
//! tenant-scoped, single-flight result cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Metric (published) + Variant request              │
//! │  (include/exclude, add/replace, derivations, combine)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [resolver]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Effective metric                         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [compiler + planner]
//! ┌─────────────────────────────────────────────────────────┐
//! │   PlannedQuery (IR select list, join path, filters)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [binder + sql adapter]
//! ┌─────────────────────────────────────────────────────────┐
//! │          CompiledQuery (SQL + bind values)               │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [cache → execution]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 ExecutionResult                          │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod binder;
pub mod cache;
pub mod compile;
pub mod compiler;
pub mod config;
pub mod error;
pub mod execution;
pub mod model;
pub mod planner;
pub mod resolver;
pub mod service;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::binder::TenantContext;
    pub use crate::compile::{compile_variant, CompileOptions, CompiledQuery};
    pub use crate::config::Settings;
    pub use crate::error::{ComponentPath, MetricError, MetricResult};
    pub use crate::execution::{
        Connector, ConnectorError, ConnectorRegistry, ConnectorRequest, ExecutionResult, RowSet,
    };
    pub use crate::model::{Metric, MetricVariantRequest, SourceRef};
    pub use crate::resolver::{InMemoryCatalog, MetricCatalog};
    pub use crate::service::{MetricService, QueryRequest, QueryTarget};
    pub use crate::sql::Dialect;
}

pub use error::{MetricError, MetricResult};
pub use service::{MetricService, QueryRequest};
pub use sql::Dialect;
