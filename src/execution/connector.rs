//! Backend connectors.
//!
//! A connector runs one statement against a data source and returns raw
//! rows. It knows nothing about metrics: SQL and bind values arrive ready.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::MetricError;
use crate::model::types::ParamValue;

/// One statement to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorRequest {
    pub sql: String,
    /// Values in bind-slot order, for `$n` and `?` placeholders.
    pub positional: Vec<ParamValue>,
    /// Values by name, for `@name` placeholders.
    pub named: BTreeMap<String, ParamValue>,
    /// Stop reading after this many rows.
    pub fetch_limit: usize,
}

/// Raw result: column names and positional row values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Connector failures, split by whether a retry could help.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectorError {
    /// Connection reset, failover, throttling.
    #[error("transient connector failure: {0}")]
    Transient(String),

    /// Authentication, permissions, bad SQL.
    #[error("connector failure: {0}")]
    Fatal(String),
}

impl ConnectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }

    pub fn into_metric_error(self, data_source: &str) -> MetricError {
        let transient = self.is_transient();
        let message = match self {
            ConnectorError::Transient(m) | ConnectorError::Fatal(m) => m,
        };
        MetricError::ExecutionError {
            data_source: data_source.to_string(),
            message,
            transient,
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Run `request` and return at most `request.fetch_limit` rows.
    async fn fetch(&self, request: &ConnectorRequest) -> Result<RowSet, ConnectorError>;
}

/// Connectors by data-source name.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, data_source: &str, connector: Arc<dyn Connector>) {
        self.connectors.insert(data_source.to_string(), connector);
    }

    pub fn with(mut self, data_source: &str, connector: Arc<dyn Connector>) -> Self {
        self.register(data_source, connector);
        self
    }

    /// The connector for `data_source`. Unknown names are a fatal execution error.
    pub fn get(&self, data_source: &str) -> Result<Arc<dyn Connector>, MetricError> {
        self.connectors
            .get(data_source)
            .cloned()
            .ok_or_else(|| MetricError::ExecutionError {
                data_source: data_source.to_string(),
                message: "no connector registered for this data source".to_string(),
                transient: false,
            })
    }

    pub fn data_sources(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
