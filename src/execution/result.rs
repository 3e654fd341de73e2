//! Result envelope returned by every service call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorReport, MetricError};
use crate::sql::Dialect;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// The SQL that ran (or would run, for previews).
    pub query: String,
    pub duration_ms: u64,
    pub row_count: usize,
    /// Bound request parameters. Consumer-context values are not echoed.
    pub parameters: Map<String, Value>,
    pub dialect: Dialect,
    pub cache_hit: bool,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// One object per row, keys in select order.
    pub data: Vec<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorReport>,
}

impl ExecutionResult {
    pub fn success(data: Vec<Map<String, Value>>, metadata: ResultMetadata) -> Self {
        Self {
            success: true,
            data,
            metadata: Some(metadata),
            errors: Vec::new(),
        }
    }

    pub fn failure(err: &MetricError) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            metadata: None,
            errors: vec![ErrorReport::from(err)],
        }
    }

    /// A successful result with no rows and no metadata.
    pub fn empty() -> Self {
        Self {
            success: true,
            data: Vec::new(),
            metadata: None,
            errors: Vec::new(),
        }
    }

    /// Error-kind names, in order.
    pub fn error_kinds(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.kind.as_str()).collect()
    }
}
