//! Execution engine.
//!
//! Runs a compiled query through the data source's connector under a
//! wall-clock timeout, retries transient failures with exponential
//! backoff, enforces the row limit and applies display formatting.

pub mod connector;
pub mod result;

pub use connector::{Connector, ConnectorError, ConnectorRegistry, ConnectorRequest, RowSet};
pub use result::{ExecutionResult, ResultMetadata};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::compile::CompiledQuery;
use crate::config::{ConfigError, ExecutionSettings};
use crate::error::{MetricError, MetricResult};
use crate::model::format::Format;
use crate::planner::PostTransform;

pub struct ExecutionEngine {
    connectors: ConnectorRegistry,
    timeout: Duration,
    max_rows: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ExecutionEngine {
    pub fn new(
        connectors: ConnectorRegistry,
        settings: &ExecutionSettings,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            connectors,
            timeout: settings.timeout()?,
            max_rows: settings.max_rows,
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff()?,
        })
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Execute `query`. Dropping the returned future cancels the connector call.
    pub async fn execute(&self, query: &CompiledQuery) -> MetricResult<ExecutionResult> {
        let data_source = query.data_source.as_str();
        let connector = self.connectors.get(data_source)?;
        let request = ConnectorRequest {
            sql: query.sql.clone(),
            positional: query.positional()?,
            named: query.parameters.named().clone(),
            fetch_limit: self.max_rows.saturating_add(1),
        };

        let started = Instant::now();
        let attempts = self.fetch_with_retry(connector.as_ref(), &request, data_source);
        let rows = match tokio::time::timeout(self.timeout, attempts).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(target: "execution", data_source, timeout_ms = self.timeout.as_millis() as u64, "query timed out");
                return Err(MetricError::ExecutionTimeout {
                    data_source: data_source.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        if rows.rows.len() > self.max_rows {
            return Err(MetricError::RowLimitExceeded {
                data_source: data_source.to_string(),
                limit: self.max_rows,
            });
        }

        let data = normalize_rows(rows, &query.post_transforms, data_source)?;
        let row_count = data.len();
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            target: "execution",
            metric = %query.metric_id,
            data_source,
            rows = row_count,
            duration_ms,
            "query executed"
        );

        Ok(ExecutionResult::success(
            data,
            ResultMetadata {
                query: query.sql.clone(),
                duration_ms,
                row_count,
                parameters: query.parameters.echo(),
                dialect: query.dialect,
                cache_hit: false,
                executed_at: Utc::now(),
            },
        ))
    }

    async fn fetch_with_retry(
        &self,
        connector: &dyn Connector,
        request: &ConnectorRequest,
        data_source: &str,
    ) -> MetricResult<RowSet> {
        let mut attempt: u32 = 0;
        loop {
            match connector.fetch(request).await {
                Ok(rows) => return Ok(rows),
                Err(err @ ConnectorError::Transient(_)) if attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        target: "execution",
                        data_source,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying transient connector failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into_metric_error(data_source)),
            }
        }
    }

    /// `retry_backoff * 2^attempt`
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Zip each row with the column names and apply per-column formats.
///
/// A row whose width differs from the column list is a connector bug.
fn normalize_rows(
    rows: RowSet,
    transforms: &[PostTransform],
    data_source: &str,
) -> MetricResult<Vec<Map<String, Value>>> {
    let formats: HashMap<&str, &Format> = transforms
        .iter()
        .map(|t| (t.column.as_str(), &t.format))
        .collect();

    rows.rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() != rows.columns.len() {
                return Err(MetricError::ExecutionError {
                    data_source: data_source.to_string(),
                    message: format!(
                        "row {} has {} values for {} columns",
                        i,
                        row.len(),
                        rows.columns.len()
                    ),
                    transient: false,
                });
            }
            Ok(rows.columns
                .iter()
                .zip(row)
                .map(|(column, value)| {
                    let value = match formats.get(column.as_str()) {
                        Some(format) => format.apply(&value),
                        None => value,
                    };
                    (column.clone(), value)
                })
                .collect())
        })
        .collect()
}
