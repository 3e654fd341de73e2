//! Parameter binder.
//!
//! Checks that every placeholder in a planned query has a value, coerces
//! request values to their declared types, and pulls `ctx_*` placeholders
//! from the tenant's consumer attributes. Values stay out of SQL text; they
//! are handed to the connector next to it.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::hash::compute_hash;
use crate::error::{ComponentPath, MetricError, MetricResult};
use crate::model::metric::Metric;
use crate::model::types::{ParamType, ParamValue};

/// Prefix of placeholders bound from consumer-context attributes.
pub const CONTEXT_PREFIX: &str = "ctx_";

/// Who is asking: scopes cache keys and context-aware filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantContext {
    pub environment_id: String,
    /// Consumer attributes, addressed by `{"context": "<attr>"}` in definitions.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl TenantContext {
    pub fn new(environment_id: &str) -> Self {
        Self {
            environment_id: environment_id.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Stable hash of the consumer attributes.
    pub fn consumer_hash(&self) -> Result<String, serde_json::Error> {
        compute_hash(&self.attributes)
    }
}

/// Coerced values keyed by placeholder name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoundParameters {
    values: BTreeMap<String, ParamValue>,
}

impl BoundParameters {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn named(&self) -> &BTreeMap<String, ParamValue> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in bind-slot order.
    pub fn ordered(&self, placeholders: &[String]) -> MetricResult<Vec<ParamValue>> {
        placeholders
            .iter()
            .map(|name| {
                self.values
                    .get(name)
                    .cloned()
                    .ok_or_else(|| MetricError::MissingParameter { name: name.clone() })
            })
            .collect()
    }

    /// Request parameters as JSON, for result metadata. Context values are left out.
    pub fn echo(&self) -> Map<String, Value> {
        self.values
            .iter()
            .filter(|(name, _)| !name.starts_with(CONTEXT_PREFIX))
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

/// Bind `placeholders` (from the planned query) for one request.
pub fn bind(
    metric: &Metric,
    placeholders: &[String],
    request: &Map<String, Value>,
    tenant: &TenantContext,
) -> MetricResult<BoundParameters> {
    let mut values = BTreeMap::new();

    // Declared parameters are checked even when no expression uses them.
    for param in &metric.parameters {
        match supplied(request.get(&param.name)) {
            Some(raw) => {
                coerce(&param.name, param.kind, raw)?;
            }
            None if param.required && supplied(param.default.as_ref()).is_none() => {
                return Err(MetricError::MissingParameter {
                    name: param.name.clone(),
                });
            }
            None => {}
        }
    }

    for name in placeholders {
        if values.contains_key(name) {
            continue;
        }
        let value = match name.strip_prefix(CONTEXT_PREFIX) {
            Some(attribute) => {
                let raw = supplied(tenant.attributes.get(attribute)).ok_or_else(|| {
                    MetricError::MissingParameter { name: name.clone() }
                })?;
                context_value(name, raw)?
            }
            None => {
                let param = metric.parameter(name).ok_or_else(|| {
                    MetricError::validation(
                        ComponentPath::root().field("parameters"),
                        format!("parameter '{}' is referenced but not declared", name),
                    )
                })?;
                let raw = supplied(request.get(name))
                    .or_else(|| supplied(param.default.as_ref()))
                    .ok_or_else(|| MetricError::MissingParameter { name: name.clone() })?;
                coerce(name, param.kind, raw)?
            }
        };
        values.insert(name.clone(), value);
    }

    let ignored: Vec<&str> = request
        .keys()
        .filter(|k| metric.parameter(k).is_none())
        .map(String::as_str)
        .collect();
    if !ignored.is_empty() {
        debug!(metric = %metric.id, ?ignored, "ignoring undeclared request parameters");
    }

    Ok(BoundParameters { values })
}

/// `null` counts as absent.
fn supplied(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Coerce a request value to the declared type.
pub fn coerce(name: &str, expected: ParamType, value: &Value) -> MetricResult<ParamValue> {
    let mismatch = || MetricError::ParameterTypeError {
        name: name.to_string(),
        expected,
        value: value.to_string(),
    };

    match (expected, value) {
        (ParamType::String, Value::String(s)) => Ok(ParamValue::String(s.clone())),
        (ParamType::String, Value::Number(n)) => Ok(ParamValue::String(n.to_string())),
        (ParamType::String, Value::Bool(b)) => Ok(ParamValue::String(b.to_string())),

        (ParamType::Number, Value::Number(n)) => {
            n.as_f64().map(ParamValue::Number).ok_or_else(mismatch)
        }
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(ParamValue::Number)
            .ok_or_else(mismatch),

        (ParamType::Integer, Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(ParamValue::Integer)
            .ok_or_else(mismatch),
        (ParamType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(ParamValue::Integer)
            .map_err(|_| mismatch()),

        (ParamType::Boolean, Value::Bool(b)) => Ok(ParamValue::Bool(*b)),
        (ParamType::Boolean, Value::String(s)) => match s.trim() {
            "true" => Ok(ParamValue::Bool(true)),
            "false" => Ok(ParamValue::Bool(false)),
            _ => Err(mismatch()),
        },

        (ParamType::Date, Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(ParamValue::Date)
            .map_err(|_| mismatch()),

        (ParamType::Timestamp, Value::String(s)) => parse_timestamp(s.trim())
            .map(ParamValue::Timestamp)
            .ok_or_else(mismatch),

        _ => Err(mismatch()),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
}

/// Context attributes carry no declared type; scalars bind as they are.
fn context_value(name: &str, value: &Value) -> MetricResult<ParamValue> {
    match value {
        Value::Bool(b) => Ok(ParamValue::Bool(*b)),
        Value::Number(n) => Ok(n
            .as_i64()
            .map(ParamValue::Integer)
            .or_else(|| n.as_f64().map(ParamValue::Number))
            .unwrap_or(ParamValue::Null)),
        Value::String(s) => Ok(ParamValue::String(s.clone())),
        other => Err(MetricError::ParameterTypeError {
            name: name.to_string(),
            expected: ParamType::String,
            value: other.to_string(),
        }),
    }
}
