//! Primitive types shared by the metric model, the compiler and the dialects.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical data type, used for CASTs and result typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Int,
    Decimal,
    Float,
    Bool,
    Date,
    Timestamp,
}

/// Date part accepted by `date_trunc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeUnit {
    /// Lower-case name, used inside string literals (`DATE_TRUNC('month', ..)`).
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Quarter => "quarter",
            TimeUnit::Year => "year",
        }
    }

    /// Upper-case keyword form (`DATE_TRUNC(x, MONTH)`).
    pub fn keyword(&self) -> &'static str {
        match self {
            TimeUnit::Minute => "MINUTE",
            TimeUnit::Hour => "HOUR",
            TimeUnit::Day => "DAY",
            TimeUnit::Week => "WEEK",
            TimeUnit::Month => "MONTH",
            TimeUnit::Quarter => "QUARTER",
            TimeUnit::Year => "YEAR",
        }
    }
}

/// Aggregation allow-list for measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Stddev,
    Variance,
    Percentile,
}

impl AggregationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Sum => "sum",
            AggregationKind::Avg => "avg",
            AggregationKind::Count => "count",
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
            AggregationKind::Stddev => "stddev",
            AggregationKind::Variance => "variance",
            AggregationKind::Percentile => "percentile",
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a metric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Date,
    Timestamp,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Date => "date",
            ParamType::Timestamp => "timestamp",
            ParamType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A literal written into a metric definition.
///
/// Objects and arrays are rejected when the definition is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Null,
}

/// A parameter value after coercion to its declared type.
///
/// These never appear in SQL text; they travel next to it as bind values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl ParamValue {
    /// JSON form, used when echoing parameters in result metadata.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Null => serde_json::Value::Null,
            ParamValue::Bool(b) => serde_json::Value::Bool(*b),
            ParamValue::Integer(i) => serde_json::Value::from(*i),
            ParamValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ParamValue::String(s) => serde_json::Value::String(s.clone()),
            ParamValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            ParamValue::Timestamp(ts) => {
                serde_json::Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
        }
    }
}
