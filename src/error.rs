//! Unified error type for metric compilation and execution.
//!
//! Compilation and resolution errors are deterministic and carry the
//! component path that produced them. Execution errors carry the data
//! source and say whether a retry could help.

use crate::model::types::ParamType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for metric operations.
pub type MetricResult<T> = Result<T, MetricError>;

/// Dotted path to the component that caused an error,
/// e.g. `dimensions.tier.conditional.when[1]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentPath(String);

impl ComponentPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segment: impl Into<String>) -> Self {
        Self(segment.into())
    }

    /// Append a named segment.
    pub fn field(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{}", self.0, name))
        }
    }

    /// Append an indexed segment: `name[index]`.
    pub fn index(&self, name: &str, index: usize) -> Self {
        self.field(&format!("{}[{}]", name, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Kind of metric component named in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Measure,
    Derivation,
    Dimension,
    Filter,
}

impl ComponentKind {
    /// Plural field name used in metric definitions.
    pub fn section(&self) -> &'static str {
        match self {
            ComponentKind::Measure => "measures",
            ComponentKind::Derivation => "derivations",
            ComponentKind::Dimension => "dimensions",
            ComponentKind::Filter => "filters",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComponentKind::Measure => "measure",
            ComponentKind::Derivation => "derivation",
            ComponentKind::Dimension => "dimension",
            ComponentKind::Filter => "filter",
        })
    }
}

/// Every failure the compiler, binder, cache and execution engine can report.
///
/// `Clone` so one failure can be handed to every waiter on a shared
/// in-flight computation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    /// Malformed metric or variant input.
    #[error("validation error at {path}: {message}")]
    Validation { path: ComponentPath, message: String },

    /// A source or combine reference names no metric in the catalog.
    #[error("unknown metric '{metric_id}'{} at {path}", version.map(|v| format!(" (version {})", v)).unwrap_or_default())]
    UnknownMetric {
        path: ComponentPath,
        metric_id: String,
        version: Option<u32>,
    },

    /// A column has no table binding while the metric spans several tables.
    #[error("ambiguous table reference at {path}: column '{column}' must name one of [{}]", tables.join(", "))]
    AmbiguousTableReference {
        path: ComponentPath,
        column: String,
        tables: Vec<String>,
    },

    /// `overrides.replace` names a component that is not (or no longer) present.
    #[error("replace target not found at {path}: no {kind} named '{name}'")]
    ReplaceTargetNotFound {
        path: ComponentPath,
        kind: ComponentKind,
        name: String,
    },

    /// Two components resolve to the same name.
    #[error("duplicate component name at {path}: {kind} '{name}' already exists")]
    DuplicateComponentName {
        path: ComponentPath,
        kind: ComponentKind,
        name: String,
    },

    /// A derivation refers to a measure declared after it.
    #[error("derivation order error at {path}: '{derivation}' references '{reference}' before it is defined")]
    DerivationOrderError {
        path: ComponentPath,
        derivation: String,
        reference: String,
    },

    /// Combine references loop back on themselves or nest too deeply.
    #[error("variant cycle at {path}: {} ({reason})", chain.join(" -> "))]
    VariantCycleError {
        path: ComponentPath,
        chain: Vec<String>,
        reason: String,
    },

    /// More than one shortest join path reaches a table and none is pinned.
    #[error("ambiguous join path to '{table}': {} candidates [{}]; pin one in pinned_paths", paths.len(), paths.iter().map(|p| p.join(" -> ")).collect::<Vec<_>>().join("; "))]
    AmbiguousJoinPath {
        path: ComponentPath,
        table: String,
        paths: Vec<Vec<String>>,
    },

    /// A referenced table cannot be reached through declared joins.
    #[error("no join path from '{from}' to '{to}' (at {path})")]
    NoJoinPath {
        path: ComponentPath,
        from: String,
        to: String,
    },

    /// The target dialect has no mapping for a canonical function.
    #[error("dialect '{dialect}' does not support {function} (at {path})")]
    DialectUnsupportedFunction {
        path: ComponentPath,
        function: String,
        dialect: String,
    },

    #[error("missing parameter '{name}'")]
    MissingParameter { name: String },

    #[error("parameter '{name}' expects {expected}, got {value}")]
    ParameterTypeError {
        name: String,
        expected: ParamType,
        value: String,
    },

    #[error("query on '{data_source}' exceeded the {timeout_ms} ms timeout")]
    ExecutionTimeout { data_source: String, timeout_ms: u64 },

    #[error("query on '{data_source}' returned more than {limit} rows")]
    RowLimitExceeded { data_source: String, limit: usize },

    /// Connector failure.
    #[error("execution failed on '{data_source}': {message}")]
    ExecutionError {
        data_source: String,
        message: String,
        transient: bool,
    },
}

impl MetricError {
    pub fn validation(path: ComponentPath, message: impl Into<String>) -> Self {
        MetricError::Validation {
            path,
            message: message.into(),
        }
    }

    /// Stable error-kind name, reported in `ExecutionResult::errors`.
    pub fn kind(&self) -> &'static str {
        match self {
            MetricError::Validation { .. } => "ValidationError",
            MetricError::UnknownMetric { .. } => "UnknownMetric",
            MetricError::AmbiguousTableReference { .. } => "AmbiguousTableReference",
            MetricError::ReplaceTargetNotFound { .. } => "ReplaceTargetNotFound",
            MetricError::DuplicateComponentName { .. } => "DuplicateComponentName",
            MetricError::DerivationOrderError { .. } => "DerivationOrderError",
            MetricError::VariantCycleError { .. } => "VariantCycleError",
            MetricError::AmbiguousJoinPath { .. } => "AmbiguousJoinPath",
            MetricError::NoJoinPath { .. } => "NoJoinPath",
            MetricError::DialectUnsupportedFunction { .. } => "DialectUnsupportedFunction",
            MetricError::MissingParameter { .. } => "MissingParameter",
            MetricError::ParameterTypeError { .. } => "ParameterTypeError",
            MetricError::ExecutionTimeout { .. } => "ExecutionTimeout",
            MetricError::RowLimitExceeded { .. } => "RowLimitExceeded",
            MetricError::ExecutionError { .. } => "ExecutionError",
        }
    }

    /// Component path for compile-time errors.
    pub fn path(&self) -> Option<&ComponentPath> {
        match self {
            MetricError::Validation { path, .. }
            | MetricError::UnknownMetric { path, .. }
            | MetricError::AmbiguousTableReference { path, .. }
            | MetricError::ReplaceTargetNotFound { path, .. }
            | MetricError::DuplicateComponentName { path, .. }
            | MetricError::DerivationOrderError { path, .. }
            | MetricError::VariantCycleError { path, .. }
            | MetricError::AmbiguousJoinPath { path, .. }
            | MetricError::NoJoinPath { path, .. }
            | MetricError::DialectUnsupportedFunction { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Whether retrying the same request could succeed.
    ///
    /// Only transient connector failures qualify; compilation errors would
    /// reproduce.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            MetricError::ExecutionError {
                transient: true,
                ..
            }
        )
    }

    /// Whether this is a compile-time (deterministic) error.
    pub fn is_compile_error(&self) -> bool {
        self.path().is_some()
            || matches!(
                self,
                MetricError::MissingParameter { .. } | MetricError::ParameterTypeError { .. }
            )
    }
}

/// Serializable summary of a [`MetricError`], for JSON responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ComponentPath>,
}

impl From<&MetricError> for ErrorReport {
    fn from(err: &MetricError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            path: err.path().cloned(),
        }
    }
}
