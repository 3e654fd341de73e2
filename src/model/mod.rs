//! Semantic model: metrics, variants, expressions and formatting.

pub mod expression;
pub mod format;
pub mod metric;
pub mod types;
pub mod variant;

pub use expression::{
    ArithmeticOp, CombineSpec, Conditional, ExprNode, Expression, FunctionCall, FunctionName,
    Operand, Operator, Predicate, WhenClause,
};
pub use format::{Format, FormattingRule};
pub use metric::{
    DataModelRef, Derivation, Dimension, DimensionSource, Filter, JoinKey, JoinKind, JoinSpec,
    Measure, Metric, Parameter, PinnedPath, TableSpec,
};
pub use types::{AggregationKind, DataType, ParamType, ParamValue, ScalarValue, TimeUnit};
pub use variant::{
    CombineRef, ComponentNames, ComponentSelection, ComponentSet, MetricVariant,
    MetricVariantRequest, Overrides, SourceRef,
};

use regex::Regex;
use std::sync::LazyLock;

/// Component, parameter and variant names.
static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Whether `name` is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_PATTERN.is_match(name)
}
