//! Dialect-neutral intermediate expression tree.
//!
//! Every column carries its table binding, every function is canonical,
//! and request values only ever appear as named `Param` leaves.

use crate::model::types::{AggregationKind, DataType, ScalarValue, TimeUnit};
use serde::Serialize;
use std::fmt;

/// Canonical scalar functions. Dialect spelling happens in the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalFunction {
    Coalesce,
    Nullif,
    Lower,
    Upper,
    Trim,
    Length,
    Abs,
    Round,
    Floor,
    Ceil,
    DateTrunc(TimeUnit),
    Cast(DataType),
}

impl CanonicalFunction {
    /// Canonical SQL name.
    pub fn sql_name(&self) -> &'static str {
        match self {
            CanonicalFunction::Coalesce => "COALESCE",
            CanonicalFunction::Nullif => "NULLIF",
            CanonicalFunction::Lower => "LOWER",
            CanonicalFunction::Upper => "UPPER",
            CanonicalFunction::Trim => "TRIM",
            CanonicalFunction::Length => "LENGTH",
            CanonicalFunction::Abs => "ABS",
            CanonicalFunction::Round => "ROUND",
            CanonicalFunction::Floor => "FLOOR",
            CanonicalFunction::Ceil => "CEIL",
            CanonicalFunction::DateTrunc(_) => "DATE_TRUNC",
            CanonicalFunction::Cast(_) => "CAST",
        }
    }
}

impl fmt::Display for CanonicalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IrBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    And,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum IrExpr {
    Column {
        table: String,
        column: String,
    },
    Literal {
        value: ScalarValue,
    },
    /// Named bind parameter.
    Param {
        name: String,
    },
    Call {
        function: CanonicalFunction,
        args: Vec<IrExpr>,
    },
    /// `arg` is `None` only for `COUNT(*)`.
    Aggregate {
        kind: AggregationKind,
        arg: Option<Box<IrExpr>>,
        distinct: bool,
        percentile: Option<f64>,
    },
    Binary {
        op: IrBinaryOp,
        left: Box<IrExpr>,
        right: Box<IrExpr>,
    },
    Not {
        expr: Box<IrExpr>,
    },
    In {
        expr: Box<IrExpr>,
        values: Vec<IrExpr>,
        negated: bool,
    },
    Between {
        expr: Box<IrExpr>,
        low: Box<IrExpr>,
        high: Box<IrExpr>,
    },
    IsNull {
        expr: Box<IrExpr>,
        negated: bool,
    },
    /// Searched CASE. Branch order is evaluation order.
    Case {
        branches: Vec<(IrExpr, IrExpr)>,
        otherwise: Box<IrExpr>,
    },
    /// String concatenation with `delimiter` between consecutive parts.
    Concat {
        parts: Vec<IrExpr>,
        delimiter: String,
    },
}

impl IrExpr {
    pub fn column(table: &str, column: &str) -> Self {
        IrExpr::Column {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    pub fn param(name: &str) -> Self {
        IrExpr::Param {
            name: name.to_string(),
        }
    }

    pub fn binary(op: IrBinaryOp, left: IrExpr, right: IrExpr) -> Self {
        IrExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Direct children, in render order.
    pub fn children(&self) -> Vec<&IrExpr> {
        match self {
            IrExpr::Column { .. } | IrExpr::Literal { .. } | IrExpr::Param { .. } => Vec::new(),
            IrExpr::Call { args, .. } => args.iter().collect(),
            IrExpr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
            IrExpr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            IrExpr::Not { expr } | IrExpr::IsNull { expr, .. } => vec![expr.as_ref()],
            IrExpr::In { expr, values, .. } => {
                std::iter::once(expr.as_ref()).chain(values.iter()).collect()
            }
            IrExpr::Between { expr, low, high } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
            IrExpr::Case {
                branches,
                otherwise,
            } => branches
                .iter()
                .flat_map(|(when, then)| [when, then])
                .chain(std::iter::once(otherwise.as_ref()))
                .collect(),
            IrExpr::Concat { parts, .. } => parts.iter().collect(),
        }
    }

    /// Parameter names in first-appearance order, deduplicated.
    pub fn params(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_params(&mut out);
        out
    }

    fn collect_params<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let IrExpr::Param { name } = self {
            if !out.contains(&name.as_str()) {
                out.push(name);
            }
            return;
        }
        for child in self.children() {
            child.collect_params(out);
        }
    }

    /// Table keys referenced by columns, in first-appearance order.
    pub fn tables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_tables(&mut out);
        out
    }

    fn collect_tables<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let IrExpr::Column { table, .. } = self {
            if !out.contains(&table.as_str()) {
                out.push(table);
            }
            return;
        }
        for child in self.children() {
            child.collect_tables(out);
        }
    }

    /// Whether an aggregate appears anywhere in the tree.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, IrExpr::Aggregate { .. })
            || self.children().into_iter().any(IrExpr::is_aggregate)
    }
}
