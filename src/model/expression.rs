//! The constrained expression language used inside metric definitions.
//!
//! An expression is either a string shorthand (`"amount"`, `"sales.amount"`)
//! or a tagged node. Every node kind is a closed enum variant, and function
//! names come from a fixed allow-list, so nothing in a definition can reach
//! generated SQL verbatim.

use super::types::{DataType, ScalarValue, TimeUnit};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A metric-definition expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Expression {
    /// Column shorthand: `"column"` or `"table.column"`.
    Reference(String),
    Node(Box<ExprNode>),
}

/// Tagged expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExprNode {
    Column {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },
    Literal {
        value: ScalarValue,
    },
    Param {
        param: String,
    },
    /// Consumer-context attribute, bound like a parameter.
    Context {
        attribute: String,
    },
    Function(FunctionCall),
    Arithmetic {
        op: ArithmeticOp,
        left: Expression,
        right: Expression,
    },
    Combine(CombineSpec),
    Conditional(Conditional),
    /// Reference to an already-resolved measure (derivations only).
    Measure {
        measure: String,
    },
}

/// Scalar function call from the allow-list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: FunctionName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Expression>,
    /// Date part for `date_trunc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<TimeUnit>,
    /// Target type for `cast`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DataType>,
}

impl FunctionCall {
    pub fn new(name: FunctionName, args: Vec<Expression>) -> Self {
        Self {
            name,
            args,
            unit: None,
            to: None,
        }
    }

    pub fn date_trunc(unit: TimeUnit, arg: Expression) -> Self {
        Self {
            name: FunctionName::DateTrunc,
            args: vec![arg],
            unit: Some(unit),
            to: None,
        }
    }
}

/// Allow-listed scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionName {
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
    DateTrunc,
    Cast,
}

impl FunctionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionName::Coalesce => "coalesce",
            FunctionName::Nullif => "nullif",
            FunctionName::Lower => "lower",
            FunctionName::Upper => "upper",
            FunctionName::Trim => "trim",
            FunctionName::Length => "length",
            FunctionName::Abs => "abs",
            FunctionName::Round => "round",
            FunctionName::Floor => "floor",
            FunctionName::Ceil => "ceil",
            FunctionName::DateTrunc => "date_trunc",
            FunctionName::Cast => "cast",
        }
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            FunctionName::Coalesce => (1, usize::MAX),
            FunctionName::Nullif => (2, 2),
            FunctionName::Round => (1, 2),
            _ => (1, 1),
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// String concatenation of several columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombineSpec {
    pub columns: Vec<Expression>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_delimiter() -> String {
    " ".to_string()
}

/// Ordered when/then clauses with a mandatory fallback. First match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    pub when: Vec<WhenClause>,
    #[serde(rename = "else")]
    pub otherwise: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenClause {
    #[serde(flatten)]
    pub predicate: Predicate,
    pub then: Expression,
}

/// `field <operator> values`, with an optional scalar function applied to `field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: Expression,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Operand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_function: Option<FunctionCall>,
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Param { param: String },
    Context { context: String },
    Literal(ScalarValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
    Like,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Between => "between",
            Operator::Like => "like",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
        }
    }

    /// Accepted number of `values`, inclusive.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Operator::IsNull | Operator::IsNotNull => (0, 0),
            Operator::Between => (2, 2),
            Operator::In | Operator::NotIn => (1, usize::MAX),
            _ => (1, 1),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Deserialization
// =============================================================================

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ExpressionVisitor;

        impl<'de> Visitor<'de> for ExpressionVisitor {
            type Value = Expression;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a column reference string or an expression object")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Expression, E> {
                if v.trim().is_empty() {
                    return Err(E::custom("empty column reference"));
                }
                Ok(Expression::Reference(v.to_string()))
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Expression, A::Error> {
                let node = ExprNode::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(Expression::Node(Box::new(node)))
            }
        }

        deserializer.deserialize_any(ExpressionVisitor)
    }
}

// =============================================================================
// Construction and traversal
// =============================================================================

impl Expression {
    /// Column reference, optionally qualified.
    pub fn column(column: &str, table: Option<&str>) -> Self {
        Expression::Node(Box::new(ExprNode::Column {
            column: column.to_string(),
            table: table.map(str::to_string),
        }))
    }

    pub fn literal(value: ScalarValue) -> Self {
        Expression::Node(Box::new(ExprNode::Literal { value }))
    }

    pub fn param(name: &str) -> Self {
        Expression::Node(Box::new(ExprNode::Param {
            param: name.to_string(),
        }))
    }

    pub fn measure(name: &str) -> Self {
        Expression::Node(Box::new(ExprNode::Measure {
            measure: name.to_string(),
        }))
    }

    pub fn function(call: FunctionCall) -> Self {
        Expression::Node(Box::new(ExprNode::Function(call)))
    }

    pub fn arithmetic(op: ArithmeticOp, left: Expression, right: Expression) -> Self {
        Expression::Node(Box::new(ExprNode::Arithmetic { op, left, right }))
    }

    /// Split a column shorthand into `(table, column)`.
    ///
    /// Returns `None` for anything that is not `ident` or `ident.ident`.
    pub fn split_reference(reference: &str) -> Option<(Option<&str>, &str)> {
        let mut parts = reference.split('.');
        let first = parts.next()?.trim();
        match (parts.next(), parts.next()) {
            (None, _) if !first.is_empty() => Some((None, first)),
            (Some(second), None) if !first.is_empty() && !second.trim().is_empty() => {
                Some((Some(first), second.trim()))
            }
            _ => None,
        }
    }

    /// Direct sub-expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expression> {
        let Expression::Node(node) = self else {
            return Vec::new();
        };
        match node.as_ref() {
            ExprNode::Column { .. }
            | ExprNode::Literal { .. }
            | ExprNode::Param { .. }
            | ExprNode::Context { .. }
            | ExprNode::Measure { .. } => Vec::new(),
            ExprNode::Function(call) => call.args.iter().collect(),
            ExprNode::Arithmetic { left, right, .. } => vec![left, right],
            ExprNode::Combine(spec) => spec.columns.iter().collect(),
            ExprNode::Conditional(cond) => {
                let mut out = Vec::new();
                for clause in &cond.when {
                    out.extend(clause.predicate.expressions());
                    out.push(&clause.then);
                }
                out.push(&cond.otherwise);
                out
            }
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expression> {
        let Expression::Node(node) = self else {
            return Vec::new();
        };
        match node.as_mut() {
            ExprNode::Column { .. }
            | ExprNode::Literal { .. }
            | ExprNode::Param { .. }
            | ExprNode::Context { .. }
            | ExprNode::Measure { .. } => Vec::new(),
            ExprNode::Function(call) => call.args.iter_mut().collect(),
            ExprNode::Arithmetic { left, right, .. } => vec![left, right],
            ExprNode::Combine(spec) => spec.columns.iter_mut().collect(),
            ExprNode::Conditional(cond) => {
                let mut out = Vec::new();
                for clause in &mut cond.when {
                    out.extend(clause.predicate.expressions_mut());
                    out.push(&mut clause.then);
                }
                out.push(&mut cond.otherwise);
                out
            }
        }
    }

    /// Names of measures referenced anywhere in this expression.
    pub fn measure_refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_measure_refs(&mut out);
        out
    }

    fn collect_measure_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Expression::Node(node) = self {
            if let ExprNode::Measure { measure } = node.as_ref() {
                out.push(measure);
                return;
            }
        }
        for child in self.children() {
            child.collect_measure_refs(out);
        }
    }

    /// Prefix every measure reference with `<alias>.`.
    pub fn qualify_measure_refs(&mut self, alias: &str) {
        if let Expression::Node(node) = self {
            if let ExprNode::Measure { measure } = node.as_mut() {
                *measure = format!("{}.{}", alias, measure);
                return;
            }
        }
        for child in self.children_mut() {
            child.qualify_measure_refs(alias);
        }
    }

    /// Qualify every unqualified column with `table`.
    pub fn bind_default_table(&mut self, table: &str) {
        match self {
            Expression::Reference(reference) => {
                if let Some((None, column)) = Expression::split_reference(reference) {
                    *reference = format!("{}.{}", table, column);
                }
                return;
            }
            Expression::Node(node) => {
                if let ExprNode::Column { table: t, .. } = node.as_mut() {
                    if t.is_none() {
                        *t = Some(table.to_string());
                    }
                    return;
                }
            }
        }
        for child in self.children_mut() {
            child.bind_default_table(table);
        }
    }
}

impl Predicate {
    /// Expressions reachable from this predicate (field, then wrap args).
    pub fn expressions(&self) -> Vec<&Expression> {
        let mut out = vec![&self.field];
        if let Some(wrap) = &self.wrap_function {
            out.extend(wrap.args.iter());
        }
        out
    }

    fn expressions_mut(&mut self) -> Vec<&mut Expression> {
        let mut out = vec![&mut self.field];
        if let Some(wrap) = &mut self.wrap_function {
            out.extend(wrap.args.iter_mut());
        }
        out
    }

    pub fn bind_default_table(&mut self, table: &str) {
        for expr in self.expressions_mut() {
            expr.bind_default_table(table);
        }
    }
}

impl From<&str> for Expression {
    fn from(s: &str) -> Self {
        Expression::Reference(s.to_string())
    }
}
