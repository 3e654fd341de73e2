//! Display formatting for result values.
//!
//! Formatting runs on result rows after execution and never reaches SQL.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How to render one column's values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Format {
    /// `$1,234.50`
    Currency {
        #[serde(default = "default_currency_symbol")]
        symbol: String,
        #[serde(default = "default_currency_decimals")]
        decimals: usize,
    },
    /// Fraction rendered as a percentage: `0.125` -> `12.5%`.
    Percent {
        #[serde(default = "default_percent_decimals")]
        decimals: usize,
    },
    Number {
        #[serde(default)]
        decimals: usize,
        #[serde(default = "default_thousands")]
        thousands: bool,
    },
    /// String template with a `{value}` slot.
    Template { template: String },
}

fn default_currency_symbol() -> String {
    "$".to_string()
}

fn default_currency_decimals() -> usize {
    2
}

fn default_percent_decimals() -> usize {
    1
}

fn default_thousands() -> bool {
    true
}

/// A metric-level formatting rule targeting one output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattingRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(flatten)]
    pub format: Format,
}

impl Format {
    /// Format a single value. Nulls and values of the wrong shape pass through.
    pub fn apply(&self, value: &Value) -> Value {
        match self {
            Format::Template { template } => match value {
                Value::Null => Value::Null,
                Value::String(s) => Value::String(template.replace("{value}", s)),
                other => Value::String(template.replace("{value}", &other.to_string())),
            },
            _ => match value.as_f64() {
                Some(n) => Value::String(self.format_number(n)),
                None => value.clone(),
            },
        }
    }

    fn format_number(&self, n: f64) -> String {
        match self {
            Format::Currency { symbol, decimals } => {
                let sign = if n < 0.0 { "-" } else { "" };
                format!("{}{}{}", sign, symbol, group_thousands(n.abs(), *decimals))
            }
            Format::Percent { decimals } => format!("{:.*}%", *decimals, n * 100.0),
            Format::Number {
                decimals,
                thousands,
            } => {
                if *thousands {
                    let sign = if n < 0.0 { "-" } else { "" };
                    format!("{}{}", sign, group_thousands(n.abs(), *decimals))
                } else {
                    format!("{:.*}", *decimals, n)
                }
            }
            Format::Template { template } => template.replace("{value}", &n.to_string()),
        }
    }
}

fn group_thousands(n: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, n);
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(f) => format!("{}.{}", grouped, f),
        None => grouped,
    }
}
