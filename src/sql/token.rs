//! SQL Tokens - the atomic units of SQL output.
//!
//! Tokens are dialect-agnostic representations that serialize
//! to dialect-specific strings. Bind parameters are tokens too, so the
//! placeholder order is decided in the same pass that produces the text.

use super::dialect::{Dialect, PlaceholderStyle, SqlDialect};
use crate::model::types::DataType;

/// SQL Token - every element the metric compiler can emit.
///
/// Adding a new variant here will cause compile errors everywhere
/// it needs to be handled (exhaustive matching).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === Keywords ===
    Select,
    From,
    Where,
    And,
    Or,
    Not,
    As,
    On,
    Join,
    Inner,
    Left,
    Right,
    Full,
    Outer,
    GroupBy,
    OrderBy,
    Asc,
    Case,
    When,
    Then,
    Else,
    End,
    In,
    Between,
    Like,
    IsNull,
    IsNotNull,
    Distinct,
    Cast,
    WithinGroup,

    // === Punctuation ===
    Comma,
    Dot,
    Star,
    LParen,
    RParen,

    // === Operators ===
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Plus,
    Minus,
    Mul,
    Div,
    Concat,

    // === Whitespace / Formatting ===
    Space,
    Newline,
    Indent(usize),

    // === Dynamic Content ===
    /// Simple identifier (table, column, alias)
    Ident(String),
    /// Qualified identifier: schema.table or just table
    QualifiedIdent {
        schema: Option<String>,
        name: String,
    },
    /// Integer literal
    LitInt(i64),
    /// Float literal
    LitFloat(f64),
    /// String literal
    LitString(String),
    /// Boolean literal
    LitBool(bool),
    /// NULL literal
    LitNull,

    /// Function name, remapped per dialect.
    FunctionName(String),

    /// Bare keyword argument such as a date part (`MONTH`).
    ///
    /// Only `'static` strings are accepted, so nothing read from a metric
    /// definition or a request can reach the output unescaped.
    Keyword(&'static str),

    /// Data type in a CAST.
    DataType(DataType),

    /// Named bind parameter, rendered in the dialect's placeholder style.
    Param(String),
}

/// Placeholder bookkeeping for one rendered statement.
///
/// Records the parameter name behind every placeholder slot so the binder
/// can line values up with the SQL text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placeholders {
    names: Vec<String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&mut self, style: PlaceholderStyle, name: &str) -> String {
        match style {
            PlaceholderStyle::Numbered => {
                let index = match self.names.iter().position(|n| n == name) {
                    Some(index) => index,
                    None => {
                        self.names.push(name.to_string());
                        self.names.len() - 1
                    }
                };
                format!("${}", index + 1)
            }
            PlaceholderStyle::Positional => {
                self.names.push(name.to_string());
                "?".into()
            }
            PlaceholderStyle::Named => {
                if !self.names.iter().any(|n| n == name) {
                    self.names.push(name.to_string());
                }
                format!("@{}", name)
            }
        }
    }

    /// Parameter names in slot order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn into_names(self) -> Vec<String> {
        self.names
    }
}

impl Token {
    /// Serialize this token to a string for the given dialect.
    pub fn serialize(&self, dialect: Dialect, placeholders: &mut Placeholders) -> String {
        match self {
            // Keywords
            Token::Select => "SELECT".into(),
            Token::From => "FROM".into(),
            Token::Where => "WHERE".into(),
            Token::And => "AND".into(),
            Token::Or => "OR".into(),
            Token::Not => "NOT".into(),
            Token::As => "AS".into(),
            Token::On => "ON".into(),
            Token::Join => "JOIN".into(),
            Token::Inner => "INNER".into(),
            Token::Left => "LEFT".into(),
            Token::Right => "RIGHT".into(),
            Token::Full => "FULL".into(),
            Token::Outer => "OUTER".into(),
            Token::GroupBy => "GROUP BY".into(),
            Token::OrderBy => "ORDER BY".into(),
            Token::Asc => "ASC".into(),
            Token::Case => "CASE".into(),
            Token::When => "WHEN".into(),
            Token::Then => "THEN".into(),
            Token::Else => "ELSE".into(),
            Token::End => "END".into(),
            Token::In => "IN".into(),
            Token::Between => "BETWEEN".into(),
            Token::Like => "LIKE".into(),
            Token::IsNull => "IS NULL".into(),
            Token::IsNotNull => "IS NOT NULL".into(),
            Token::Distinct => "DISTINCT".into(),
            Token::Cast => "CAST".into(),
            Token::WithinGroup => "WITHIN GROUP".into(),

            // Punctuation
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Star => "*".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),

            // Operators
            Token::Eq => "=".into(),
            Token::Ne => "<>".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Lte => "<=".into(),
            Token::Gte => ">=".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Mul => "*".into(),
            Token::Div => "/".into(),
            Token::Concat => dialect.concat_operator().into(),

            // Whitespace
            Token::Space => " ".into(),
            Token::Newline => "\n".into(),
            Token::Indent(n) => "  ".repeat(*n),

            // Dynamic - dialect-specific formatting
            Token::Ident(name) => dialect.quote_identifier(name),
            Token::QualifiedIdent { schema, name } => match schema {
                Some(s) => format!(
                    "{}.{}",
                    dialect.quote_identifier(s),
                    dialect.quote_identifier(name)
                ),
                None => dialect.quote_identifier(name),
            },
            Token::LitInt(n) => n.to_string(),
            Token::LitFloat(f) => {
                // Non-finite floats have no SQL literal.
                if !f.is_finite() {
                    return dialect.format_null().into();
                }
                let mut buffer = ryu::Buffer::new();
                buffer.format(*f).to_string()
            }
            Token::LitString(s) => dialect.quote_string(s),
            Token::LitBool(b) => dialect.format_bool(*b).into(),
            Token::LitNull => dialect.format_null().into(),

            Token::FunctionName(name) => match dialect.remap_function(name) {
                Some(remapped) => remapped.to_uppercase(),
                None => name.to_uppercase(),
            },
            Token::Keyword(word) => (*word).into(),
            Token::DataType(dt) => dialect.emit_data_type(dt),
            Token::Param(name) => placeholders.bind(dialect.placeholder_style(), name),
        }
    }
}

/// SQL text plus the parameter name behind each placeholder slot.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub placeholders: Vec<String>,
}

/// A stream of tokens that can be serialized to SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    /// Create an empty token stream.
    pub fn new() -> Self {
        Self { tokens: vec![] }
    }

    /// Push a single token.
    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    /// Extend with multiple tokens.
    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) -> &mut Self {
        self.tokens.extend(tokens);
        self
    }

    /// Append another token stream.
    pub fn append(&mut self, other: &TokenStream) -> &mut Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Serialize all tokens to SQL, recording placeholder order.
    pub fn render(&self, dialect: Dialect) -> RenderedSql {
        let mut placeholders = Placeholders::new();
        let sql = self
            .tokens
            .iter()
            .map(|t| t.serialize(dialect, &mut placeholders))
            .collect();
        RenderedSql {
            sql,
            placeholders: placeholders.into_names(),
        }
    }

    /// Serialize all tokens to a SQL string.
    pub fn serialize(&self, dialect: Dialect) -> String {
        self.render(dialect).sql
    }

    // Convenience methods for common tokens
    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }
    pub fn newline(&mut self) -> &mut Self {
        self.push(Token::Newline)
    }
    pub fn indent(&mut self, n: usize) -> &mut Self {
        self.push(Token::Indent(n))
    }
    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Comma)
    }
    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::LParen)
    }
    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::RParen)
    }
}
