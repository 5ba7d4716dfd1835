use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{Error, Result};

/// A typed value about to be rendered into a statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    Float(f64),
    Text(String),
    Time(String),
}

impl SqlValue {
    /// Map a JSON row value. Nested arrays and objects have no column type to
    /// land in, so they are refused.
    pub fn from_json(value: &Value, field: &str) -> Result<Self> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Decimal(Decimal::from(u))
                } else {
                    Self::Float(
                        n.as_f64()
                            .ok_or_else(|| Error::type_mismatch(field, "number", n))?,
                    )
                }
            }
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => {
                return Err(Error::type_mismatch(field, "scalar value", value))
            }
        })
    }
}

/// Wrap a table or column name in double quotes, doubling any embedded ones.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_text(text: &str) -> Result<String> {
    if text.contains('\0') {
        return Err(Error::type_mismatch("literal", "text without NUL bytes", text));
    }
    Ok(format!("'{}'", text.replace('\'', "''")))
}

/// Render a value as a SQL literal.
///
/// Assumes `standard_conforming_strings` is on (the PostgreSQL default), so
/// backslashes inside a literal carry no special meaning.
pub fn quote_literal(value: &SqlValue) -> Result<String> {
    Ok(match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Boolean(true) => "TRUE".to_string(),
        SqlValue::Boolean(false) => "FALSE".to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Float(f) => {
            if !f.is_finite() {
                return Err(Error::type_mismatch("literal", "finite number", f));
            }
            f.to_string()
        }
        SqlValue::Text(s) | SqlValue::Time(s) => quote_text(s)?,
    })
}

/// Strict integer parse of a JSON value: either a JSON integer or a string
/// consisting of nothing but an (optionally signed) integer.
pub fn require_integer(value: &Value, field_label: &str) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::type_mismatch(field_label, "integer", n)),
        Value::String(s) => parse_integer(s, field_label),
        other => Err(Error::type_mismatch(field_label, "integer", other)),
    }
}

pub fn parse_integer(text: &str, field_label: &str) -> Result<i64> {
    text.parse::<i64>()
        .map_err(|_| Error::type_mismatch(field_label, "integer", text))
}

/// Last line of defence before a statement reaches the backend: refuse anything
/// that could smuggle in a second statement or hide text in a comment.
pub fn reject_unsafe(statement: &str) -> Result<()> {
    let mut chars = statement.chars().peekable();
    let mut quote: Option<char> = None;
    let mut terminated = false;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                if chars.peek() == Some(&q) {
                    chars.next();
                } else {
                    quote = None;
                }
            }
            continue;
        }

        if terminated && !c.is_whitespace() {
            return Err(Error::rejected(
                "more than one statement in a single execution",
            ));
        }

        match c {
            '\'' | '"' => quote = Some(c),
            ';' => terminated = true,
            '-' if chars.peek() == Some(&'-') => {
                return Err(Error::rejected("line comment outside of a literal"))
            }
            '/' if chars.peek() == Some(&'*') => {
                return Err(Error::rejected("block comment outside of a literal"))
            }
            _ => {}
        }
    }

    match quote {
        Some('"') => Err(Error::rejected("unterminated quoted identifier")),
        Some(_) => Err(Error::rejected("unterminated string literal")),
        None => Ok(()),
    }
}
