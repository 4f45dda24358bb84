//! Declarative path-based field extraction.
//!
//! Templates address payload fields with small path expressions such as
//! `$.applicant.name` or `$.items[0].status`. The interpreter walks a
//! parsed segment list over a `serde_json::Value`; a missing path is an
//! absent field, never an error.

use cardtrack_core::{Result, TrackerError};
use serde_json::Value;

/// One step of a path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed path expression: an optional `$` root followed by
/// dot-separated keys with optional `[index]` accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    segments: Vec<PathSegment>,
}

impl PathExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let body = if trimmed == "$" {
            ""
        } else {
            trimmed.strip_prefix("$.").unwrap_or(trimmed)
        };

        let mut segments = Vec::new();
        for part in body.split('.').filter(|p| !p.is_empty()) {
            let mut rest = part;
            // Leading key portion before any [index]
            let key_end = rest.find('[').unwrap_or(rest.len());
            let key = &rest[..key_end];
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            rest = &rest[key_end..];

            while let Some(close) = rest.find(']') {
                if !rest.starts_with('[') {
                    return Err(malformed(expr));
                }
                let index: usize = rest[1..close].parse().map_err(|_| malformed(expr))?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];
            }
            if !rest.is_empty() {
                return Err(malformed(expr));
            }
        }

        if segments.is_empty() {
            return Err(malformed(expr));
        }
        Ok(Self { segments })
    }

    /// Walk the expression against a value. Returns `None` whenever a
    /// segment does not apply.
    pub fn evaluate<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match segment {
                PathSegment::Key(key) => current.get(key.as_str())?,
                PathSegment::Index(index) => current.get(*index)?,
            };
        }
        Some(current)
    }
}

fn malformed(expr: &str) -> TrackerError {
    TrackerError::Template {
        message: format!("Malformed path expression: '{expr}'"),
    }
}

/// Render a scalar JSON value as a canonical field string. Objects,
/// arrays and nulls yield no field.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluates_nested_keys() {
        let value = json!({"applicant": {"name": "Priya", "mobile": "9876543210"}});
        let expr = PathExpr::parse("$.applicant.name").unwrap();
        assert_eq!(expr.evaluate(&value), Some(&json!("Priya")));
    }

    #[test]
    fn evaluates_array_indices() {
        let value = json!({"items": [{"status": "queued"}, {"status": "done"}]});
        let expr = PathExpr::parse("$.items[1].status").unwrap();
        assert_eq!(expr.evaluate(&value), Some(&json!("done")));
    }

    #[test]
    fn missing_path_is_absent_not_error() {
        let value = json!({"a": 1});
        let expr = PathExpr::parse("$.b.c").unwrap();
        assert_eq!(expr.evaluate(&value), None);
    }

    #[test]
    fn accepts_dollarless_paths() {
        let value = json!({"status": "approved"});
        let expr = PathExpr::parse("status").unwrap();
        assert_eq!(expr.evaluate(&value), Some(&json!("approved")));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(PathExpr::parse("").is_err());
        assert!(PathExpr::parse("$.items[x]").is_err());
        assert!(PathExpr::parse("$.items[0").is_err());
    }

    #[test]
    fn scalars_render_to_strings() {
        assert_eq!(value_to_string(&json!("x")), Some("x".to_string()));
        assert_eq!(value_to_string(&json!(42)), Some("42".to_string()));
        assert_eq!(value_to_string(&json!(true)), Some("true".to_string()));
        assert_eq!(value_to_string(&json!(null)), None);
        assert_eq!(value_to_string(&json!([1])), None);
    }
}
