//! Path projection on JSON values - minimal subset
//!
//! Supports:
//! - `a.b.c` (dot notation, optional `$.` prefix)
//! - `subnets[0].id` (array index)
//! - `subnets.0.id` (numeric segment as index)
//!
//! Used for `Deferred<Value>::field` and for `${node.output.path}`
//! expressions in stack programs. Filters, wildcards and slices are rejected.

use serde_json::Value;

use crate::error::StackError;

/// A parsed path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

fn unsupported(path: &str, reason: &str) -> StackError {
    StackError::InvalidExpression {
        expr: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a path string into segments
pub fn parse(path: &str) -> Result<Vec<Segment>, StackError> {
    let trimmed = match path.strip_prefix("$.") {
        Some(stripped) => stripped,
        None if path == "$" => return Ok(vec![]),
        None => path,
    };

    if trimmed.is_empty() {
        return Ok(vec![]);
    }

    let mut segments = Vec::new();

    for part in trimmed.split('.') {
        if part.is_empty() {
            return Err(unsupported(path, "empty path segment"));
        }

        if let Some(bracket) = part.find('[') {
            let field = &part[..bracket];
            if !field.is_empty() {
                segments.push(Segment::Field(field.to_string()));
            }

            // One or more [n] suffixes: matrix[0][1]
            let mut rest = &part[bracket..];
            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| unsupported(path, "unclosed '['"))?;
                if !rest.starts_with('[') {
                    return Err(unsupported(path, "unexpected text after ']'"));
                }
                let index: usize = rest[1..close]
                    .parse()
                    .map_err(|_| unsupported(path, "array index must be a number"))?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
            }
        } else if let Ok(index) = part.parse::<usize>() {
            segments.push(Segment::Index(index));
        } else {
            segments.push(Segment::Field(part.to_string()));
        }
    }

    Ok(segments)
}

/// Apply parsed segments; `None` when the path does not exist
pub fn apply(value: &Value, segments: &[Segment]) -> Option<Value> {
    let mut current = value;

    for segment in segments {
        current = match segment {
            Segment::Field(name) => current.get(name)?,
            Segment::Index(idx) => current.get(*idx)?,
        };
    }

    Some(current.clone())
}

/// Parse and apply in one step
pub fn resolve(value: &Value, path: &str) -> Result<Option<Value>, StackError> {
    let segments = parse(path)?;
    Ok(apply(value, &segments))
}
