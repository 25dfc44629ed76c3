//! Expression syntax used inside stack program strings
//!
//! ```text
//! ${config.teamName}                   configuration option
//! ${ref.hub.vnetId}                    output of a referenced unit
//! ${ref.hub.networkConfig.subnets[0]}  ... with a path into it
//! ${workspace.workspaceId}             output of a node
//! ${ref.hub.location ?? "westeurope"}  fallback for unset/null/empty
//! ```
//!
//! A string that is exactly one `${...}` keeps the JSON type of the value;
//! anything else is string interpolation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Result, StackError};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder regex is valid"));

/// Where an expression reads from
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Config {
        key: String,
    },
    Reference {
        alias: String,
        key: String,
        path: Option<String>,
    },
    Node {
        node: String,
        output: String,
        path: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub source: Source,
    pub fallback: Option<Value>,
}

/// Piece of a string template
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Literal(String),
    Expr(Expr),
}

/// Parsed string: plain text, a single expression, or an interpolation
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Literal(String),
    Single(Expr),
    Interpolated(Vec<Piece>),
}

fn invalid(expr: &str, reason: impl Into<String>) -> StackError {
    StackError::InvalidExpression {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

/// Split `name.rest` / `name[0].rest` into the leading name and the path after it
fn split_head<'a>(raw: &'a str, full: &str, what: &str) -> Result<(&'a str, Option<&'a str>)> {
    let end = raw.find(['.', '[']).unwrap_or(raw.len());
    let head = &raw[..end];
    if head.is_empty() {
        return Err(invalid(full, format!("missing {what}")));
    }
    let rest = raw[end..].strip_prefix('.').unwrap_or(&raw[end..]);
    Ok((head, (!rest.is_empty()).then_some(rest)))
}

fn parse_fallback(raw: &str) -> Value {
    let raw = raw.trim();
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl Expr {
    /// Parse the body of one `${...}`
    pub fn parse(body: &str) -> Result<Self> {
        let (target, fallback) = match body.split_once("??") {
            Some((target, fallback)) => (target.trim(), Some(parse_fallback(fallback))),
            None => (body.trim(), None),
        };

        if target.is_empty() {
            return Err(invalid(body, "empty expression"));
        }
        if target.contains(char::is_whitespace) {
            return Err(invalid(body, "unexpected whitespace"));
        }

        let (scope, rest) = split_head(target, body, "name")?;
        let source = match scope {
            "config" => {
                let key = rest.ok_or_else(|| invalid(body, "missing config key"))?;
                Source::Config {
                    key: key.to_string(),
                }
            }
            "ref" => {
                let rest = rest.ok_or_else(|| invalid(body, "missing reference alias"))?;
                let (alias, rest) = split_head(rest, body, "reference alias")?;
                let rest = rest.ok_or_else(|| invalid(body, "missing output key"))?;
                let (key, path) = split_head(rest, body, "output key")?;
                Source::Reference {
                    alias: alias.to_string(),
                    key: key.to_string(),
                    path: path.map(str::to_string),
                }
            }
            node => {
                let rest = rest.ok_or_else(|| invalid(body, "expected NODE.OUTPUT"))?;
                let (output, path) = split_head(rest, body, "output name")?;
                Source::Node {
                    node: node.to_string(),
                    output: output.to_string(),
                    path: path.map(str::to_string),
                }
            }
        };

        if let Source::Reference { path: Some(path), .. } | Source::Node { path: Some(path), .. } =
            &source
        {
            crate::util::jsonpath::parse(path).map_err(|_| invalid(body, "malformed path"))?;
        }

        Ok(Self { source, fallback })
    }
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(raw) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                pieces.push(Piece::Literal(raw[last..whole.start()].to_string()));
            }
            pieces.push(Piece::Expr(Expr::parse(body.as_str())?));
            last = whole.end();
        }

        if pieces.is_empty() {
            if raw.contains("${") {
                return Err(invalid(raw, "unclosed '${'"));
            }
            return Ok(Self::Literal(raw.to_string()));
        }
        if last < raw.len() {
            pieces.push(Piece::Literal(raw[last..].to_string()));
        }

        if pieces.len() == 1 {
            if let Some(Piece::Expr(expr)) = pieces.pop() {
                return Ok(Self::Single(expr));
            }
        }
        Ok(Self::Interpolated(pieces))
    }

    /// Expressions in order of appearance
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Self::Literal(_) => Vec::new(),
            Self::Single(expr) => vec![expr],
            Self::Interpolated(pieces) => pieces
                .iter()
                .filter_map(|p| match p {
                    Piece::Expr(e) => Some(e),
                    Piece::Literal(_) => None,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_sources() {
        assert_eq!(
            Expr::parse("config.azure-native:subscriptionId").unwrap().source,
            Source::Config {
                key: "azure-native:subscriptionId".into()
            }
        );
        assert_eq!(
            Expr::parse("ref.hub.networkConfig.subnets[0]").unwrap().source,
            Source::Reference {
                alias: "hub".into(),
                key: "networkConfig".into(),
                path: Some("subnets[0]".into()),
            }
        );
        assert_eq!(
            Expr::parse("network.subnets[1].id").unwrap().source,
            Source::Node {
                node: "network".into(),
                output: "subnets".into(),
                path: Some("[1].id".into()),
            }
        );
    }

    #[test]
    fn parses_fallbacks() {
        let expr = Expr::parse(r#"ref.hub.location ?? "westeurope""#).unwrap();
        assert_eq!(expr.fallback, Some(json!("westeurope")));
        assert_eq!(Expr::parse("config.replicas ?? 3").unwrap().fallback, Some(json!(3)));
        assert_eq!(Expr::parse("config.env ?? dev").unwrap().fallback, Some(json!("dev")));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "config", "ref.hub", "workspace", "ref..x", "a.b c", "network.x[y]"] {
            assert!(Expr::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn classifies_templates() {
        assert_eq!(Template::parse("plain").unwrap(), Template::Literal("plain".into()));
        assert!(matches!(
            Template::parse("${workspace.workspaceId}").unwrap(),
            Template::Single(_)
        ));

        let interpolated = Template::parse("rg-${config.teamName}-${config.environment}").unwrap();
        assert_eq!(interpolated.exprs().len(), 2);
        match interpolated {
            Template::Interpolated(pieces) => {
                assert_eq!(pieces[0], Piece::Literal("rg-".into()));
                assert_eq!(pieces[2], Piece::Literal("-".into()));
            }
            other => panic!("unexpected template: {other:?}"),
        }

        assert!(Template::parse("broken ${config.x").is_err());
    }
}
