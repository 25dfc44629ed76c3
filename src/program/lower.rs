//! Lowering: stack program → graph + exports
//!
//! Order matters only for structural checks:
//! 1. required configuration (all missing keys reported together)
//! 2. references resolved (a missing unit fails only the nodes using it)
//! 3. nodes declared, inputs lowered into deferreds
//! 4. exports registered
//! 5. graph built (unknown nodes, cycles)

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::expr::{Expr, Piece, Source, Template};
use super::{StackProgram, When};
use crate::config::StackConfig;
use crate::deferred::Deferred;
use crate::error::{Result, StackError};
use crate::export::ExportSet;
use crate::graph::{Graph, GraphBuilder};
use crate::provider::render;
use crate::reference::StackReference;
use crate::runtime::RunContext;

/// A lowered program, ready to run
#[derive(Debug)]
pub struct Plan {
    pub graph: Graph,
    pub exports: ExportSet,
}

struct Scope<'a> {
    config: &'a StackConfig,
    references: BTreeMap<String, StackReference>,
    builder: GraphBuilder,
}

impl Scope<'_> {
    fn lower_expr(&mut self, expr: &Expr) -> Result<Deferred<Value>> {
        let value = match &expr.source {
            Source::Config { key } => match (self.config.get(key), &expr.fallback) {
                (Some(value), _) => Deferred::of(value.to_json()),
                (None, Some(fallback)) => Deferred::of(fallback.clone()),
                (None, None) => {
                    return Err(StackError::MissingConfiguration {
                        keys: vec![key.clone()],
                    })
                }
            },
            Source::Reference { alias, key, path } => {
                let reference = self.references.get(alias).ok_or_else(|| {
                    StackError::InvalidExpression {
                        expr: format!("ref.{alias}.{key}"),
                        reason: format!("unknown reference '{alias}'"),
                    }
                })?;
                let output = match (&expr.fallback, path) {
                    // Fallback covers an unexported key only when it is the final value.
                    (Some(fallback), None) => reference.get_output_or(key, fallback.clone()),
                    _ => reference.get_output(key),
                };
                match path {
                    Some(path) => output.field(path),
                    None => output,
                }
            }
            Source::Node { node, output, path } => {
                let output = self.builder.node_output(node, output);
                match path {
                    Some(path) => output.field(path),
                    None => output,
                }
            }
        };

        Ok(match &expr.fallback {
            Some(fallback) => value.or_value(fallback.clone()),
            None => value,
        })
    }

    fn lower_string(&mut self, raw: &str) -> Result<Deferred<Value>> {
        match Template::parse(raw)? {
            Template::Literal(text) => Ok(Deferred::of(Value::String(text))),
            Template::Single(expr) => self.lower_expr(&expr),
            Template::Interpolated(pieces) => {
                let mut parts = Vec::new();
                for piece in &pieces {
                    if let Piece::Expr(expr) = piece {
                        parts.push(self.lower_expr(expr)?);
                    }
                }
                Ok(Deferred::join_all(parts).map(move |values| {
                    let mut values = values.iter();
                    let mut out = String::new();
                    for piece in &pieces {
                        match piece {
                            Piece::Literal(text) => out.push_str(text),
                            Piece::Expr(_) => {
                                if let Some(value) = values.next() {
                                    out.push_str(&render(value));
                                }
                            }
                        }
                    }
                    Value::String(out)
                }))
            }
        }
    }

    /// Lower any YAML value; maps and sequences recursively
    fn lower_value(&mut self, value: &Value) -> Result<Deferred<Value>> {
        match value {
            Value::String(raw) => self.lower_string(raw),
            Value::Array(items) => {
                let parts = items
                    .iter()
                    .map(|item| self.lower_value(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Deferred::join_all(parts).map(Value::Array))
            }
            Value::Object(map) => {
                let keys: Vec<String> = map.keys().cloned().collect();
                let parts = map
                    .values()
                    .map(|item| self.lower_value(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Deferred::join_all(parts)
                    .map(move |values| Value::Object(keys.into_iter().zip(values).collect::<Map<_, _>>())))
            }
            scalar => Ok(Deferred::of(scalar.clone())),
        }
    }
}

/// Substitute `${config.*}` in a reference unit name
fn unit_name(template: &str, config: &StackConfig) -> Result<String> {
    let mut out = String::new();
    let pieces = match Template::parse(template)? {
        Template::Literal(text) => return Ok(text),
        Template::Single(expr) => vec![Piece::Expr(expr)],
        Template::Interpolated(pieces) => pieces,
    };

    for piece in pieces {
        match piece {
            Piece::Literal(text) => out.push_str(&text),
            Piece::Expr(Expr {
                source: Source::Config { key },
                fallback,
            }) => match (config.get_str(&key), fallback) {
                (Some(value), _) => out.push_str(&value),
                (None, Some(fallback)) => out.push_str(&render(&fallback)),
                (None, None) => return Err(StackError::MissingConfiguration { keys: vec![key] }),
            },
            Piece::Expr(_) => {
                return Err(StackError::InvalidExpression {
                    expr: template.to_string(),
                    reason: "reference names may only use ${config.*}".to_string(),
                })
            }
        }
    }
    Ok(out)
}

fn is_included(node: &str, when: Option<&When>, config: &StackConfig) -> Result<bool> {
    let included = match when {
        None => true,
        Some(When::Literal(value)) => *value,
        Some(When::Option(raw)) => {
            let raw = raw.trim();
            let (negated, key) = match raw.strip_prefix('!') {
                Some(key) => (true, key.trim()),
                None => (false, raw),
            };
            // An unset option counts as false.
            let value = config.get_bool(key)?.unwrap_or(false);
            value != negated
        }
    };
    if !included {
        debug!(node, "Excluded by its inclusion condition");
    }
    Ok(included)
}

impl StackProgram {
    /// Lower this program against `ctx` without invoking any provider
    pub async fn plan(&self, ctx: &RunContext) -> Result<Plan> {
        let config = ctx.config();
        ctx.require_config(&self.config.required)?;

        let mut references = BTreeMap::new();
        for (alias, template) in &self.references {
            let unit = unit_name(template, config)?;
            let handle = match ctx.stack_reference(&unit).await {
                Ok(handle) => handle,
                Err(error) => {
                    warn!(alias = %alias, unit = %unit, error = %error, "Reference unavailable");
                    StackReference::unavailable(&unit, ctx.resolver().clone(), error)
                }
            };
            references.insert(alias.clone(), handle);
        }

        let mut scope = Scope {
            config,
            references,
            builder: ctx.graph_builder(),
        };

        for node in &self.nodes {
            let included = is_included(&node.id, node.when.as_ref(), config)?;
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for (name, value) in &node.inputs {
                inputs.push((name.clone(), scope.lower_value(value)?));
            }
            scope
                .builder
                .add_node(&node.id, &node.capability, inputs, included)?;
        }

        let exports = ExportSet::new();
        for (name, spec) in &self.exports {
            let value = scope.lower_value(spec.value())?;
            if spec.is_secret() {
                exports.export_secret(name.clone(), value)?;
            } else {
                exports.export(name.clone(), value)?;
            }
        }

        let graph = scope.builder.build()?;
        Ok(Plan { graph, exports })
    }
}
