//! Composition graph
//!
//! Nodes are declared through a [`GraphBuilder`]; edges are never declared.
//! A node depends on another exactly when one of its input deferreds was
//! derived (through any chain of `map`/`combine`/...) from that node's
//! outputs, which the builder reads off each input's [`Provenance`].
//!
//! [`Provenance`]: crate::deferred::Provenance

mod builder;
mod validate;

pub use builder::GraphBuilder;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::deferred::{Completer, Deferred, NodeId};
use crate::error::StackError;
use crate::provider::{CapabilityProvider, Outputs};

/// Settled outputs of one node
pub type NodeResult = Arc<Outputs>;

/// Reference to a declared (or forward-referenced) node
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    name: Arc<str>,
    result: Deferred<NodeResult>,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deferred output `output`; fails with `MissingOutput` if the provider
    /// does not return it
    pub fn output(&self, output: &str) -> Deferred<Value> {
        let node = Arc::clone(&self.name);
        let output = output.to_string();
        self.result.try_map(move |outputs| {
            outputs
                .get(&output)
                .cloned()
                .ok_or_else(|| StackError::MissingOutput {
                    node: node.to_string(),
                    output,
                })
        })
    }

    /// Every output as one JSON object
    pub fn outputs(&self) -> Deferred<Value> {
        self.result
            .map(|outputs| Value::Object(outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("result", &self.result)
            .finish()
    }
}

/// A validated node
pub struct GraphNode {
    id: NodeId,
    name: Arc<str>,
    capability: Arc<str>,
    provider: Arc<dyn CapabilityProvider>,
    inputs: BTreeMap<String, Deferred<Value>>,
    dependencies: Vec<NodeId>,
    omitted_by: Option<Arc<str>>,
    completer: Option<Completer<NodeResult>>,
}

impl GraphNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn is_omitted(&self) -> bool {
        self.omitted_by.is_some()
    }

    /// Node whose exclusion caused this one's (itself if declared excluded)
    pub fn omitted_by(&self) -> Option<&str> {
        self.omitted_by.as_deref()
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub(crate) fn provider(&self) -> Arc<dyn CapabilityProvider> {
        Arc::clone(&self.provider)
    }

    pub(crate) fn inputs(&self) -> &BTreeMap<String, Deferred<Value>> {
        &self.inputs
    }

    pub(crate) fn take_completer(&mut self) -> Option<Completer<NodeResult>> {
        self.completer.take()
    }
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("dependencies", &self.dependencies)
            .field("omitted_by", &self.omitted_by)
            .finish()
    }
}

/// Validated, acyclic graph in topological order
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    order: Vec<NodeId>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.index()]
    }

    pub fn get(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Included nodes in materialization order
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn scheduled(&self) -> impl Iterator<Item = &GraphNode> {
        self.order.iter().map(|id| self.node(*id))
    }

    /// Omitted nodes in declaration arena order
    pub fn omitted(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|n| n.is_omitted())
    }

    /// Names of the nodes `name` depends on
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .map(|n| n.dependencies.iter().map(|d| self.node(*d).name()).collect())
            .unwrap_or_default()
    }

    /// Whether `from` depends directly on `to`
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.dependencies_of(from).contains(&to)
    }

    pub(crate) fn into_parts(self) -> (Vec<GraphNode>, Vec<NodeId>) {
        (self.nodes, self.order)
    }
}
