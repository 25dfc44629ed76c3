//! GraphBuilder - declare nodes, then `build()` a validated graph
//!
//! Node records live in an arena indexed by [`NodeId`]. A slot is created
//! either by `add_node` or by the first forward reference to a name, so a
//! node may consume outputs of a node declared after it (and cycles can be
//! expressed, then rejected by `build`).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::validate::{detect_cycles, topological_order};
use super::{Graph, GraphNode, NodeHandle, NodeResult};
use crate::deferred::{Completer, Deferred, NodeId, Provenance};
use crate::error::{Result, StackError};
use crate::provider::{CapabilityProvider, ProviderRegistry};

struct Declaration {
    capability: Arc<str>,
    provider: Arc<dyn CapabilityProvider>,
    inputs: BTreeMap<String, Deferred<Value>>,
    included: bool,
    /// Position in declaration order
    rank: usize,
}

struct Slot {
    name: Arc<str>,
    result: Deferred<NodeResult>,
    completer: Option<Completer<NodeResult>>,
    declaration: Option<Declaration>,
}

static NEXT_GRAPH: AtomicU32 = AtomicU32::new(0);

/// Collects node declarations for one run
pub struct GraphBuilder {
    /// Stamped into every issued [`NodeId`]
    graph: u32,
    registry: ProviderRegistry,
    slots: Vec<Slot>,
    by_name: FxHashMap<Arc<str>, NodeId>,
    declared: usize,
}

impl GraphBuilder {
    pub fn new(registry: &ProviderRegistry) -> Self {
        Self {
            graph: NEXT_GRAPH.fetch_add(1, Ordering::Relaxed),
            registry: registry.clone(),
            slots: Vec::new(),
            by_name: FxHashMap::default(),
            declared: 0,
        }
    }

    fn slot_for(&mut self, name: &str) -> NodeId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }

        let id = NodeId::new(self.graph, self.slots.len());
        let name: Arc<str> = Arc::from(name);
        let (completer, result) = Deferred::pending();
        self.slots.push(Slot {
            name: Arc::clone(&name),
            result: result.with_provenance(Provenance::node(id)),
            completer: Some(completer),
            declaration: None,
        });
        self.by_name.insert(name, id);
        id
    }

    fn handle(&self, id: NodeId) -> NodeHandle {
        let slot = &self.slots[id.index()];
        NodeHandle {
            id,
            name: Arc::clone(&slot.name),
            result: slot.result.clone(),
        }
    }

    /// Declare a node without executing it
    ///
    /// Checks the capability is registered and every input it requires is
    /// present. Inputs may still be pending. With `included == false` the
    /// node is recorded as omitted and its outputs fail with `Omitted`.
    pub fn add_node<I, K>(
        &mut self,
        name: &str,
        capability: &str,
        inputs: I,
        included: bool,
    ) -> Result<NodeHandle>
    where
        I: IntoIterator<Item = (K, Deferred<Value>)>,
        K: Into<String>,
    {
        let provider = self
            .registry
            .get(capability)
            .ok_or_else(|| StackError::UnknownCapability {
                node: name.to_string(),
                capability: capability.to_string(),
            })?;

        let inputs: BTreeMap<String, Deferred<Value>> =
            inputs.into_iter().map(|(k, v)| (k.into(), v)).collect();

        if let Some(missing) = provider
            .required_inputs()
            .iter()
            .find(|required| !inputs.contains_key(required.as_str()))
        {
            return Err(StackError::MissingInput {
                node: name.to_string(),
                capability: capability.to_string(),
                input: missing.clone(),
            });
        }

        let id = self.slot_for(name);
        let rank = self.declared;
        let slot = &mut self.slots[id.index()];
        if slot.declaration.is_some() {
            return Err(StackError::DuplicateNode {
                node: name.to_string(),
            });
        }

        if !included {
            if let Some(completer) = slot.completer.take() {
                completer.fail(StackError::Omitted {
                    node: name.to_string(),
                });
            }
        }

        slot.declaration = Some(Declaration {
            capability: Arc::from(capability),
            provider,
            inputs,
            included,
            rank,
        });
        self.declared += 1;

        Ok(self.handle(id))
    }

    /// Handle on a node that may not be declared yet
    pub fn node_ref(&mut self, name: &str) -> NodeHandle {
        let id = self.slot_for(name);
        self.handle(id)
    }

    /// Forward reference to output `output` of node `name`
    pub fn node_output(&mut self, name: &str, output: &str) -> Deferred<Value> {
        self.node_ref(name).output(output)
    }

    /// Validate and order the graph
    ///
    /// Fails with `UnknownNode` for a referenced but undeclared node and
    /// with `CyclicDependency` when the inferred edges form a cycle. An
    /// input derived from another builder's node fails with `ForeignNode`.
    /// No provider is invoked either way.
    pub fn build(self) -> Result<Graph> {
        let graph = self.graph;
        let mut declared = Vec::with_capacity(self.slots.len());
        let mut names = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            match slot.declaration {
                Some(declaration) => {
                    names.push(Arc::clone(&slot.name));
                    declared.push((slot.name, slot.completer, declaration));
                }
                None => {
                    return Err(StackError::UnknownNode {
                        node: slot.name.to_string(),
                    })
                }
            }
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(declared.len());
        for (name, _, decl) in &declared {
            let mut provenance = Provenance::default();
            for (input, value) in &decl.inputs {
                if value.provenance().iter().any(|id| id.graph() != graph) {
                    return Err(StackError::ForeignNode {
                        node: name.to_string(),
                        input: input.clone(),
                    });
                }
                provenance = provenance.union(value.provenance());
            }
            deps.push(provenance.iter().map(NodeId::index).collect());
        }
        let ranks: Vec<usize> = declared.iter().map(|(_, _, decl)| decl.rank).collect();

        let mut by_rank: Vec<usize> = (0..declared.len()).collect();
        by_rank.sort_by_key(|&node| ranks[node]);
        detect_cycles(&names, &deps, &by_rank)?;

        let order = topological_order(&ranks, &deps);

        // Exclusion is transitive: dependents of an omitted node are omitted too.
        let mut omitted_by: Vec<Option<Arc<str>>> = declared
            .iter()
            .map(|(name, _, decl)| (!decl.included).then(|| Arc::clone(name)))
            .collect();
        for &node in &order {
            if omitted_by[node].is_none() {
                omitted_by[node] = deps[node].iter().find_map(|&dep| omitted_by[dep].clone());
            }
        }

        let mut nodes = Vec::with_capacity(declared.len());
        for (index, ((name, mut completer, decl), node_deps)) in
            declared.into_iter().zip(deps).enumerate()
        {
            let cause = omitted_by[index].take();
            if let Some(origin) = &cause {
                if let Some(completer) = completer.take() {
                    completer.fail(StackError::Omitted {
                        node: origin.to_string(),
                    });
                }
            }

            nodes.push(GraphNode {
                id: NodeId::new(graph, index),
                name,
                capability: decl.capability,
                provider: decl.provider,
                inputs: decl.inputs,
                dependencies: node_deps.into_iter().map(|dep| NodeId::new(graph, dep)).collect(),
                omitted_by: cause,
                completer,
            });
        }

        let order = order
            .into_iter()
            .filter(|&node| !nodes[node].is_omitted())
            .map(|node| NodeId::new(graph, node))
            .collect();

        Ok(Graph { nodes, order })
    }
}
