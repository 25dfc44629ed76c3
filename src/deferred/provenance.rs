//! Provenance - which graph nodes a deferred value was derived from
//!
//! Node records live in the graph builder's arena; a deferred only keeps
//! their indices. Sets stay tiny (most values derive from 0-2 nodes), so a
//! sorted SmallVec beats a hash set here.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A node record: the builder that issued it plus its arena index
///
/// The builder id keeps values from one graph from being wired into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    graph: u32,
    index: u32,
}

impl NodeId {
    pub(crate) fn new(graph: u32, index: usize) -> Self {
        Self {
            graph,
            index: index as u32,
        }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Id of the graph builder that issued this node
    pub fn graph(self) -> u32 {
        self.graph
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.graph, self.index)
    }
}

/// Sorted, de-duplicated set of producing nodes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance(SmallVec<[NodeId; 4]>);

impl Provenance {
    /// Provenance of a node's own outputs
    pub fn node(id: NodeId) -> Self {
        let mut set = SmallVec::new();
        set.push(id);
        Self(set)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().copied()
    }

    pub fn insert(&mut self, id: NodeId) {
        if let Err(pos) = self.0.binary_search(&id) {
            self.0.insert(pos, id);
        }
    }

    /// Union of two provenance sets
    pub fn union(&self, other: &Provenance) -> Provenance {
        let mut merged = self.clone();
        for id in other.iter() {
            merged.insert(id);
        }
        merged
    }
}

impl FromIterator<NodeId> for Provenance {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        let mut set = Provenance::default();
        for id in iter {
            set.insert(id);
        }
        set
    }
}
