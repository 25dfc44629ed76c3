//! EventLog - audit trail of one stack run
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run level, node level, reference lookups
//! - EventLog: thread-safe, append-only log shared by every node task
//!
//! Events carry input and output *names*, never values: values may be secret.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock; // 2-3x faster than std::sync::RwLock

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All possible event types
///
/// Uses Arc<str> for node names to enable zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        run_id: String,
        node_count: usize,
        omitted_count: usize,
    },
    RunCancelled {
        reason: String,
    },
    RunCompleted {
        succeeded: usize,
        failed: usize,
        omitted: usize,
        total_duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    NodeScheduled {
        node: Arc<str>,
        capability: String,
        dependencies: Vec<Arc<str>>,
    },
    NodeOmitted {
        node: Arc<str>,
        /// Node whose omission caused this one (itself if declared omitted)
        cause: Arc<str>,
    },
    /// Provider invocation begins; all inputs resolved
    NodeStarted {
        node: Arc<str>,
        capability: String,
        inputs: Vec<String>,
    },
    NodeCompleted {
        node: Arc<str>,
        outputs: Vec<String>,
        duration_ms: u64,
    },
    NodeFailed {
        node: Arc<str>,
        error: String,
        duration_ms: u64,
    },
    /// Provider never invoked: an input failed
    NodeSkipped {
        node: Arc<str>,
        cause: String,
    },
    NodeCancelled {
        node: Arc<str>,
    },

    // ═══════════════════════════════════════════
    // REFERENCES
    // ═══════════════════════════════════════════
    ReferenceLookup {
        unit: String,
        key: String,
        found: bool,
    },
}

impl EventKind {
    /// Extract node name if event is node-related
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeScheduled { node, .. }
            | Self::NodeOmitted { node, .. }
            | Self::NodeStarted { node, .. }
            | Self::NodeCompleted { node, .. }
            | Self::NodeFailed { node, .. }
            | Self::NodeSkipped { node, .. }
            | Self::NodeCancelled { node } => Some(node),
            Self::RunStarted { .. }
            | Self::RunCancelled { .. }
            | Self::RunCompleted { .. }
            | Self::ReferenceLookup { .. } => None,
        }
    }

    /// Check if this is a run-level event
    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::RunStarted { .. } | Self::RunCancelled { .. } | Self::RunCompleted { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new event log (call at run start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        // Id allocation and push under one lock keeps ids in log order.
        let mut events = self.events.write();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        events.push(Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        });
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Filter events by node name
    pub fn filter_node(&self, node: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.node() == Some(node))
            .collect()
    }

    /// Filter run-level events only
    pub fn run_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    /// Number of backend lookups recorded for `(unit, key)`
    pub fn lookups(&self, unit: &str, key: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| {
                matches!(&e.kind, EventKind::ReferenceLookup { unit: u, key: k, .. } if u == unit && k == key)
            })
            .count()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
