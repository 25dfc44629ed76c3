//! Run report: per-node outcomes plus the finalized exports

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::StackError;
use crate::export::RunOutputs;

/// How one node ended
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Provider invoked and returned outputs
    Succeeded {
        outputs: Vec<String>,
        duration: Duration,
    },
    /// Provider invoked and failed (error, timeout)
    Failed {
        error: StackError,
        duration: Duration,
    },
    /// Provider never invoked: an input failed
    Skipped { cause: StackError },
    /// Excluded from the run; `cause` names the excluded node
    Omitted { cause: String },
    /// Run cancelled before the provider was invoked
    Cancelled,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Omitted { .. } => "omitted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn error(&self) -> Option<&StackError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Skipped { cause } => Some(cause),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Succeeded { outputs, duration } => json!({
                "status": self.label(),
                "outputs": outputs,
                "duration_ms": duration.as_millis() as u64,
            }),
            Self::Failed { error, duration } => json!({
                "status": self.label(),
                "error": error.to_string(),
                "duration_ms": duration.as_millis() as u64,
            }),
            Self::Skipped { cause } => json!({
                "status": self.label(),
                "cause": cause.to_string(),
            }),
            Self::Omitted { cause } => json!({ "status": self.label(), "cause": cause }),
            Self::Cancelled => json!({ "status": self.label() }),
        }
    }
}

/// Result of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub nodes: BTreeMap<String, NodeOutcome>,
    pub outputs: Arc<RunOutputs>,
    pub duration: Duration,
}

impl RunReport {
    pub fn node(&self, name: &str) -> Option<&NodeOutcome> {
        self.nodes.get(name)
    }

    /// Every export resolved or is an absent marker
    pub fn all_succeeded(&self) -> bool {
        self.outputs.all_succeeded()
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = (&str, &StackError)> {
        self.nodes
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                NodeOutcome::Failed { error, .. } => Some((name.as_str(), error)),
                _ => None,
            })
    }

    /// Structured summary; secrets redacted unless `show_secrets`
    pub fn to_json(&self, show_secrets: bool) -> Value {
        let nodes: serde_json::Map<String, Value> = self
            .nodes
            .iter()
            .map(|(name, outcome)| (name.clone(), outcome.to_json()))
            .collect();
        json!({
            "run_id": self.run_id,
            "duration_ms": self.duration.as_millis() as u64,
            "nodes": nodes,
            "outputs": self.outputs.to_json(show_secrets),
        })
    }
}
