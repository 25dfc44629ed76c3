//! Export aggregator
//!
//! An [`ExportSet`] collects named deferreds while the program is declared;
//! [`ExportSet::finalize`] waits for every one of them to settle and returns
//! the flat [`RunOutputs`]. Finalizing twice hands back the same result.

mod outputs;

pub use outputs::{ExportOutput, ExportValue, RunOutputs, REDACTED};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::info;

use crate::deferred::Deferred;
use crate::error::{Result, StackError};

#[derive(Clone)]
struct Entry {
    name: String,
    value: Deferred<Value>,
    secret: bool,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    sealed: bool,
}

/// Run-level exports, in registration order
#[derive(Default)]
pub struct ExportSet {
    state: Mutex<State>,
    finalized: OnceCell<Arc<RunOutputs>>,
}

impl ExportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(&self, name: impl Into<String>, value: Deferred<Value>) -> Result<()> {
        self.register(name.into(), value, false)
    }

    /// Export whose value is redacted from every textual rendering
    pub fn export_secret(&self, name: impl Into<String>, value: Deferred<Value>) -> Result<()> {
        self.register(name.into(), value, true)
    }

    fn register(&self, name: String, value: Deferred<Value>, secret: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(StackError::ExportsFinalized { name });
        }
        if state.entries.iter().any(|e| e.name == name) {
            return Err(StackError::DuplicateExport { name });
        }
        state.entries.push(Entry {
            name,
            value,
            secret,
        });
        Ok(())
    }

    /// Export names in registration order
    pub fn names(&self) -> Vec<String> {
        self.state.lock().entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every export to resolve or fail
    pub async fn finalize(&self) -> Arc<RunOutputs> {
        let outputs = self
            .finalized
            .get_or_init(|| async {
                let entries = {
                    let mut state = self.state.lock();
                    state.sealed = true;
                    state.entries.clone()
                };

                let settled =
                    future::join_all(entries.iter().map(|entry| entry.value.resolve())).await;

                let mut finalized = BTreeMap::new();
                for (entry, outcome) in entries.into_iter().zip(settled) {
                    let value = match outcome {
                        Ok(value) => ExportValue::Value(value),
                        Err(StackError::Omitted { node }) => ExportValue::Absent { omitted: node },
                        Err(error) => ExportValue::Failed(error),
                    };
                    finalized.insert(entry.name, ExportOutput::new(value, entry.secret));
                }

                let outputs = RunOutputs::new(finalized);
                info!(
                    exports = outputs.len(),
                    failed = outputs.failed().count(),
                    "exports finalized"
                );
                Arc::new(outputs)
            })
            .await;

        Arc::clone(outputs)
    }
}

impl fmt::Debug for ExportSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportSet")
            .field("names", &self.names())
            .field("finalized", &self.finalized.initialized())
            .finish()
    }
}
