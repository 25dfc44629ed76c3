//! State backends: in-memory (tests, embedding) and JSON file (CLI)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::StateBackend;
use crate::error::{Result, StackError};

type UnitOutputs = BTreeMap<String, Value>;

/// In-memory backend with lookup counters
#[derive(Debug, Default)]
pub struct MemoryBackend {
    units: RwLock<BTreeMap<String, UnitOutputs>>,
    latency: Option<Duration>,
    lookups: AtomicUsize,
    unit_checks: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployed unit with its outputs
    pub fn with_unit<I, K>(self, unit: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let outputs = outputs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.units.write().insert(unit.into(), outputs);
        self
    }

    /// Simulated network latency on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_output(&self, unit: &str, key: impl Into<String>, value: Value) {
        self.units
            .write()
            .entry(unit.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    /// Output lookups served so far
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Unit existence checks served so far
    pub fn unit_checks(&self) -> usize {
        self.unit_checks.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn has_unit(&self, unit: &str) -> anyhow::Result<bool> {
        self.unit_checks.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self.units.read().contains_key(unit))
    }

    async fn lookup(&self, unit: &str, key: &str) -> anyhow::Result<Option<Value>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self
            .units
            .read()
            .get(unit)
            .and_then(|outputs| outputs.get(key))
            .cloned())
    }
}

/// Read-only backend over a JSON state file
///
/// ```json
/// { "demo/hub/dev": { "vnetId": "vnet-hub", "location": "westeurope" } }
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    units: BTreeMap<String, UnitOutputs>,
}

impl FileBackend {
    /// Load the state file once
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let io_error = |reason: String| StackError::Io {
            path: path.display().to_string(),
            reason,
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(e.to_string()))?;
        let units: BTreeMap<String, UnitOutputs> = serde_json::from_str(&content)
            .map_err(|e| io_error(format!("invalid state file: {e}")))?;

        Ok(Self { path, units })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn has_unit(&self, unit: &str) -> anyhow::Result<bool> {
        Ok(self.units.contains_key(unit))
    }

    async fn lookup(&self, unit: &str, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.units.get(unit).and_then(|o| o.get(key)).cloned())
    }
}
