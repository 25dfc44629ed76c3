//! External references - outputs of other, already-deployed units
//!
//! ```text
//! ReferenceResolver ──resolve("demo/hub/dev")──► StackReference
//!        │                                            │
//!        │ (unit existence, cached per unit)          │ get_output("vnetId")
//!        ▼                                            ▼
//!   StateBackend ◄────── lookup, once per (unit, key) ── Deferred<Value>
//! ```
//!
//! `resolve` checks the unit exists up front. `get_output` never blocks:
//! it hands back a deferred whose lookup runs when first awaited, and every
//! later call for the same `(unit, key)` shares that one lookup.

mod backend;

pub use backend::{FileBackend, MemoryBackend};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::deferred::{Deferred, Provenance};
use crate::error::{Result, StackError};
use crate::event::{EventKind, EventLog};

/// Shared state backend holding the exports of deployed units
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Whether `unit` has been deployed
    async fn has_unit(&self, unit: &str) -> anyhow::Result<bool>;

    /// Output `key` of `unit`; `None` when the unit never exported it
    async fn lookup(&self, unit: &str, key: &str) -> anyhow::Result<Option<Value>>;
}

type OutputKey = (Arc<str>, Arc<str>);

/// Resolves deployment-unit names to handles; one instance per run
#[derive(Clone)]
pub struct ReferenceResolver {
    inner: Arc<ResolverInner>,
}

struct ResolverInner {
    backend: Arc<dyn StateBackend>,
    units: DashMap<Arc<str>, Arc<OnceCell<Result<()>>>>,
    outputs: DashMap<OutputKey, Deferred<Value>>,
    events: EventLog,
}

impl ReferenceResolver {
    pub fn new(backend: Arc<dyn StateBackend>, events: EventLog) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                backend,
                units: DashMap::new(),
                outputs: DashMap::new(),
                events,
            }),
        }
    }

    /// Handle on a deployed unit; `ReferenceNotFound` if the backend has no such unit
    pub async fn resolve(&self, unit: &str) -> Result<StackReference> {
        let unit: Arc<str> = Arc::from(unit);

        // Clone the cell out so no map shard is locked across the await.
        let cell = self
            .inner
            .units
            .entry(Arc::clone(&unit))
            .or_default()
            .clone();

        let backend = Arc::clone(&self.inner.backend);
        let name = Arc::clone(&unit);
        let exists = cell
            .get_or_init(|| async move {
                match backend.has_unit(&name).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(StackError::ReferenceNotFound {
                        unit: name.to_string(),
                    }),
                    Err(e) => Err(StackError::BackendError {
                        unit: name.to_string(),
                        reason: format!("{e:#}"),
                    }),
                }
            })
            .await;

        exists.clone()?;

        Ok(StackReference {
            unit,
            resolver: self.clone(),
            unavailable: None,
        })
    }

    fn output(&self, unit: &Arc<str>, key: &str) -> Deferred<Value> {
        let key: Arc<str> = Arc::from(key);
        self.inner
            .outputs
            .entry((Arc::clone(unit), Arc::clone(&key)))
            .or_insert_with(|| self.lookup_deferred(Arc::clone(unit), key))
            .clone()
    }

    fn lookup_deferred(&self, unit: Arc<str>, key: Arc<str>) -> Deferred<Value> {
        let backend = Arc::clone(&self.inner.backend);
        let events = self.inner.events.clone();

        Deferred::from_future(
            async move {
                debug!(unit = %unit, key = %key, "state backend lookup");
                let result = backend.lookup(&unit, &key).await;

                events.emit(EventKind::ReferenceLookup {
                    unit: unit.to_string(),
                    key: key.to_string(),
                    found: matches!(result, Ok(Some(_))),
                });

                match result {
                    Ok(Some(value)) => Ok(value),
                    Ok(None) => Err(StackError::OutputNotFound {
                        unit: unit.to_string(),
                        key: key.to_string(),
                    }),
                    Err(e) => Err(StackError::BackendError {
                        unit: unit.to_string(),
                        reason: format!("{e:#}"),
                    }),
                }
            },
            Provenance::default(),
        )
    }

    /// Number of distinct `(unit, key)` lookups created this run
    pub fn cached_outputs(&self) -> usize {
        self.inner.outputs.len()
    }
}

impl fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("units", &self.inner.units.len())
            .field("outputs", &self.inner.outputs.len())
            .finish()
    }
}

/// Handle on one deployed unit
#[derive(Clone)]
pub struct StackReference {
    unit: Arc<str>,
    resolver: ReferenceResolver,
    unavailable: Option<StackError>,
}

impl StackReference {
    /// Handle whose every output fails with `error`
    ///
    /// Lets a program keep a failed `resolve` local to the nodes that use it.
    pub fn unavailable(unit: &str, resolver: ReferenceResolver, error: StackError) -> Self {
        Self {
            unit: Arc::from(unit),
            resolver,
            unavailable: Some(error),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Deferred output; the lookup runs once per `(unit, key)` per run
    pub fn get_output(&self, key: &str) -> Deferred<Value> {
        match &self.unavailable {
            Some(error) => Deferred::failed(error.clone()),
            None => self.resolver.output(&self.unit, key),
        }
    }

    /// Like `get_output`, but an unexported key resolves to `default`
    ///
    /// Other failures (missing unit, backend errors) still propagate.
    pub fn get_output_or(&self, key: &str, default: Value) -> Deferred<Value> {
        let source = self.get_output(key);
        let provenance = source.provenance().clone();
        Deferred::from_future(
            async move {
                match source.resolve().await {
                    Err(StackError::OutputNotFound { .. }) => Ok(default),
                    other => other,
                }
            },
            provenance,
        )
    }
}

impl fmt::Debug for StackReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackReference")
            .field("unit", &self.unit)
            .field("available", &self.unavailable.is_none())
            .finish()
    }
}
