//! RunContext - everything one run needs, passed explicitly
//!
//! Created per invocation and dropped at the end of it: configuration,
//! engine settings, providers, the reference resolver (and its cache), the
//! event log and the cancellation token.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{EngineSettings, StackConfig};
use crate::error::Result;
use crate::event::{EventKind, EventLog};
use crate::export::ExportSet;
use crate::graph::{Graph, GraphBuilder};
use crate::provider::ProviderRegistry;
use crate::reference::{ReferenceResolver, StackReference, StateBackend};

use super::driver::Materializer;
use super::report::RunReport;

pub struct RunContext {
    run_id: String,
    config: Arc<StackConfig>,
    settings: EngineSettings,
    registry: ProviderRegistry,
    resolver: ReferenceResolver,
    events: EventLog,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        config: StackConfig,
        settings: EngineSettings,
        registry: ProviderRegistry,
        backend: Arc<dyn StateBackend>,
    ) -> Self {
        let events = EventLog::new();
        Self {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            config: Arc::new(config),
            settings,
            registry,
            resolver: ReferenceResolver::new(backend, events.clone()),
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Fail with every missing key before any node is built
    pub fn require_config<I, S>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.validate_required(keys)
    }

    /// Builder bound to this run's providers
    pub fn graph_builder(&self) -> GraphBuilder {
        GraphBuilder::new(&self.registry)
    }

    /// Handle on another deployed unit
    pub async fn stack_reference(&self, unit: &str) -> Result<StackReference> {
        self.resolver.resolve(unit).await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop starting new nodes; in-flight invocations finish
    pub fn cancel(&self, reason: &str) {
        if !self.cancel.is_cancelled() {
            warn!(reason, "Cancelling run");
            self.events.emit(EventKind::RunCancelled {
                reason: reason.to_string(),
            });
            self.cancel.cancel();
        }
    }

    /// Cancel the run on Ctrl-C
    pub fn cancel_on_ctrl_c(&self) {
        let token = self.cancel.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() {
                        warn!("Interrupted, no new nodes will start");
                        events.emit(EventKind::RunCancelled {
                            reason: "interrupted".to_string(),
                        });
                        token.cancel();
                    }
                }
            }
        });
    }

    /// Materialize `graph`, then finalize `exports`
    pub async fn run(&self, graph: Graph, exports: &ExportSet) -> RunReport {
        let started = Instant::now();
        let nodes = Materializer::new(self).run(graph).await;
        let outputs = exports.finalize().await;

        info!(
            run_id = %self.run_id,
            exports = outputs.len(),
            all_succeeded = outputs.all_succeeded(),
            "Run complete"
        );

        RunReport {
            run_id: self.run_id.clone(),
            nodes,
            outputs,
            duration: started.elapsed(),
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .finish()
    }
}
