//! Stackwire - deferred-value composition engine for infrastructure stacks
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  program/   YAML stack program → graph + exports             │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  deferred/  Deferred<T>, provenance, completion channels     │
//! │  graph/     GraphBuilder, inferred edges, cycle detection    │
//! │  runtime/   RunContext, Materializer, RunReport              │
//! │  export/    ExportSet, RunOutputs (secret redaction)         │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  reference/ StateBackend, ReferenceResolver (cached lookups) │
//! │  provider/  CapabilityProvider, registry, built-ins          │
//! │  event/     Run audit trail (EventLog, EventKind)            │
//! │  util/      JSON path projection                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use stackwire::{
//!     EngineSettings, ExportSet, MemoryBackend, MockProvider, ProviderRegistry,
//!     RunContext, StackConfig,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let backend = Arc::new(
//!     MemoryBackend::new().with_unit("demo/hub/dev", [("vnetId", json!("vnet-hub"))]),
//! );
//! let registry = ProviderRegistry::new()
//!     .with("network", Arc::new(MockProvider::new().with_output("networkId", json!("net-1"))));
//! let ctx = RunContext::new(StackConfig::new(), EngineSettings::default(), registry, backend);
//!
//! let hub = ctx.stack_reference("demo/hub/dev").await.unwrap();
//! let mut builder = ctx.graph_builder();
//! let network = builder
//!     .add_node("network", "network", [("hubVnet", hub.get_output("vnetId"))], true)
//!     .unwrap();
//!
//! let exports = ExportSet::new();
//! exports.export("networkId", network.output("networkId")).unwrap();
//!
//! let report = ctx.run(builder.build().unwrap(), &exports).await;
//! assert_eq!(report.outputs.get("networkId").unwrap().reveal(), Some(&json!("net-1")));
//! # });
//! ```

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod program;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER
// ═══════════════════════════════════════════════════════════════
pub mod deferred;
pub mod export;
pub mod graph;
pub mod runtime;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER
// ═══════════════════════════════════════════════════════════════
pub mod event;
pub mod provider;
pub mod reference;
pub mod util;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════
pub use config::{ConfigFile, ConfigValue, EngineSettings, StackConfig};
pub use deferred::{Completer, Deferred, NodeId, Outcome, Provenance};
pub use error::{FixSuggestion, StackError};
pub use event::{Event, EventKind, EventLog};
pub use export::{ExportOutput, ExportSet, RunOutputs};
pub use graph::{Graph, GraphBuilder, NodeHandle};
pub use program::{Plan, StackProgram};
pub use provider::{
    CapabilityProvider, EchoProvider, ExecProvider, Inputs, MockProvider, Outputs,
    ProviderRegistry, RetryConfig, RetryingProvider,
};
pub use reference::{FileBackend, MemoryBackend, ReferenceResolver, StackReference, StateBackend};
pub use runtime::{Materializer, NodeOutcome, RunContext, RunReport};
