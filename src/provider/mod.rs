//! # Capability Providers
//!
//! External implementations that materialize one kind of node.
//!
//! ## Overview
//!
//! The engine never inspects provider internals. It hands a provider the
//! node's resolved inputs and takes back a map of named outputs:
//!
//! ```rust,ignore
//! #[async_trait]
//! pub trait CapabilityProvider: Send + Sync {
//!     fn name(&self) -> &str;
//!     fn required_inputs(&self) -> &[String];
//!     fn timeout(&self) -> Option<Duration>;
//!     async fn invoke(&self, inputs: &Inputs) -> anyhow::Result<Outputs>;
//! }
//! ```
//!
//! ## Built-in Providers
//!
//! | Provider | Use Case | Behaviour |
//! |----------|----------|-----------|
//! | [`EchoProvider`] | Demos, glue | Inputs become outputs, plus templated extras |
//! | [`ExecProvider`] | Real work | Runs a command: JSON inputs on stdin, JSON outputs on stdout |
//! | [`MockProvider`] | Testing | Fixed outputs, failures, delays, call recording |
//! | [`RetryingProvider`] | Wrapper | Exponential backoff on transient errors |
//!
//! ## Registry
//!
//! ```rust
//! use std::sync::Arc;
//! use stackwire::provider::{EchoProvider, ProviderRegistry};
//!
//! let registry = ProviderRegistry::new()
//!     .with("workspace", Arc::new(EchoProvider::new().requiring(["teamName"])));
//!
//! assert!(registry.contains("workspace"));
//! assert!(registry.get("identity").is_none());
//! ```

mod echo;
mod exec;
mod mock;
mod retry;

pub use echo::EchoProvider;
pub use exec::ExecProvider;
pub use mock::MockProvider;
pub use retry::{RetryConfig, RetryingProvider};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

/// Resolved inputs handed to a provider
pub type Inputs = BTreeMap<String, Value>;

/// Named outputs returned by a provider
pub type Outputs = BTreeMap<String, Value>;

// ============================================================================
// PROVIDER TRAIT (ASYNC)
// ============================================================================

/// Implements one capability
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Short description used in logs
    fn name(&self) -> &str;

    /// Input names that every node of this capability must declare
    fn required_inputs(&self) -> &[String] {
        &[]
    }

    /// Per-invocation timeout; `None` falls back to the engine default
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Materialize one node
    ///
    /// The provider may retry transient errors internally; the engine treats
    /// the call as a single logical attempt.
    async fn invoke(&self, inputs: &Inputs) -> anyhow::Result<Outputs>;
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Capability id → provider
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: FxHashMap<String, Arc<dyn CapabilityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the provider for `capability`
    pub fn register(&mut self, capability: impl Into<String>, provider: Arc<dyn CapabilityProvider>) {
        self.providers.insert(capability.into(), provider);
    }

    /// Builder-style `register`
    pub fn with(mut self, capability: impl Into<String>, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.register(capability, provider);
        self
    }

    pub fn get(&self, capability: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.providers.get(capability).cloned()
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.providers.contains_key(capability)
    }

    /// Registered capability ids, sorted
    pub fn capabilities(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Render a JSON value for string interpolation (strings without quotes)
pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
