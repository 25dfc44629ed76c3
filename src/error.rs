// The #[error] attribute from thiserror uses struct fields via string interpolation,
// but Rust's unused_assignments lint doesn't recognize this.
#![allow(unused_assignments)]

//! Stackwire Error Types with Error Codes
//!
//! Error code ranges:
//! - STK-000-009: Configuration and stack program errors
//! - STK-010-019: Graph validation errors (structural, abort the run)
//! - STK-020-029: External reference errors
//! - STK-030-039: Provider errors
//! - STK-040-049: Propagation markers (upstream failure, omission, cancellation)
//! - STK-090-099: IO errors
//!
//! `StackError` is `Clone`: one failure is shared by every deferred that
//! transitively depends on it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StackError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StackError {
    // ═══════════════════════════════════════════
    // CONFIGURATION / PROGRAM ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[STK-001] Missing required configuration: {}", keys.join(", "))]
    MissingConfiguration { keys: Vec<String> },

    #[error("[STK-002] Configuration '{key}' must be {expected}, got '{actual}'")]
    InvalidConfiguration {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("[STK-003] Config error: {reason}")]
    ConfigError { reason: String },

    #[error("[STK-004] Failed to parse stack program: {details}")]
    ProgramParse { details: String },

    #[error("[STK-005] Invalid expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    // ═══════════════════════════════════════════
    // GRAPH VALIDATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[STK-010] Node '{node}' is missing required input '{input}' for capability '{capability}'")]
    MissingInput {
        node: String,
        capability: String,
        input: String,
    },

    #[error("[STK-011] Node '{node}' uses unknown capability '{capability}'")]
    UnknownCapability { node: String, capability: String },

    #[error("[STK-012] Node '{node}' is declared more than once")]
    DuplicateNode { node: String },

    #[error("[STK-013] Node '{node}' is referenced but never declared")]
    UnknownNode { node: String },

    #[error("[STK-014] Cyclic dependency: {cycle}")]
    CyclicDependency { cycle: String },

    #[error("[STK-015] Export '{name}' is registered more than once")]
    DuplicateExport { name: String },

    #[error("[STK-016] Export '{name}' registered after finalize")]
    ExportsFinalized { name: String },

    #[error("[STK-017] Input '{input}' of node '{node}' comes from a node of another graph")]
    ForeignNode { node: String, input: String },

    // ═══════════════════════════════════════════
    // REFERENCE ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[STK-020] Deployment unit '{unit}' not found in state backend")]
    ReferenceNotFound { unit: String },

    #[error("[STK-021] Deployment unit '{unit}' has no output '{key}'")]
    OutputNotFound { unit: String, key: String },

    #[error("[STK-022] State backend lookup for '{unit}' failed: {reason}")]
    BackendError { unit: String, reason: String },

    // ═══════════════════════════════════════════
    // PROVIDER ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[STK-030] Provider '{capability}' failed for node '{node}': {message}")]
    ProviderError {
        node: String,
        capability: String,
        message: String,
    },

    #[error("[STK-031] Provider '{capability}' for node '{node}' timed out after {timeout_ms}ms")]
    ProviderTimeout {
        node: String,
        capability: String,
        timeout_ms: u64,
    },

    #[error("[STK-032] Node '{node}' produced no output '{output}'")]
    MissingOutput { node: String, output: String },

    #[error("[STK-033] Path '{path}' not found in value")]
    PathNotFound { path: String },

    // ═══════════════════════════════════════════
    // PROPAGATION MARKERS (040-049)
    // ═══════════════════════════════════════════
    #[error("[STK-040] Node '{node}' failed: {cause}")]
    UpstreamFailure {
        node: String,
        #[source]
        cause: Box<StackError>,
    },

    #[error("[STK-041] Node '{node}' is omitted (inclusion condition is false)")]
    Omitted { node: String },

    #[error("[STK-042] Node '{node}' was not materialized: run cancelled")]
    Cancelled { node: String },

    #[error("[STK-043] Deferred value abandoned: its producer was dropped before completing")]
    Abandoned,

    // ═══════════════════════════════════════════
    // IO ERRORS (090-099)
    // ═══════════════════════════════════════════
    #[error("[STK-090] IO error on '{path}': {reason}")]
    Io { path: String, reason: String },
}

impl StackError {
    /// Wrap a failure as the failure of `node`, keeping the cause chain.
    pub fn upstream(node: impl Into<String>, cause: StackError) -> Self {
        Self::UpstreamFailure {
            node: node.into(),
            cause: Box::new(cause),
        }
    }

    /// Errors detected before any provider runs (abort the whole run)
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::MissingConfiguration { .. }
                | Self::InvalidConfiguration { .. }
                | Self::ConfigError { .. }
                | Self::ProgramParse { .. }
                | Self::InvalidExpression { .. }
                | Self::MissingInput { .. }
                | Self::UnknownCapability { .. }
                | Self::DuplicateNode { .. }
                | Self::UnknownNode { .. }
                | Self::CyclicDependency { .. }
                | Self::DuplicateExport { .. }
                | Self::ExportsFinalized { .. }
                | Self::ForeignNode { .. }
        )
    }

    /// The originating error of an `UpstreamFailure` chain
    pub fn root_cause(&self) -> &StackError {
        let mut current = self;
        while let Self::UpstreamFailure { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// Short machine name of the variant (used by reports and JSON output)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingConfiguration { .. } => "MissingConfiguration",
            Self::InvalidConfiguration { .. } => "InvalidConfiguration",
            Self::ConfigError { .. } => "ConfigError",
            Self::ProgramParse { .. } => "ProgramParse",
            Self::InvalidExpression { .. } => "InvalidExpression",
            Self::MissingInput { .. } => "MissingInput",
            Self::UnknownCapability { .. } => "UnknownCapability",
            Self::DuplicateNode { .. } => "DuplicateNode",
            Self::UnknownNode { .. } => "UnknownNode",
            Self::CyclicDependency { .. } => "CyclicDependency",
            Self::DuplicateExport { .. } => "DuplicateExport",
            Self::ExportsFinalized { .. } => "ExportsFinalized",
            Self::ForeignNode { .. } => "ForeignNode",
            Self::ReferenceNotFound { .. } => "ReferenceNotFound",
            Self::OutputNotFound { .. } => "OutputNotFound",
            Self::BackendError { .. } => "BackendError",
            Self::ProviderError { .. } => "ProviderError",
            Self::ProviderTimeout { .. } => "ProviderTimeout",
            Self::MissingOutput { .. } => "MissingOutput",
            Self::PathNotFound { .. } => "PathNotFound",
            Self::UpstreamFailure { .. } => "UpstreamFailure",
            Self::Omitted { .. } => "Omitted",
            Self::Cancelled { .. } => "Cancelled",
            Self::Abandoned => "Abandoned",
            Self::Io { .. } => "Io",
        }
    }
}

impl FixSuggestion for StackError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            StackError::MissingConfiguration { .. } => {
                Some("Set the option with -c key=value, STACKWIRE_CONFIG_<KEY>, or the [config] table")
            }
            StackError::InvalidConfiguration { .. } => {
                Some("Use true/false for flags and plain numbers for numeric options")
            }
            StackError::ConfigError { .. } => Some("Check the config file is valid TOML"),
            StackError::ProgramParse { .. } => Some("Check YAML syntax: indentation and quoting"),
            StackError::InvalidExpression { .. } => {
                Some("Use ${config.KEY}, ${ref.ALIAS.KEY} or ${NODE.OUTPUT}")
            }
            StackError::MissingInput { .. } => {
                Some("Add the input to the node declaration; it may still be a deferred value")
            }
            StackError::UnknownCapability { .. } => {
                Some("Register a provider for the capability before declaring nodes")
            }
            StackError::DuplicateNode { .. } => Some("Use unique node names"),
            StackError::UnknownNode { .. } => {
                Some("Declare the referenced node or fix the reference name")
            }
            StackError::CyclicDependency { .. } => {
                Some("Break the cycle: a node cannot depend on its own outputs")
            }
            StackError::DuplicateExport { .. } => Some("Use unique export names"),
            StackError::ExportsFinalized { .. } => Some("Register exports before finalizing"),
            StackError::ForeignNode { .. } => {
                Some("Declare every node of a run on the same GraphBuilder")
            }
            StackError::ReferenceNotFound { .. } => {
                Some("Deploy the referenced unit first or fix the unit name")
            }
            StackError::OutputNotFound { .. } => {
                Some("Export the key from the referenced unit or use a default")
            }
            StackError::BackendError { .. } => Some("Check the state backend is reachable"),
            StackError::ProviderError { .. } => Some("Inspect the provider's error message"),
            StackError::ProviderTimeout { .. } => {
                Some("Raise the provider timeout or check the provider is responsive")
            }
            StackError::MissingOutput { .. } => {
                Some("Check the provider returns every output consumers reference")
            }
            StackError::PathNotFound { .. } => {
                Some("Check the path exists in the value (a.b or a[0].b)")
            }
            StackError::UpstreamFailure { .. } => Some("Fix the root cause reported above"),
            StackError::Omitted { .. } => None,
            StackError::Cancelled { .. } => None,
            StackError::Abandoned => None,
            StackError::Io { .. } => Some("Check file path and permissions"),
        }
    }
}
