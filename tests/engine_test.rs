//! Engine integration tests
//!
//! End-to-end runs through `RunContext`: graph building, materialization,
//! reference caching and export finalization.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use stackwire::{
    Deferred, EngineSettings, Event, EventKind, ExportSet, MemoryBackend, MockProvider,
    NodeOutcome, ProviderRegistry, RunContext, StackConfig, StackError,
};

fn context(registry: ProviderRegistry, settings: EngineSettings) -> RunContext {
    RunContext::new(
        StackConfig::new(),
        settings,
        registry,
        Arc::new(MemoryBackend::new()),
    )
}

fn no_inputs() -> Vec<(String, Deferred<Value>)> {
    Vec::new()
}

fn position(events: &[Event], matches: impl Fn(&EventKind) -> bool) -> u64 {
    events
        .iter()
        .find(|e| matches(&e.kind))
        .map(|e| e.id)
        .expect("event not recorded")
}

// ============================================================================
// Provenance and resolution
// ============================================================================

#[test]
fn provenance_edges_follow_map_and_combine() {
    let registry = ProviderRegistry::new()
        .with("net", Arc::new(MockProvider::new()))
        .with("dns", Arc::new(MockProvider::new()))
        .with("consumer", Arc::new(MockProvider::new()));
    let ctx = context(registry, EngineSettings::default());
    let mut builder = ctx.graph_builder();

    // Consumers are declared before the producers they read from.
    let a = builder.node_output("network", "vnetId");
    let d = builder.node_output("dns", "zone");
    let b = a.map(|id| json!(format!("{id}/subnets/default")));
    let c = a.combine(&d, |id, zone| json!([id, zone]));

    builder.add_node("subnet", "consumer", [("id", b)], true).unwrap();
    builder.add_node("peering", "consumer", [("pair", c)], true).unwrap();
    builder.add_node("network", "net", no_inputs(), true).unwrap();
    builder.add_node("dns", "dns", no_inputs(), true).unwrap();

    let graph = builder.build().unwrap();
    assert!(graph.has_edge("subnet", "network"));
    assert!(graph.has_edge("peering", "network"));
    assert!(graph.has_edge("peering", "dns"));
    assert!(!graph.has_edge("subnet", "dns"));

    let order: Vec<&str> = graph.scheduled().map(|n| n.name()).collect();
    assert_eq!(order, vec!["network", "subnet", "dns", "peering"]);
}

#[tokio::test]
async fn settled_values_never_change() {
    let (completer, pending) = Deferred::<Value>::pending();
    let derived = pending.map(|v| json!({ "wrapped": v }));
    assert!(pending.try_now().is_none());

    completer.resolve(json!("vnet-1"));
    let first = derived.resolve().await;
    let second = derived.resolve().await;
    assert_eq!(first, Ok(json!({ "wrapped": "vnet-1" })));
    assert_eq!(first, second);
    assert_eq!(pending.try_now(), Some(Ok(json!("vnet-1"))));

    let failed = Deferred::<Value>::failed(StackError::Abandoned);
    let mapped = failed.map(|_| json!("never"));
    assert_eq!(mapped.resolve().await, Err(StackError::Abandoned));
    assert_eq!(mapped.resolve().await, Err(StackError::Abandoned));
}

// ============================================================================
// Omission
// ============================================================================

#[tokio::test]
async fn omitted_nodes_never_invoke_their_provider() {
    let identity = MockProvider::new().with_output("identityId", json!("sp-1"));
    let role = MockProvider::new().passthrough();
    let registry = ProviderRegistry::new()
        .with("identity", Arc::new(identity.clone()))
        .with("role", Arc::new(role.clone()));
    let ctx = context(registry, EngineSettings::default());

    let mut builder = ctx.graph_builder();
    let handle = builder.add_node("identity", "identity", no_inputs(), false).unwrap();
    builder
        .add_node("role", "role", [("principal", handle.output("identityId"))], true)
        .unwrap();

    assert_eq!(
        handle.output("identityId").resolve().await,
        Err(StackError::Omitted {
            node: "identity".into()
        })
    );

    let exports = ExportSet::new();
    exports.export("identityId", handle.output("identityId")).unwrap();
    let graph = builder.build().unwrap();
    assert_eq!(graph.omitted().count(), 2);

    let report = ctx.run(graph, &exports).await;
    assert_eq!(identity.call_count(), 0);
    assert_eq!(role.call_count(), 0);
    assert_eq!(
        report.node("identity"),
        Some(&NodeOutcome::Omitted {
            cause: "identity".into()
        })
    );
    assert_eq!(
        report.node("role"),
        Some(&NodeOutcome::Omitted {
            cause: "identity".into()
        })
    );

    let output = report.outputs.get("identityId").unwrap();
    assert!(output.is_absent());
    assert!(report.all_succeeded());
}

// ============================================================================
// Structural errors
// ============================================================================

#[test]
fn cycles_are_rejected_before_any_provider_runs() {
    let provider = MockProvider::new().passthrough();
    let registry = ProviderRegistry::new().with("echo", Arc::new(provider.clone()));
    let ctx = context(registry, EngineSettings::default());

    let mut builder = ctx.graph_builder();
    let from_b = builder.node_output("b", "out");
    let a = builder.add_node("a", "echo", [("in", from_b)], true).unwrap();
    builder.add_node("b", "echo", [("in", a.output("out"))], true).unwrap();

    match builder.build() {
        Err(StackError::CyclicDependency { cycle }) => {
            assert!(cycle.contains('a') && cycle.contains('b'), "cycle: {cycle}")
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert_eq!(provider.call_count(), 0);
    assert!(ctx.events().is_empty());
}

#[test]
fn missing_configuration_reports_every_key() {
    let config = StackConfig::new().with("environment", "dev");
    let ctx = RunContext::new(
        config,
        EngineSettings::default(),
        ProviderRegistry::new(),
        Arc::new(MemoryBackend::new()),
    );

    let err = ctx
        .require_config(["teamName", "environment", "spokeCidr"])
        .unwrap_err();
    assert_eq!(
        err,
        StackError::MissingConfiguration {
            keys: vec!["teamName".into(), "spokeCidr".into()]
        }
    );
    assert!(err.is_structural());
}

// ============================================================================
// Partial failure
// ============================================================================

#[tokio::test]
async fn failures_stay_in_their_subtree() {
    let registry = ProviderRegistry::new()
        .with(
            "network",
            Arc::new(MockProvider::new().with_output("networkId", json!("net-1"))),
        )
        .with(
            "identity",
            Arc::new(MockProvider::new().failing("quota exceeded")),
        )
        .with(
            "workspace",
            Arc::new(
                MockProvider::new()
                    .requiring(["networkId"])
                    .with_output("workspaceId", json!("ws-1")),
            ),
        );
    let ctx = context(registry, EngineSettings::default());

    let mut builder = ctx.graph_builder();
    let network = builder.add_node("network", "network", no_inputs(), true).unwrap();
    let identity = builder.add_node("identity", "identity", no_inputs(), true).unwrap();
    let workspace = builder
        .add_node(
            "workspace",
            "workspace",
            [("networkId", network.output("networkId"))],
            true,
        )
        .unwrap();

    let exports = ExportSet::new();
    exports.export("networkId", network.output("networkId")).unwrap();
    exports.export("identityId", identity.output("identityId")).unwrap();
    exports.export("workspaceId", workspace.output("workspaceId")).unwrap();

    let report = ctx.run(builder.build().unwrap(), &exports).await;
    let outputs = &report.outputs;

    assert_eq!(outputs.get("networkId").unwrap().reveal(), Some(&json!("net-1")));
    assert_eq!(outputs.get("workspaceId").unwrap().reveal(), Some(&json!("ws-1")));

    match outputs.get("identityId").unwrap().error() {
        Some(StackError::UpstreamFailure { node, cause }) => {
            assert_eq!(node, "identity");
            assert!(matches!(**cause, StackError::ProviderError { .. }));
        }
        other => panic!("expected UpstreamFailure, got {other:?}"),
    }

    assert!(!report.all_succeeded());
    let failed: Vec<&str> = report.failed_nodes().map(|(name, _)| name).collect();
    assert_eq!(failed, vec!["identity"]);
    assert!(report.node("workspace").unwrap().is_success());
}

#[tokio::test]
async fn dependents_of_a_failed_node_are_skipped() {
    let downstream = MockProvider::new().passthrough();
    let registry = ProviderRegistry::new()
        .with("broken", Arc::new(MockProvider::new().failing("boom")))
        .with("downstream", Arc::new(downstream.clone()));
    let ctx = context(registry, EngineSettings::default());

    let mut builder = ctx.graph_builder();
    let broken = builder.add_node("broken", "broken", no_inputs(), true).unwrap();
    let child = builder
        .add_node("child", "downstream", [("id", broken.output("id"))], true)
        .unwrap();

    let exports = ExportSet::new();
    exports.export("childId", child.output("id")).unwrap();
    let report = ctx.run(builder.build().unwrap(), &exports).await;

    assert_eq!(downstream.call_count(), 0);
    assert!(matches!(report.node("child"), Some(NodeOutcome::Skipped { .. })));

    let error = report.outputs.get("childId").unwrap().error().unwrap();
    assert!(matches!(error, StackError::UpstreamFailure { node, .. } if node == "child"));
    assert!(matches!(error.root_cause(), StackError::ProviderError { .. }));
}

// ============================================================================
// References
// ============================================================================

#[tokio::test]
async fn reference_outputs_are_looked_up_once() {
    let backend = Arc::new(
        MemoryBackend::new().with_unit("demo/hub/dev", [("vnetId", json!("vnet-hub"))]),
    );
    let ctx = RunContext::new(
        StackConfig::new(),
        EngineSettings::default(),
        ProviderRegistry::new(),
        backend.clone(),
    );

    let first = ctx.stack_reference("demo/hub/dev").await.unwrap();
    let second = ctx.stack_reference("demo/hub/dev").await.unwrap();
    let a = first.get_output("vnetId");
    let b = second.get_output("vnetId");

    assert_eq!(a.resolve().await, Ok(json!("vnet-hub")));
    assert_eq!(b.resolve().await, Ok(json!("vnet-hub")));
    assert_eq!(backend.lookup_count(), 1);
    assert_eq!(ctx.events().lookups("demo/hub/dev", "vnetId"), 1);
}

#[tokio::test]
async fn reference_errors_are_distinct() {
    let backend = Arc::new(MemoryBackend::new().with_unit("demo/hub/dev", [("vnetId", json!("v"))]));
    let ctx = RunContext::new(
        StackConfig::new(),
        EngineSettings::default(),
        ProviderRegistry::new(),
        backend,
    );

    assert_eq!(
        ctx.stack_reference("demo/hub/prod").await.unwrap_err(),
        StackError::ReferenceNotFound {
            unit: "demo/hub/prod".into()
        }
    );

    let hub = ctx.stack_reference("demo/hub/dev").await.unwrap();
    assert_eq!(
        hub.get_output("dnsZone").resolve().await,
        Err(StackError::OutputNotFound {
            unit: "demo/hub/dev".into(),
            key: "dnsZone".into()
        })
    );
    assert_eq!(
        hub.get_output_or("dnsZone", json!("internal")).resolve().await,
        Ok(json!("internal"))
    );
}

// ============================================================================
// Exports
// ============================================================================

#[tokio::test]
async fn secrets_are_redacted_in_every_rendering() {
    let registry = ProviderRegistry::new().with(
        "identity",
        Arc::new(MockProvider::new().with_output("password", json!("hunter2-s3cret"))),
    );
    let ctx = context(registry, EngineSettings::default());

    let mut builder = ctx.graph_builder();
    let identity = builder.add_node("identity", "identity", no_inputs(), true).unwrap();
    let exports = ExportSet::new();
    exports.export_secret("password", identity.output("password")).unwrap();

    let report = ctx.run(builder.build().unwrap(), &exports).await;
    let outputs = &report.outputs;
    let secret = "hunter2-s3cret";

    assert!(!outputs.to_string().contains(secret));
    assert!(!format!("{outputs:?}").contains(secret));
    assert!(!serde_json::to_string(&**outputs).unwrap().contains(secret));
    assert!(!outputs.to_json(false).to_string().contains(secret));
    assert!(!report.to_json(false).to_string().contains(secret));
    assert!(!ctx.events().to_json().to_string().contains(secret));

    let password = outputs.get("password").unwrap();
    assert!(password.is_secret());
    assert_eq!(password.to_string(), "[secret]");
    assert_eq!(password.reveal(), Some(&json!(secret)));
    assert!(outputs.to_json(true).to_string().contains(secret));
}

#[tokio::test]
async fn finalize_is_idempotent() {
    let exports = ExportSet::new();
    exports.export("region", Deferred::of(json!("westeurope"))).unwrap();

    let first = exports.finalize().await;
    let second = exports.finalize().await;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        exports.export("late", Deferred::of(json!(1))).unwrap_err(),
        StackError::ExportsFinalized {
            name: "late".into()
        }
    );
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test]
async fn dependents_start_after_dependencies_resolve() {
    let registry = ProviderRegistry::new()
        .with(
            "network",
            Arc::new(
                MockProvider::new()
                    .with_delay(Duration::from_millis(40))
                    .with_output("networkId", json!("net-1")),
            ),
        )
        .with("workspace", Arc::new(MockProvider::new().passthrough()));
    let ctx = context(registry, EngineSettings::default());

    let mut builder = ctx.graph_builder();
    // Declared first, scheduled second.
    let network_id = builder.node_output("network", "networkId");
    builder
        .add_node("workspace", "workspace", [("networkId", network_id)], true)
        .unwrap();
    builder.add_node("network", "network", no_inputs(), true).unwrap();

    let report = ctx.run(builder.build().unwrap(), &ExportSet::new()).await;
    assert!(report.node("workspace").unwrap().is_success());

    let events = ctx.events().events();
    let network_done = position(&events, |k| {
        matches!(k, EventKind::NodeCompleted { node, .. } if &**node == "network")
    });
    let workspace_started = position(&events, |k| {
        matches!(k, EventKind::NodeStarted { node, .. } if &**node == "workspace")
    });
    assert!(network_done < workspace_started);

    let started = ctx.events().filter_node("workspace");
    match &started.iter().find(|e| matches!(e.kind, EventKind::NodeStarted { .. })).unwrap().kind {
        EventKind::NodeStarted { inputs, .. } => assert_eq!(inputs, &vec!["networkId".to_string()]),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let provider = MockProvider::new()
        .with_delay(Duration::from_millis(30))
        .with_output("id", json!("x"));
    let registry = ProviderRegistry::new().with("worker", Arc::new(provider.clone()));
    let ctx = context(registry, EngineSettings::default().with_max_concurrency(2));

    let mut builder = ctx.graph_builder();
    for i in 0..6 {
        builder
            .add_node(&format!("worker-{i}"), "worker", no_inputs(), true)
            .unwrap();
    }

    let report = ctx.run(builder.build().unwrap(), &ExportSet::new()).await;
    assert_eq!(provider.call_count(), 6);
    assert!(provider.peak_concurrency() <= 2, "peak {}", provider.peak_concurrency());
    assert!(report.nodes.values().all(NodeOutcome::is_success));
}

#[tokio::test]
async fn slow_providers_time_out() {
    let registry = ProviderRegistry::new().with(
        "slow",
        Arc::new(
            MockProvider::new()
                .with_delay(Duration::from_millis(500))
                .with_timeout(Duration::from_millis(20)),
        ),
    );
    let ctx = context(registry, EngineSettings::default());

    let mut builder = ctx.graph_builder();
    let slow = builder.add_node("slow", "slow", no_inputs(), true).unwrap();
    let exports = ExportSet::new();
    exports.export("result", slow.output("result")).unwrap();

    let report = ctx.run(builder.build().unwrap(), &exports).await;
    match report.node("slow") {
        Some(NodeOutcome::Failed { error, .. }) => assert_eq!(
            error,
            &StackError::ProviderTimeout {
                node: "slow".into(),
                capability: "slow".into(),
                timeout_ms: 20
            }
        ),
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(matches!(
        report.outputs.get("result").unwrap().error().unwrap().root_cause(),
        StackError::ProviderTimeout { .. }
    ));
}

#[tokio::test]
async fn fail_fast_stops_nodes_that_have_not_started() {
    let late = MockProvider::new().passthrough();
    let registry = ProviderRegistry::new()
        .with(
            "broken",
            Arc::new(
                MockProvider::new()
                    .with_delay(Duration::from_millis(20))
                    .failing("boom"),
            ),
        )
        .with(
            "slow",
            Arc::new(
                MockProvider::new()
                    .with_delay(Duration::from_millis(150))
                    .with_output("id", json!("slow-1")),
            ),
        )
        .with("late", Arc::new(late.clone()));
    let ctx = context(registry, EngineSettings::default().with_fail_fast(true));

    let mut builder = ctx.graph_builder();
    builder.add_node("broken", "broken", no_inputs(), true).unwrap();
    let slow = builder.add_node("slow", "slow", no_inputs(), true).unwrap();
    builder
        .add_node("late", "late", [("id", slow.output("id"))], true)
        .unwrap();

    let report = ctx.run(builder.build().unwrap(), &ExportSet::new()).await;

    assert!(matches!(report.node("broken"), Some(NodeOutcome::Failed { .. })));
    // Already in flight when the run was cancelled.
    assert!(report.node("slow").unwrap().is_success());
    assert_eq!(report.node("late"), Some(&NodeOutcome::Cancelled));
    assert_eq!(late.call_count(), 0);

    assert!(ctx
        .events()
        .run_events()
        .iter()
        .any(|e| matches!(e.kind, EventKind::RunCancelled { .. })));
}

#[tokio::test]
async fn explicit_cancel_before_run() {
    let provider = MockProvider::new().with_output("id", json!(1));
    let registry = ProviderRegistry::new().with("p", Arc::new(provider.clone()));
    let ctx = context(registry, EngineSettings::default());

    let mut builder = ctx.graph_builder();
    builder.add_node("only", "p", no_inputs(), true).unwrap();
    ctx.cancel("operator abort");

    let report = ctx.run(builder.build().unwrap(), &ExportSet::new()).await;
    assert_eq!(report.node("only"), Some(&NodeOutcome::Cancelled));
    assert_eq!(provider.call_count(), 0);
}
