//! Materialization driver - one tokio task per included node
//!
//! Each task:
//! 1. awaits its input deferreds (upstream outputs, reference lookups)
//! 2. takes a permit from the run's semaphore (`max_concurrency`)
//! 3. invokes its provider under a timeout
//! 4. settles the node's result cell, which releases every dependent
//!
//! Ordering follows from the deferreds themselves: a dependent cannot get
//! past step 1 before its dependencies' result cells resolve. Independent
//! nodes run concurrently. Cancellation stops nodes before step 3;
//! invocations already running are allowed to finish.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::deferred::{Completer, Deferred, Outcome};
use crate::error::StackError;
use crate::event::{EventKind, EventLog};
use crate::graph::{Graph, NodeResult};
use crate::provider::{CapabilityProvider, Inputs};

use super::context::RunContext;
use super::report::NodeOutcome;

/// Everything a node task owns
struct NodeJob {
    name: Arc<str>,
    capability: String,
    provider: Arc<dyn CapabilityProvider>,
    inputs: Vec<(String, Deferred<Value>)>,
    completer: Completer<NodeResult>,
}

/// Run-wide handles shared by every node task
#[derive(Clone)]
struct TaskEnv {
    events: EventLog,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    default_timeout: Duration,
    fail_fast: bool,
}

/// Walks a validated graph and materializes every included node
pub struct Materializer<'a> {
    ctx: &'a RunContext,
}

impl<'a> Materializer<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Materialize `graph`; returns the outcome of every node by name
    #[instrument(name = "materialize", skip_all, fields(run_id = %self.ctx.run_id(), nodes = graph.len()))]
    pub async fn run(&self, graph: Graph) -> BTreeMap<String, NodeOutcome> {
        let started = Instant::now();
        let settings = self.ctx.settings();
        let events = self.ctx.events().clone();
        let (mut nodes, order) = graph.into_parts();

        let omitted_count = nodes.iter().filter(|n| n.is_omitted()).count();
        info!(scheduled = order.len(), omitted = omitted_count, "Starting materialization");

        events.emit(EventKind::RunStarted {
            run_id: self.ctx.run_id().to_string(),
            node_count: order.len(),
            omitted_count,
        });

        let mut outcomes = BTreeMap::new();
        for node in nodes.iter().filter(|n| n.is_omitted()) {
            let cause = node.omitted_by().unwrap_or(node.name()).to_string();
            events.emit(EventKind::NodeOmitted {
                node: node.name_arc(),
                cause: Arc::from(cause.as_str()),
            });
            outcomes.insert(node.name().to_string(), NodeOutcome::Omitted { cause });
        }

        let env = TaskEnv {
            events: events.clone(),
            cancel: self.ctx.cancel_token(),
            permits: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            default_timeout: settings.provider_timeout(),
            fail_fast: settings.fail_fast,
        };

        let names: Vec<Arc<str>> = nodes.iter().map(|n| n.name_arc()).collect();
        let mut scheduled = Vec::with_capacity(order.len());
        let mut tasks = JoinSet::new();

        for id in order {
            let node = &mut nodes[id.index()];
            let Some(completer) = node.take_completer() else {
                continue;
            };

            let dependencies: Vec<Arc<str>> = node
                .dependencies()
                .iter()
                .map(|d| Arc::clone(&names[d.index()]))
                .collect();
            debug!(node = %node.name(), deps = dependencies.len(), "Scheduling node");
            events.emit(EventKind::NodeScheduled {
                node: node.name_arc(),
                capability: node.capability().to_string(),
                dependencies,
            });

            let job = NodeJob {
                name: node.name_arc(),
                capability: node.capability().to_string(),
                provider: node.provider(),
                inputs: node
                    .inputs()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                completer,
            };
            scheduled.push(node.name().to_string());
            tasks.spawn(materialize_node(job, env.clone()));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    outcomes.insert(name.to_string(), outcome);
                }
                // The task's completer was dropped: dependents settle with `Abandoned`.
                Err(e) => warn!(error = %e, "Node task panicked"),
            }
        }

        for name in scheduled {
            outcomes.entry(name).or_insert(NodeOutcome::Failed {
                error: StackError::Abandoned,
                duration: Duration::ZERO,
            });
        }

        let succeeded = outcomes.values().filter(|o| o.is_success()).count();
        let failed = outcomes
            .values()
            .filter(|o| matches!(o, NodeOutcome::Failed { .. } | NodeOutcome::Skipped { .. }))
            .count();
        let omitted = outcomes
            .values()
            .filter(|o| matches!(o, NodeOutcome::Omitted { .. }))
            .count();
        let total_duration = started.elapsed();

        events.emit(EventKind::RunCompleted {
            succeeded,
            failed,
            omitted,
            total_duration_ms: total_duration.as_millis() as u64,
        });
        info!(
            succeeded,
            failed,
            omitted,
            duration_ms = total_duration.as_millis() as u64,
            "Materialization finished"
        );

        outcomes
    }
}

async fn resolve_inputs(inputs: &[(String, Deferred<Value>)]) -> Outcome<Inputs> {
    let values = future::try_join_all(inputs.iter().map(|(_, d)| d.resolve())).await?;
    Ok(inputs.iter().map(|(k, _)| k.clone()).zip(values).collect())
}

fn cancelled(job: NodeJob, env: &TaskEnv) -> (Arc<str>, NodeOutcome) {
    debug!(node = %job.name, "Run cancelled before node started");
    env.events.emit(EventKind::NodeCancelled {
        node: Arc::clone(&job.name),
    });
    job.completer.fail(StackError::Cancelled {
        node: job.name.to_string(),
    });
    (job.name, NodeOutcome::Cancelled)
}

async fn materialize_node(job: NodeJob, env: TaskEnv) -> (Arc<str>, NodeOutcome) {
    // Suspension point: upstream outputs and reference lookups.
    let resolved = tokio::select! {
        biased;
        _ = env.cancel.cancelled() => None,
        result = resolve_inputs(&job.inputs) => Some(result),
    };

    let inputs = match resolved {
        None => return cancelled(job, &env),
        Some(Ok(inputs)) => inputs,
        Some(Err(StackError::Omitted { node: origin })) => {
            debug!(node = %job.name, cause = %origin, "Input omitted, omitting node");
            env.events.emit(EventKind::NodeOmitted {
                node: Arc::clone(&job.name),
                cause: Arc::from(origin.as_str()),
            });
            job.completer.fail(StackError::Omitted {
                node: origin.clone(),
            });
            return (job.name, NodeOutcome::Omitted { cause: origin });
        }
        Some(Err(cause)) => {
            warn!(node = %job.name, cause = %cause, "Input failed, skipping node");
            env.events.emit(EventKind::NodeSkipped {
                node: Arc::clone(&job.name),
                cause: cause.to_string(),
            });
            job.completer
                .fail(StackError::upstream(job.name.to_string(), cause.clone()));
            return (job.name, NodeOutcome::Skipped { cause });
        }
    };

    let permit = tokio::select! {
        biased;
        _ = env.cancel.cancelled() => None,
        permit = Arc::clone(&env.permits).acquire_owned() => permit.ok(),
    };
    let Some(permit) = permit else {
        return cancelled(job, &env);
    };

    env.events.emit(EventKind::NodeStarted {
        node: Arc::clone(&job.name),
        capability: job.capability.clone(),
        inputs: inputs.keys().cloned().collect(),
    });

    let limit = job.provider.timeout().unwrap_or(env.default_timeout);
    let started = Instant::now();
    let result = tokio::time::timeout(limit, job.provider.invoke(&inputs)).await;
    let duration = started.elapsed();
    drop(permit);

    let error = match result {
        Ok(Ok(outputs)) => {
            env.events.emit(EventKind::NodeCompleted {
                node: Arc::clone(&job.name),
                outputs: outputs.keys().cloned().collect(),
                duration_ms: duration.as_millis() as u64,
            });
            debug!(node = %job.name, duration_ms = duration.as_millis() as u64, "Node materialized");
            let names = outputs.keys().cloned().collect();
            job.completer.resolve(Arc::new(outputs));
            return (job.name, NodeOutcome::Succeeded { outputs: names, duration });
        }
        Ok(Err(e)) => StackError::ProviderError {
            node: job.name.to_string(),
            capability: job.capability.clone(),
            message: format!("{e:#}"),
        },
        Err(_) => StackError::ProviderTimeout {
            node: job.name.to_string(),
            capability: job.capability.clone(),
            timeout_ms: limit.as_millis() as u64,
        },
    };

    warn!(node = %job.name, error = %error, "Node failed");
    env.events.emit(EventKind::NodeFailed {
        node: Arc::clone(&job.name),
        error: error.to_string(),
        duration_ms: duration.as_millis() as u64,
    });

    if env.fail_fast && !env.cancel.is_cancelled() {
        env.events.emit(EventKind::RunCancelled {
            reason: format!("node '{}' failed (fail_fast)", job.name),
        });
        env.cancel.cancel();
    }

    job.completer
        .fail(StackError::upstream(job.name.to_string(), error.clone()));
    (job.name, NodeOutcome::Failed { error, duration })
}
