//! Mock provider for testing
//!
//! Returns configurable outputs without touching anything real.
//! Records every invocation and the peak number of concurrent calls.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{CapabilityProvider, Inputs, Outputs};

/// Mock provider with scripted behaviour
#[derive(Clone, Default)]
pub struct MockProvider {
    outputs: Outputs,
    passthrough: bool,
    failure: Option<String>,
    /// Transient failures to return before succeeding
    flaky: Arc<AtomicU32>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
    required: Vec<String>,
    calls: Arc<Mutex<Vec<Inputs>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a fixed output
    pub fn with_output(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    /// Copy every input into the outputs as well
    pub fn passthrough(mut self) -> Self {
        self.passthrough = true;
        self
    }

    /// Always fail with `message`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Fail `times` calls with a transient error, then behave normally
    pub fn flaky(self, times: u32) -> Self {
        self.flaky.store(times, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn requiring<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Inputs of every invocation so far
    pub fn calls(&self) -> Vec<Inputs> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of invocations observed in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn required_inputs(&self) -> &[String] {
        &self.required
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn invoke(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        self.calls.lock().push(inputs.clone());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = &self.failure {
            bail!("{message}");
        }

        let remaining = self.flaky.load(Ordering::SeqCst);
        if remaining > 0 {
            self.flaky.store(remaining - 1, Ordering::SeqCst);
            bail!("service temporarily unavailable (503)");
        }

        let mut outputs = if self.passthrough {
            inputs.clone()
        } else {
            Outputs::new()
        };
        outputs.extend(self.outputs.clone());
        Ok(outputs)
    }
}
