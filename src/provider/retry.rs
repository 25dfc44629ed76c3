//! Retry with exponential backoff
//!
//! [`RetryingProvider`] wraps another provider and retries transient
//! failures. From the engine's side the wrapped call is still one logical
//! attempt: the node timeout covers every retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{CapabilityProvider, Inputs, Outputs};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting initial attempt)
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each time)
    pub backoff_multiplier: f64,
    /// Optional jitter factor (0.0 to 1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let jittered_delay = if self.jitter > 0.0 {
            let jitter_range = capped_delay * self.jitter;
            let jitter_offset = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
            (capped_delay + jitter_offset).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(jittered_delay as u64)
    }
}

/// Provider decorator that retries transient errors
pub struct RetryingProvider {
    inner: Arc<dyn CapabilityProvider>,
    config: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn CapabilityProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Transient-looking failures: timeouts, throttling, gateway errors
    fn is_retryable(error: &anyhow::Error) -> bool {
        let msg = format!("{error:#}").to_lowercase();
        msg.contains("timeout")
            || msg.contains("timed out")
            || msg.contains("rate limit")
            || msg.contains("connection")
            || msg.contains("temporar")
            || msg.contains("unavailable")
            || msg.contains("429")
            || msg.contains("502")
            || msg.contains("503")
            || msg.contains("504")
    }
}

#[async_trait]
impl CapabilityProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn required_inputs(&self) -> &[String] {
        self.inner.required_inputs()
    }

    fn timeout(&self) -> Option<Duration> {
        self.inner.timeout()
    }

    async fn invoke(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let mut attempt = 0;
        loop {
            match self.inner.invoke(inputs).await {
                Ok(outputs) => return Ok(outputs),
                Err(e) if attempt < self.config.max_retries && Self::is_retryable(&e) => {
                    let delay = self.config.delay_for(attempt);
                    debug!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying transient provider failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
