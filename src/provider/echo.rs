//! Echo provider: inputs become outputs
//!
//! Extra outputs may be templated on inputs: `"ws-{teamName}"`. A template
//! that is exactly one placeholder keeps the input's JSON type.

use std::collections::BTreeMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{render, CapabilityProvider, Inputs, Outputs};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z0-9_\-]+)\}").expect("placeholder regex is valid")
});

#[derive(Debug, Clone, Default)]
pub struct EchoProvider {
    required: Vec<String>,
    templates: BTreeMap<String, String>,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requiring<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Add an output computed from a template over the inputs
    pub fn with_output(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(name.into(), template.into());
        self
    }

    fn expand(template: &str, inputs: &Inputs) -> Value {
        if let Some(caps) = PLACEHOLDER.captures(template) {
            if caps[0].len() == template.len() {
                if let Some(value) = inputs.get(&caps[1]) {
                    return value.clone();
                }
            }
        }

        let expanded = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
            inputs
                .get(&caps[1])
                .map(render)
                .unwrap_or_else(|| caps[0].to_string())
        });
        Value::String(expanded.into_owned())
    }
}

#[async_trait]
impl CapabilityProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn required_inputs(&self) -> &[String] {
        &self.required
    }

    async fn invoke(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let mut outputs = inputs.clone();
        for (name, template) in &self.templates {
            outputs.insert(name.clone(), Self::expand(template, inputs));
        }
        Ok(outputs)
    }
}
