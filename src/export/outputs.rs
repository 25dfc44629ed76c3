//! Finalized run outputs with secret redaction
//!
//! `Display`, `Debug` and `Serialize` never show a secret value;
//! [`ExportOutput::reveal`] and [`RunOutputs::to_json`]`(true)` are the only
//! ways to read one.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{json, Value};

use crate::error::StackError;

/// Placeholder shown instead of a secret value
pub const REDACTED: &str = "[secret]";

/// How one export settled
#[derive(Clone, PartialEq)]
pub enum ExportValue {
    Value(Value),
    /// Derived from a node excluded from this run
    Absent { omitted: String },
    Failed(StackError),
}

/// One finalized export
#[derive(Clone, PartialEq)]
pub struct ExportOutput {
    value: ExportValue,
    secret: bool,
}

impl ExportOutput {
    pub(crate) fn new(value: ExportValue, secret: bool) -> Self {
        Self { value, secret }
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }

    /// Resolved to a value (absent markers and failures are not)
    pub fn is_success(&self) -> bool {
        matches!(self.value, ExportValue::Value(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self.value, ExportValue::Absent { .. })
    }

    pub fn error(&self) -> Option<&StackError> {
        match &self.value {
            ExportValue::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// The raw resolved value, secret or not
    pub fn reveal(&self) -> Option<&Value> {
        match &self.value {
            ExportValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Settled state; a secret value is exposed only through [`reveal`](Self::reveal)
    pub fn status(&self) -> &'static str {
        match self.value {
            ExportValue::Value(_) => "ok",
            ExportValue::Absent { .. } => "absent",
            ExportValue::Failed(_) => "failed",
        }
    }

    fn to_json(&self, show_secrets: bool) -> Value {
        match &self.value {
            ExportValue::Value(v) => {
                let shown = if self.secret && !show_secrets {
                    Value::String(REDACTED.to_string())
                } else {
                    v.clone()
                };
                json!({ "status": "ok", "secret": self.secret, "value": shown })
            }
            ExportValue::Absent { omitted } => {
                json!({ "status": "absent", "secret": self.secret, "omitted": omitted })
            }
            ExportValue::Failed(e) => json!({
                "status": "failed",
                "secret": self.secret,
                "error": e.to_string(),
                "kind": e.kind(),
                "root_cause": e.root_cause().kind(),
            }),
        }
    }
}

impl fmt::Display for ExportOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ExportValue::Value(_) if self.secret => f.write_str(REDACTED),
            ExportValue::Value(Value::String(s)) => f.write_str(s),
            ExportValue::Value(v) => write!(f, "{v}"),
            ExportValue::Absent { omitted } => write!(f, "<absent: '{omitted}' not included>"),
            ExportValue::Failed(e) => write!(f, "<failed: {e}>"),
        }
    }
}

impl fmt::Debug for ExportOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportOutput")
            .field("status", &self.status())
            .field("secret", &self.secret)
            .field("display", &self.to_string())
            .finish()
    }
}

impl Serialize for ExportOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ExportOutput", 3)?;
        state.serialize_field("status", self.status())?;
        state.serialize_field("secret", &self.secret)?;
        match &self.value {
            ExportValue::Value(_) if self.secret => state.serialize_field("value", REDACTED)?,
            ExportValue::Value(v) => state.serialize_field("value", v)?,
            ExportValue::Absent { omitted } => state.serialize_field("omitted", omitted)?,
            ExportValue::Failed(e) => state.serialize_field("error", &e.to_string())?,
        }
        state.end()
    }
}

/// Flat, name-ordered result of one run
#[derive(Clone, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct RunOutputs {
    entries: BTreeMap<String, ExportOutput>,
}

impl RunOutputs {
    pub(crate) fn new(entries: BTreeMap<String, ExportOutput>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&ExportOutput> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExportOutput)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// No export failed (absent markers are not failures)
    pub fn all_succeeded(&self) -> bool {
        self.entries.values().all(|e| e.error().is_none())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &StackError)> {
        self.entries
            .iter()
            .filter_map(|(name, e)| e.error().map(|err| (name.as_str(), err)))
    }

    /// Structured rendering; secrets are redacted unless `show_secrets`
    pub fn to_json(&self, show_secrets: bool) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(name, e)| (name.clone(), e.to_json(show_secrets)))
                .collect(),
        )
    }
}

impl fmt::Display for RunOutputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, output) in &self.entries {
            writeln!(f, "{name}: {output}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RunOutputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}
