//! Declarative stack programs (YAML)
//!
//! A stack program declares configuration, references to other deployed
//! units, capabilities, nodes and exports:
//!
//! ```yaml
//! name: team-onboarding
//! config:
//!   required: [teamName]
//!   defaults: { hubStackRef: demo/hub/dev }
//! references:
//!   hub: "${config.hubStackRef}"
//! capabilities:
//!   workspace: { builtin: echo, requires: [teamName] }
//! nodes:
//!   - id: workspace
//!     capability: workspace
//!     inputs:
//!       teamName: "${config.teamName}"
//!       location: "${ref.hub.location ?? \"westeurope\"}"
//! exports:
//!   workspaceId: "${workspace.workspaceId}"
//! ```
//!
//! [`StackProgram::plan`] lowers it into a validated graph plus exports.

mod expr;
mod lower;

pub use expr::{Expr, Piece, Source, Template};
pub use lower::Plan;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::config::{ConfigValue, StackConfig};
use crate::error::{Result, StackError};
use crate::provider::{
    CapabilityProvider, EchoProvider, ExecProvider, ProviderRegistry, RetryConfig,
    RetryingProvider,
};

/// Root of a stack program
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackProgram {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: ConfigSpec,
    /// alias → unit name (may use `${config.*}`)
    #[serde(default)]
    pub references: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, CapabilitySpec>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub exports: BTreeMap<String, ExportSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSpec {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub defaults: BTreeMap<String, ConfigValue>,
}

/// How a capability is provided
///
/// Exactly one of `builtin` (currently `echo`) or `exec` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilitySpec {
    #[serde(default)]
    pub builtin: Option<String>,
    #[serde(default)]
    pub exec: Option<Vec<String>>,
    #[serde(default)]
    pub requires: Vec<String>,
    /// Echo only: extra outputs templated on inputs (`"ws-{teamName}"`)
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Retries on transient provider errors
    #[serde(default)]
    pub retries: Option<u32>,
}

/// Inclusion condition: a literal or a (possibly negated) bool option
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum When {
    Literal(bool),
    Option(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    pub id: String,
    pub capability: String,
    #[serde(default)]
    pub when: Option<When>,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExportSpec {
    Detailed {
        value: Value,
        #[serde(default)]
        secret: bool,
    },
    Plain(Value),
}

impl ExportSpec {
    pub fn value(&self) -> &Value {
        match self {
            Self::Detailed { value, .. } | Self::Plain(value) => value,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Detailed { secret: true, .. })
    }
}

impl StackProgram {
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| StackError::ProgramParse {
            details: e.to_string(),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| StackError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Fill options the caller left unset from the program's defaults
    pub fn apply_defaults(&self, config: &mut StackConfig) {
        for (key, value) in &self.config.defaults {
            config.set_default(key.clone(), value.clone());
        }
    }

    /// Providers for every declared capability
    ///
    /// Relative exec paths resolve against `base_dir` (the program's directory).
    pub fn registry(&self, base_dir: &Path) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for (id, spec) in &self.capabilities {
            registry.register(id.clone(), build_provider(id, spec, base_dir)?);
        }
        Ok(registry)
    }
}

fn build_provider(id: &str, spec: &CapabilitySpec, base_dir: &Path) -> Result<Arc<dyn CapabilityProvider>> {
    let bad = |reason: &str| StackError::ProgramParse {
        details: format!("capability '{id}': {reason}"),
    };

    let provider: Arc<dyn CapabilityProvider> = match (&spec.builtin, &spec.exec) {
        (Some(builtin), None) => match builtin.as_str() {
            "echo" => {
                let mut echo = EchoProvider::new().requiring(spec.requires.iter().cloned());
                for (name, template) in &spec.outputs {
                    echo = echo.with_output(name.clone(), template.clone());
                }
                Arc::new(echo)
            }
            other => return Err(bad(&format!("unknown builtin '{other}'"))),
        },
        (None, Some(command)) => {
            if !spec.outputs.is_empty() {
                return Err(bad("'outputs' only applies to builtin echo"));
            }
            // The child runs in `base_dir`, so relative script paths must be absolute.
            let root = if base_dir.is_absolute() {
                base_dir.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(base_dir))
                    .unwrap_or_else(|_| base_dir.to_path_buf())
            };
            let mut command = command.clone();
            if let Some(program) = command.first_mut() {
                let path = PathBuf::from(program.as_str());
                if path.is_relative() && path.components().count() > 1 {
                    *program = root.join(path).display().to_string();
                }
            }
            let mut exec = ExecProvider::new(&command)
                .map_err(|e| bad(&e.to_string()))?
                .requiring(spec.requires.iter().cloned())
                .in_dir(base_dir);
            if let Some(secs) = spec.timeout_secs {
                exec = exec.with_timeout(Duration::from_secs(secs));
            }
            Arc::new(exec)
        }
        (Some(_), Some(_)) => return Err(bad("set either 'builtin' or 'exec', not both")),
        (None, None) => return Err(bad("needs 'builtin' or 'exec'")),
    };

    if spec.timeout_secs.is_some() && spec.builtin.is_some() {
        return Err(bad("'timeout_secs' only applies to exec"));
    }

    Ok(match spec.retries {
        Some(retries) if retries > 0 => Arc::new(RetryingProvider::new(
            provider,
            RetryConfig::default().with_max_retries(retries),
        )),
        _ => provider,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROGRAM: &str = r#"
name: team-onboarding
config:
  required: [teamName]
  defaults:
    environment: dev
    createEntraResources: false
references:
  hub: "${config.hubStackRef}"
capabilities:
  workspace:
    builtin: echo
    requires: [teamName]
    outputs:
      workspaceId: "ws-{teamName}"
  identity:
    exec: ["./identity.sh", "--team"]
    timeout_secs: 30
    retries: 2
nodes:
  - id: workspace
    capability: workspace
    inputs:
      teamName: "${config.teamName}"
  - id: identity
    capability: identity
    when: createEntraResources
exports:
  workspaceId: "${workspace.workspaceId}"
  password:
    value: "${identity.password}"
    secret: true
"#;

    #[test]
    fn parses_a_program() {
        let program = StackProgram::parse(PROGRAM).unwrap();
        assert_eq!(program.name, "team-onboarding");
        assert_eq!(program.config.required, vec!["teamName"]);
        assert_eq!(program.nodes.len(), 2);
        assert_eq!(
            program.nodes[1].when,
            Some(When::Option("createEntraResources".into()))
        );
        assert!(program.exports["password"].is_secret());
        assert!(!program.exports["workspaceId"].is_secret());
        assert_eq!(program.exports["workspaceId"].value(), &json!("${workspace.workspaceId}"));
    }

    #[test]
    fn defaults_do_not_override_caller_values() {
        let program = StackProgram::parse(PROGRAM).unwrap();
        let mut config = StackConfig::new().with("environment", "prod");
        program.apply_defaults(&mut config);

        assert_eq!(config.require("environment").unwrap(), "prod");
        assert_eq!(config.get_bool("createEntraResources").unwrap(), Some(false));
    }

    #[test]
    fn builds_registry_from_capabilities() {
        let program = StackProgram::parse(PROGRAM).unwrap();
        let registry = program.registry(Path::new("/srv/stacks")).unwrap();

        assert_eq!(registry.capabilities(), vec!["identity", "workspace"]);
        let identity = registry.get("identity").unwrap();
        assert_eq!(identity.name(), "/srv/stacks/./identity.sh");
        assert_eq!(identity.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_bad_programs() {
        assert!(matches!(
            StackProgram::parse("name: x\nnodes: [{id: a}]"),
            Err(StackError::ProgramParse { .. })
        ));
        assert!(StackProgram::parse("name: x\nunknown: 1").is_err());

        let both = StackProgram::parse(
            "name: x\ncapabilities:\n  c: { builtin: echo, exec: [\"true\"] }",
        )
        .unwrap();
        assert!(both.registry(Path::new(".")).is_err());

        let unknown = StackProgram::parse("name: x\ncapabilities:\n  c: { builtin: teleport }").unwrap();
        assert!(unknown.registry(Path::new(".")).is_err());
    }
}
