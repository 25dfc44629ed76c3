//! Exec provider: delegate materialization to an external command
//!
//! Protocol:
//! - inputs are written to stdin as one JSON object
//! - the command prints one JSON object on stdout (its outputs)
//! - a non-zero exit status fails the node; stderr becomes the message

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{CapabilityProvider, Inputs, Outputs};

#[derive(Debug, Clone)]
pub struct ExecProvider {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    required: Vec<String>,
    timeout: Option<Duration>,
}

impl ExecProvider {
    /// `command[0]` is the program, the rest are arguments
    pub fn new(command: &[String]) -> anyhow::Result<Self> {
        let (program, args) = command
            .split_first()
            .context("exec provider needs a command")?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: None,
            required: Vec::new(),
            timeout: None,
        })
    }

    pub fn requiring<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Relative programs and paths resolve against `dir`
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl CapabilityProvider for ExecProvider {
    fn name(&self) -> &str {
        &self.program
    }

    fn required_inputs(&self) -> &[String] {
        &self.required
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn invoke(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Killed if the engine times the node out.
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.program))?;

        let payload = serde_json::to_vec(inputs)?;
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A command that ignores its inputs may exit before reading them.
                if let Err(e) = stdin.write_all(&payload).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
                // Dropping stdin closes it so the command sees EOF.
            }
            Ok(())
        };

        // stdout is drained while stdin is fed, or a chatty command fills the pipe.
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed.context("failed to write inputs to stdin")?;
        let output =
            output.with_context(|| format!("failed to wait for '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let value: Value = serde_json::from_str(stdout.trim())
            .with_context(|| format!("'{}' did not print JSON on stdout", self.program))?;

        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => bail!(
                "'{}' must print a JSON object, got {}",
                self.program,
                other
            ),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(script: &str) -> ExecProvider {
        ExecProvider::new(&["sh".to_string(), "-c".to_string(), script.to_string()]).unwrap()
    }

    #[tokio::test]
    async fn reads_json_outputs() {
        let provider = sh(r#"cat > /dev/null; echo '{"identityId": "sp-1", "count": 2}'"#);
        let outputs = provider.invoke(&Inputs::new()).await.unwrap();
        assert_eq!(outputs["identityId"], json!("sp-1"));
        assert_eq!(outputs["count"], json!(2));
    }

    #[tokio::test]
    async fn inputs_arrive_on_stdin() {
        let provider = sh(r#"printf '{"received": %s}' "$(cat)""#);
        let inputs: Inputs = [("teamName".to_string(), json!("data-eng"))].into_iter().collect();
        let outputs = provider.invoke(&inputs).await.unwrap();
        assert_eq!(outputs["received"], json!({"teamName": "data-eng"}));
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let provider = sh("echo 'quota exceeded' >&2; exit 3");
        let err = provider.invoke(&Inputs::new()).await.unwrap_err();
        assert!(format!("{err:#}").contains("quota exceeded"));
    }

    #[tokio::test]
    async fn non_object_stdout_is_an_error() {
        let provider = sh("echo '[1, 2]'");
        assert!(provider.invoke(&Inputs::new()).await.is_err());
    }

    #[tokio::test]
    async fn large_inputs_stream_through_without_blocking() {
        let provider = ExecProvider::new(&["cat".to_string()])
            .unwrap()
            .with_timeout(Duration::from_secs(5));
        let blob = "x".repeat(1 << 20);
        let inputs: Inputs = [("blob".to_string(), json!(blob))].into_iter().collect();

        let outputs = tokio::time::timeout(Duration::from_secs(5), provider.invoke(&inputs))
            .await
            .expect("cat should echo its input before the deadline")
            .unwrap();
        assert_eq!(outputs["blob"].as_str().map(str::len), Some(1 << 20));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(ExecProvider::new(&[]).is_err());
    }
}
