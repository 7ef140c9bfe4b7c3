//! Local inference engine driven as a subprocess.
//!
//! The task content is written to the engine's stdin and its stdout is taken
//! as the response. A non-zero exit status is a provider failure; exit code
//! `2` is treated as a validation rejection, matching the usual CLI
//! convention for usage errors.

use super::Provider;
use crate::error::ProviderError;
use crate::task::{Task, TaskOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Exit code that marks the input as unusable.
const USAGE_EXIT_CODE: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEngineConfig {
    /// Engine executable.
    pub program: PathBuf,
    /// Arguments passed on every run.
    #[serde(default)]
    pub args: Vec<String>,
    /// Arguments for the health probe; the probe passes on a zero exit status.
    #[serde(default = "default_health_args")]
    pub health_args: Vec<String>,
    /// Used when the task carries no timeout of its own.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_health_args() -> Vec<String> {
    vec!["--version".to_string()]
}

fn default_timeout_secs() -> u64 {
    120
}

impl LocalEngineConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            health_args: default_health_args(),
            timeout_secs: default_timeout_secs(),
            working_dir: None,
        }
    }
}

pub struct LocalEngineProvider {
    config: LocalEngineConfig,
}

impl LocalEngineProvider {
    pub fn new(config: LocalEngineConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[String]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.config.program);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn run_engine(&self, input: &str) -> Result<std::process::Output, ProviderError> {
        let mut cmd = self.command(&self.config.args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            ProviderError::Failed(format!(
                "failed to spawn {}: {e}",
                self.config.program.display()
            ))
        })?;

        // stdin is written while stdout and stderr drain; a filter engine fills its output pipe otherwise.
        let stdin = child.stdin.take();
        let write = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            // Engines that exit without reading their input close the pipe early.
            match stdin.write_all(input.as_bytes()).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                Err(e) => Err(ProviderError::Failed(format!("failed to write stdin: {e}"))),
            }
        };

        let (written, output) = tokio::join!(write, child.wait_with_output());
        written?;
        output.map_err(|e| ProviderError::Failed(format!("failed to collect output: {e}")))
    }
}

#[async_trait]
impl Provider for LocalEngineProvider {
    async fn run(&self, task: &Task) -> Result<TaskOutput, ProviderError> {
        let timeout = task
            .constraints
            .timeout
            .unwrap_or(Duration::from_secs(self.config.timeout_secs));

        let output = match tokio::time::timeout(timeout, self.run_engine(&task.content)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProviderError::Timeout(format!(
                    "local engine exceeded {}ms",
                    timeout.as_millis()
                )))
            }
        };

        if output.status.success() {
            let content = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
            return Ok(TaskOutput::new(content).with_cost(0.0));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(USAGE_EXIT_CODE) => Err(ProviderError::Validation(stderr)),
            Some(code) => Err(ProviderError::Failed(format!("exit code {code}: {stderr}"))),
            None => Err(ProviderError::Failed(format!("terminated by signal: {stderr}"))),
        }
    }

    async fn health_check(&self) -> bool {
        let mut cmd = self.command(&self.config.health_args);
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        match tokio::time::timeout(Duration::from_secs(5), cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> LocalEngineProvider {
        let mut config = LocalEngineConfig::new("sh");
        config.args = vec!["-c".to_string(), script.to_string()];
        config.health_args = vec!["-c".to_string(), "exit 0".to_string()];
        LocalEngineProvider::new(config)
    }

    #[tokio::test]
    async fn test_stdout_becomes_output() {
        let provider = shell("cat");
        let out = provider.run(&Task::new("chat", "ping")).await.unwrap();
        assert_eq!(out.content, "ping");
        assert_eq!(out.cost, Some(0.0));
    }

    #[tokio::test]
    async fn test_large_payload_streams_through_filter() {
        let provider = shell("cat");
        let payload = "x".repeat(1024 * 1024);
        let task = Task::new("chat", payload.clone()).with_timeout(Duration::from_secs(10));
        let out = provider.run(&task).await.unwrap();
        assert_eq!(out.content.len(), payload.len());
    }

    #[tokio::test]
    async fn test_usage_exit_is_validation() {
        let provider = shell("echo bad input >&2; exit 2");
        let err = provider.run(&Task::new("chat", "x")).await.unwrap_err();
        assert_eq!(err, ProviderError::Validation("bad input".to_string()));
    }

    #[tokio::test]
    async fn test_other_exit_is_failure() {
        let provider = shell("exit 7");
        let err = provider.run(&Task::new("chat", "x")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Failed(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let provider = shell("sleep 5");
        let task = Task::new("chat", "x").with_timeout(Duration::from_millis(50));
        let err = provider.run(&task).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_health_probe() {
        assert!(shell("cat").health_check().await);
        let missing = LocalEngineProvider::new(LocalEngineConfig::new("/nonexistent/engine"));
        assert!(!missing.health_check().await);
    }
}
