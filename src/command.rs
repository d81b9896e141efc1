//! Shell command execution.
//!
//! The remediation loop never spawns processes directly; it goes through the
//! [`CommandRunner`] trait so tests can script tool behaviour.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Process exit code. `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Creates a successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Creates a failed output with the given exit code and stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Error text of a failed command: stderr, or stdout when stderr is blank.
    pub fn diagnostic(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

/// Executes a named shell command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion.
    ///
    /// A non-zero exit is reported in the output, not as an error. Errors are
    /// reserved for failing to start the process at all.
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}

/// Runs commands through `sh -c` inside a project directory.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    working_dir: PathBuf,
    shell: String,
    environment: HashMap<String, String>,
}

impl ShellRunner {
    /// Creates a runner executing in `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            shell: "sh".to_string(),
            environment: HashMap::new(),
        }
    }

    /// Uses a different shell binary (must accept `-c`).
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Adds environment variables passed to every command.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.environment.extend(env);
        self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        tracing::info!(command = %command, dir = ?self.working_dir, "running command");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .envs(&self.environment)
            // Keep IaC tools from prompting in CI
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                let message = format!("failed to run '{}': {}", command, e);
                Error::Io(std::io::Error::new(e.kind(), message))
            })?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        tracing::debug!(command = %command, exit_code = result.exit_code, "command finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_prefers_stderr() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: "plan output".to_string(),
            stderr: "Error: syntax error line 4\n".to_string(),
        };
        assert_eq!(output.diagnostic(), "Error: syntax error line 4");
    }

    #[test]
    fn diagnostic_falls_back_to_stdout() {
        let output = CommandOutput {
            exit_code: 2,
            stdout: "ERROR! the playbook could not be parsed\n".to_string(),
            stderr: "  \n".to_string(),
        };
        assert_eq!(output.diagnostic(), "ERROR! the playbook could not be parsed");
    }

    #[tokio::test]
    async fn shell_runner_captures_exit_code_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(dir.path());

        let output = runner.run("echo out; echo err >&2; exit 3").await.unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.succeeded());
    }

    #[tokio::test]
    async fn shell_runner_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let runner = ShellRunner::new(dir.path());

        let output = runner.run("cat marker.txt").await.unwrap();

        assert!(output.succeeded());
        assert_eq!(output.stdout, "here");
    }

    #[tokio::test]
    async fn shell_runner_passes_environment() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(dir.path())
            .with_env(HashMap::from([("AUTOFIX_TEST_VAR".to_string(), "42".to_string())]));

        let output = runner.run("printf %s \"$AUTOFIX_TEST_VAR\"").await.unwrap();

        assert_eq!(output.stdout, "42");
    }

    #[tokio::test]
    async fn missing_shell_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(dir.path()).with_shell("/nonexistent/shell");

        assert!(runner.run("true").await.is_err());
    }
}
