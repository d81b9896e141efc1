//! One-shot deployment after a passing validation.
//!
//! Deploy failures are reported, never retried, and never feed back into the
//! fix loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::command::CommandRunner;
use crate::error::Result;
use crate::tool::{Action, CommandTable, IacTool};

/// Number of trailing output lines kept as deploy detail.
const DETAIL_LINES: usize = 20;

/// Result of a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub succeeded: bool,
    /// Error text on failure.
    pub diagnostic: Option<String>,
    /// Tail of the deploy output on success.
    pub detail: Option<String>,
}

/// Runs the deploy command for a tool.
pub struct Deployer {
    runner: Arc<dyn CommandRunner>,
    commands: CommandTable,
}

impl Deployer {
    pub fn new(runner: Arc<dyn CommandRunner>, commands: CommandTable) -> Self {
        Self { runner, commands }
    }

    /// Deploys the project. A tool without a deploy command is a no-op success.
    pub async fn deploy(&self, tool: IacTool) -> Result<DeployOutcome> {
        let Some(cmd) = self.commands.command(tool, Action::Deploy) else {
            tracing::info!(tool = %tool, "no deploy command configured, skipping");
            return Ok(DeployOutcome {
                succeeded: true,
                diagnostic: None,
                detail: Some(format!("no deploy command configured for {}", tool)),
            });
        };

        let output = self.runner.run(cmd).await?;

        if output.succeeded() {
            tracing::info!(tool = %tool, "deploy succeeded");
            Ok(DeployOutcome {
                succeeded: true,
                diagnostic: None,
                detail: Some(tail(&output.stdout, DETAIL_LINES)),
            })
        } else {
            tracing::error!(tool = %tool, exit_code = output.exit_code, "deploy failed");
            Ok(DeployOutcome {
                succeeded: false,
                diagnostic: Some(output.diagnostic()),
                detail: None,
            })
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::fakes::FakeCommandRunner;

    #[tokio::test]
    async fn successful_deploy_keeps_output_tail() {
        let runner = Arc::new(FakeCommandRunner::new());
        runner.push(
            "terraform apply -auto-approve -input=false -no-color",
            CommandOutput::success("Apply complete! Resources: 1 added, 0 changed, 0 destroyed.\n"),
        );
        let deployer = Deployer::new(runner.clone(), CommandTable::new());

        let outcome = deployer.deploy(IacTool::Terraform).await.unwrap();

        assert!(outcome.succeeded);
        assert!(outcome.detail.unwrap().contains("Apply complete"));
    }

    #[tokio::test]
    async fn failed_deploy_reports_diagnostic() {
        let runner = Arc::new(FakeCommandRunner::new());
        runner.push("packer build .", CommandOutput::failure(1, "Build 'docker' errored"));
        let deployer = Deployer::new(runner.clone(), CommandTable::new());

        let outcome = deployer.deploy(IacTool::Packer).await.unwrap();

        assert!(!outcome.succeeded);
        assert_eq!(outcome.diagnostic.as_deref(), Some("Build 'docker' errored"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn missing_deploy_command_is_noop() {
        let runner = Arc::new(FakeCommandRunner::new());
        let table = CommandTable::new().with_override(IacTool::Pulumi, Action::Deploy, "");
        let deployer = Deployer::new(runner.clone(), table);

        let outcome = deployer.deploy(IacTool::Pulumi).await.unwrap();

        assert!(outcome.succeeded);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("only", 5), "only");
        assert_eq!(tail("", 5), "");
    }
}
