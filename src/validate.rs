//! Configuration validation through the tool's own checker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::command::CommandRunner;
use crate::error::{Error, Result};
use crate::tool::{Action, CommandTable, IacTool};

/// Result of validating a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Tool that was validated.
    pub tool: IacTool,
    /// Whether validation passed.
    pub passed: bool,
    /// Captured error text, present only on failure.
    pub diagnostic: Option<String>,
    /// Exit code of the command that decided the outcome.
    pub exit_code: i32,
}

/// Runs the validation command for a tool and interprets the result.
pub struct Validator {
    runner: Arc<dyn CommandRunner>,
    commands: CommandTable,
    run_init: bool,
}

impl Validator {
    /// Creates a validator. Init commands run before validation by default.
    pub fn new(runner: Arc<dyn CommandRunner>, commands: CommandTable) -> Self {
        Self {
            runner,
            commands,
            run_init: true,
        }
    }

    /// Enables or disables running the tool's init command first.
    pub fn with_init(mut self, run_init: bool) -> Self {
        self.run_init = run_init;
        self
    }

    /// Validates the project with the given tool.
    ///
    /// Returns [`Error::NoCommand`] when the tool has no validate command,
    /// which is never the same thing as a failed validation.
    pub async fn validate(&self, tool: IacTool) -> Result<ValidationOutcome> {
        let validate_cmd = self
            .commands
            .command(tool, Action::Validate)
            .ok_or(Error::NoCommand {
                tool,
                action: Action::Validate,
            })?;

        if self.run_init {
            if let Some(init_cmd) = self.commands.command(tool, Action::Init) {
                let init = self.runner.run(init_cmd).await?;
                if !init.succeeded() {
                    tracing::warn!(tool = %tool, exit_code = init.exit_code, "init failed");
                    return Ok(ValidationOutcome {
                        tool,
                        passed: false,
                        diagnostic: Some(init.diagnostic()),
                        exit_code: init.exit_code,
                    });
                }
            }
        }

        let output = self.runner.run(validate_cmd).await?;
        let passed = output.succeeded();

        tracing::info!(tool = %tool, passed, exit_code = output.exit_code, "validation finished");

        Ok(ValidationOutcome {
            tool,
            passed,
            diagnostic: if passed { None } else { Some(output.diagnostic()) },
            exit_code: output.exit_code,
        })
    }
}
