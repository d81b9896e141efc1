//! Error types for the iac-autofix remediation loop.

use thiserror::Error;

use crate::tool::{Action, IacTool};

/// Top-level error type for remediation operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error while reading the project or writing artifacts.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be resolved.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required credential is not available.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// The command table has no entry for this tool/action pair.
    #[error("no {action} command configured for {tool}")]
    NoCommand { tool: IacTool, action: Action },

    /// Git operation failed.
    #[error("git operation failed: {0}")]
    Git(String),

    /// GitHub API operation failed.
    #[error("GitHub operation failed: {0}")]
    GitHub(String),

    /// Failed to serialize or parse structured data.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Session invariant would be violated.
    #[error("session invariant violated: {0}")]
    Session(String),
}

impl Error {
    /// Returns true for errors that must stop the process before any mutation.
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(self, Error::Config(_) | Error::MissingCredential(_))
    }
}

/// Result type alias for remediation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_command_names_tool_and_action() {
        let err = Error::NoCommand {
            tool: IacTool::Packer,
            action: Action::Deploy,
        };
        assert_eq!(err.to_string(), "no deploy command configured for packer");
    }

    #[test]
    fn only_config_and_credentials_are_fatal_preconditions() {
        assert!(Error::Config("bad".into()).is_fatal_precondition());
        assert!(Error::MissingCredential("OPENAI_API_KEY".into()).is_fatal_precondition());
        assert!(!Error::Git("conflict".into()).is_fatal_precondition());
    }
}
