//! iac-autofix - self-healing remediation loop for infrastructure-as-code pipelines
//!
//! Detects the IaC tool governing a project, validates it, and on failure asks
//! an AI service for a patch, applies it on a dedicated branch, re-validates,
//! and then publishes, merges, rolls back or escalates.

pub mod ai;
pub mod backoff;
pub mod command;
pub mod config;
pub mod deploy;
pub mod detect;
pub mod error;
pub mod fakes;
pub mod fix;
pub mod orchestrator;
pub mod patch;
pub mod report;
pub mod secrets;
pub mod session;
pub mod tool;
pub mod validate;
pub mod vcs;

pub use ai::{CompletionClient, CompletionError, CompletionRequest, OpenAiClient};
pub use backoff::{ExponentialBackoff, RecordingSleeper, Sleeper, TokioSleeper};
pub use command::{CommandOutput, CommandRunner, ShellRunner};
pub use config::{RawConfig, RemediationConfig, ToolOverride, Validate, ValidationResult};
pub use deploy::{DeployOutcome, Deployer};
pub use detect::ToolDetector;
pub use error::{Error, Result};
pub use fix::{FixRequester, FixResponse};
pub use orchestrator::{Collaborators, RemediationOrchestrator};
pub use patch::{ApplyOutcome, PatchApplier};
pub use report::RemediationReport;
pub use secrets::{Credentials, SecretSource, SecretsManager};
pub use session::{
    AbortReason, ApplyRecord, FixAttempt, Mode, Outcome, Phase, RemediationSession, SessionPolicy,
};
pub use tool::{Action, CommandTable, IacTool};
pub use validate::{ValidationOutcome, Validator};
pub use vcs::{CommentTarget, GhCli, NotificationSink, PatchStatus, PullRequest, VcsClient};
