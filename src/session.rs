//! Remediation session data model.
//!
//! A session lives for exactly one run of the state machine. It owns the
//! attempt log and enforces the invariants the orchestrator relies on: the
//! attempt cap, strictly sequential attempt numbers, a single terminal outcome,
//! and rollback legality.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tool::IacTool;
use crate::vcs::PullRequest;

/// Whether the session may mutate the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Only suggest patches.
    #[default]
    DryRun,
    /// Apply, publish and deploy.
    Apply,
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "dry-run" | "dryrun" => Ok(Mode::DryRun),
            "apply" => Ok(Mode::Apply),
            other => Err(Error::Config(format!(
                "invalid mode '{}', expected dry-run or apply",
                other
            ))),
        }
    }
}

/// State machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Detecting,
    Validating,
    Deploying,
    Fixing,
    Applying,
    Revalidating,
    Publishing,
    Resolving,
    Terminal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Detecting => "detecting",
            Phase::Validating => "validating",
            Phase::Deploying => "deploying",
            Phase::Fixing => "fixing",
            Phase::Applying => "applying",
            Phase::Revalidating => "revalidating",
            Phase::Publishing => "publishing",
            Phase::Resolving => "resolving",
            Phase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Why a session stopped before doing any work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// No override was given and no tool markers were found.
    UnknownTool,
}

/// Terminal state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    Aborted {
        reason: AbortReason,
    },
    Deployed {
        detail: Option<String>,
    },
    DeployFailed {
        diagnostic: String,
    },
    /// Dry-run session whose initial validation passed.
    AlreadyValid,
    Unfixable {
        attempts: usize,
        last_diagnostic: String,
    },
    ApplyConflict {
        diagnostic: String,
    },
    PullRequestOpen {
        pull_request: PullRequest,
    },
    Merged {
        pull_request: PullRequest,
    },
    RolledBack {
        attempts: usize,
        last_diagnostic: String,
    },
    ManualInterventionRequired {
        attempts: usize,
        last_diagnostic: String,
    },
    SuggestionPosted {
        patch: String,
        model: String,
    },
    Errored {
        phase: Phase,
        error: String,
    },
}

impl Outcome {
    /// Short machine-readable name of the terminal state.
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Aborted { .. } => "aborted",
            Outcome::Deployed { .. } => "deployed",
            Outcome::DeployFailed { .. } => "deploy_failed",
            Outcome::AlreadyValid => "already_valid",
            Outcome::Unfixable { .. } => "unfixable",
            Outcome::ApplyConflict { .. } => "apply_conflict",
            Outcome::PullRequestOpen { .. } => "pull_request_open",
            Outcome::Merged { .. } => "merged",
            Outcome::RolledBack { .. } => "rolled_back",
            Outcome::ManualInterventionRequired { .. } => "manual_intervention_required",
            Outcome::SuggestionPosted { .. } => "suggestion_posted",
            Outcome::Errored { .. } => "errored",
        }
    }

    /// Process exit code for this outcome. Only an abort is non-zero.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Aborted { .. } => 1,
            _ => 0,
        }
    }
}

/// One request for a fix. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    /// 1-based position in the attempt log.
    pub sequence_number: u32,
    pub input_diagnostic: String,
    pub patch_text: Option<String>,
    pub model_identifier: Option<String>,
    pub succeeded_request: bool,
}

/// A patch that was committed to the session branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRecord {
    /// Attempt that produced the patch.
    pub attempt: u32,
    /// HEAD before the patch.
    pub previous_head: String,
    /// Commit holding the patch.
    pub commit: String,
    /// Result of the re-validation that followed, once known.
    pub revalidation_passed: Option<bool>,
}

/// Session policy, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub mode: Mode,
    pub max_attempts: u32,
    pub rollback_enabled: bool,
    pub auto_merge_enabled: bool,
}

/// One end-to-end run of the remediation state machine.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationSession {
    run_id: String,
    branch_name: String,
    tool: Option<IacTool>,
    policy: SessionPolicy,
    attempts: Vec<FixAttempt>,
    applies: Vec<ApplyRecord>,
    phases: Vec<Phase>,
    outcome: Option<Outcome>,
}

impl RemediationSession {
    /// Creates a session for `run_id`.
    pub fn new(run_id: impl Into<String>, branch_prefix: &str, policy: SessionPolicy) -> Self {
        let run_id = run_id.into();
        Self {
            branch_name: branch_name_for(branch_prefix, &run_id),
            run_id,
            tool: None,
            policy,
            attempts: Vec::new(),
            applies: Vec::new(),
            phases: vec![Phase::Init],
            outcome: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn mode(&self) -> Mode {
        self.policy.mode
    }

    pub fn tool(&self) -> Option<IacTool> {
        self.tool
    }

    /// Fixes the session's tool. The tool cannot change afterwards.
    pub fn set_tool(&mut self, tool: IacTool) -> Result<()> {
        match self.tool {
            Some(existing) if existing != tool => Err(Error::Session(format!(
                "tool already determined as {}",
                existing
            ))),
            _ => {
                self.tool = Some(tool);
                Ok(())
            }
        }
    }

    pub fn attempts(&self) -> &[FixAttempt] {
        &self.attempts
    }

    pub fn applies(&self) -> &[ApplyRecord] {
        &self.applies
    }

    /// Phases visited so far, in order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Records entry into a phase.
    pub fn enter(&mut self, phase: Phase) {
        self.phases.push(phase);
    }

    /// Maximum number of attempts the session may record.
    pub fn attempt_cap(&self) -> usize {
        self.policy.max_attempts as usize + 1
    }

    /// Returns true if a failed re-validation may be followed by another attempt.
    pub fn can_retry(&self) -> bool {
        self.attempts.len() <= self.policy.max_attempts as usize
    }

    /// Sequence number the next attempt will receive.
    pub fn next_sequence(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    /// Appends an attempt to the log.
    pub fn record_attempt(
        &mut self,
        input_diagnostic: impl Into<String>,
        patch_text: Option<String>,
        model_identifier: Option<String>,
    ) -> Result<&FixAttempt> {
        if self.outcome.is_some() {
            return Err(Error::Session("session already finished".to_string()));
        }
        if self.attempts.len() >= self.attempt_cap() {
            return Err(Error::Session(format!(
                "attempt cap of {} reached",
                self.attempt_cap()
            )));
        }

        let attempt = FixAttempt {
            sequence_number: self.next_sequence(),
            input_diagnostic: input_diagnostic.into(),
            succeeded_request: patch_text.is_some(),
            patch_text,
            model_identifier,
        };
        let index = self.attempts.len();
        self.attempts.push(attempt);
        Ok(&self.attempts[index])
    }

    /// Records a patch committed for the latest attempt.
    pub fn record_apply(&mut self, previous_head: String, commit: String) -> Result<()> {
        let attempt = self
            .attempts
            .last()
            .filter(|a| a.succeeded_request)
            .ok_or_else(|| Error::Session("no patch to record an apply for".to_string()))?
            .sequence_number;

        self.applies.push(ApplyRecord {
            attempt,
            previous_head,
            commit,
            revalidation_passed: None,
        });
        Ok(())
    }

    /// Records the re-validation result for the latest apply.
    pub fn record_revalidation(&mut self, passed: bool) -> Result<()> {
        let record = self
            .applies
            .last_mut()
            .filter(|r| r.revalidation_passed.is_none())
            .ok_or_else(|| Error::Session("no pending apply to re-validate".to_string()))?;
        record.revalidation_passed = Some(passed);
        Ok(())
    }

    /// Returns the apply that a rollback would undo, if rollback is legal.
    ///
    /// Legal only when the last applied patch was committed and its
    /// re-validation failed.
    pub fn rollback_point(&self) -> Option<&ApplyRecord> {
        self.applies
            .last()
            .filter(|r| r.revalidation_passed == Some(false))
    }

    /// Sets the terminal outcome. Fails if one was already set.
    pub fn finish(&mut self, outcome: Outcome) -> Result<()> {
        if let Some(existing) = &self.outcome {
            return Err(Error::Session(format!(
                "outcome already set to {}",
                existing.name()
            )));
        }
        if let Outcome::RolledBack { .. } = outcome {
            if self.rollback_point().is_none() {
                return Err(Error::Session(
                    "rollback without a failed re-validation of an applied patch".to_string(),
                ));
            }
        }

        self.phases.push(Phase::Terminal);
        self.outcome = Some(outcome);
        Ok(())
    }
}

/// Derives the session branch name from a run identifier.
///
/// Characters git does not allow in ref names are replaced with `-`.
pub fn branch_name_for(prefix: &str, run_id: &str) -> String {
    let sanitized: String = run_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches(|c| c == '-' || c == '.');
    let run = if sanitized.is_empty() { "run" } else { sanitized };

    format!("{}/{}", prefix.trim_end_matches('/'), run)
}
