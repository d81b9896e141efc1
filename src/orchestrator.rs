//! Remediation state machine.
//!
//! Drives one session from detection to a terminal outcome:
//!
//! ```text
//! Detecting -> Validating -> Deploying                        (initial pass, apply mode)
//!                         -> Fixing -> Applying -> Revalidating -> Publishing
//!                               ^                      |
//!                               +---- retry budget ----+-> Resolving (rollback / manual)
//! ```
//!
//! The orchestrator never returns an error. Every collaborator failure is
//! turned into [`Outcome::Errored`] and the session still reaches a terminal
//! state that is reported exactly once.

use std::sync::Arc;

use chrono::Utc;

use crate::ai::CompletionClient;
use crate::backoff::Sleeper;
use crate::command::CommandRunner;
use crate::config::{RemediationConfig, ToolOverride};
use crate::deploy::Deployer;
use crate::detect::ToolDetector;
use crate::error::{Error, Result};
use crate::fix::{FixRequester, FixResponse};
use crate::patch::PatchApplier;
use crate::report::{pull_request_body, render_outcome, RemediationReport};
use crate::secrets::SecretsManager;
use crate::session::{AbortReason, Mode, Outcome, Phase, RemediationSession};
use crate::tool::IacTool;
use crate::validate::{ValidationOutcome, Validator};
use crate::vcs::{NotificationSink, VcsClient};

/// External collaborators the state machine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub completion: Arc<dyn CompletionClient>,
    pub vcs: Arc<dyn VcsClient>,
    pub sink: Arc<dyn NotificationSink>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Next unit of work.
#[derive(Debug)]
enum Step {
    Detect,
    Validate,
    Deploy,
    Fix { diagnostic: String },
    Apply { patch: String, model: String },
    Revalidate,
    Publish,
    Resolve { diagnostic: String },
    Done(Outcome),
}

impl Step {
    fn phase(&self) -> Phase {
        match self {
            Step::Detect => Phase::Detecting,
            Step::Validate => Phase::Validating,
            Step::Deploy => Phase::Deploying,
            Step::Fix { .. } => Phase::Fixing,
            Step::Apply { .. } => Phase::Applying,
            Step::Revalidate => Phase::Revalidating,
            Step::Publish => Phase::Publishing,
            Step::Resolve { .. } => Phase::Resolving,
            Step::Done(_) => Phase::Terminal,
        }
    }
}

/// Runs remediation sessions against a fixed configuration.
pub struct RemediationOrchestrator {
    config: RemediationConfig,
    detector: ToolDetector,
    validator: Validator,
    deployer: Deployer,
    fixer: FixRequester,
    applier: PatchApplier,
    vcs: Arc<dyn VcsClient>,
    sink: Arc<dyn NotificationSink>,
    secrets: SecretsManager,
}

impl RemediationOrchestrator {
    pub fn new(
        config: RemediationConfig,
        collaborators: Collaborators,
        secrets: SecretsManager,
    ) -> Self {
        let detector = ToolDetector::new(config.project_dir.clone());
        let mut commands = config.commands.clone();
        if let Some(playbook) = detector.ansible_playbook() {
            commands.use_ansible_playbook(&playbook);
        }
        let validator = Validator::new(collaborators.runner.clone(), commands.clone())
            .with_init(config.run_init);
        let deployer = Deployer::new(collaborators.runner, commands);
        let fixer = FixRequester::new(collaborators.completion, collaborators.sleeper)
            .with_models(config.models.clone())
            .with_system_prompt(config.system_prompt.clone())
            .with_deadline(config.fix_timeout);
        let applier = PatchApplier::new(collaborators.vcs.clone());

        Self {
            config,
            detector,
            validator,
            deployer,
            fixer,
            applier,
            vcs: collaborators.vcs,
            sink: collaborators.sink,
            secrets,
        }
    }

    /// Runs one session to its terminal outcome and reports it.
    pub async fn run(&self) -> RemediationReport {
        let started_at = Utc::now();
        let mut session = RemediationSession::new(
            self.config.run_id.clone(),
            &self.config.branch_prefix,
            self.config.policy(),
        );

        tracing::info!(
            run_id = %session.run_id(),
            branch = %session.branch_name(),
            mode = ?session.mode(),
            max_attempts = self.config.max_attempts,
            "starting remediation session"
        );

        let mut step = Step::Detect;
        let outcome = loop {
            step = match step {
                Step::Done(outcome) => break outcome,
                step => {
                    let phase = step.phase();
                    session.enter(phase);
                    tracing::info!(run_id = %session.run_id(), phase = %phase, "entering phase");

                    match self.advance(&mut session, step).await {
                        Ok(next) => next,
                        Err(e) => {
                            tracing::error!(phase = %phase, error = %e, "remediation step failed");
                            Step::Done(Outcome::Errored {
                                phase,
                                error: self.secrets.redact(&e.to_string()),
                            })
                        }
                    }
                }
            };
        };

        self.conclude(&mut session, outcome).await;

        let fallback = Outcome::Errored {
            phase: Phase::Terminal,
            error: "session ended without an outcome".to_string(),
        };
        RemediationReport::from_session(&session, fallback, started_at)
    }

    async fn advance(&self, session: &mut RemediationSession, step: Step) -> Result<Step> {
        match step {
            Step::Detect => self.detect(session),
            Step::Validate => {
                let tool = self.tool(session)?;
                let outcome = self.validator.validate(tool).await?;
                if outcome.passed {
                    tracing::info!(tool = %tool, "initial validation passed");
                    return Ok(match session.mode() {
                        Mode::Apply => Step::Deploy,
                        Mode::DryRun => Step::Done(Outcome::AlreadyValid),
                    });
                }
                let diagnostic = self.diagnostic_of(&outcome);
                tracing::warn!(tool = %tool, exit_code = outcome.exit_code, "initial validation failed");
                Ok(Step::Fix { diagnostic })
            }
            Step::Deploy => {
                let tool = self.tool(session)?;
                let outcome = self.deployer.deploy(tool).await?;
                Ok(Step::Done(if outcome.succeeded {
                    Outcome::Deployed {
                        detail: outcome.detail.map(|d| self.secrets.redact(&d)),
                    }
                } else {
                    Outcome::DeployFailed {
                        diagnostic: self
                            .secrets
                            .redact(&outcome.diagnostic.unwrap_or_default()),
                    }
                }))
            }
            Step::Fix { diagnostic } => self.fix(session, diagnostic).await,
            Step::Apply { patch, model } => self.apply(session, &patch, &model).await,
            Step::Revalidate => {
                let tool = self.tool(session)?;
                let outcome = self.validator.validate(tool).await?;
                session.record_revalidation(outcome.passed)?;
                if outcome.passed {
                    tracing::info!(tool = %tool, attempts = session.attempts().len(), "re-validation passed");
                    return Ok(Step::Publish);
                }

                let diagnostic = self.diagnostic_of(&outcome);
                if session.can_retry() {
                    tracing::warn!(
                        attempts = session.attempts().len(),
                        max_attempts = session.policy().max_attempts,
                        "re-validation failed, requesting another fix"
                    );
                    Ok(Step::Fix { diagnostic })
                } else {
                    tracing::warn!(attempts = session.attempts().len(), "retry budget exhausted");
                    Ok(Step::Resolve { diagnostic })
                }
            }
            Step::Publish => self.publish(session).await,
            Step::Resolve { diagnostic } => self.resolve(session, diagnostic).await,
            Step::Done(outcome) => Ok(Step::Done(outcome)),
        }
    }

    fn detect(&self, session: &mut RemediationSession) -> Result<Step> {
        let tool = match self.config.tool_override {
            ToolOverride::Tool(tool) => {
                tracing::info!(tool = %tool, "using configured tool override");
                tool
            }
            ToolOverride::Auto => self.detector.detect(),
        };

        if !tool.is_known() {
            tracing::error!(
                dir = %self.detector.project_dir().display(),
                "no IaC tool detected and no override configured"
            );
            return Ok(Step::Done(Outcome::Aborted {
                reason: AbortReason::UnknownTool,
            }));
        }

        session.set_tool(tool)?;
        tracing::info!(tool = %tool, "IaC tool determined");
        Ok(Step::Validate)
    }

    async fn fix(&self, session: &mut RemediationSession, diagnostic: String) -> Result<Step> {
        let tool = self.tool(session)?;
        let sequence = session.next_sequence();
        tracing::info!(tool = %tool, attempt = sequence, "requesting fix");

        match self.fixer.request_fix(tool, &diagnostic).await {
            FixResponse::Patch { text, model } => {
                session.record_attempt(diagnostic, Some(text.clone()), Some(model.clone()))?;
                tracing::info!(attempt = sequence, model = %model, "fix received");
                Ok(match session.mode() {
                    Mode::DryRun => Step::Done(Outcome::SuggestionPosted { patch: text, model }),
                    Mode::Apply => Step::Apply { patch: text, model },
                })
            }
            FixResponse::Unavailable => {
                session.record_attempt(diagnostic.clone(), None, None)?;
                tracing::warn!(attempt = sequence, "no model produced a fix");
                Ok(Step::Done(Outcome::Unfixable {
                    attempts: session.attempts().len(),
                    last_diagnostic: diagnostic,
                }))
            }
        }
    }

    async fn apply(
        &self,
        session: &mut RemediationSession,
        patch: &str,
        model: &str,
    ) -> Result<Step> {
        let tool = self.tool(session)?;
        let branch = session.branch_name().to_string();

        if session.applies().is_empty() {
            self.vcs.create_branch(&branch).await?;
            tracing::info!(branch = %branch, "created session branch");
        }

        let message = format!(
            "fix({}): apply {} patch, attempt {}",
            tool,
            model,
            session.attempts().len()
        );
        let outcome = self.applier.apply(patch, &message).await?;

        let applied = (outcome.applied, outcome.previous_head, outcome.commit);
        let (previous_head, commit) = match applied {
            (true, Some(previous_head), Some(commit)) => (previous_head, commit),
            _ => {
                return Ok(Step::Done(Outcome::ApplyConflict {
                    diagnostic: self.secrets.redact(
                        &outcome
                            .diagnostic
                            .unwrap_or_else(|| "patch could not be applied".to_string()),
                    ),
                }))
            }
        };

        session.record_apply(previous_head, commit)?;
        self.vcs.push(&branch, false).await?;
        Ok(Step::Revalidate)
    }

    async fn publish(&self, session: &RemediationSession) -> Result<Step> {
        let tool = self.tool(session)?;
        let title = format!("fix({}): automated remediation for run {}", tool, session.run_id());
        let body = self
            .secrets
            .redact(&pull_request_body(tool, session.attempts()));

        let pull_request = self
            .sink
            .open_pull_request(&title, &body, session.branch_name(), &self.config.base_branch)
            .await?;
        tracing::info!(number = pull_request.number, url = %pull_request.url, "pull request opened");

        if !session.policy().auto_merge_enabled {
            return Ok(Step::Done(Outcome::PullRequestOpen { pull_request }));
        }

        self.sink.merge(&pull_request, &title).await?;
        tracing::info!(number = pull_request.number, "pull request merged");
        Ok(Step::Done(Outcome::Merged { pull_request }))
    }

    async fn resolve(&self, session: &RemediationSession, diagnostic: String) -> Result<Step> {
        let attempts = session.attempts().len();

        if session.policy().rollback_enabled {
            if let Some(point) = session.rollback_point().cloned() {
                self.applier
                    .rollback(session.branch_name(), &point.previous_head)
                    .await?;
                return Ok(Step::Done(Outcome::RolledBack {
                    attempts,
                    last_diagnostic: diagnostic,
                }));
            }
        }

        Ok(Step::Done(Outcome::ManualInterventionRequired {
            attempts,
            last_diagnostic: diagnostic,
        }))
    }

    /// Records the terminal outcome and posts the report.
    async fn conclude(&self, session: &mut RemediationSession, outcome: Outcome) {
        if let Err(e) = session.finish(outcome.clone()) {
            tracing::error!(error = %e, "rejected terminal outcome");
            let phase = session.phases().last().copied().unwrap_or(Phase::Init);
            if let Err(e) = session.finish(Outcome::Errored {
                phase,
                error: e.to_string(),
            }) {
                tracing::error!(error = %e, "could not record terminal outcome");
            }
        }

        let Some(outcome) = session.outcome() else {
            return;
        };
        tracing::info!(
            run_id = %session.run_id(),
            outcome = outcome.name(),
            attempts = session.attempts().len(),
            "remediation finished"
        );

        let message = self
            .secrets
            .redact(&render_outcome(session.tool(), session.run_id(), outcome));
        if let Err(e) = self.sink.comment(self.config.notify_target, &message).await {
            tracing::warn!(error = %e, "failed to post remediation report");
        }
    }

    fn tool(&self, session: &RemediationSession) -> Result<IacTool> {
        session
            .tool()
            .ok_or_else(|| Error::Session("tool has not been determined".to_string()))
    }

    /// Redacted diagnostic to feed the next fix request.
    ///
    /// Everything downstream (the AI request, recorded attempts, terminal
    /// outcomes) sees only this redacted text.
    fn diagnostic_of(&self, outcome: &ValidationOutcome) -> String {
        let diagnostic = outcome
            .diagnostic
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| self.config.initial_diagnostic.clone())
            .unwrap_or_else(|| {
                format!(
                    "{} validation failed with exit code {}",
                    outcome.tool, outcome.exit_code
                )
            });
        self.secrets.redact(&diagnostic)
    }
}
