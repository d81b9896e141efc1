//! Rendering of terminal outcomes and pull request bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{FixAttempt, Mode, Outcome, Phase, RemediationSession};
use crate::tool::IacTool;

/// Longest diagnostic excerpt included in a comment.
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// Serializable summary of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationReport {
    pub run_id: String,
    pub branch: String,
    pub tool: Option<IacTool>,
    pub mode: Mode,
    pub attempts: Vec<FixAttempt>,
    pub phases: Vec<Phase>,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RemediationReport {
    /// Builds the report from a finished session.
    ///
    /// `fallback` is used when the session never reached an outcome.
    pub fn from_session(
        session: &RemediationSession,
        fallback: Outcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: session.run_id().to_string(),
            branch: session.branch_name().to_string(),
            tool: session.tool(),
            mode: session.mode(),
            attempts: session.attempts().to_vec(),
            phases: session.phases().to_vec(),
            outcome: session.outcome().cloned().unwrap_or(fallback),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Process exit code for the report's outcome.
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::Error::Serialization(e.to_string()))
    }
}

/// Renders the comment posted for a terminal outcome.
pub fn render_outcome(tool: Option<IacTool>, run_id: &str, outcome: &Outcome) -> String {
    let tool = tool.map(|t| t.to_string()).unwrap_or_else(|| "unknown".to_string());
    let mut body = String::new();

    match outcome {
        Outcome::Aborted { .. } => {
            body.push_str("## ⛔ IaC remediation aborted\n\n");
            body.push_str(
                "No supported IaC tool was detected and no tool override was configured.\n",
            );
        }
        Outcome::Deployed { detail } => {
            body.push_str(&format!("## ✅ {} validated and deployed\n\n", tool));
            if let Some(detail) = detail {
                push_block(&mut body, "Deployment output", detail);
            }
        }
        Outcome::DeployFailed { diagnostic } => {
            body.push_str(&format!("## ❌ {} deployment failed\n\n", tool));
            body.push_str("Validation passed but the deployment did not succeed. Deployments are not retried.\n\n");
            push_block(&mut body, "Diagnostic", diagnostic);
        }
        Outcome::AlreadyValid => {
            body.push_str(&format!("## ✅ {} configuration is valid\n\n", tool));
            body.push_str("Validation passed; nothing to fix.\n");
        }
        Outcome::Unfixable {
            attempts,
            last_diagnostic,
        } => {
            body.push_str(&format!("## ❌ Could not obtain a fix for {}\n\n", tool));
            body.push_str(&format!(
                "No AI model returned a usable patch after {} attempt(s).\n\n",
                attempts
            ));
            push_block(&mut body, "Last diagnostic", last_diagnostic);
        }
        Outcome::ApplyConflict { diagnostic } => {
            body.push_str(&format!("## ❌ Suggested {} fix did not apply\n\n", tool));
            push_block(&mut body, "Apply error", diagnostic);
        }
        Outcome::PullRequestOpen { pull_request } => {
            body.push_str(&format!("## 🔧 {} fix ready for review\n\n", tool));
            body.push_str(&format!(
                "Validation passes on [#{}]({}).\n",
                pull_request.number, pull_request.url
            ));
        }
        Outcome::Merged { pull_request } => {
            body.push_str(&format!("## ✅ {} fix merged\n\n", tool));
            body.push_str(&format!(
                "[#{}]({}) was merged into `{}`.\n",
                pull_request.number, pull_request.url, pull_request.base_branch
            ));
        }
        Outcome::RolledBack {
            attempts,
            last_diagnostic,
        } => {
            body.push_str(&format!("## ↩️ {} fix rolled back\n\n", tool));
            body.push_str(&format!(
                "Validation still failed after {} attempt(s); the last applied patch was reverted.\n\n",
                attempts
            ));
            push_block(&mut body, "Last diagnostic", last_diagnostic);
        }
        Outcome::ManualInterventionRequired {
            attempts,
            last_diagnostic,
        } => {
            body.push_str(&format!("## ⚠️ {} needs manual intervention\n\n", tool));
            body.push_str(&format!(
                "Validation still failed after {} attempt(s).\n\n",
                attempts
            ));
            push_block(&mut body, "Last diagnostic", last_diagnostic);
        }
        Outcome::SuggestionPosted { patch, model } => {
            body.push_str(&format!("## 💡 Suggested fix for {}\n\n", tool));
            body.push_str(&format!("Proposed by `{}` (dry run, nothing was applied).\n\n", model));
            push_fenced(&mut body, "diff", patch);
        }
        Outcome::Errored { phase, error } => {
            body.push_str(&format!("## ❌ IaC remediation failed during {}\n\n", phase));
            push_block(&mut body, "Error", error);
        }
    }

    body.push_str(&format!("\n---\n_run `{}`_\n", run_id));
    body
}

/// Renders the body of the pull request opened for a validated fix.
pub fn pull_request_body(tool: IacTool, attempts: &[FixAttempt]) -> String {
    let mut body = String::new();

    body.push_str("## Summary\n\n");
    body.push_str(&format!(
        "Automated fix for a failing `{}` validation. The patched configuration passes validation.\n\n",
        tool
    ));

    body.push_str(&format!("## Attempts ({})\n\n", attempts.len()));
    body.push_str("| # | Model | Patch |\n");
    body.push_str("|---|-------|-------|\n");
    for attempt in attempts {
        let model = attempt.model_identifier.as_deref().unwrap_or("-");
        let patch = if attempt.succeeded_request { "✓" } else { "-" };
        body.push_str(&format!(
            "| {} | {} | {} |\n",
            attempt.sequence_number, model, patch
        ));
    }
    body.push('\n');

    if let Some(first) = attempts.first() {
        body.push_str("<details>\n");
        body.push_str("<summary>Original diagnostic</summary>\n\n");
        push_fenced(&mut body, "", &first.input_diagnostic);
        body.push_str("\n</details>\n");
    }

    body
}

fn push_block(body: &mut String, title: &str, text: &str) {
    body.push_str(&format!("**{}**\n\n", title));
    push_fenced(body, "", text);
}

/// Appends `text`, truncated, as a fenced code block that its own backticks
/// cannot close.
fn push_fenced(body: &mut String, lang: &str, text: &str) {
    let text = truncate(text);
    let fence = fence_for(&text);
    body.push_str(&format!("{}{}\n{}\n{}\n", fence, lang, text, fence));
}

/// A backtick fence longer than any backtick run in `text`, at least three.
fn fence_for(text: &str) -> String {
    let longest = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

fn truncate(text: &str) -> String {
    let text = text.trim_end();
    if text.chars().count() <= MAX_DIAGNOSTIC_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
    format!("{}\n... (truncated)", kept)
}
