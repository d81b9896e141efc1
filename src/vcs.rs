//! Version control and hosting collaborators.
//!
//! [`VcsClient`] covers the local branch (patch, commit, push, reset) and
//! [`NotificationSink`] covers the hosting service (pull requests, merges,
//! comments). [`GhCli`] implements both on top of the `git` and `gh` CLIs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{Error, Result};

/// Information about a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR number.
    pub number: u64,
    /// PR URL.
    pub url: String,
    /// PR title.
    pub title: String,
    /// Target branch.
    pub base_branch: String,
    /// Source branch.
    pub head_branch: String,
}

/// Result of applying a patch to the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchStatus {
    /// The patch applied cleanly.
    Applied,
    /// The patch was rejected; carries the tool's explanation.
    Conflict(String),
}

/// Where terminal reports are posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "number")]
pub enum CommentTarget {
    PullRequest(u64),
    Issue(u64),
}

impl fmt::Display for CommentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentTarget::PullRequest(n) => write!(f, "pr:{}", n),
            CommentTarget::Issue(n) => write!(f, "issue:{}", n),
        }
    }
}

impl FromStr for CommentTarget {
    type Err = Error;

    /// Parses `pr:<n>` or `issue:<n>`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            Error::Config(format!(
                "invalid notify target '{}', expected pr:<n> or issue:<n>",
                s
            ))
        };
        let (kind, number) = s.trim().split_once(':').ok_or_else(invalid)?;
        let number: u64 = number.trim().parse().map_err(|_| invalid())?;

        match kind.trim().to_lowercase().as_str() {
            "pr" | "pull" | "pull_request" => Ok(CommentTarget::PullRequest(number)),
            "issue" => Ok(CommentTarget::Issue(number)),
            _ => Err(invalid()),
        }
    }
}

/// Local version control operations on the session branch.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Creates and checks out a new branch.
    async fn create_branch(&self, name: &str) -> Result<()>;

    /// Returns the current HEAD commit hash.
    async fn head_commit(&self) -> Result<String>;

    /// Applies a patch file to the working tree and stages the result.
    async fn apply_patch(&self, patch_file: &Path) -> Result<PatchStatus>;

    /// Commits the staged changes. Returns `None` when nothing is staged.
    async fn commit(&self, message: &str) -> Result<Option<String>>;

    /// Pushes a branch to the remote, optionally forcing.
    async fn push(&self, branch: &str, force: bool) -> Result<()>;

    /// Resets the working tree and branch to `rev`.
    async fn reset_hard(&self, rev: &str) -> Result<()>;
}

/// Hosting-service operations used to publish and report outcomes.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Opens a pull request.
    async fn open_pull_request(
        &self,
        title: &str,
        body: &str,
        head_branch: &str,
        base_branch: &str,
    ) -> Result<PullRequest>;

    /// Merges a pull request.
    async fn merge(&self, pr: &PullRequest, message: &str) -> Result<()>;

    /// Posts a comment. With no target the report is only logged.
    async fn comment(&self, target: Option<CommentTarget>, text: &str) -> Result<()>;
}

/// `git` + `gh` CLI implementation of both collaborators.
pub struct GhCli {
    /// Repository path.
    repo_path: PathBuf,
    /// Remote name used for pushes.
    remote: String,
    /// Token passed to `gh` as `GH_TOKEN`.
    token: Option<String>,
}

impl GhCli {
    /// Creates a client for the given repository.
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            remote: "origin".to_string(),
            token: None,
        }
    }

    /// Sets the hosting token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        Ok(Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .await?)
    }

    async fn git_ok(&self, args: &[&str], what: &str) -> Result<String> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(Error::Git(format!(
                "failed to {}: {}",
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn gh(&self, args: &[&str], what: &str) -> Result<String> {
        let mut cmd = Command::new("gh");
        cmd.current_dir(&self.repo_path).args(args);
        if let Some(token) = &self.token {
            cmd.env("GH_TOKEN", token);
        }

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Error::GitHub(format!(
                "failed to {}: {}",
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl VcsClient for GhCli {
    async fn create_branch(&self, name: &str) -> Result<()> {
        self.git_ok(&["checkout", "-b", name], "create branch").await?;
        tracing::info!(branch = %name, "created branch");
        Ok(())
    }

    async fn head_commit(&self) -> Result<String> {
        self.git_ok(&["rev-parse", "HEAD"], "resolve HEAD").await
    }

    async fn apply_patch(&self, patch_file: &Path) -> Result<PatchStatus> {
        let path = patch_file.to_string_lossy();
        let output = self
            .git(&["apply", "--index", "--whitespace=nowarn", "--recount", &path])
            .await?;

        if output.status.success() {
            Ok(PatchStatus::Applied)
        } else {
            Ok(PatchStatus::Conflict(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn commit(&self, message: &str) -> Result<Option<String>> {
        // Only what apply_patch staged; init artifacts stay untracked
        let staged = self.git(&["diff", "--cached", "--quiet"]).await?;
        match staged.status.code() {
            Some(0) => return Ok(None),
            Some(1) => {}
            _ => {
                return Err(Error::Git(format!(
                    "failed to read staged changes: {}",
                    String::from_utf8_lossy(&staged.stderr).trim()
                )))
            }
        }

        self.git_ok(&["commit", "-m", message], "commit").await?;
        self.head_commit().await.map(Some)
    }

    async fn push(&self, branch: &str, force: bool) -> Result<()> {
        let mut args = vec!["push", "-u", self.remote.as_str(), branch];
        if force {
            args.push("--force");
        }
        self.git_ok(&args, "push branch").await?;
        tracing::info!(branch = %branch, force, "pushed branch");
        Ok(())
    }

    async fn reset_hard(&self, rev: &str) -> Result<()> {
        self.git_ok(&["reset", "--hard", rev], "reset branch").await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for GhCli {
    async fn open_pull_request(
        &self,
        title: &str,
        body: &str,
        head_branch: &str,
        base_branch: &str,
    ) -> Result<PullRequest> {
        let url = self
            .gh(
                &[
                    "pr",
                    "create",
                    "--title",
                    title,
                    "--body",
                    body,
                    "--head",
                    head_branch,
                    "--base",
                    base_branch,
                ],
                "create PR",
            )
            .await?;

        Ok(PullRequest {
            number: pr_number_from_url(&url),
            url,
            title: title.to_string(),
            base_branch: base_branch.to_string(),
            head_branch: head_branch.to_string(),
        })
    }

    async fn merge(&self, pr: &PullRequest, message: &str) -> Result<()> {
        let number = pr.number.to_string();
        self.gh(
            &["pr", "merge", &number, "--squash", "--subject", message],
            "merge PR",
        )
        .await?;
        tracing::info!(pr = pr.number, "merged pull request");
        Ok(())
    }

    async fn comment(&self, target: Option<CommentTarget>, text: &str) -> Result<()> {
        let Some(target) = target else {
            tracing::info!(report = %text, "no notify target configured, report not posted");
            return Ok(());
        };

        let (kind, number) = match target {
            CommentTarget::PullRequest(n) => ("pr", n.to_string()),
            CommentTarget::Issue(n) => ("issue", n.to_string()),
        };
        self.gh(&[kind, "comment", &number, "--body", text], "post comment")
            .await?;
        tracing::info!(target = %target, "posted report");
        Ok(())
    }
}

/// Extracts the PR number from a `gh pr create` URL.
fn pr_number_from_url(url: &str) -> u64 {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
