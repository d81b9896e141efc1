//! Patch application and rollback.
//!
//! The patch is written to a scoped temporary file that is removed as soon
//! as the VCS has consumed it.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::vcs::{PatchStatus, VcsClient};

/// Result of applying a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Whether the patch was applied and committed.
    pub applied: bool,
    /// Why the patch could not be applied.
    pub diagnostic: Option<String>,
    /// HEAD before the patch, the rollback point.
    pub previous_head: Option<String>,
    /// Commit created for the patch.
    pub commit: Option<String>,
}

impl ApplyOutcome {
    fn rejected(previous_head: String, diagnostic: impl Into<String>) -> Self {
        Self {
            applied: false,
            diagnostic: Some(diagnostic.into()),
            previous_head: Some(previous_head),
            commit: None,
        }
    }
}

/// Applies AI patches to the session branch.
pub struct PatchApplier {
    vcs: Arc<dyn VcsClient>,
    scratch_dir: Option<PathBuf>,
}

impl PatchApplier {
    pub fn new(vcs: Arc<dyn VcsClient>) -> Self {
        Self {
            vcs,
            scratch_dir: None,
        }
    }

    /// Writes temporary patch files under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Applies `patch` and commits it with `message`.
    ///
    /// A rejected patch or one that changes nothing is reported through
    /// `applied = false`, not as an error.
    pub async fn apply(&self, patch: &str, message: &str) -> Result<ApplyOutcome> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("iac-autofix-").suffix(".patch");
        let mut file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(patch.as_bytes())?;
        file.flush()?;

        let previous_head = self.vcs.head_commit().await?;

        match self.vcs.apply_patch(file.path()).await? {
            PatchStatus::Applied => {}
            PatchStatus::Conflict(reason) => {
                tracing::warn!(reason = %reason, "patch did not apply");
                return Ok(ApplyOutcome::rejected(previous_head, reason));
            }
        }
        drop(file);

        match self.vcs.commit(message).await? {
            Some(commit) => {
                tracing::info!(commit = %commit, previous = %previous_head, "patch committed");
                Ok(ApplyOutcome {
                    applied: true,
                    diagnostic: None,
                    previous_head: Some(previous_head),
                    commit: Some(commit),
                })
            }
            None => Ok(ApplyOutcome::rejected(
                previous_head,
                "patch applied but produced no changes",
            )),
        }
    }

    /// Resets the branch to `previous_head` and force-updates the remote.
    pub async fn rollback(&self, branch: &str, previous_head: &str) -> Result<()> {
        tracing::warn!(branch = %branch, to = %previous_head, "rolling back last applied patch");
        self.vcs.reset_hard(previous_head).await?;
        self.vcs.push(branch, true).await
    }
}
