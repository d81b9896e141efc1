//! In-memory collaborators for tests.
//!
//! Each fake records what it was asked to do and answers from a script, so
//! the remediation loop can be driven deterministically without a shell,
//! a network, or a git checkout.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ai::{CompletionClient, CompletionError, CompletionRequest};
use crate::command::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};
use crate::vcs::{CommentTarget, NotificationSink, PatchStatus, PullRequest, VcsClient};

/// Command runner answering from per-command queues.
///
/// Queued outputs are consumed in order; once a command's queue is empty its
/// default output is used, and commands with neither succeed silently.
#[derive(Default)]
pub struct FakeCommandRunner {
    scripted: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    defaults: Mutex<HashMap<String, CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one output for `command`.
    pub fn push(&self, command: &str, output: CommandOutput) {
        self.scripted
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(output);
    }

    /// Sets the output used once the queue for `command` is drained.
    pub fn set_default(&self, command: &str, output: CommandOutput) {
        self.defaults
            .lock()
            .unwrap()
            .insert(command.to_string(), output);
    }

    /// Commands run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.to_string());

        let queued = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(command)
            .and_then(VecDeque::pop_front);
        let output = queued
            .or_else(|| self.defaults.lock().unwrap().get(command).cloned())
            .unwrap_or_else(|| CommandOutput::success(""));
        Ok(output)
    }
}

/// Completion client replaying a script of responses.
#[derive(Default)]
pub struct ScriptedCompletionClient {
    responses: Mutex<VecDeque<std::result::Result<String, CompletionError>>>,
    fallback: Mutex<Option<std::result::Result<String, CompletionError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: std::result::Result<String, CompletionError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Response returned once the script runs out.
    pub fn set_fallback(&self, response: std::result::Result<String, CompletionError>) {
        *self.fallback.lock().unwrap() = Some(response);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, CompletionError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return response;
        }
        self.fallback
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(CompletionError::Other("no scripted response".to_string())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A call made against [`RecordingVcs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    CreateBranch(String),
    ApplyPatch,
    Commit(String),
    Push { branch: String, force: bool },
    ResetHard(String),
}

#[derive(Default)]
struct VcsState {
    head: u32,
    next_commit: u32,
    reject: Option<String>,
    commit_nothing: bool,
    fail_push: Option<String>,
    patches: Vec<String>,
    calls: Vec<VcsCall>,
}

/// VCS client tracking a linear history of commits `c0`, `c1`, ...
///
/// Reading HEAD is not recorded as a call.
pub struct RecordingVcs {
    state: Mutex<VcsState>,
}

impl Default for RecordingVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingVcs {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VcsState {
                next_commit: 1,
                ..Default::default()
            }),
        }
    }

    /// Makes every subsequent patch fail to apply with `reason`.
    pub fn reject_patches(&self, reason: &str) {
        self.state.lock().unwrap().reject = Some(reason.to_string());
    }

    /// Makes every subsequent commit find nothing to commit.
    pub fn commit_nothing(&self) {
        self.state.lock().unwrap().commit_nothing = true;
    }

    /// Makes every subsequent push fail.
    pub fn fail_push(&self, reason: &str) {
        self.state.lock().unwrap().fail_push = Some(reason.to_string());
    }

    /// Contents of every patch file handed to `apply_patch`.
    pub fn patches(&self) -> Vec<String> {
        self.state.lock().unwrap().patches.clone()
    }

    pub fn calls(&self) -> Vec<VcsCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Current HEAD.
    pub fn head(&self) -> String {
        format!("c{}", self.state.lock().unwrap().head)
    }
}

#[async_trait]
impl VcsClient for RecordingVcs {
    async fn create_branch(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VcsCall::CreateBranch(name.to_string()));
        Ok(())
    }

    async fn head_commit(&self) -> Result<String> {
        Ok(self.head())
    }

    async fn apply_patch(&self, patch_file: &Path) -> Result<PatchStatus> {
        let contents = std::fs::read_to_string(patch_file)?;
        let mut state = self.state.lock().unwrap();
        state.calls.push(VcsCall::ApplyPatch);
        state.patches.push(contents);

        Ok(match &state.reject {
            Some(reason) => PatchStatus::Conflict(reason.clone()),
            None => PatchStatus::Applied,
        })
    }

    async fn commit(&self, message: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VcsCall::Commit(message.to_string()));
        if state.commit_nothing {
            return Ok(None);
        }

        state.head = state.next_commit;
        state.next_commit += 1;
        Ok(Some(format!("c{}", state.head)))
    }

    async fn push(&self, branch: &str, force: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VcsCall::Push {
            branch: branch.to_string(),
            force,
        });
        match &state.fail_push {
            Some(reason) => Err(Error::Git(reason.clone())),
            None => Ok(()),
        }
    }

    async fn reset_hard(&self, rev: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VcsCall::ResetHard(rev.to_string()));
        state.head = rev
            .trim_start_matches('c')
            .parse()
            .map_err(|_| Error::Git(format!("unknown revision {}", rev)))?;
        Ok(())
    }
}

/// A comment posted through [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedComment {
    pub target: Option<CommentTarget>,
    pub text: String,
}

#[derive(Default)]
struct SinkState {
    pull_requests: Vec<PullRequest>,
    merged: Vec<u64>,
    comments: Vec<PostedComment>,
    fail_open: Option<String>,
    fail_merge: Option<String>,
    fail_comment: Option<String>,
}

/// Notification sink that records pull requests, merges and comments.
#[derive(Default)]
pub struct RecordingSink {
    state: Mutex<SinkState>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, reason: &str) {
        self.state.lock().unwrap().fail_open = Some(reason.to_string());
    }

    pub fn fail_merge(&self, reason: &str) {
        self.state.lock().unwrap().fail_merge = Some(reason.to_string());
    }

    pub fn fail_comment(&self, reason: &str) {
        self.state.lock().unwrap().fail_comment = Some(reason.to_string());
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.state.lock().unwrap().pull_requests.clone()
    }

    /// Numbers of merged pull requests.
    pub fn merged(&self) -> Vec<u64> {
        self.state.lock().unwrap().merged.clone()
    }

    pub fn comments(&self) -> Vec<PostedComment> {
        self.state.lock().unwrap().comments.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn open_pull_request(
        &self,
        title: &str,
        _body: &str,
        head_branch: &str,
        base_branch: &str,
    ) -> Result<PullRequest> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.fail_open {
            return Err(Error::GitHub(reason.clone()));
        }

        let number = state.pull_requests.len() as u64 + 1;
        let pr = PullRequest {
            number,
            url: format!("https://github.example/pulls/{}", number),
            title: title.to_string(),
            base_branch: base_branch.to_string(),
            head_branch: head_branch.to_string(),
        };
        state.pull_requests.push(pr.clone());
        Ok(pr)
    }

    async fn merge(&self, pr: &PullRequest, _message: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.fail_merge {
            return Err(Error::GitHub(reason.clone()));
        }
        state.merged.push(pr.number);
        Ok(())
    }

    async fn comment(&self, target: Option<CommentTarget>, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.fail_comment {
            return Err(Error::GitHub(reason.clone()));
        }
        state.comments.push(PostedComment {
            target,
            text: text.to_string(),
        });
        Ok(())
    }
}
