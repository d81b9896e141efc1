//! Fix requests against the AI collaborator with retry and model fallback.

use std::sync::Arc;
use std::time::Duration;

use crate::ai::{CompletionClient, CompletionError, CompletionRequest};
use crate::backoff::{ExponentialBackoff, Sleeper};
use crate::tool::IacTool;

/// Attempts made against a single model before moving on.
pub const ATTEMPTS_PER_MODEL: u32 = 3;

/// Default system role text.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI that fixes infrastructure-as-code errors \
efficiently. Reply with a single unified diff, relative to the repository root, that can be \
applied with `git apply`. Do not include explanations outside the diff.";

/// Default model priority list.
pub fn default_models() -> Vec<String> {
    vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string()]
}

/// Result of a fix request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixResponse {
    /// A patch was produced by the given model.
    Patch { text: String, model: String },
    /// Every model was exhausted.
    Unavailable,
}

/// Requests patches from the AI collaborator.
pub struct FixRequester {
    client: Arc<dyn CompletionClient>,
    sleeper: Arc<dyn Sleeper>,
    models: Vec<String>,
    backoff: ExponentialBackoff,
    attempts_per_model: u32,
    system_prompt: String,
    deadline: Option<Duration>,
}

impl FixRequester {
    /// Creates a requester with the default models, backoff and prompt.
    pub fn new(client: Arc<dyn CompletionClient>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            client,
            sleeper,
            models: default_models(),
            backoff: ExponentialBackoff::default(),
            attempts_per_model: ATTEMPTS_PER_MODEL,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            deadline: None,
        }
    }

    /// Sets the model priority list.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Bounds the whole request, including backoff sleeps.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Asks for a patch fixing `diagnostic`.
    ///
    /// Deadline expiry is reported as [`FixResponse::Unavailable`].
    pub async fn request_fix(&self, tool: IacTool, diagnostic: &str) -> FixResponse {
        match self.deadline {
            Some(limit) => {
                let request = self.try_models(tool, diagnostic);
                match tokio::time::timeout(limit, request).await {
                    Ok(response) => response,
                    Err(_) => {
                        tracing::warn!(deadline = ?limit, "fix request deadline expired");
                        FixResponse::Unavailable
                    }
                }
            }
            None => self.try_models(tool, diagnostic).await,
        }
    }

    async fn try_models(&self, tool: IacTool, diagnostic: &str) -> FixResponse {
        let user = build_user_prompt(tool, diagnostic);

        for model in &self.models {
            let request = CompletionRequest {
                system: self.system_prompt.clone(),
                user: user.clone(),
                model: model.clone(),
            };

            if let Some(text) = self.try_model(&request).await {
                return FixResponse::Patch {
                    text,
                    model: model.clone(),
                };
            }
        }

        tracing::error!(models = ?self.models, "all models exhausted");
        FixResponse::Unavailable
    }

    /// Tries one model up to the per-model limit. Returns the extracted patch.
    async fn try_model(&self, request: &CompletionRequest) -> Option<String> {
        for attempt in 1..=self.attempts_per_model {
            tracing::info!(model = %request.model, attempt, client = self.client.name(), "requesting fix");

            let err = match self.client.complete(request).await {
                Ok(completion) => match extract_patch(&completion) {
                    Some(patch) => return Some(patch),
                    None => CompletionError::Other("completion contained no patch".to_string()),
                },
                Err(err) => err,
            };

            match err {
                CompletionError::RateLimited(msg) => {
                    if attempt < self.attempts_per_model {
                        let delay = self.backoff.delay(attempt);
                        tracing::warn!(model = %request.model, attempt, ?delay, error = %msg, "rate limited, backing off");
                        self.sleeper.sleep(delay).await;
                    } else {
                        tracing::warn!(model = %request.model, error = %msg, "rate limited, retries exhausted");
                    }
                }
                CompletionError::ModelUnavailable(msg) => {
                    tracing::warn!(model = %request.model, error = %msg, "model unavailable, falling back");
                    return None;
                }
                CompletionError::Other(msg) => {
                    tracing::error!(model = %request.model, error = %msg, "fix request failed");
                    return None;
                }
            }
        }

        None
    }
}

/// Builds the user message for a diagnostic.
pub fn build_user_prompt(tool: IacTool, diagnostic: &str) -> String {
    format!("Fix this {} error:\n{}", tool, diagnostic.trim())
}

/// Extracts patch text from a completion.
///
/// Uses the first fenced code block when there is one, otherwise the whole
/// completion. Returns `None` when nothing usable remains.
pub fn extract_patch(completion: &str) -> Option<String> {
    let text = match fenced_block(completion) {
        Some(block) => block,
        None => completion.to_string(),
    };

    if text.trim().is_empty() {
        return None;
    }

    let mut patch = text.trim_matches(|c: char| c == '\n' || c == '\r').to_string();
    // git apply rejects patches without a trailing newline
    patch.push('\n');
    Some(patch)
}

fn fenced_block(text: &str) -> Option<String> {
    let mut lines = text.lines();
    lines.by_ref().find(|line| line.trim_start().starts_with("```"))?;

    let mut body = Vec::new();
    for line in lines {
        if line.trim_start().starts_with("```") {
            return Some(body.join("\n"));
        }
        body.push(line);
    }

    // Unterminated fence: keep what followed it
    Some(body.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::RecordingSleeper;
    use crate::fakes::ScriptedCompletionClient;

    const PATCH: &str = "--- a/main.tf\n+++ b/main.tf\n@@ -1 +1 @@\n-resource\n+resource \"x\" {}\n";

    fn requester(
        client: &Arc<ScriptedCompletionClient>,
        sleeper: &Arc<RecordingSleeper>,
    ) -> FixRequester {
        FixRequester::new(client.clone(), sleeper.clone())
    }

    #[tokio::test]
    async fn first_model_success_returns_patch() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(Ok(PATCH.to_string()));
        let sleeper = Arc::new(RecordingSleeper::new());

        let response = requester(&client, &sleeper)
            .request_fix(IacTool::Terraform, "syntax error line 4")
            .await;

        assert_eq!(
            response,
            FixResponse::Patch {
                text: PATCH.to_string(),
                model: "gpt-4".to_string()
            }
        );
        assert!(sleeper.delays().is_empty());
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].user, "Fix this terraform error:\nsyntax error line 4");
    }

    #[tokio::test]
    async fn rate_limit_retries_same_model_with_backoff() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(Err(CompletionError::RateLimited("429".into())));
        client.push(Err(CompletionError::RateLimited("429".into())));
        client.push(Ok(PATCH.to_string()));
        let sleeper = Arc::new(RecordingSleeper::new());

        let response = requester(&client, &sleeper)
            .request_fix(IacTool::Terraform, "err")
            .await;

        assert!(matches!(response, FixResponse::Patch { ref model, .. } if model == "gpt-4"));
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert!(client.requests().iter().all(|r| r.model == "gpt-4"));
    }

    #[tokio::test]
    async fn exhausted_rate_limit_falls_back_to_next_model() {
        let client = Arc::new(ScriptedCompletionClient::new());
        for _ in 0..3 {
            client.push(Err(CompletionError::RateLimited("429".into())));
        }
        client.push(Ok(PATCH.to_string()));
        let sleeper = Arc::new(RecordingSleeper::new());

        let response = requester(&client, &sleeper)
            .request_fix(IacTool::Terraform, "err")
            .await;

        assert!(matches!(
            response,
            FixResponse::Patch { ref model, .. } if model == "gpt-3.5-turbo"
        ));
        // No sleep after the final attempt on a model
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn model_unavailable_falls_through_immediately() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(Err(CompletionError::ModelUnavailable("404".into())));
        client.push(Ok(PATCH.to_string()));
        let sleeper = Arc::new(RecordingSleeper::new());

        let response = requester(&client, &sleeper)
            .request_fix(IacTool::Pulumi, "err")
            .await;

        assert!(matches!(
            response,
            FixResponse::Patch { ref model, .. } if model == "gpt-3.5-turbo"
        ));
        assert!(sleeper.delays().is_empty());
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn malformed_response_is_hard_failure_for_model() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(Ok("   ".to_string()));
        client.push(Err(CompletionError::Other("bad json".into())));
        let sleeper = Arc::new(RecordingSleeper::new());

        let response = requester(&client, &sleeper)
            .request_fix(IacTool::Ansible, "err")
            .await;

        assert_eq!(response, FixResponse::Unavailable);
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn all_models_exhausted_is_unavailable() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.set_fallback(Err(CompletionError::RateLimited("429".into())));
        let sleeper = Arc::new(RecordingSleeper::new());

        let response = requester(&client, &sleeper)
            .request_fix(IacTool::Packer, "err")
            .await;

        assert_eq!(response, FixResponse::Unavailable);
        assert_eq!(client.requests().len(), 6);
        assert_eq!(sleeper.delays().len(), 4);
    }

    #[tokio::test]
    async fn empty_model_list_is_unavailable() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let sleeper = Arc::new(RecordingSleeper::new());

        let response = requester(&client, &sleeper)
            .with_models(vec![])
            .request_fix(IacTool::Terraform, "err")
            .await;

        assert_eq!(response, FixResponse::Unavailable);
        assert!(client.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_unavailable() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.set_fallback(Err(CompletionError::RateLimited("429".into())));
        let requester = FixRequester::new(client.clone(), Arc::new(crate::backoff::TokioSleeper))
            .with_deadline(Some(Duration::from_secs(1)));

        let response = requester.request_fix(IacTool::Terraform, "err").await;

        assert_eq!(response, FixResponse::Unavailable);
    }

    #[test]
    fn extract_patch_prefers_fenced_block() {
        let completion = "Here is the fix:\n```diff\n--- a/x\n+++ b/x\n```\nGood luck";
        assert_eq!(extract_patch(completion).unwrap(), "--- a/x\n+++ b/x\n");
    }

    #[test]
    fn extract_patch_uses_whole_text_without_fence() {
        assert_eq!(extract_patch("\n--- a/x\n+++ b/x").unwrap(), "--- a/x\n+++ b/x\n");
    }

    #[test]
    fn extract_patch_rejects_empty() {
        assert_eq!(extract_patch(""), None);
        assert_eq!(extract_patch("```\n```"), None);
    }
}
