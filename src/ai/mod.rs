//! AI completion collaborator.
//!
//! The remediation loop only sees the [`CompletionClient`] trait and its typed
//! [`CompletionError`]; retry and fallback decisions are made on the error
//! variant, never on message text.

mod openai;

pub use openai::{OpenAiClient, DEFAULT_API_BASE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System role text.
    pub system: String,
    /// User message, carrying the diagnostic.
    pub user: String,
    /// Model identifier to ask.
    pub model: String,
}

/// Typed failure of a completion request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// The service is at capacity; the same model may be retried after a delay.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The model cannot serve requests; move on to the next model.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Any other failure, including malformed responses.
    #[error("completion failed: {0}")]
    Other(String),
}

/// Client for an AI completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Requests a completion and returns its text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;

    /// Returns the name of this client.
    fn name(&self) -> &str;
}
