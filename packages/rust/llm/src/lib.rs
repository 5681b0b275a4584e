//! LLM collaborator for doctrans.
//!
//! The orchestrator only sees [`LlmClient`]; [`OpenRouterClient`] is the
//! production implementation against any OpenAI-compatible
//! `/chat/completions` endpoint.

mod openrouter;

use async_trait::async_trait;
use doctrans_shared::{Generation, Prompt, Result};

pub use openrouter::OpenRouterClient;

/// Generates one completion for a provider-neutral prompt.
///
/// Failures are reported as [`DocTransError::Provider`](doctrans_shared::DocTransError::Provider),
/// which the orchestrator turns into a chunk failure.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    async fn generate_content(&self, prompt: &Prompt) -> Result<Generation>;
}
