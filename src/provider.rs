use async_trait::async_trait;
use thiserror::Error;

/// Failure modes of a generation call. Low-quality output is not an
/// error here; it is only detectable downstream during payload
/// extraction.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to reach generation endpoint: {0}")]
    Transport(String),
    #[error("generation endpoint returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("generation endpoint returned no content")]
    Empty,
}

/// Narrow contract the orchestration core requires from a text
/// generation backend: bounded-length completion given a prompt pair,
/// with failure signaled rather than content substituted.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ProviderError>;
}
