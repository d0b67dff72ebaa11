//! LLM integration: gateway, providers, response cache, rate-limited
//! dispatch, and OCR batching.

mod batch;
mod cache;
mod dispatcher;
mod gateway;
mod provider;
mod types;

pub use batch::{BatchOcrCoalescer, INLINE_BATCH_LIMIT};
pub use cache::ResponseCache;
pub use dispatcher::{RateLimitedDispatcher, RETRY_PAYLOAD_LIMIT};
pub use gateway::LlmGateway;
pub use types::{LlmError, LlmOptions, LlmResponse, LlmUsage, ProviderFile, ResponseFormat};

use async_trait::async_trait;

/// Capability facade the workers program against.
///
/// The gateway implements this over the configured providers; tests
/// implement it with canned responses.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: LlmOptions,
    ) -> Result<LlmResponse, LlmError>;

    async fn vision(
        &self,
        system_prompt: &str,
        image: &[u8],
        mime: &str,
        opts: LlmOptions,
    ) -> Result<LlmResponse, LlmError>;

    async fn ocr(
        &self,
        system_prompt: &str,
        image: &[u8],
        mime: &str,
        opts: LlmOptions,
    ) -> Result<LlmResponse, LlmError>;

    /// Store bytes with the provider, returning the provider file id.
    async fn upload(
        &self,
        document_id: &str,
        bytes: &[u8],
        mime: &str,
        purpose: &str,
    ) -> Result<String, LlmError>;

    async fn delete_file(&self, file_id: &str) -> Result<(), LlmError>;

    async fn list_files(&self, purpose: &str) -> Result<Vec<ProviderFile>, LlmError>;
}
