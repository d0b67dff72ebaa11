//! Unified LLM facade.
//!
//! Routes each task (text, vision, ocr) to its configured provider
//! variant, consults the response cache transparently, and funnels
//! rate-limited providers through the global dispatcher. Callers never
//! see provider identity, only capabilities.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use futures::future::BoxFuture;
use tracing::debug;

use crate::config::{ProviderKind, Settings, TaskProviderConfig};

use super::batch::BatchOcrCoalescer;
use super::cache::ResponseCache;
use super::dispatcher::RateLimitedDispatcher;
use super::provider::{
    ChatContent, GenericChatProvider, LocalSerializedProvider, OcrEndpointProvider, OcrPage,
};
use super::types::{LlmError, LlmOptions, LlmResponse, LlmUsage, ProviderFile};
use super::LlmService;

enum TaskProvider {
    Generic(GenericChatProvider),
    RateLimited(GenericChatProvider),
    Local(Arc<LocalSerializedProvider>),
    Ocr(OcrEndpointProvider),
}

#[derive(Clone, Copy)]
enum Task {
    Text,
    Vision,
    Ocr,
}

impl Task {
    fn default_prefix(&self) -> &'static str {
        match self {
            Task::Text => "chat",
            Task::Vision => "vision",
            Task::Ocr => "ocr",
        }
    }
}

/// The provider facade: `text`, `vision`, `ocr`, `upload`, `delete`.
pub struct LlmGateway {
    settings: Arc<Settings>,
    cache: ResponseCache,
    dispatcher: Arc<RateLimitedDispatcher>,
    coalescer: Arc<BatchOcrCoalescer>,
    text: TaskProvider,
    vision: TaskProvider,
    ocr: TaskProvider,
}

impl LlmGateway {
    pub fn new(settings: Arc<Settings>) -> Self {
        let dispatcher = RateLimitedDispatcher::global(settings.mistral_max_rps);
        let coalescer = BatchOcrCoalescer::global(
            &settings.ocr.endpoint,
            settings.mistral_api_key.as_deref().unwrap_or(""),
            dispatcher.clone(),
        );
        let cache = ResponseCache::new(&settings.llm_cache_dir, settings.llm_cache_enabled);

        // Local providers sharing an endpoint share the serialization mutex.
        let mut locals: HashMap<String, Arc<LocalSerializedProvider>> = HashMap::new();
        let mut build = |config: &TaskProviderConfig| -> TaskProvider {
            match config.provider {
                ProviderKind::Generic => TaskProvider::Generic(GenericChatProvider::new(
                    &config.endpoint,
                    settings
                        .ovh_api_key
                        .clone()
                        .or_else(|| settings.mistral_api_key.clone()),
                )),
                ProviderKind::RateLimited => TaskProvider::RateLimited(GenericChatProvider::new(
                    &config.endpoint,
                    settings.mistral_api_key.clone(),
                )),
                ProviderKind::LocalSerialized => {
                    let provider = locals
                        .entry(config.endpoint.clone())
                        .or_insert_with(|| {
                            Arc::new(LocalSerializedProvider::new(
                                &config.endpoint,
                                settings.llm_num_ctx,
                            ))
                        })
                        .clone();
                    TaskProvider::Local(provider)
                }
                ProviderKind::OcrEndpoint => TaskProvider::Ocr(OcrEndpointProvider::new(
                    &config.endpoint,
                    settings.mistral_api_key.clone().unwrap_or_default(),
                )),
            }
        };

        let text = build(&settings.text);
        let vision = build(&settings.vision);
        let ocr = build(&settings.ocr);

        Self {
            settings,
            cache,
            dispatcher,
            coalescer,
            text,
            vision,
            ocr,
        }
    }

    fn task_config(&self, task: Task) -> &TaskProviderConfig {
        match task {
            Task::Text => &self.settings.text,
            Task::Vision => &self.settings.vision,
            Task::Ocr => &self.settings.ocr,
        }
    }

    fn task_provider(&self, task: Task) -> &TaskProvider {
        match task {
            Task::Text => &self.text,
            Task::Vision => &self.vision,
            Task::Ocr => &self.ocr,
        }
    }

    /// The provider holding the files API, if one is configured.
    fn files_provider(&self) -> Option<&OcrEndpointProvider> {
        for provider in [&self.ocr, &self.vision, &self.text] {
            if let TaskProvider::Ocr(p) = provider {
                return Some(p);
            }
        }
        None
    }

    async fn chat_task(
        &self,
        task: Task,
        system_prompt: &str,
        content: ChatContent<'_>,
        opts: &LlmOptions,
    ) -> Result<LlmResponse, LlmError> {
        let config = self.task_config(task);
        let model = opts.model.clone().unwrap_or_else(|| config.model.clone());
        let prefix = opts
            .cache_prefix
            .clone()
            .unwrap_or_else(|| task.default_prefix().to_string());

        // File-backed requests have extrinsic identity and skip the cache.
        let cache_content = match &content {
            ChatContent::Text(text) => Some((*text).to_string()),
            ChatContent::Image { bytes, .. } => {
                Some(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            ChatContent::FileRef(_) => None,
        };
        let cache_usable =
            self.cache.is_enabled() && !opts.skip_cache && cache_content.is_some();

        if cache_usable {
            if let Some(hit) = self.cache.get(
                &prefix,
                &model,
                system_prompt,
                cache_content.as_deref().unwrap_or(""),
            ) {
                return Ok(hit);
            }
        }

        let response = match self.task_provider(task) {
            TaskProvider::Generic(provider) => {
                let prepared = provider.prepare(
                    &model,
                    system_prompt,
                    &content,
                    opts.temperature,
                    opts.max_tokens,
                    opts.response_format.as_ref(),
                );
                provider.send(&prepared).await?
            }
            TaskProvider::RateLimited(provider) => {
                let prepared = Arc::new(provider.prepare(
                    &model,
                    system_prompt,
                    &content,
                    opts.temperature,
                    opts.max_tokens,
                    opts.response_format.as_ref(),
                ));
                let body_size = prepared.body_size;
                let provider = provider.clone();
                self.dispatcher
                    .execute(
                        body_size,
                        Arc::new(move || {
                            let provider = provider.clone();
                            let prepared = prepared.clone();
                            Box::pin(async move { provider.send(&prepared).await })
                                as BoxFuture<'static, _>
                        }),
                    )
                    .await?
            }
            TaskProvider::Local(provider) => {
                provider
                    .chat(
                        &model,
                        system_prompt,
                        &content,
                        opts.temperature,
                        opts.max_tokens,
                        opts.response_format.as_ref(),
                    )
                    .await?
            }
            TaskProvider::Ocr(_) => {
                return Err(LlmError::Unsupported(
                    "OCR endpoint cannot serve chat tasks".into(),
                ));
            }
        };

        if cache_usable {
            if let Err(e) = self.cache.set(
                &prefix,
                &model,
                system_prompt,
                cache_content.as_deref().unwrap_or(""),
                &response,
            ) {
                debug!("Failed to write LLM cache entry: {}", e);
            }
        }
        Ok(response)
    }

}

/// Flatten the OCR endpoint's page payload into the unified envelope the
/// llm-ocr worker validates: raw content with the pages joined.
fn ocr_to_response(parsed: super::provider::OcrEndpointResponse, model: &str) -> LlmResponse {
    let page_count = parsed.pages.len() as u64;
    let content = ocr_envelope(&parsed.pages);
    LlmResponse {
        content,
        model: parsed.model.unwrap_or_else(|| model.to_string()),
        usage: Some(LlmUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
            pages: Some(
                parsed
                    .usage_info
                    .map(|u| u.pages_processed)
                    .filter(|&p| p > 0)
                    .unwrap_or(page_count),
            ),
        }),
        cached: false,
    }
}

fn ocr_envelope(pages: &[OcrPage]) -> String {
    let joined = pages
        .iter()
        .map(|p| p.markdown.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    serde_json::json!({
        "extractedText": { "contentType": "raw", "content": joined }
    })
    .to_string()
}

#[async_trait]
impl LlmService for LlmGateway {
    async fn text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: LlmOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.chat_task(Task::Text, system_prompt, ChatContent::Text(user_prompt), &opts)
            .await
    }

    async fn vision(
        &self,
        system_prompt: &str,
        image: &[u8],
        mime: &str,
        opts: LlmOptions,
    ) -> Result<LlmResponse, LlmError> {
        let file_id = opts.file_id.clone();
        let content = match &file_id {
            Some(file_id) => ChatContent::FileRef(file_id.as_str()),
            None => ChatContent::Image { bytes: image, mime },
        };
        self.chat_task(Task::Vision, system_prompt, content, &opts).await
    }

    async fn ocr(
        &self,
        system_prompt: &str,
        image: &[u8],
        mime: &str,
        opts: LlmOptions,
    ) -> Result<LlmResponse, LlmError> {
        let config = self.task_config(Task::Ocr);
        match self.task_provider(Task::Ocr) {
            TaskProvider::Ocr(provider) => {
                let model = opts.model.clone().unwrap_or_else(|| config.model.clone());
                let prefix = opts
                    .cache_prefix
                    .clone()
                    .unwrap_or_else(|| Task::Ocr.default_prefix().to_string());
                let document = match &opts.file_id {
                    Some(file_id) => OcrEndpointProvider::document_from_file(file_id),
                    None => OcrEndpointProvider::document_from_image(image, mime),
                };
                let cache_content = opts
                    .file_id
                    .is_none()
                    .then(|| base64::engine::general_purpose::STANDARD.encode(image));
                let cache_usable =
                    self.cache.is_enabled() && !opts.skip_cache && cache_content.is_some();

                if cache_usable {
                    if let Some(hit) = self.cache.get(
                        &prefix,
                        &model,
                        system_prompt,
                        cache_content.as_deref().unwrap_or(""),
                    ) {
                        return Ok(hit);
                    }
                }

                let response = if self.settings.mistral_batch_ocr_enabled {
                    let body = self.coalescer.execute(document, &model).await?;
                    ocr_to_response(OcrEndpointProvider::parse_ocr_body(&body)?, &model)
                } else {
                    let provider = provider.clone();
                    let model_owned = model.clone();
                    let body_size =
                        serde_json::to_vec(&document).map(|v| v.len()).unwrap_or(0);
                    let document = Arc::new(document);
                    self.dispatcher
                        .execute(
                            body_size,
                            Arc::new(move || {
                                let provider = provider.clone();
                                let model = model_owned.clone();
                                let document = document.clone();
                                Box::pin(async move {
                                    let parsed = provider.ocr(&model, &document).await?;
                                    Ok(ocr_to_response(parsed, &model))
                                })
                                    as BoxFuture<'static, _>
                            }),
                        )
                        .await?
                };

                if cache_usable {
                    if let Err(e) = self.cache.set(
                        &prefix,
                        &model,
                        system_prompt,
                        cache_content.as_deref().unwrap_or(""),
                        &response,
                    ) {
                        debug!("Failed to write LLM cache entry: {}", e);
                    }
                }
                Ok(response)
            }
            // OCR configured onto a chat-shaped provider: vision-style call.
            _ => {
                let opts = LlmOptions {
                    cache_prefix: Some(
                        opts.cache_prefix
                            .clone()
                            .unwrap_or_else(|| Task::Ocr.default_prefix().to_string()),
                    ),
                    ..opts
                };
                let file_id = opts.file_id.clone();
                let content = match &file_id {
                    Some(file_id) => ChatContent::FileRef(file_id.as_str()),
                    None => ChatContent::Image { bytes: image, mime },
                };
                self.chat_task(Task::Ocr, system_prompt, content, &opts).await
            }
        }
    }

    async fn upload(
        &self,
        document_id: &str,
        bytes: &[u8],
        mime: &str,
        purpose: &str,
    ) -> Result<String, LlmError> {
        let provider = self
            .files_provider()
            .ok_or_else(|| LlmError::Unsupported("no provider with a files API".into()))?;
        provider
            .upload(
                &format!("document-{}", document_id),
                bytes.to_vec(),
                mime,
                purpose,
            )
            .await
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), LlmError> {
        let provider = self
            .files_provider()
            .ok_or_else(|| LlmError::Unsupported("no provider with a files API".into()))?;
        provider.delete_file(file_id).await
    }

    async fn list_files(&self, purpose: &str) -> Result<Vec<ProviderFile>, LlmError> {
        let provider = self
            .files_provider()
            .ok_or_else(|| LlmError::Unsupported("no provider with a files API".into()))?;
        provider.list_files(purpose).await
    }
}
