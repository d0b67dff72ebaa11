//! Provider wire clients.
//!
//! Three wire shapes cover every configured variant: an OpenAI-shaped
//! chat endpoint (used by both the generic and rate-limited variants), a
//! local model server serialized through a mutex, and the dedicated OCR
//! endpoint with its files API.

use base64::Engine;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::types::{LlmError, LlmResponse, LlmUsage, ProviderFile, ResponseFormat};

const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// What the user turn of a chat request carries.
pub enum ChatContent<'a> {
    Text(&'a str),
    Image { bytes: &'a [u8], mime: &'a str },
    FileRef(&'a str),
}

fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

async fn read_response(response: reqwest::Response) -> Result<(u16, String), LlmError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| LlmError::Connection(e.to_string()))?;
    Ok((status, body))
}

fn expect_success(status: u16, body: String) -> Result<String, LlmError> {
    if (200..300).contains(&status) {
        Ok(body)
    } else {
        Err(LlmError::Api { status, body })
    }
}

/// A chat request ready to send: the serialized body plus its size, used
/// by the dispatcher's payload-size retry cutoff.
pub struct PreparedChat {
    pub body: serde_json::Value,
    pub body_size: usize,
}

/// OpenAI-shaped chat endpoint with a bearer key.
#[derive(Clone)]
pub struct GenericChatProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl GenericChatProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// Build the request body without sending it, so the caller can route
    /// it through the dispatcher with a known body size.
    pub fn prepare(
        &self,
        model: &str,
        system_prompt: &str,
        content: &ChatContent<'_>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        response_format: Option<&ResponseFormat>,
    ) -> PreparedChat {
        let user_content = match content {
            ChatContent::Text(text) => serde_json::Value::String((*text).to_string()),
            ChatContent::Image { bytes, mime } => serde_json::json!([
                { "type": "image_url", "image_url": { "url": data_uri(bytes, mime) } }
            ]),
            ChatContent::FileRef(file_id) => serde_json::json!([
                { "type": "file", "file_id": file_id }
            ]),
        };

        let mut body = serde_json::json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_content },
            ],
            "temperature": temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "max_tokens": max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(format) = response_format {
            body["response_format"] = match format {
                ResponseFormat::JsonObject => serde_json::json!({ "type": "json_object" }),
                ResponseFormat::JsonSchema {
                    name,
                    strict,
                    schema,
                } => serde_json::json!({
                    "type": "json_schema",
                    "json_schema": { "name": name, "strict": strict, "schema": schema },
                }),
            };
        }

        let body_size = serde_json::to_vec(&body).map(|v| v.len()).unwrap_or(0);
        PreparedChat { body, body_size }
    }

    /// Send a prepared chat request.
    pub async fn send(&self, prepared: &PreparedChat) -> Result<LlmResponse, LlmError> {
        let mut request = self
            .http
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .json(&prepared.body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let (status, body) = read_response(response).await?;
        let body = expect_success(status, body)?;

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("chat response has no choices".into()))?;

        Ok(LlmResponse {
            content,
            model: parsed.model.unwrap_or_default(),
            usage: parsed.usage.map(|u| LlmUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                pages: None,
            }),
            cached: false,
        })
    }
}

/// Local model server (Ollama wire shape). All calls are serialized
/// through one mutex so concurrent workers cannot exhaust its memory.
pub struct LocalSerializedProvider {
    http: reqwest::Client,
    endpoint: String,
    num_ctx: Option<u32>,
    lock: Mutex<()>,
}

#[derive(Debug, Deserialize)]
struct LocalChatResponse {
    message: LocalMessage,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LocalMessage {
    content: String,
}

impl LocalSerializedProvider {
    pub fn new(endpoint: impl Into<String>, num_ctx: Option<u32>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            num_ctx,
            lock: Mutex::new(()),
        }
    }

    pub async fn chat(
        &self,
        model: &str,
        system_prompt: &str,
        content: &ChatContent<'_>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        response_format: Option<&ResponseFormat>,
    ) -> Result<LlmResponse, LlmError> {
        let mut user = serde_json::json!({ "role": "user" });
        match content {
            ChatContent::Text(text) => {
                user["content"] = serde_json::Value::String((*text).to_string());
            }
            ChatContent::Image { bytes, mime: _ } => {
                user["content"] = serde_json::Value::String(String::new());
                user["images"] = serde_json::json!([
                    base64::engine::general_purpose::STANDARD.encode(bytes)
                ]);
            }
            ChatContent::FileRef(_) => {
                return Err(LlmError::Unsupported(
                    "local model server has no files API".into(),
                ));
            }
        }

        let mut options = serde_json::json!({
            "temperature": temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "num_predict": max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(num_ctx) = self.num_ctx {
            options["num_ctx"] = serde_json::json!(num_ctx);
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system_prompt },
                user,
            ],
            "stream": false,
            "options": options,
        });
        // The local server's schema-format field replaces response_format.
        if let Some(format) = response_format {
            body["format"] = match format {
                ResponseFormat::JsonObject => serde_json::Value::String("json".into()),
                ResponseFormat::JsonSchema { schema, .. } => schema.clone(),
            };
        }

        let _serialized = self.lock.lock().await;
        debug!("Local model request: {}", model);
        let response = self
            .http
            .post(format!("{}/api/chat", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let (status, text) = read_response(response).await?;
        let text = expect_success(status, text)?;

        let parsed: LocalChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(LlmResponse {
            content: parsed.message.content,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            usage: Some(LlmUsage {
                prompt_tokens: parsed.prompt_eval_count.unwrap_or(0),
                completion_tokens: parsed.eval_count.unwrap_or(0),
                pages: None,
            }),
            cached: false,
        })
    }
}

/// Dedicated OCR endpoint (`/v1/ocr`) plus its files API.
#[derive(Clone)]
pub struct OcrEndpointProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct OcrEndpointResponse {
    pub pages: Vec<OcrPage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage_info: Option<OcrUsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct OcrPage {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub markdown: String,
}

#[derive(Debug, Deserialize)]
pub struct OcrUsageInfo {
    #[serde(default)]
    pub pages_processed: u64,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    created_at: i64,
}

#[derive(Debug, Deserialize)]
struct FileList {
    data: Vec<FileObject>,
}

impl OcrEndpointProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Build the `document` value embedded into an OCR request.
    pub fn document_from_image(bytes: &[u8], mime: &str) -> serde_json::Value {
        serde_json::json!({ "type": "image_url", "image_url": data_uri(bytes, mime) })
    }

    /// Document value referencing a previously uploaded provider file.
    pub fn document_from_file(file_id: &str) -> serde_json::Value {
        serde_json::json!({ "type": "file", "file_id": file_id })
    }

    /// Single OCR request, outside the batch pathway.
    pub async fn ocr(
        &self,
        model: &str,
        document: &serde_json::Value,
    ) -> Result<OcrEndpointResponse, LlmError> {
        let body = serde_json::json!({ "model": model, "document": document });
        let response = self
            .http
            .post(format!("{}/v1/ocr", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let (status, text) = read_response(response).await?;
        let text = expect_success(status, text)?;
        serde_json::from_str(&text).map_err(|e| LlmError::Parse(e.to_string()))
    }

    /// Parse a batch-output body (same shape as the direct response).
    pub fn parse_ocr_body(body: &serde_json::Value) -> Result<OcrEndpointResponse, LlmError> {
        serde_json::from_value(body.clone()).map_err(|e| LlmError::Parse(e.to_string()))
    }

    pub async fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mime: &str,
        purpose: &str,
    ) -> Result<String, LlmError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", purpose.to_string())
            .part("file", part);

        let response = self
            .http
            .post(format!("{}/v1/files", self.endpoint))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let (status, text) = read_response(response).await?;
        let text = expect_success(status, text)?;
        let file: FileObject =
            serde_json::from_str(&text).map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(file.id)
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), LlmError> {
        let response = self
            .http
            .delete(format!("{}/v1/files/{}", self.endpoint, file_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let (status, body) = read_response(response).await?;
        expect_success(status, body).map(|_| ())
    }

    pub async fn list_files(&self, purpose: &str) -> Result<Vec<ProviderFile>, LlmError> {
        let response = self
            .http
            .get(format!("{}/v1/files", self.endpoint))
            .query(&[("purpose", purpose)])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let (status, text) = read_response(response).await?;
        let text = expect_success(status, text)?;
        let list: FileList =
            serde_json::from_str(&text).map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(list
            .data
            .into_iter()
            .map(|f| ProviderFile {
                id: f.id,
                filename: f.filename,
                created_at: chrono::DateTime::from_timestamp(f.created_at, 0)
                    .unwrap_or_else(chrono::Utc::now),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_text_request() {
        let provider = GenericChatProvider::new("https://api.example.com", Some("key".into()));
        let prepared = provider.prepare(
            "mistral-small-latest",
            "classify this",
            &ChatContent::Text("SALARY 2000 EUR"),
            Some(0.0),
            None,
            Some(&ResponseFormat::JsonObject),
        );
        assert_eq!(prepared.body["model"], "mistral-small-latest");
        assert_eq!(prepared.body["temperature"], 0.0);
        assert_eq!(prepared.body["max_tokens"], 4096);
        assert_eq!(prepared.body["response_format"]["type"], "json_object");
        assert_eq!(prepared.body["messages"][1]["content"], "SALARY 2000 EUR");
        assert!(prepared.body_size > 0);
    }

    #[test]
    fn test_prepare_image_request_embeds_data_uri() {
        let provider = GenericChatProvider::new("https://api.example.com", None);
        let prepared = provider.prepare(
            "pixtral-12b-latest",
            "read this",
            &ChatContent::Image {
                bytes: &[1, 2, 3],
                mime: "image/webp",
            },
            None,
            None,
            None,
        );
        let url = prepared.body["messages"][1]["content"][0]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with("data:image/webp;base64,"));
    }

    #[test]
    fn test_ocr_document_shapes() {
        let doc = OcrEndpointProvider::document_from_image(&[0xFF], "image/webp");
        assert_eq!(doc["type"], "image_url");
        let doc = OcrEndpointProvider::document_from_file("file-123");
        assert_eq!(doc["file_id"], "file-123");
    }

    #[test]
    fn test_parse_ocr_body() {
        let body = serde_json::json!({
            "pages": [{"index": 0, "markdown": "# Invoice"}],
            "model": "mistral-ocr-latest",
            "usage_info": {"pages_processed": 1},
        });
        let parsed = OcrEndpointProvider::parse_ocr_body(&body).unwrap();
        assert_eq!(parsed.pages.len(), 1);
        assert_eq!(parsed.pages[0].markdown, "# Invoice");
        assert_eq!(parsed.usage_info.unwrap().pages_processed, 1);
    }
}
