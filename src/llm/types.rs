//! Request/response shapes and errors shared across the LLM stack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the gateway, providers, dispatcher, and coalescer.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Non-2xx provider response. Display keeps the `(status)` marker the
    /// dispatcher matches for retry decisions.
    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Failed to parse response: {0}")]
    Parse(String),
    /// Rate-limited request whose body is too large to retry.
    #[error("Request payload too large to retry after rate limit ({0} bytes)")]
    PayloadTooLarge(usize),
    #[error("Operation not supported by the configured provider: {0}")]
    Unsupported(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Batch job failed ({status}): {message}")]
    Batch { status: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Whether this error represents a provider rate limit.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Api { status: 429, .. } => true,
            other => {
                let msg = other.to_string();
                msg.contains("rate_limited") || msg.contains("Rate limit") || msg.contains("(429)")
            }
        }
    }
}

/// Structured response format requested from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseFormat {
    #[serde(rename = "json_object")]
    JsonObject,
    #[serde(rename = "json_schema")]
    JsonSchema {
        name: String,
        #[serde(default)]
        strict: bool,
        schema: serde_json::Value,
    },
}

/// Per-call options recognized by the gateway.
#[derive(Debug, Clone, Default)]
pub struct LlmOptions {
    /// Overrides the configured per-task model.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Bypass cache read and write.
    pub skip_cache: bool,
    /// Namespaces the cache (classify, normalize/<docType>, ocr, ...).
    pub cache_prefix: Option<String>,
    pub response_format: Option<ResponseFormat>,
    /// Reuse a previously uploaded provider file instead of embedding bytes.
    pub file_id: Option<String>,
}

/// Token/page usage reported by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u64>,
}

/// Unified provider response envelope. Serialized as-is into the response
/// cache; `cached` is set on retrieval, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

/// A file stored with a provider (OCR uploads).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderFile {
    pub id: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_detection() {
        assert!(LlmError::Api {
            status: 429,
            body: "too many requests".into()
        }
        .is_rate_limited());
        assert!(LlmError::Connection("upstream rate_limited".into()).is_rate_limited());
        assert!(!LlmError::Api {
            status: 500,
            body: "boom".into()
        }
        .is_rate_limited());
    }

    #[test]
    fn test_api_error_message_carries_status() {
        let err = LlmError::Api {
            status: 429,
            body: "slow down".into(),
        };
        assert!(err.to_string().contains("(429)"));
    }

    #[test]
    fn test_response_cache_round_trip_shape() {
        let resp = LlmResponse {
            content: "{}".into(),
            model: "m".into(),
            usage: Some(LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                pages: None,
            }),
            cached: false,
        };
        let json = serde_json::to_string(&resp).unwrap();
        // `cached: false` stays off the wire.
        assert!(!json.contains("cached"));
        let back: LlmResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "{}");
        assert!(!back.cached);
    }

    #[test]
    fn test_response_format_wire_shape() {
        let json = serde_json::to_value(ResponseFormat::JsonObject).unwrap();
        assert_eq!(json["type"], "json_object");
        let schema = ResponseFormat::JsonSchema {
            name: "doc".into(),
            strict: true,
            schema: serde_json::json!({"type": "object"}),
        };
        let json = serde_json::to_value(schema).unwrap();
        assert_eq!(json["type"], "json_schema");
        assert_eq!(json["name"], "doc");
    }
}
