//! Content-addressed filesystem cache for LLM responses.
//!
//! Key material is `(prefix, sanitized model, hash(system prompt),
//! hash(content))` where content is the user prompt for chat or the
//! base64 image payload for vision/OCR. File-ID requests are never cached
//! (their identity is extrinsic to the content).

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::types::LlmResponse;

/// Filesystem response cache.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    enabled: bool,
}

fn sanitize_model(model: &str) -> String {
    model
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn short_hash(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    /// Whether the cache is usable (enabled and the root is creatable).
    pub fn is_enabled(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match std::fs::create_dir_all(&self.dir) {
            Ok(()) => true,
            Err(e) => {
                warn!("LLM cache disabled, cannot create {:?}: {}", self.dir, e);
                false
            }
        }
    }

    fn entry_path(&self, prefix: &str, model: &str, system_prompt: &str, content: &str) -> PathBuf {
        self.dir
            .join(prefix)
            .join(sanitize_model(model))
            .join(short_hash(system_prompt))
            .join(format!("{}.json", short_hash(content)))
    }

    /// Look up a cached response. A miss (including an unreadable entry)
    /// is `None`, never an error.
    pub fn get(
        &self,
        prefix: &str,
        model: &str,
        system_prompt: &str,
        content: &str,
    ) -> Option<LlmResponse> {
        let path = self.entry_path(prefix, model, system_prompt, content);
        let data = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<LlmResponse>(&data) {
            Ok(mut response) => {
                debug!("LLM cache hit: {:?}", path);
                response.cached = true;
                Some(response)
            }
            Err(e) => {
                warn!("Dropping corrupt cache entry {:?}: {}", path, e);
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    /// Store a response. The `cached` marker is stripped before writing.
    pub fn set(
        &self,
        prefix: &str,
        model: &str,
        system_prompt: &str,
        content: &str,
        response: &LlmResponse,
    ) -> std::io::Result<()> {
        let path = self.entry_path(prefix, model, system_prompt, content);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = LlmResponse {
            cached: false,
            ..response.clone()
        };
        let body = serde_json::to_vec(&stored).map_err(std::io::Error::other)?;
        std::fs::write(&path, body)
    }

    /// Remove a cached entry. Returns whether an entry existed.
    pub fn delete(&self, prefix: &str, model: &str, system_prompt: &str, content: &str) -> bool {
        let path = self.entry_path(prefix, model, system_prompt, content);
        std::fs::remove_file(path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::LlmUsage;
    use tempfile::tempdir;

    fn sample_response() -> LlmResponse {
        LlmResponse {
            content: r#"{"documentType":"income.payslip"}"#.into(),
            model: "mistral-small-latest".into(),
            usage: Some(LlmUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
                pages: None,
            }),
            cached: false,
        }
    }

    #[test]
    fn test_round_trip_marks_cached() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), true);
        assert!(cache.is_enabled());

        let response = sample_response();
        cache
            .set("llm-classify", "mistral-small-latest", "sys", "user", &response)
            .unwrap();

        let hit = cache
            .get("llm-classify", "mistral-small-latest", "sys", "user")
            .unwrap();
        assert!(hit.cached);
        assert_eq!(hit.content, response.content);
        assert_eq!(hit.usage.unwrap().prompt_tokens, 100);
    }

    #[test]
    fn test_miss_on_different_key_material() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), true);
        cache
            .set("ocr", "m", "sys", "content-a", &sample_response())
            .unwrap();

        assert!(cache.get("ocr", "m", "sys", "content-b").is_none());
        assert!(cache.get("ocr", "m", "other-sys", "content-a").is_none());
        assert!(cache.get("ocr", "other-model", "sys", "content-a").is_none());
        assert!(cache.get("vision", "m", "sys", "content-a").is_none());
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), true);
        cache.set("chat", "m", "s", "c", &sample_response()).unwrap();
        assert!(cache.delete("chat", "m", "s", "c"));
        assert!(!cache.delete("chat", "m", "s", "c"));
        assert!(cache.get("chat", "m", "s", "c").is_none());
    }

    #[test]
    fn test_disabled_cache() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), false);
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_model_sanitization() {
        assert_eq!(sanitize_model("org/model:7b"), "org_model_7b");
        assert_eq!(sanitize_model("mistral-ocr-latest"), "mistral-ocr-latest");
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), true);
        cache.set("chat", "m", "s", "c", &sample_response()).unwrap();

        let path = cache.entry_path("chat", "m", "s", "c");
        std::fs::write(&path, b"not json").unwrap();
        assert!(cache.get("chat", "m", "s", "c").is_none());
        // The corrupt entry was swept.
        assert!(!path.exists());
    }
}
