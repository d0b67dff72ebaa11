//! Engine configuration.
//!
//! All settings come from the environment (populated by the deployment
//! platform) with development-friendly defaults. `.env` files are loaded
//! by `main()` before this module is consulted.

use std::path::PathBuf;

/// Which provider variant a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI-shaped chat endpoint with a bearer key.
    Generic,
    /// Same wire format, dispatched through the rate limiter.
    RateLimited,
    /// Local model server, serialized through a per-process mutex.
    LocalSerialized,
    /// Dedicated OCR endpoint (`/v1/ocr`), optionally batched.
    OcrEndpoint,
}

impl ProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "generic" | "openai" | "ovh" => Some(Self::Generic),
            "mistral" | "rate-limited" | "rate_limited" => Some(Self::RateLimited),
            "ollama" | "local" | "local-serialized" => Some(Self::LocalSerialized),
            "mistral-ocr" | "ocr" | "ocr-endpoint" => Some(Self::OcrEndpoint),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::RateLimited => "rate-limited",
            Self::LocalSerialized => "local-serialized",
            Self::OcrEndpoint => "ocr-endpoint",
        }
    }
}

/// Provider routing for one LLM task (ocr, text, vision).
#[derive(Debug, Clone)]
pub struct TaskProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub endpoint: String,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Broker endpoint for the distributed backend (in-process when unset).
    pub redis_url: Option<String>,
    /// HTTP control surface port.
    pub port: u16,
    /// Version string reported by /health and written into failure records.
    pub worker_version: String,
    /// Persistence facade base URL.
    pub supabase_url: String,
    /// Persistence facade secret key.
    pub sb_secret_key: String,
    /// Storage facade base URL.
    pub worker_url: String,
    /// Storage facade API key.
    pub worker_api_key: String,
    /// Whether LLM responses are cached on disk.
    pub llm_cache_enabled: bool,
    /// Root directory of the LLM response cache.
    pub llm_cache_dir: PathBuf,
    /// Context window override for the local model server.
    pub llm_num_ctx: Option<u32>,
    pub ocr: TaskProviderConfig,
    pub text: TaskProviderConfig,
    pub vision: TaskProviderConfig,
    pub mistral_api_key: Option<String>,
    pub ovh_api_key: Option<String>,
    /// Requests per second allowed through the rate-limited dispatcher.
    pub mistral_max_rps: u32,
    /// Route OCR through the batch coalescer instead of direct dispatch.
    pub mistral_batch_ocr_enabled: bool,
    /// Master key version used when a private row doesn't carry one yet.
    pub master_key_version: u32,
    /// Keep decrypted blobs on disk between documents (skip the final clear).
    pub file_cache_keep_on_disk: bool,
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env_str(name) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    env_str(name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn task_config(task: &str, default: TaskProviderConfig) -> TaskProviderConfig {
    let provider = env_str(&format!("LLM_{}_PROVIDER", task))
        .and_then(|s| ProviderKind::from_str(&s))
        .unwrap_or(default.provider);
    let model = env_str(&format!("LLM_{}_MODEL", task)).unwrap_or(default.model);
    let endpoint = env_str(&format!("LLM_{}_ENDPOINT", task)).unwrap_or(default.endpoint);
    TaskProviderConfig {
        provider,
        model,
        endpoint,
    }
}

impl Settings {
    /// Build settings from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env_str("REDIS_URL"),
            port: env_str("PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            worker_version: env_str("FLY_MACHINE_VERSION").unwrap_or(defaults.worker_version),
            supabase_url: env_str("SUPABASE_URL").unwrap_or(defaults.supabase_url),
            sb_secret_key: env_str("SB_SECRET_KEY").unwrap_or_default(),
            worker_url: env_str("FLY_WORKER_URL").unwrap_or(defaults.worker_url),
            worker_api_key: env_str("FLY_WORKER_API_KEY").unwrap_or_default(),
            llm_cache_enabled: env_bool("LLM_CACHE_ENABLED", false),
            llm_cache_dir: env_str("LLM_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.llm_cache_dir),
            llm_num_ctx: env_str("LLM_NUM_CTX").and_then(|s| s.parse().ok()),
            ocr: task_config("OCR", defaults.ocr),
            text: task_config("TEXT", defaults.text),
            vision: task_config("VISION", defaults.vision),
            mistral_api_key: env_str("MISTRAL_API_KEY"),
            ovh_api_key: env_str("OVH_AI_API_KEY"),
            mistral_max_rps: env_u32("MISTRAL_MAX_RPS", 1).max(1),
            mistral_batch_ocr_enabled: env_bool("MISTRAL_BATCH_OCR_ENABLED", false),
            master_key_version: env_u32("SB_MASTER_KEY_VERSION", 1),
            file_cache_keep_on_disk: env_bool("FILE_CACHE_KEEP_ON_DISK", false),
        }
    }

    /// Effective configuration with secrets masked, for logging and the
    /// `config` CLI command.
    pub fn redacted(&self) -> serde_json::Value {
        fn mask(v: &Option<String>) -> serde_json::Value {
            match v {
                Some(_) => serde_json::Value::String("***".into()),
                None => serde_json::Value::Null,
            }
        }
        serde_json::json!({
            "redis_url": self.redis_url,
            "port": self.port,
            "worker_version": self.worker_version,
            "supabase_url": self.supabase_url,
            "sb_secret_key": if self.sb_secret_key.is_empty() { serde_json::Value::Null } else { "***".into() },
            "worker_url": self.worker_url,
            "llm_cache_enabled": self.llm_cache_enabled,
            "llm_cache_dir": self.llm_cache_dir,
            "ocr": { "provider": self.ocr.provider.as_str(), "model": self.ocr.model, "endpoint": self.ocr.endpoint },
            "text": { "provider": self.text.provider.as_str(), "model": self.text.model, "endpoint": self.text.endpoint },
            "vision": { "provider": self.vision.provider.as_str(), "model": self.vision.model, "endpoint": self.vision.endpoint },
            "mistral_api_key": mask(&self.mistral_api_key),
            "ovh_api_key": mask(&self.ovh_api_key),
            "mistral_max_rps": self.mistral_max_rps,
            "mistral_batch_ocr_enabled": self.mistral_batch_ocr_enabled,
            "master_key_version": self.master_key_version,
            "file_cache_keep_on_disk": self.file_cache_keep_on_disk,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: None,
            port: 8080,
            worker_version: env!("CARGO_PKG_VERSION").to_string(),
            supabase_url: "http://localhost:54321".into(),
            sb_secret_key: String::new(),
            worker_url: "http://localhost:8081".into(),
            worker_api_key: String::new(),
            llm_cache_enabled: false,
            llm_cache_dir: std::env::temp_dir().join("docgather-llm-cache"),
            llm_num_ctx: None,
            ocr: TaskProviderConfig {
                provider: ProviderKind::OcrEndpoint,
                model: "mistral-ocr-latest".into(),
                endpoint: "https://api.mistral.ai".into(),
            },
            text: TaskProviderConfig {
                provider: ProviderKind::RateLimited,
                model: "mistral-small-latest".into(),
                endpoint: "https://api.mistral.ai".into(),
            },
            vision: TaskProviderConfig {
                provider: ProviderKind::RateLimited,
                model: "pixtral-12b-latest".into(),
                endpoint: "https://api.mistral.ai".into(),
            },
            mistral_api_key: None,
            ovh_api_key: None,
            mistral_max_rps: 1,
            mistral_batch_ocr_enabled: false,
            master_key_version: 1,
            file_cache_keep_on_disk: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(
            ProviderKind::from_str("mistral"),
            Some(ProviderKind::RateLimited)
        );
        assert_eq!(
            ProviderKind::from_str("OLLAMA"),
            Some(ProviderKind::LocalSerialized)
        );
        assert_eq!(
            ProviderKind::from_str("mistral-ocr"),
            Some(ProviderKind::OcrEndpoint)
        );
        assert_eq!(ProviderKind::from_str("generic"), Some(ProviderKind::Generic));
        assert_eq!(ProviderKind::from_str("bogus"), None);
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let settings = Settings {
            mistral_api_key: Some("sk-secret".into()),
            sb_secret_key: "key".into(),
            ..Settings::default()
        };
        let out = settings.redacted();
        assert_eq!(out["mistral_api_key"], "***");
        assert_eq!(out["sb_secret_key"], "***");
    }
}
