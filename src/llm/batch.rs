//! Debounced batching for OCR requests.
//!
//! Requests accumulate over a 5-second window, extended in 1-second steps
//! while the rate-limited dispatcher is actively serving traffic, then go
//! out as a single batch job. The coalescer polls the job, downloads the
//! JSONL output, and resolves each caller by custom id. Batch creation
//! bypasses the dispatcher: it is one request regardless of batch size.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use super::dispatcher::RateLimitedDispatcher;
use super::types::LlmError;

/// Queue length that triggers an immediate flush.
pub const INLINE_BATCH_LIMIT: usize = 1000;

const INITIAL_DEBOUNCE: Duration = Duration::from_secs(5);
const BUSY_EXTENSION: Duration = Duration::from_secs(1);
const DISPATCHER_BUSY_WINDOW: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

struct PendingOcr {
    custom_id: String,
    document: serde_json::Value,
    model: String,
    reply: oneshot::Sender<Result<serde_json::Value, LlmError>>,
}

struct CoalescerState {
    queue: Vec<PendingOcr>,
    timer_armed: bool,
}

/// Singleton batch coalescer for the OCR endpoint.
pub struct BatchOcrCoalescer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    dispatcher: Arc<RateLimitedDispatcher>,
    state: Mutex<CoalescerState>,
}

#[derive(Debug, Deserialize)]
struct BatchJob {
    id: String,
    status: String,
    #[serde(default)]
    output_file: Option<String>,
    #[serde(default)]
    error_file: Option<String>,
}

static GLOBAL: OnceLock<Arc<BatchOcrCoalescer>> = OnceLock::new();

impl BatchOcrCoalescer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        dispatcher: Arc<RateLimitedDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            dispatcher,
            state: Mutex::new(CoalescerState {
                queue: Vec::new(),
                timer_armed: false,
            }),
        })
    }

    /// Process-wide instance. The first caller's configuration wins.
    pub fn global(
        endpoint: &str,
        api_key: &str,
        dispatcher: Arc<RateLimitedDispatcher>,
    ) -> Arc<Self> {
        GLOBAL
            .get_or_init(|| Self::new(endpoint, api_key, dispatcher))
            .clone()
    }

    /// Drop all pending requests and disarm the timer. Test hook.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.timer_armed = false;
    }

    /// Enqueue one OCR document and wait for its page payload.
    pub async fn execute(
        self: &Arc<Self>,
        document: serde_json::Value,
        model: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let (tx, rx) = oneshot::channel();
        let flush_now = {
            let mut state = self.state.lock().await;
            state.queue.push(PendingOcr {
                custom_id: uuid::Uuid::new_v4().to_string(),
                document,
                model: model.to_string(),
                reply: tx,
            });
            if state.queue.len() >= INLINE_BATCH_LIMIT {
                true
            } else {
                if !state.timer_armed {
                    state.timer_armed = true;
                    let this = self.clone();
                    tokio::spawn(async move { this.debounce_then_flush().await });
                }
                false
            }
        };
        if flush_now {
            let this = self.clone();
            tokio::spawn(async move { this.flush().await });
        }
        rx.await
            .unwrap_or_else(|_| Err(LlmError::Connection("batch coalescer dropped request".into())))
    }

    fn debounce_then_flush(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tokio::time::sleep(INITIAL_DEBOUNCE).await;
            loop {
                let busy = matches!(
                    self.dispatcher.last_dispatch_elapsed().await,
                    Some(elapsed) if elapsed < DISPATCHER_BUSY_WINDOW
                );
                if !busy {
                    break;
                }
                debug!("Dispatcher busy, extending OCR batch window");
                tokio::time::sleep(BUSY_EXTENSION).await;
            }
            self.flush().await;
        })
    }

    fn flush(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
        let batch = {
            let mut state = self.state.lock().await;
            let batch = take_batch(&mut state.queue);
            state.timer_armed = false;
            // Entries for other models stay queued and get their own window.
            if !state.queue.is_empty() {
                state.timer_armed = true;
                let this = self.clone();
                tokio::spawn(async move { this.debounce_then_flush().await });
            }
            batch
        };
        if batch.is_empty() {
            return;
        }

        info!("Submitting OCR batch of {} request(s)", batch.len());
        match self.run_batch(&batch).await {
            Ok(mut outputs) => {
                for entry in batch {
                    let result = outputs.remove(&entry.custom_id).ok_or_else(|| {
                        LlmError::NotFound(format!(
                            "custom_id {} missing from batch output",
                            entry.custom_id
                        ))
                    });
                    let _ = entry.reply.send(result);
                }
            }
            Err(e) => {
                let message = e.to_string();
                for entry in batch {
                    let _ = entry
                        .reply
                        .send(Err(LlmError::Connection(message.clone())));
                }
            }
        }
        })
    }

    /// Create the batch job, poll it to a terminal state, and download the
    /// JSONL output keyed by custom id.
    async fn run_batch(
        &self,
        batch: &[PendingOcr],
    ) -> Result<HashMap<String, serde_json::Value>, LlmError> {
        let model = &batch[0].model;
        let requests: Vec<serde_json::Value> = batch
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "custom_id": &entry.custom_id,
                    "body": { "model": model, "document": &entry.document },
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": model,
            "endpoint": "/v1/ocr",
            "requests": requests,
        });

        let response = self
            .http
            .post(format!("{}/v1/batch/jobs", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let job: BatchJob = read_json(response).await?;

        let job = self.poll_job(&job.id).await?;
        if job.status != "SUCCESS" {
            return Err(LlmError::Batch {
                status: job.status,
                message: job
                    .error_file
                    .map(|f| format!("error file {}", f))
                    .unwrap_or_else(|| "no error detail".into()),
            });
        }

        let output_file = job.output_file.ok_or_else(|| {
            LlmError::Parse("successful batch job has no output file".into())
        })?;
        let response = self
            .http
            .get(format!("{}/v1/files/{}/content", self.endpoint, output_file))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let text = read_text(response).await?;
        Ok(parse_batch_output(&text))
    }

    async fn poll_job(&self, job_id: &str) -> Result<BatchJob, LlmError> {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            let response = self
                .http
                .get(format!("{}/v1/batch/jobs/{}", self.endpoint, job_id))
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|e| LlmError::Connection(e.to_string()))?;
            let job: BatchJob = read_json(response).await?;
            match job.status.as_str() {
                "QUEUED" | "RUNNING" => continue,
                _ => return Ok(job),
            }
        }
    }
}

/// Take the flushable batch: the head entry's model defines it; entries
/// for other models must wait for their own batch.
fn take_batch(queue: &mut Vec<PendingOcr>) -> Vec<PendingOcr> {
    let Some(first_model) = queue.first().map(|e| e.model.clone()) else {
        return Vec::new();
    };
    let mut batch = Vec::new();
    let mut rest = Vec::new();
    for entry in queue.drain(..) {
        if entry.model == first_model {
            batch.push(entry);
        } else {
            rest.push(entry);
        }
    }
    *queue = rest;
    batch
}

/// Parse JSONL batch output into a custom-id map. Unparseable lines are
/// skipped with a warning.
fn parse_batch_output(text: &str) -> HashMap<String, serde_json::Value> {
    let mut outputs = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => {
                let custom_id = value
                    .get("custom_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let body = value
                    .pointer("/response/body")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                match custom_id {
                    Some(id) => {
                        outputs.insert(id, body);
                    }
                    None => warn!("Batch output line has no custom_id, skipping"),
                }
            }
            Err(e) => warn!("Skipping unparseable batch output line: {}", e),
        }
    }
    outputs
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, LlmError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| LlmError::Connection(e.to_string()))?;
    if !status.is_success() {
        return Err(LlmError::Api {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))
}

async fn read_text(response: reqwest::Response) -> Result<String, LlmError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| LlmError::Connection(e.to_string()))?;
    if !status.is_success() {
        return Err(LlmError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(model: &str) -> PendingOcr {
        let (tx, _rx) = oneshot::channel();
        PendingOcr {
            custom_id: uuid::Uuid::new_v4().to_string(),
            document: serde_json::json!({}),
            model: model.to_string(),
            reply: tx,
        }
    }

    #[test]
    fn test_take_batch_groups_by_first_model() {
        let mut queue = vec![
            pending("ocr-a"),
            pending("ocr-a"),
            pending("ocr-b"),
            pending("ocr-a"),
        ];
        let batch = take_batch(&mut queue);
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|e| e.model == "ocr-a"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].model, "ocr-b");
    }

    #[test]
    fn test_take_batch_empty_queue() {
        let mut queue = Vec::new();
        assert!(take_batch(&mut queue).is_empty());
    }

    #[test]
    fn test_parse_batch_output_skips_bad_lines() {
        let text = concat!(
            r#"{"custom_id":"a","response":{"body":{"pages":[{"index":0,"markdown":"hello"}]}}}"#,
            "\n",
            "this is not json\n",
            "\n",
            r#"{"custom_id":"b","response":{"body":{"pages":[]}}}"#,
            "\n",
        );
        let outputs = parse_batch_output(text);
        assert_eq!(outputs.len(), 2);
        assert_eq!(
            outputs["a"]["pages"][0]["markdown"],
            serde_json::json!("hello")
        );
    }

    #[test]
    fn test_parse_batch_output_requires_custom_id() {
        let outputs = parse_batch_output(r#"{"response":{"body":{}}}"#);
        assert!(outputs.is_empty());
    }
}
