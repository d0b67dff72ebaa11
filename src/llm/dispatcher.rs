//! Global FIFO dispatcher enforcing minimum spacing between provider
//! requests sharing one API key.
//!
//! Dispatch is decoupled from completion: the loop launches each request
//! after the spacing delay and immediately moves on, so a slow response
//! never stalls the queue. Requests that fail with a rate-limit signal are
//! pushed back to the front of the queue unless their body exceeds the
//! retry payload threshold.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use super::types::{LlmError, LlmResponse};

/// Bodies at or above this size are not retried after a 429: the payload
/// itself is the problem, not the request rate.
pub const RETRY_PAYLOAD_LIMIT: usize = 195 * 1024;

type Thunk = Arc<dyn Fn() -> BoxFuture<'static, Result<LlmResponse, LlmError>> + Send + Sync>;

struct Pending {
    thunk: Thunk,
    body_size: usize,
    reply: oneshot::Sender<Result<LlmResponse, LlmError>>,
}

struct DispatchState {
    queue: VecDeque<Pending>,
    last_dispatch: Option<Instant>,
    loop_running: bool,
}

/// Singleton rate-limited dispatcher for one API key pool.
pub struct RateLimitedDispatcher {
    min_interval: Duration,
    state: Mutex<DispatchState>,
}

static GLOBAL: OnceLock<Arc<RateLimitedDispatcher>> = OnceLock::new();

impl RateLimitedDispatcher {
    pub fn new(max_rps: u32) -> Arc<Self> {
        let max_rps = max_rps.max(1);
        Arc::new(Self {
            min_interval: Duration::from_millis((1000 + u64::from(max_rps) - 1) / u64::from(max_rps)),
            state: Mutex::new(DispatchState {
                queue: VecDeque::new(),
                last_dispatch: None,
                loop_running: false,
            }),
        })
    }

    /// Process-wide instance. The first caller's `max_rps` wins.
    pub fn global(max_rps: u32) -> Arc<Self> {
        GLOBAL.get_or_init(|| Self::new(max_rps)).clone()
    }

    /// Time since the last dispatch, if any. The batch coalescer uses this
    /// to extend its debounce window while the dispatcher is busy.
    pub async fn last_dispatch_elapsed(&self) -> Option<Duration> {
        self.state.lock().await.last_dispatch.map(|t| t.elapsed())
    }

    /// Drop all queued requests and forget the spacing state. Test hook.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.last_dispatch = None;
    }

    /// Enqueue a request and wait for its (possibly retried) outcome.
    ///
    /// `body_size` is the serialized request body length, used for the
    /// payload-too-large retry cutoff.
    pub async fn execute(
        self: &Arc<Self>,
        body_size: usize,
        thunk: Thunk,
    ) -> Result<LlmResponse, LlmError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.queue.push_back(Pending {
                thunk,
                body_size,
                reply: tx,
            });
            self.ensure_loop(&mut state);
        }
        rx.await
            .unwrap_or_else(|_| Err(LlmError::Connection("dispatcher dropped request".into())))
    }

    fn ensure_loop(self: &Arc<Self>, state: &mut DispatchState) {
        if !state.loop_running {
            state.loop_running = true;
            let this = self.clone();
            tokio::spawn(async move { this.run_loop().await });
        }
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            let item = {
                let mut state = self.state.lock().await;
                match state.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        state.loop_running = false;
                        return;
                    }
                }
            };

            // Enforce spacing from the previous dispatch.
            let wait = {
                let state = self.state.lock().await;
                state
                    .last_dispatch
                    .map(|t| self.min_interval.saturating_sub(t.elapsed()))
                    .unwrap_or(Duration::ZERO)
            };
            if wait > Duration::ZERO {
                tokio::time::sleep(wait).await;
            }
            self.state.lock().await.last_dispatch = Some(Instant::now());

            // Launch without awaiting completion.
            let this = self.clone();
            tokio::spawn(async move {
                let result = (item.thunk)().await;
                match result {
                    Err(e) if e.is_rate_limited() => {
                        if item.body_size >= RETRY_PAYLOAD_LIMIT {
                            warn!(
                                "Rate-limited request too large to retry ({} bytes)",
                                item.body_size
                            );
                            let _ = item
                                .reply
                                .send(Err(LlmError::PayloadTooLarge(item.body_size)));
                        } else {
                            debug!("Rate limited, requeuing request at queue front");
                            let mut state = this.state.lock().await;
                            state.queue.push_front(item);
                            this.ensure_loop(&mut state);
                        }
                    }
                    other => {
                        let _ = item.reply.send(other);
                    }
                }
            });
        }
    }
}
