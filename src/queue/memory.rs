//! In-memory broker backend for single-process operation.
//!
//! Implements the full reactive contract (idempotent enqueue, exponential
//! retry, delayed jobs, waiting-children suspension, failure propagation)
//! behind one lock. State is not persisted across restarts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use super::{
    queue_defaults, ActiveJob, Broker, BrokerError, FailDisposition, FailedChild, FailedJobInfo,
    FailureHandler, JobSpec, JobState, QueueCounts,
};

struct JobRecord {
    id: String,
    queue: String,
    data: serde_json::Value,
    state: JobState,
    token_seq: u64,
    attempts_made: u32,
    max_attempts: u32,
    backoff_base: Duration,
    priority: i32,
    seq: u64,
    parent_id: Option<String>,
    fail_parent: bool,
    pending_children: HashSet<String>,
    child_values: HashMap<String, serde_json::Value>,
    failed_children: Vec<FailedChild>,
    return_value: Option<serde_json::Value>,
    failed_reason: Option<String>,
    delay_until: Option<Instant>,
    finished_at: Option<Instant>,
}

impl JobRecord {
    fn token(&self) -> String {
        format!("{}:{}", self.id, self.token_seq)
    }
}

#[derive(Default)]
struct BrokerState {
    jobs: HashMap<String, JobRecord>,
    seq: u64,
    failure_handlers: HashMap<String, FailureHandler>,
}

/// In-process broker.
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    notifiers: std::sync::Mutex<HashMap<String, Arc<Notify>>>,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
            notifiers: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn notifier(&self, queue: &str) -> Arc<Notify> {
        let mut notifiers = self.notifiers.lock().expect("notifier lock poisoned");
        notifiers
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn notify_queue(&self, queue: &str) {
        self.notifier(queue).notify_one();
    }

    /// Drop finished jobs past their retention window.
    fn sweep_finished(state: &mut BrokerState) {
        let now = Instant::now();
        let mut completed_per_queue: HashMap<String, Vec<(Instant, String)>> = HashMap::new();
        let mut to_remove = Vec::new();

        for record in state.jobs.values() {
            let Some(finished_at) = record.finished_at else {
                continue;
            };
            let defaults = queue_defaults(&record.queue);
            match record.state {
                JobState::Completed => {
                    if now.duration_since(finished_at) > defaults.completed_retention {
                        to_remove.push(record.id.clone());
                    } else {
                        completed_per_queue
                            .entry(record.queue.clone())
                            .or_default()
                            .push((finished_at, record.id.clone()));
                    }
                }
                JobState::Failed => {
                    if now.duration_since(finished_at) > defaults.failed_retention {
                        to_remove.push(record.id.clone());
                    }
                }
                _ => {}
            }
        }

        for (queue, mut entries) in completed_per_queue {
            let keep = queue_defaults(&queue).completed_retention_count;
            if entries.len() > keep {
                entries.sort_by_key(|(at, _)| std::cmp::Reverse(*at));
                for (_, id) in entries.split_off(keep) {
                    to_remove.push(id);
                }
            }
        }

        for id in to_remove {
            state.jobs.remove(&id);
        }
    }

    /// Finally fail a job, fire its queue handler, and propagate to the
    /// parent chain where `fail_parent_on_failure` asks for it.
    fn finalize_failure(state: &mut BrokerState, job_id: &str, reason: &str) {
        let Some(record) = state.jobs.get_mut(job_id) else {
            return;
        };
        if matches!(record.state, JobState::Completed | JobState::Failed) {
            return;
        }
        record.state = JobState::Failed;
        record.failed_reason = Some(reason.to_string());
        record.finished_at = Some(Instant::now());

        let info = FailedJobInfo {
            job_id: record.id.clone(),
            queue: record.queue.clone(),
            data: record.data.clone(),
            reason: reason.to_string(),
            failed_children: record.failed_children.clone(),
        };
        let parent_id = record.parent_id.clone();
        let fail_parent = record.fail_parent;
        let child_queue = record.queue.clone();

        if let Some(handler) = state.failure_handlers.get(&info.queue) {
            let handler = handler.clone();
            tokio::spawn(async move { handler(info).await });
        }

        if let (Some(parent_id), true) = (parent_id, fail_parent) {
            if let Some(parent) = state.jobs.get_mut(&parent_id) {
                parent.pending_children.remove(job_id);
                parent.failed_children.push(FailedChild {
                    job_id: job_id.to_string(),
                    queue: child_queue,
                    reason: reason.to_string(),
                });
                let propagated = format!("child job {} failed: {}", job_id, reason);
                Self::finalize_failure(state, &parent_id, &propagated);
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn add_job(&self, spec: JobSpec) -> Result<String, BrokerError> {
        let mut state = self.state.lock().await;
        Self::sweep_finished(&mut state);

        if let Some(existing) = state.jobs.get(&spec.job_id) {
            if !matches!(existing.state, JobState::Completed | JobState::Failed) {
                debug!("Job {} already enqueued, skipping duplicate", spec.job_id);
                return Ok(spec.job_id);
            }
            state.jobs.remove(&spec.job_id);
        }

        let defaults = queue_defaults(&spec.queue);
        state.seq += 1;
        let seq = state.seq;
        let (job_state, delay_until) = match spec.delay {
            Some(delay) => (JobState::Delayed, Some(Instant::now() + delay)),
            None => (JobState::Waiting, None),
        };

        if let Some(parent_id) = &spec.parent_id {
            match state.jobs.get_mut(parent_id) {
                Some(parent) => {
                    parent.pending_children.insert(spec.job_id.clone());
                }
                None => {
                    return Err(BrokerError::NotFound(format!(
                        "parent job {} for child {}",
                        parent_id, spec.job_id
                    )));
                }
            }
        }

        state.jobs.insert(
            spec.job_id.clone(),
            JobRecord {
                id: spec.job_id.clone(),
                queue: spec.queue.clone(),
                data: spec.data,
                state: job_state,
                token_seq: 0,
                attempts_made: 0,
                max_attempts: defaults.attempts,
                backoff_base: defaults.backoff_base,
                priority: spec.priority,
                seq,
                parent_id: spec.parent_id,
                fail_parent: spec.fail_parent_on_failure,
                pending_children: HashSet::new(),
                child_values: HashMap::new(),
                failed_children: Vec::new(),
                return_value: None,
                failed_reason: None,
                delay_until,
                finished_at: None,
            },
        );
        drop(state);

        self.notify_queue(&spec.queue);
        Ok(spec.job_id)
    }

    async fn fetch(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<ActiveJob>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let (claimed, next_delay) = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                // Promote due delayed jobs.
                for record in state.jobs.values_mut() {
                    if record.queue == queue
                        && record.state == JobState::Delayed
                        && record.delay_until.is_some_and(|t| t <= now)
                    {
                        record.state = JobState::Waiting;
                        record.delay_until = None;
                    }
                }

                // Claim the ready job with the lowest (priority, seq).
                let next = state
                    .jobs
                    .values()
                    .filter(|r| r.queue == queue && r.state == JobState::Waiting)
                    .map(|r| (r.priority, r.seq, r.id.clone()))
                    .min();
                let claimed = next.map(|(_, _, id)| {
                    let record = state.jobs.get_mut(&id).expect("job disappeared");
                    record.state = JobState::Active;
                    record.token_seq += 1;
                    // Failed attempts count; a resume from waiting-children
                    // does not consume the attempt budget.
                    ActiveJob {
                        id: record.id.clone(),
                        queue: record.queue.clone(),
                        data: record.data.clone(),
                        attempts_made: record.attempts_made + 1,
                        token: record.token(),
                    }
                });

                let next_delay = state
                    .jobs
                    .values()
                    .filter(|r| r.queue == queue && r.state == JobState::Delayed)
                    .filter_map(|r| r.delay_until)
                    .min();
                (claimed, next_delay)
            };

            if claimed.is_some() {
                return Ok(claimed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let mut wait = deadline - now;
            if let Some(delay_until) = next_delay {
                if delay_until > now {
                    wait = wait.min(delay_until - now);
                } else {
                    continue;
                }
            }

            let notify = self.notifier(queue);
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn complete(
        &self,
        job_id: &str,
        token: &str,
        value: serde_json::Value,
    ) -> Result<(), BrokerError> {
        let parent_queue = {
            let mut state = self.state.lock().await;
            let record = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| BrokerError::NotFound(job_id.to_string()))?;
            if record.state != JobState::Active || record.token() != token {
                return Err(BrokerError::InvalidState(format!(
                    "job {} is not active under this claim",
                    job_id
                )));
            }
            record.state = JobState::Completed;
            record.return_value = Some(value.clone());
            record.finished_at = Some(Instant::now());
            let queue = record.queue.clone();
            let parent_id = record.parent_id.clone();

            parent_id.and_then(|parent_id| {
                let parent = state.jobs.get_mut(&parent_id)?;
                parent.pending_children.remove(job_id);
                parent.child_values.insert(queue, value);
                if parent.state == JobState::WaitingChildren && parent.pending_children.is_empty()
                {
                    parent.state = JobState::Waiting;
                    Some(parent.queue.clone())
                } else {
                    None
                }
            })
        };

        if let Some(queue) = parent_queue {
            self.notify_queue(&queue);
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        token: &str,
        reason: &str,
    ) -> Result<FailDisposition, BrokerError> {
        let (disposition, queue) = {
            let mut state = self.state.lock().await;
            let record = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| BrokerError::NotFound(job_id.to_string()))?;
            if record.state != JobState::Active || record.token() != token {
                return Err(BrokerError::InvalidState(format!(
                    "job {} is not active under this claim",
                    job_id
                )));
            }

            record.attempts_made += 1;
            if record.attempts_made < record.max_attempts {
                let exponent = record.attempts_made.saturating_sub(1).min(16);
                let delay = record.backoff_base * 2u32.pow(exponent);
                record.state = JobState::Delayed;
                record.delay_until = Some(Instant::now() + delay);
                warn!(
                    "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                    job_id, record.attempts_made, record.max_attempts, delay, reason
                );
                (FailDisposition::Retried { delay }, record.queue.clone())
            } else {
                warn!("Job {} exhausted its attempts: {}", job_id, reason);
                Self::finalize_failure(&mut state, job_id, reason);
                (FailDisposition::Failed, String::new())
            }
        };

        if let FailDisposition::Retried { .. } = disposition {
            // Wake a worker so the delayed promotion gets observed.
            self.notify_queue(&queue);
        }
        Ok(disposition)
    }

    async fn move_to_waiting_children(
        &self,
        job_id: &str,
        token: &str,
    ) -> Result<bool, BrokerError> {
        let mut state = self.state.lock().await;
        let record = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BrokerError::NotFound(job_id.to_string()))?;
        if record.state != JobState::Active || record.token() != token {
            return Err(BrokerError::InvalidState(format!(
                "job {} is not active under this claim",
                job_id
            )));
        }
        if record.pending_children.is_empty() {
            return Ok(false);
        }
        record.state = JobState::WaitingChildren;
        Ok(true)
    }

    async fn update_job_data(
        &self,
        job_id: &str,
        data: serde_json::Value,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let record = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BrokerError::NotFound(job_id.to_string()))?;
        record.data = data;
        Ok(())
    }

    async fn child_values(
        &self,
        job_id: &str,
    ) -> Result<HashMap<String, serde_json::Value>, BrokerError> {
        let state = self.state.lock().await;
        let record = state
            .jobs
            .get(job_id)
            .ok_or_else(|| BrokerError::NotFound(job_id.to_string()))?;
        Ok(record.child_values.clone())
    }

    async fn failed_children(&self, job_id: &str) -> Result<Vec<FailedChild>, BrokerError> {
        let state = self.state.lock().await;
        let record = state
            .jobs
            .get(job_id)
            .ok_or_else(|| BrokerError::NotFound(job_id.to_string()))?;
        Ok(record.failed_children.clone())
    }

    async fn job_state(&self, job_id: &str) -> Result<Option<JobState>, BrokerError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(job_id).map(|r| r.state))
    }

    async fn return_value(
        &self,
        job_id: &str,
    ) -> Result<Option<serde_json::Value>, BrokerError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(job_id).and_then(|r| r.return_value.clone()))
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for record in state.jobs.values().filter(|r| r.queue == queue) {
            match record.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::WaitingChildren => counts.waiting_children += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn set_final_failure_handler(&self, queue: &str, handler: FailureHandler) {
        let mut state = self.state.lock().await;
        state.failure_handlers.insert(queue.to_string(), handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::names;
    use serde_json::json;

    const FETCH: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_add_fetch_complete_round_trip() {
        let broker = InMemoryBroker::new();
        broker
            .add_job(JobSpec::new(names::LLM_OCR, "doc-1-llm-ocr", json!({"x": 1})))
            .await
            .unwrap();

        let job = broker.fetch(names::LLM_OCR, FETCH).await.unwrap().unwrap();
        assert_eq!(job.id, "doc-1-llm-ocr");
        assert_eq!(job.attempts_made, 1);
        assert_eq!(job.data["x"], 1);

        broker
            .complete(&job.id, &job.token, json!({"rawText": "hi"}))
            .await
            .unwrap();
        assert_eq!(
            broker.job_state(&job.id).await.unwrap(),
            Some(JobState::Completed)
        );
        assert_eq!(
            broker.return_value(&job.id).await.unwrap().unwrap()["rawText"],
            "hi"
        );
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_while_live() {
        let broker = InMemoryBroker::new();
        broker
            .add_job(JobSpec::new(names::LLM_OCR, "j", json!({"v": 1})))
            .await
            .unwrap();
        broker
            .add_job(JobSpec::new(names::LLM_OCR, "j", json!({"v": 2})))
            .await
            .unwrap();

        let job = broker.fetch(names::LLM_OCR, FETCH).await.unwrap().unwrap();
        assert_eq!(job.data["v"], 1, "duplicate enqueue must not replace data");
        assert!(broker.fetch(names::LLM_OCR, FETCH).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_job_can_be_replaced() {
        let broker = InMemoryBroker::new();
        broker
            .add_job(JobSpec::new(names::MISTRAL_CLEANUP, "cleanup", json!({})))
            .await
            .unwrap();
        let job = broker
            .fetch(names::MISTRAL_CLEANUP, FETCH)
            .await
            .unwrap()
            .unwrap();
        broker.complete(&job.id, &job.token, json!(null)).await.unwrap();

        // Re-add after completion (the cleanup job reschedules itself).
        broker
            .add_job(JobSpec::new(names::MISTRAL_CLEANUP, "cleanup", json!({})))
            .await
            .unwrap();
        assert!(broker
            .fetch(names::MISTRAL_CLEANUP, FETCH)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_retry_then_final_failure() {
        let broker = InMemoryBroker::new();
        broker
            .add_job(JobSpec::new(names::PDF_SPLITTER, "j", json!({})))
            .await
            .unwrap();

        let job = broker.fetch(names::PDF_SPLITTER, FETCH).await.unwrap().unwrap();
        let disposition = broker.fail(&job.id, &job.token, "boom 1").await.unwrap();
        assert_eq!(
            disposition,
            FailDisposition::Retried {
                delay: Duration::from_secs(3)
            }
        );
        assert_eq!(
            broker.job_state(&job.id).await.unwrap(),
            Some(JobState::Delayed)
        );
    }

    #[tokio::test]
    async fn test_backoff_doubles_per_attempt() {
        let broker = InMemoryBroker::new();
        let mut state = broker.state.lock().await;
        state.jobs.insert(
            "j".into(),
            JobRecord {
                id: "j".into(),
                queue: names::LLM_OCR.into(),
                data: json!({}),
                state: JobState::Active,
                token_seq: 1,
                attempts_made: 1,
                max_attempts: 3,
                backoff_base: Duration::from_secs(3),
                priority: 0,
                seq: 1,
                parent_id: None,
                fail_parent: false,
                pending_children: HashSet::new(),
                child_values: HashMap::new(),
                failed_children: Vec::new(),
                return_value: None,
                failed_reason: None,
                delay_until: None,
                finished_at: None,
            },
        );
        drop(state);

        let disposition = broker.fail("j", "j:1", "boom").await.unwrap();
        assert_eq!(
            disposition,
            FailDisposition::Retried {
                delay: Duration::from_secs(6)
            }
        );
    }

    #[tokio::test]
    async fn test_waiting_children_suspend_and_resume() {
        let broker = InMemoryBroker::new();
        broker
            .add_job(JobSpec::new(names::ORCHESTRATOR, "doc-orchestrator", json!({})))
            .await
            .unwrap();
        let parent = broker
            .fetch(names::ORCHESTRATOR, FETCH)
            .await
            .unwrap()
            .unwrap();

        broker
            .add_job(
                JobSpec::new(names::LLM_CLASSIFY, "doc-llm-classify", json!({}))
                    .child_of(parent.id.clone()),
            )
            .await
            .unwrap();

        assert!(broker
            .move_to_waiting_children(&parent.id, &parent.token)
            .await
            .unwrap());
        assert_eq!(
            broker.job_state(&parent.id).await.unwrap(),
            Some(JobState::WaitingChildren)
        );

        let child = broker.fetch(names::LLM_CLASSIFY, FETCH).await.unwrap().unwrap();
        broker
            .complete(&child.id, &child.token, json!({"documentType": "income.payslip"}))
            .await
            .unwrap();

        // Parent reactivated exactly once with the child value readable.
        let parent2 = broker
            .fetch(names::ORCHESTRATOR, FETCH)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parent2.id, parent.id);
        let values = broker.child_values(&parent2.id).await.unwrap();
        assert_eq!(values[names::LLM_CLASSIFY]["documentType"], "income.payslip");
    }

    #[tokio::test]
    async fn test_move_to_waiting_children_without_children() {
        let broker = InMemoryBroker::new();
        broker
            .add_job(JobSpec::new(names::ORCHESTRATOR, "p", json!({})))
            .await
            .unwrap();
        let job = broker.fetch(names::ORCHESTRATOR, FETCH).await.unwrap().unwrap();
        assert!(!broker
            .move_to_waiting_children(&job.id, &job.token)
            .await
            .unwrap());
        assert_eq!(
            broker.job_state(&job.id).await.unwrap(),
            Some(JobState::Active)
        );
    }

    #[tokio::test]
    async fn test_child_final_failure_fails_parent() {
        let broker = InMemoryBroker::new();
        let handled = Arc::new(Mutex::new(Vec::<FailedJobInfo>::new()));
        let handled2 = handled.clone();
        broker
            .set_final_failure_handler(
                names::ORCHESTRATOR,
                Arc::new(
                    move |info| -> futures::future::BoxFuture<'static, ()> {
                        let handled = handled2.clone();
                        Box::pin(async move {
                            handled.lock().await.push(info);
                        })
                    },
                ),
            )
            .await;

        broker
            .add_job(JobSpec::new(names::ORCHESTRATOR, "p", json!({})))
            .await
            .unwrap();
        let parent = broker.fetch(names::ORCHESTRATOR, FETCH).await.unwrap().unwrap();
        broker
            .add_job(JobSpec::new(names::LLM_OCR, "c", json!({})).child_of("p"))
            .await
            .unwrap();
        broker
            .move_to_waiting_children(&parent.id, &parent.token)
            .await
            .unwrap();

        // Exhaust the child's attempts.
        for _ in 0..3 {
            let child = broker.fetch(names::LLM_OCR, Duration::from_secs(30)).await.unwrap().unwrap();
            // Clear the backoff so the next fetch is immediate.
            broker.fail(&child.id, &child.token, "ocr exploded").await.unwrap();
            let mut state = broker.state.lock().await;
            if let Some(record) = state.jobs.get_mut("c") {
                record.delay_until = Some(Instant::now());
            }
        }

        assert_eq!(broker.job_state("c").await.unwrap(), Some(JobState::Failed));
        assert_eq!(broker.job_state("p").await.unwrap(), Some(JobState::Failed));

        let failed = broker.failed_children("p").await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].reason, "ocr exploded");

        // The orchestrator-queue failure handler observed the propagation.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let handled = handled.lock().await;
        assert_eq!(handled.len(), 1);
        assert!(handled[0].reason.contains("child job c failed"));
    }

    #[tokio::test]
    async fn test_delayed_job_not_fetchable_early() {
        let broker = InMemoryBroker::new();
        broker
            .add_job(
                JobSpec::new(names::MISTRAL_CLEANUP, "d", json!({}))
                    .with_delay(Duration::from_millis(150)),
            )
            .await
            .unwrap();

        assert!(broker
            .fetch(names::MISTRAL_CLEANUP, Duration::from_millis(30))
            .await
            .unwrap()
            .is_none());
        let job = broker
            .fetch(names::MISTRAL_CLEANUP, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(job.is_some());
    }

    #[tokio::test]
    async fn test_priority_orders_claims() {
        let broker = InMemoryBroker::new();
        broker
            .add_job(JobSpec::new(names::ORCHESTRATOR, "low", json!({})).with_priority(10))
            .await
            .unwrap();
        broker
            .add_job(JobSpec::new(names::ORCHESTRATOR, "high", json!({})).with_priority(1))
            .await
            .unwrap();

        let first = broker.fetch(names::ORCHESTRATOR, FETCH).await.unwrap().unwrap();
        assert_eq!(first.id, "high");
    }

    #[tokio::test]
    async fn test_queue_counts() {
        let broker = InMemoryBroker::new();
        broker
            .add_job(JobSpec::new(names::LLM_OCR, "a", json!({})))
            .await
            .unwrap();
        broker
            .add_job(
                JobSpec::new(names::LLM_OCR, "b", json!({})).with_delay(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        let job = broker.fetch(names::LLM_OCR, FETCH).await.unwrap().unwrap();
        assert_eq!(job.id, "a");

        let counts = broker.counts(names::LLM_OCR).await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.delayed, 1);
        assert_eq!(counts.waiting, 0);
    }
}
