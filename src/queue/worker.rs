//! Worker runner: bounded parallel consumers for one queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{ActiveJob, Broker, FailDisposition};

const FETCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Outcome signals a handler can raise besides success.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The job parked itself in waiting-children; the broker will
    /// re-invoke it when the last child completes. Not a failure.
    #[error("waiting for children")]
    WaitingChildren,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// A queue consumer. The return value becomes the job's stored value and
/// is what a waiting parent reads through `child_values`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError>;
}

/// Bounded consumer pool for one queue.
pub struct Worker {
    broker: Arc<dyn Broker>,
    queue: String,
    concurrency: usize,
    handler: Arc<dyn JobHandler>,
}

impl Worker {
    pub fn new(
        broker: Arc<dyn Broker>,
        queue: impl Into<String>,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            concurrency: concurrency.max(1),
            handler,
        }
    }

    /// Spawn the consumer tasks. They drain in-flight jobs and exit when
    /// the shutdown signal flips.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.concurrency)
            .map(|slot| {
                let broker = self.broker.clone();
                let queue = self.queue.clone();
                let handler = self.handler.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    debug!("Worker {}#{} started", queue, slot);
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        let job = tokio::select! {
                            result = broker.fetch(&queue, FETCH_TIMEOUT) => match result {
                                Ok(job) => job,
                                Err(e) => {
                                    error!("Worker {}#{} fetch error: {}", queue, slot, e);
                                    tokio::time::sleep(FETCH_TIMEOUT).await;
                                    continue;
                                }
                            },
                            _ = shutdown.changed() => break,
                        };
                        let Some(job) = job else { continue };

                        match handler.process(&job).await {
                            Ok(value) => {
                                if let Err(e) = broker.complete(&job.id, &job.token, value).await {
                                    debug!("Completing {} failed: {}", job.id, e);
                                }
                            }
                            Err(ProcessError::WaitingChildren) => {
                                debug!("Job {} suspended on children", job.id);
                            }
                            Err(ProcessError::Failed(e)) => {
                                let reason = format!("{:#}", e);
                                match broker.fail(&job.id, &job.token, &reason).await {
                                    Ok(FailDisposition::Retried { delay }) => {
                                        debug!("Job {} will retry in {:?}", job.id, delay);
                                    }
                                    Ok(FailDisposition::Failed) => {
                                        error!("Job {} failed permanently: {}", job.id, reason);
                                    }
                                    Err(e) => debug!("Failing {} failed: {}", job.id, e),
                                }
                            }
                        }
                    }
                    info!("Worker {}#{} stopped", queue, slot);
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{names, InMemoryBroker, JobSpec, JobState};
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
            Ok(json!({"echo": job.data.clone()}))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl JobHandler for AlwaysFails {
        async fn process(&self, _job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
            Err(ProcessError::Failed(anyhow::anyhow!("no luck")))
        }
    }

    #[tokio::test]
    async fn test_worker_processes_jobs() {
        let broker = InMemoryBroker::new();
        let worker = Worker::new(broker.clone(), names::TXT_SIMPLE_EXTRACT, 2, Arc::new(Echo));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = worker.start(shutdown_rx);

        broker
            .add_job(JobSpec::new(names::TXT_SIMPLE_EXTRACT, "j1", json!({"n": 1})))
            .await
            .unwrap();

        // Wait for completion.
        for _ in 0..50 {
            if broker.job_state("j1").await.unwrap() == Some(JobState::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let value = broker.return_value("j1").await.unwrap().unwrap();
        assert_eq!(value["echo"]["n"], 1);

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_worker_reports_failure_to_broker() {
        let broker = InMemoryBroker::new();
        let worker = Worker::new(broker.clone(), names::LLM_OCR, 1, Arc::new(AlwaysFails));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = worker.start(shutdown_rx);

        broker
            .add_job(JobSpec::new(names::LLM_OCR, "j1", json!({})))
            .await
            .unwrap();

        for _ in 0..50 {
            if broker.job_state("j1").await.unwrap() == Some(JobState::Delayed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(
            broker.job_state("j1").await.unwrap(),
            Some(JobState::Delayed),
            "first failure schedules a retry"
        );

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
