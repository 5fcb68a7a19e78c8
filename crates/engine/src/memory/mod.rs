//! In-memory queue engine for tests/dev.
//!
//! - Backlogs are keyed by queue name and outlive individual queue handles
//! - `process` spawns `concurrency` tokio worker tasks; a later `process`
//!   call on the same name retires the previous workers (in-flight jobs
//!   finish under the processor that claimed them)
//! - Each attempt runs in its own task so panics and timeouts fail the job
//!   instead of the worker
//! - Nothing survives the process

mod job;
mod store;
mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::engine::{JobHandle, Processor, QueueEngine, QueueHandle};
use crate::error::EngineError;
use crate::types::{JobCounts, JobId, JobInfo, JobOptions, JobStatus, QueueOptions};

use job::MemoryJob;
use store::QueueShared;

/// In-memory queue engine.
#[derive(Default)]
pub struct MemoryEngine {
    queues: Mutex<HashMap<String, Arc<QueueShared>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn backlog(&self, name: &str) -> Arc<QueueShared> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueShared::new(name)))
            .clone()
    }
}

#[async_trait]
impl QueueEngine for MemoryEngine {
    async fn create_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<Arc<dyn QueueHandle>, EngineError> {
        debug!(queue = %name, concurrency = options.concurrency, "opening queue");
        Ok(Arc::new(MemoryQueue {
            shared: self.backlog(name),
            options,
        }))
    }
}

/// Handle to one in-memory queue.
pub struct MemoryQueue {
    shared: Arc<QueueShared>,
    options: QueueOptions,
}

#[async_trait]
impl QueueHandle for MemoryQueue {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn process(&self, processor: Processor) -> Result<(), EngineError> {
        let generation = self.shared.next_generation();
        // Wake idle workers of the previous generation so they retire promptly.
        self.shared.notify.notify_waiters();

        let concurrency = self.options.concurrency.max(1);
        for worker in 0..concurrency {
            tokio::spawn(worker::worker_loop(
                self.shared.clone(),
                generation,
                worker,
                processor.clone(),
                self.options.limiter.clone(),
            ));
        }

        info!(queue = %self.shared.name, concurrency, generation, "queue processing started");
        Ok(())
    }

    async fn add(
        &self,
        payload: Value,
        options: Option<JobOptions>,
    ) -> Result<Arc<dyn JobHandle>, EngineError> {
        let options = options.unwrap_or_else(|| self.options.default_job_options.clone());
        let id = self.shared.insert(payload.clone(), options);
        Ok(Arc::new(MemoryJob::new(self.shared.clone(), id, payload)))
    }

    async fn job(&self, id: JobId) -> Result<Option<Arc<dyn JobHandle>>, EngineError> {
        let params = {
            let state = self.shared.lock();
            state.jobs.get(&id).map(|r| r.params.clone())
        };
        Ok(params.map(|params| {
            Arc::new(MemoryJob::new(self.shared.clone(), id, params)) as Arc<dyn JobHandle>
        }))
    }

    async fn jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobInfo>, EngineError> {
        Ok(self.shared.list(status, limit))
    }

    async fn counts(&self) -> Result<JobCounts, EngineError> {
        Ok(self.shared.counts())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::engine::processor;
    use crate::error::JobError;
    use crate::types::Backoff;

    fn sync_processor<F>(f: F) -> Processor
    where
        F: Fn(Arc<dyn JobHandle>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        processor(move |job| {
            let f = f.clone();
            async move { f(job) }
        })
    }

    async fn queue(engine: &MemoryEngine, name: &str) -> Arc<dyn QueueHandle> {
        engine
            .create_queue(name, QueueOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn processes_added_job_and_resolves_finished() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "echo").await;
        q.process(sync_processor(|job| Ok(job.params().clone())))
            .await
            .unwrap();

        let job = q.add(json!({"n": 1}), None).await.unwrap();
        assert_eq!(job.finished().await.unwrap(), json!({"n": 1}));
        assert_eq!(job.get_state().await.unwrap(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn failed_processing_surfaces_processing_error() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "fail").await;
        q.process(sync_processor(|_| Err(anyhow::anyhow!("no mailbox"))))
            .await
            .unwrap();

        let job = q.add(json!({}), None).await.unwrap();
        match job.finished().await {
            Err(JobError::Processing(e)) => {
                assert_eq!(e.job_id, job.id());
                assert_eq!(e.reason, "no mailbox");
            }
            other => panic!("expected processing error, got {other:?}"),
        }
        assert_eq!(job.get_state().await.unwrap(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn panicking_processor_fails_job() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "panic").await;
        q.process(sync_processor(|_| panic!("kaboom"))).await.unwrap();

        let job = q.add(json!({}), None).await.unwrap();
        assert!(matches!(job.finished().await, Err(JobError::Processing(_))));
    }

    #[tokio::test]
    async fn timeout_fails_attempt() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "slow").await;
        q.process(processor(|_job| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }))
        .await
        .unwrap();

        let job = q
            .add(
                json!({}),
                Some(JobOptions::default().with_timeout(Duration::from_millis(20))),
            )
            .await
            .unwrap();

        match job.finished().await {
            Err(JobError::Processing(e)) => assert!(e.reason.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "flaky").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        q.process(sync_processor(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("transient");
            }
            Ok(json!("ok"))
        }))
        .await
        .unwrap();

        let job = q
            .add(
                json!({}),
                Some(
                    JobOptions::default()
                        .with_attempts(3)
                        .with_backoff(Backoff::fixed(Duration::from_millis(1))),
                ),
            )
            .await
            .unwrap();

        assert_eq!(job.finished().await.unwrap(), json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(job.info().await.unwrap().attempts_made, 3);
    }

    #[tokio::test]
    async fn discard_stops_further_attempts() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "doomed").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        q.process(processor(move |job| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                job.discard().await?;
                Err::<Value, anyhow::Error>(anyhow::anyhow!("permanent failure"))
            }
        }))
        .await
        .unwrap();

        let job = q
            .add(json!({}), Some(JobOptions::default().with_attempts(3)))
            .await
            .unwrap();

        assert!(matches!(job.finished().await, Err(JobError::Processing(_))));
        let info = job.info().await.unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.attempts_made, 1);
        assert!(info.discarded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn limiter_caps_jobs_started_by_workers() {
        let engine = MemoryEngine::new();
        let q = engine
            .create_queue(
                "throttled",
                QueueOptions::default()
                    .with_concurrency(2)
                    .with_limiter(1, Duration::from_secs(3600)),
            )
            .await
            .unwrap();
        q.process(sync_processor(|_| Ok(json!("ok")))).await.unwrap();

        let first = q.add(json!(1), None).await.unwrap();
        let second = q.add(json!(2), None).await.unwrap();

        assert_eq!(first.finished().await.unwrap(), json!("ok"));
        tokio::time::sleep(worker::POLL_INTERVAL * 4).await;
        assert_eq!(second.get_state().await.unwrap(), JobStatus::Waiting);

        let counts = q.counts().await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn jobs_without_options_use_queue_defaults() {
        let engine = MemoryEngine::new();
        let q = engine
            .create_queue(
                "defaults",
                QueueOptions::default().with_default_job_options(
                    JobOptions::default()
                        .with_attempts(2)
                        .with_priority(7)
                        .delayed(Duration::from_secs(60)),
                ),
            )
            .await
            .unwrap();

        let inherited = q.add(json!({}), None).await.unwrap();
        let info = inherited.info().await.unwrap();
        assert_eq!(info.status, JobStatus::Delayed);
        assert_eq!(info.options.attempts, 2);
        assert_eq!(info.options.priority, Some(7));

        let explicit = q
            .add(json!({}), Some(JobOptions::default()))
            .await
            .unwrap();
        let info = explicit.info().await.unwrap();
        assert_eq!(info.status, JobStatus::Waiting);
        assert_eq!(info.options.attempts, 1);
        assert_eq!(info.options.priority, None);
    }

    #[tokio::test]
    async fn retry_rejects_non_failed_job() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "idle").await;
        let job = q.add(json!({}), None).await.unwrap();

        let err = job.retry().await.unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                job_id: job.id(),
                action: "retry",
                status: JobStatus::Waiting,
            }
        );
    }

    #[tokio::test]
    async fn retry_requeues_failed_job() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "again").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        q.process(sync_processor(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("first run fails");
            }
            Ok(json!(2))
        }))
        .await
        .unwrap();

        let job = q.add(json!({}), None).await.unwrap();
        assert!(job.finished().await.is_err());

        job.retry().await.unwrap();
        assert_eq!(job.finished().await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn promote_moves_delayed_job_forward() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "later").await;
        q.process(sync_processor(|_| Ok(json!("done")))).await.unwrap();

        let job = q
            .add(
                json!({}),
                Some(JobOptions::default().delayed(Duration::from_secs(3600))),
            )
            .await
            .unwrap();
        assert_eq!(job.get_state().await.unwrap(), JobStatus::Delayed);

        job.promote().await.unwrap();
        assert_eq!(job.finished().await.unwrap(), json!("done"));

        let err = job.promote().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { action: "promote", .. }));
    }

    #[tokio::test]
    async fn remove_rejects_active_job_and_wakes_waiters_otherwise() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "rm").await;
        let job = q.add(json!({}), None).await.unwrap();

        let waiter = {
            let job = q.job(job.id()).await.unwrap().unwrap();
            tokio::spawn(async move { job.finished().await })
        };
        // Let the waiter subscribe before the record goes away.
        tokio::task::yield_now().await;

        job.remove().await.unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            Err(JobError::Engine(EngineError::JobRemoved(job.id())))
        );
        assert_eq!(
            job.get_state().await.unwrap_err(),
            EngineError::JobNotFound(job.id())
        );

        let blocked = queue(&engine, "busy").await;
        blocked
            .process(processor(|_job| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }))
            .await
            .unwrap();
        let active = blocked.add(json!({}), None).await.unwrap();
        while active.get_state().await.unwrap() != JobStatus::Active {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(matches!(
            active.remove().await,
            Err(EngineError::InvalidTransition { action: "remove", .. })
        ));
    }

    #[tokio::test]
    async fn update_replaces_persisted_data() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "data").await;
        let job = q.add(json!({"to": "a@b.com"}), None).await.unwrap();

        assert_eq!(job.data().await.unwrap(), None);
        job.update(json!({"step": 1})).await.unwrap();
        job.update(json!({"step": 2})).await.unwrap();

        let info = job.info().await.unwrap();
        assert_eq!(info.data, Some(json!({"step": 2})));
        assert_eq!(info.params, json!({"to": "a@b.com"}));
    }

    #[tokio::test]
    async fn reopened_queue_shares_backlog_and_replaces_processor() {
        let engine = MemoryEngine::new();
        let first = queue(&engine, "shared").await;
        let job = first.add(json!({}), None).await.unwrap();

        let second = queue(&engine, "shared").await;
        assert_eq!(second.counts().await.unwrap().waiting, 1);

        first.process(sync_processor(|_| Ok(json!("a")))).await.unwrap();
        second.process(sync_processor(|_| Ok(json!("b")))).await.unwrap();

        let next = second.add(json!({}), None).await.unwrap();
        assert_eq!(next.finished().await.unwrap(), json!("b"));
        // The backlog job may have been claimed by either generation.
        assert!(job.finished().await.is_ok());
    }

    #[tokio::test]
    async fn concurrency_runs_jobs_in_parallel() {
        let engine = MemoryEngine::new();
        let q = engine
            .create_queue("wide", QueueOptions::default().with_concurrency(4))
            .await
            .unwrap();

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        q.process(processor(move |_job| {
            let (r, p) = (r.clone(), p.clone());
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                r.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }))
        .await
        .unwrap();

        let mut jobs = Vec::new();
        for _ in 0..4 {
            jobs.push(q.add(json!({}), None).await.unwrap());
        }
        for job in jobs {
            job.finished().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn lists_and_counts_jobs() {
        let engine = MemoryEngine::new();
        let q = queue(&engine, "listing").await;
        q.add(json!(1), None).await.unwrap();
        q.add(
            json!(2),
            Some(JobOptions::default().delayed(Duration::from_secs(60))),
        )
        .await
        .unwrap();

        let counts = q.counts().await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.delayed, 1);

        let all = q.jobs(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].params, json!(1));

        let delayed = q.jobs(Some(JobStatus::Delayed), 10).await.unwrap();
        assert_eq!(delayed.len(), 1);
        assert_eq!(delayed[0].params, json!(2));
    }
}
