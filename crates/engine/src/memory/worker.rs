//! Worker loop: claims jobs from a queue backlog and runs the processor.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use super::job::MemoryJob;
use super::store::{Claimed, QueueShared};
use crate::engine::{JobHandle, Processor};
use crate::types::RateLimit;

/// Upper bound on how long an idle worker sleeps before re-checking the
/// backlog (delayed jobs, limiter window).
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub(crate) async fn worker_loop(
    shared: Arc<QueueShared>,
    generation: u64,
    worker: usize,
    processor: Processor,
    limiter: Option<RateLimit>,
) {
    debug!(queue = %shared.name, worker, generation, "worker started");

    loop {
        match shared.claim(generation, limiter.as_ref()) {
            Err(_retired) => break,
            Ok(Some(claimed)) => run_job(&shared, claimed, &processor).await,
            Ok(None) => {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
        }
    }

    debug!(queue = %shared.name, worker, generation, "worker retired");
}

async fn run_job(shared: &Arc<QueueShared>, claimed: Claimed, processor: &Processor) {
    let Claimed {
        id,
        params,
        timeout,
    } = claimed;
    debug!(queue = %shared.name, job_id = %id, "claimed job");

    let handle: Arc<dyn JobHandle> = Arc::new(MemoryJob::new(shared.clone(), id, params));
    let mut task = tokio::spawn(processor(handle));

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                shared.fail(id, format!("job timed out after {}ms", limit.as_millis()));
                return;
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(value)) => shared.complete(id, value),
        Ok(Err(err)) => shared.fail(id, format!("{err:#}")),
        Err(join_err) if join_err.is_panic() => {
            error!(queue = %shared.name, job_id = %id, "processor panicked");
            shared.fail(id, "processor panicked".to_string());
        }
        Err(_) => shared.fail(id, "processor cancelled".to_string()),
    }
}
