//! Concurrent bulk tombstoning.
//!
//! A delete call is split into at most `workers` contiguous sub-batches
//! which are queued on a bounded job channel. A fixed set of worker tasks
//! drains that channel, executes each sub-batch as one backend batch and
//! emits one [`DeleteOutcome`] per request into a results channel sized to
//! the whole request list, so emission never blocks. A supervisor task
//! joins every worker and only then closes the results channel; the caller
//! drains it and reconciles the outcomes into the store.
//!
//! A failing or timed out sub-batch reports each of its items as failed
//! without affecting the other workers.

use crate::config::PipelineConfig;
use async_trait::async_trait;
use linkstore_core::{DeleteOutcome, DeleteRequest, Result, ShortCode, StorageError};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// Executes one sub-batch of tombstone requests against a backend.
#[async_trait]
pub trait TombstoneExecutor: Send + Sync + 'static {
    /// Marks the requested codes as deleted.
    ///
    /// Returns per-item outcomes, or one error that fails the whole batch.
    async fn execute(&self, batch: &[DeleteRequest]) -> Result<Vec<DeleteOutcome>>;
}

/// Per-code result of a `delete_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TombstoneReport {
    /// Codes that are now tombstoned.
    pub deleted: Vec<ShortCode>,
    /// Codes the backend refused or failed to tombstone.
    pub rejected: Vec<ShortCode>,
}

impl TombstoneReport {
    pub(crate) fn from_outcomes(outcomes: &[DeleteOutcome]) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            if outcome.succeeded {
                report.deleted.push(outcome.short_code.clone());
            } else {
                report.rejected.push(outcome.short_code.clone());
            }
        }
        report
    }

    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

type JobReceiver = Arc<Mutex<mpsc::Receiver<Vec<DeleteRequest>>>>;

/// Fan-out/fan-in runner for tombstone requests.
#[derive(Debug, Clone)]
pub struct TombstonePipeline {
    workers: usize,
    batch_timeout: Option<Duration>,
}

impl TombstonePipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            batch_timeout: config.batch_timeout(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs the requests through the worker pool and collects one outcome
    /// per request.
    ///
    /// Outcomes arrive in completion order, not request order. Requests of
    /// a worker that panicked produce no outcome.
    pub async fn run(
        &self,
        executor: Arc<dyn TombstoneExecutor>,
        requests: Vec<DeleteRequest>,
    ) -> Vec<DeleteOutcome> {
        if requests.is_empty() {
            return Vec::new();
        }

        let total = requests.len();
        let workers = self.workers.min(total);
        let chunk_size = total.div_ceil(workers);

        let (job_tx, job_rx) = mpsc::channel::<Vec<DeleteRequest>>(workers);
        let job_rx: JobReceiver = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<DeleteOutcome>(total);

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(run_worker(
                worker_id,
                Arc::clone(&job_rx),
                result_tx.clone(),
                Arc::clone(&executor),
                self.batch_timeout,
            ));
        }

        debug!(total, workers, chunk_size, "dispatching tombstone batches");
        for chunk in requests.chunks(chunk_size) {
            if job_tx.send(chunk.to_vec()).await.is_err() {
                warn!("tombstone job channel closed before dispatch finished");
                break;
            }
        }
        drop(job_tx);

        let supervisor = tokio::spawn(async move {
            while let Some(joined) = pool.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "tombstone worker terminated abnormally");
                }
            }
            drop(result_tx);
        });

        debug!(total, "draining tombstone results");
        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = result_rx.recv().await {
            outcomes.push(outcome);
        }

        if let Err(e) = supervisor.await {
            warn!(error = %e, "tombstone supervisor terminated abnormally");
        }

        outcomes
    }
}

async fn run_worker(
    worker_id: usize,
    jobs: JobReceiver,
    results: mpsc::Sender<DeleteOutcome>,
    executor: Arc<dyn TombstoneExecutor>,
    batch_timeout: Option<Duration>,
) {
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(batch) = job else {
            break;
        };

        trace!(worker_id, size = batch.len(), "executing tombstone batch");
        for outcome in execute_batch(worker_id, executor.as_ref(), &batch, batch_timeout).await {
            if results.send(outcome).await.is_err() {
                return;
            }
        }
    }
    trace!(worker_id, "tombstone worker finished");
}

async fn execute_batch(
    worker_id: usize,
    executor: &dyn TombstoneExecutor,
    batch: &[DeleteRequest],
    batch_timeout: Option<Duration>,
) -> Vec<DeleteOutcome> {
    let result = match batch_timeout {
        Some(limit) => match tokio::time::timeout(limit, executor.execute(batch)).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(format!(
                "tombstone batch of {} exceeded {:?}",
                batch.len(),
                limit
            ))),
        },
        None => executor.execute(batch).await,
    };

    match result {
        Ok(outcomes) => {
            let succeeded: HashSet<&ShortCode> = outcomes
                .iter()
                .filter(|outcome| outcome.succeeded)
                .map(|outcome| &outcome.short_code)
                .collect();

            batch
                .iter()
                .map(|request| DeleteOutcome {
                    short_code: request.short_code.clone(),
                    succeeded: succeeded.contains(&request.short_code),
                })
                .collect()
        }
        Err(e) => {
            warn!(worker_id, size = batch.len(), error = %e, "tombstone batch failed");
            batch
                .iter()
                .map(|request| DeleteOutcome::failed(request.short_code.clone()))
                .collect()
        }
    }
}

/// Tombstone executor for stores without a relational backend.
///
/// Holds the owners of the requested codes as seen by the cache when the
/// call started. An item succeeds when the code exists and belongs to the
/// requesting owner.
#[derive(Debug, Default)]
pub(crate) struct CachedOwnership {
    owners: HashMap<ShortCode, Option<String>>,
}

impl CachedOwnership {
    pub(crate) fn new(owners: HashMap<ShortCode, Option<String>>) -> Self {
        Self { owners }
    }
}

#[async_trait]
impl TombstoneExecutor for CachedOwnership {
    async fn execute(&self, batch: &[DeleteRequest]) -> Result<Vec<DeleteOutcome>> {
        Ok(batch
            .iter()
            .map(|request| DeleteOutcome {
                short_code: request.short_code.clone(),
                succeeded: self
                    .owners
                    .get(&request.short_code)
                    .is_some_and(|owner| owner.as_deref() == Some(request.owner_id.as_str())),
            })
            .collect())
    }
}
