use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::executor::PlaybookExecutor;
use super::models::{FailureKind, JobFailure, JobId, JobOutcome, JobRecord, RunRequest};
use super::store::JobStore;
use crate::errors::JobError;

struct QueuedRun {
    id: JobId,
    request: RunRequest,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedRun>>>;

/// Accepts run requests and feeds them to a fixed pool of workers through a
/// bounded queue.
///
/// A full queue rejects the request with [`JobError::QueueFull`]. A queue
/// slot is reserved before the job record is created, so every accepted job
/// has both a record and a pending unit of work.
pub struct JobDispatcher {
    store: Arc<dyn JobStore>,
    sender: mpsc::Sender<QueuedRun>,
    receiver: SharedReceiver,
    queue_capacity: usize,
    cancel: CancellationToken,
    /// Held while a run is admitted, and while shutdown closes admission,
    /// so no run is queued after shutdown starts draining.
    admission: Mutex<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobDispatcher {
    /// Spawn `workers` worker tasks. Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<dyn JobStore>,
        executor: Arc<PlaybookExecutor>,
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        // A zero-capacity channel is not allowed; `run` rejects everything
        // in that case instead.
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let cancel = CancellationToken::new();

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    receiver.clone(),
                    store.clone(),
                    executor.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        tracing::info!(workers, queue_capacity, "Job dispatcher started");
        Self {
            store,
            sender,
            receiver,
            queue_capacity,
            cancel,
            admission: Mutex::new(()),
            workers: Mutex::new(handles),
        }
    }

    /// Queue a run and return its id without waiting for it to start.
    pub fn run(&self, request: RunRequest) -> Result<JobId, JobError> {
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return Err(JobError::DispatcherClosed);
        }
        if self.queue_capacity == 0 {
            return Err(JobError::QueueFull { capacity: 0 });
        }
        let permit = self.sender.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => JobError::QueueFull {
                capacity: self.queue_capacity,
            },
            TrySendError::Closed(()) => JobError::DispatcherClosed,
        })?;

        let id = JobId::new();
        // On failure the permit drops here and the slot is released.
        self.store.create(id)?;
        tracing::info!(job_id = %id, playbook = %request.playbook, "Job accepted");
        permit.send(QueuedRun { id, request });
        Ok(id)
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.store.get(id)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Stop accepting work, let workers finish their current run, and mark
    /// runs that never started as failed.
    pub async fn shutdown(&self) {
        {
            let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
            self.cancel.cancel();
        }
        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Job worker panicked");
            }
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        let mut abandoned = 0usize;
        while let Ok(run) = receiver.try_recv() {
            let failure = JobFailure::new(
                FailureKind::Internal,
                "Dispatcher shut down before the run started",
            );
            self.store.complete(&run.id, JobOutcome::Error(failure));
            abandoned += 1;
        }
        tracing::info!(abandoned, "Job dispatcher stopped");
    }
}

async fn worker_loop(
    worker: usize,
    receiver: SharedReceiver,
    store: Arc<dyn JobStore>,
    executor: Arc<PlaybookExecutor>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            run = async { receiver.lock().await.recv().await } => run,
        };
        let Some(run) = next else {
            break;
        };

        tracing::debug!(worker, job_id = %run.id, playbook = %run.request.playbook, "Job started");
        let outcome = executor.execute(&run.request).await;
        let status = outcome.status();
        if store.complete(&run.id, outcome) {
            tracing::info!(job_id = %run.id, status = status.as_str(), "Job finished");
        } else {
            tracing::warn!(job_id = %run.id, "Job record missing or already terminal");
        }
    }
    tracing::debug!(worker, "Job worker exiting");
}
