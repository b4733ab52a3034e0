//! In-process inventory job queue.
//!
//! A fixed pool of workers drains per-correlation FIFO lanes: only the head
//! job of a lane may run, so jobs sharing a correlation id execute in
//! submission order while unrelated lanes run concurrently. All state
//! transitions happen under one lock and are checked against the job state
//! machine, so a job can never be claimed or completed twice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{JobSettings, SettingsHandle};
use crate::models::job::{
    idempotency_key, CorrelationId, InventoryOperation, Job, JobId, JobStatus, OperationKind,
};
use crate::services::inventory::{InventoryClient, InventoryError};

const EVENT_CAPACITY: usize = 256;

/// Longest pause between retention sweeps.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Published on every job state change.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub correlation_id: CorrelationId,
    pub status: JobStatus,
    pub attempts: u32,
}

/// Job counts by state.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {id} is {status} and can no longer be cancelled")]
    NotCancellable { id: JobId, status: JobStatus },

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("No {target} job under correlation {correlation_id} left to undo")]
    NothingToUndo {
        correlation_id: CorrelationId,
        target: OperationKind,
    },

    #[error("Job {0} already has an undo queued")]
    AlreadyUndone(JobId),

    #[error("Job queue is shut down")]
    ShutDown,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    lanes: HashMap<CorrelationId, VecDeque<JobId>>,
    /// Lanes whose head job is waiting for a worker.
    ready: VecDeque<CorrelationId>,
    /// Lanes whose head job is running or waiting out a retry backoff.
    active: HashSet<CorrelationId>,
}

impl QueueState {
    fn transition(&mut self, id: JobId, to: JobStatus) -> Result<&mut Job, QueueError> {
        let job = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if !job.status.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                id,
                from: job.status,
                to,
            });
        }
        job.status = to;
        job.updated_at = Utc::now();
        Ok(job)
    }

    /// Pop the finished head of a lane and hand the lane to the next job.
    fn advance_lane(&mut self, correlation_id: &CorrelationId) {
        self.active.remove(correlation_id);
        let Some(lane) = self.lanes.get_mut(correlation_id) else {
            return;
        };
        lane.pop_front();
        if lane.is_empty() {
            self.lanes.remove(correlation_id);
        } else {
            self.ready.push_back(correlation_id.clone());
        }
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Retrying => stats.retrying += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    wake: Notify,
    changes: watch::Sender<u64>,
    events: broadcast::Sender<JobEvent>,
    shutdown: watch::Sender<bool>,
    settings: SettingsHandle,
    client: Arc<dyn InventoryClient>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the worker pool. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Spawn `workers` workers executing jobs against `client`.
    ///
    /// Retry limits and backoff are read from `settings` at each failure.
    pub fn start(
        settings: SettingsHandle,
        client: Arc<dyn InventoryClient>,
        workers: usize,
    ) -> Self {
        let (changes, _) = watch::channel(0u64);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            changes,
            events,
            shutdown,
            settings,
            client,
            workers: Mutex::new(Vec::new()),
        });

        let workers = workers.max(1);
        let mut handles: Vec<_> = (0..workers)
            .map(|worker_id| tokio::spawn(worker_loop(inner.clone(), worker_id)))
            .collect();
        handles.push(tokio::spawn(prune_loop(inner.clone())));
        *inner.workers.lock().unwrap_or_else(PoisonError::into_inner) = handles;

        info!(workers, "Inventory job queue started");
        Self { inner }
    }

    /// Submit an operation; returns immediately with the job id.
    pub fn enqueue(&self, correlation_id: CorrelationId, operation: InventoryOperation) -> JobId {
        let job = Job::new(correlation_id, operation);
        let mut state = self.inner.lock();
        self.submit(&mut state, job)
    }

    /// Queue the compensation of one `target` job under `correlation_id`.
    ///
    /// With `job` unset, the newest such job not yet undone or cancelled is
    /// chosen. Resolution and submission happen under one lock, so two undo
    /// requests never pick the same job.
    pub fn enqueue_undo(
        &self,
        correlation_id: CorrelationId,
        target: OperationKind,
        job: Option<JobId>,
    ) -> Result<JobId, QueueError> {
        let mut state = self.inner.lock();
        let undone: HashSet<JobId> = state
            .jobs
            .values()
            .filter(|j| j.status != JobStatus::Cancelled)
            .filter_map(|j| match j.operation {
                InventoryOperation::Undo { job, .. } => Some(job),
                _ => None,
            })
            .collect();
        let undoable = |j: &Job| {
            target != OperationKind::Undo
                && j.correlation_id == correlation_id
                && j.operation.kind() == target
                && j.status != JobStatus::Cancelled
        };
        let nothing = || QueueError::NothingToUndo {
            correlation_id: correlation_id.clone(),
            target,
        };

        let job = match job {
            Some(id) => {
                let candidate = state.jobs.get(&id).ok_or(QueueError::NotFound(id))?;
                if !undoable(candidate) {
                    return Err(nothing());
                }
                if undone.contains(&id) {
                    return Err(QueueError::AlreadyUndone(id));
                }
                id
            }
            None => state
                .jobs
                .values()
                .filter(|j| undoable(*j) && !undone.contains(&j.id))
                .max_by_key(|j| j.created_at)
                .map(|j| j.id)
                .ok_or_else(nothing)?,
        };

        let undo = Job::new(correlation_id.clone(), InventoryOperation::Undo { target, job });
        Ok(self.submit(&mut state, undo))
    }

    fn submit(&self, state: &mut QueueState, job: Job) -> JobId {
        let id = job.id;
        let kind = job.operation.kind();
        let correlation_id = job.correlation_id.clone();
        let event = event_for(&job);

        state.jobs.insert(id, job);
        let lane = state.lanes.entry(correlation_id.clone()).or_default();
        lane.push_back(id);
        if lane.len() == 1 {
            state.ready.push_back(correlation_id.clone());
        }
        self.inner.publish(state, event);

        metrics::counter!("jobs_enqueued_total", "operation" => kind.to_string()).increment(1);
        info!(job_id = %id, correlation_id = %correlation_id, operation = %kind, "Inventory job enqueued");
        self.inner.wake.notify_one();
        id
    }

    /// Cancel a job that has not started yet.
    pub fn cancel(&self, id: JobId) -> Result<Job, QueueError> {
        let mut state = self.inner.lock();
        let status = state.jobs.get(&id).ok_or(QueueError::NotFound(id))?.status;
        if status != JobStatus::Pending {
            return Err(QueueError::NotCancellable { id, status });
        }

        let job = state.transition(id, JobStatus::Cancelled)?.clone();
        let correlation_id = job.correlation_id.clone();
        if let Some(lane) = state.lanes.get_mut(&correlation_id) {
            lane.retain(|queued| *queued != id);
            if lane.is_empty() {
                state.lanes.remove(&correlation_id);
                state.ready.retain(|c| *c != correlation_id);
            }
        }
        self.inner.publish(&state, event_for(&job));
        info!(job_id = %id, correlation_id = %correlation_id, "Inventory job cancelled");
        Ok(job)
    }

    pub fn status(&self, id: JobId) -> Option<Job> {
        self.inner.lock().jobs.get(&id).cloned()
    }

    /// All tracked jobs, newest first.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: JobId) -> Result<Job, QueueError> {
        let mut changes = self.inner.changes.subscribe();
        loop {
            match self.status(id) {
                None => return Err(QueueError::NotFound(id)),
                Some(job) if job.status.is_terminal() => return Ok(job),
                Some(_) => {}
            }
            if changes.changed().await.is_err() {
                return Err(QueueError::ShutDown);
            }
        }
    }

    /// Drop terminal jobs last updated more than `older_than` ago.
    ///
    /// Runs on its own every `JobSettings::retention_secs` (at most once a minute).
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        self.inner.prune(older_than)
    }

    /// Stop the workers after their current job.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let handles: Vec<_> = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Job worker ended abnormally");
            }
        }
        info!("Inventory job queue stopped");
    }
}

impl QueueInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Broadcast a state change. Called with the state lock held so events stay ordered.
    fn publish(&self, state: &QueueState, event: JobEvent) {
        let stats = state.stats();
        metrics::gauge!("job_queue_depth").set((stats.pending + stats.retrying) as f64);
        let _ = self.events.send(event);
        self.changes.send_modify(|version| *version += 1);
    }

    fn prune(&self, older_than: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(older_than) {
            Ok(age) => Utc::now() - age,
            Err(_) => return 0,
        };
        let mut state = self.lock();
        let before = state.jobs.len();
        state
            .jobs
            .retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        before - state.jobs.len()
    }

    /// Claim the head job of the next ready lane.
    fn claim(&self) -> Option<Job> {
        let mut state = self.lock();
        while let Some(correlation_id) = state.ready.pop_front() {
            let Some(&head) = state.lanes.get(&correlation_id).and_then(|l| l.front()) else {
                continue;
            };
            match state.transition(head, JobStatus::Running) {
                Ok(job) => {
                    job.attempts += 1;
                    job.next_attempt_at = None;
                    let job = job.clone();
                    state.active.insert(correlation_id);
                    self.publish(&state, event_for(&job));
                    return Some(job);
                }
                Err(e) => {
                    error!(job_id = %head, error = %e, "Skipping unclaimable job");
                }
            }
        }
        None
    }

    fn complete(&self, job: &Job) {
        let mut state = self.lock();
        match state.transition(job.id, JobStatus::Succeeded) {
            Ok(done) => {
                done.last_error = None;
                let event = event_for(done);
                state.advance_lane(&job.correlation_id);
                self.publish(&state, event);
            }
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to record job success"),
        }
        drop(state);
        self.wake.notify_one();
    }

    /// Record a failed attempt. Returns the backoff before the next attempt, if any.
    fn fail(&self, job: &Job, err: &InventoryError, jobs: &JobSettings) -> Option<Duration> {
        let mut state = self.lock();
        let failed = match state.transition(job.id, JobStatus::Failed) {
            Ok(failed) => failed,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record job failure");
                return None;
            }
        };
        failed.last_error = Some(err.to_string());
        let attempts = failed.attempts;

        if err.is_retryable() && attempts < jobs.max_attempts {
            let delay = jobs.backoff(attempts);
            let retrying = match state.transition(job.id, JobStatus::Retrying) {
                Ok(retrying) => retrying,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to schedule retry");
                    return None;
                }
            };
            retrying.next_attempt_at = chrono::Duration::from_std(delay)
                .ok()
                .map(|d| Utc::now() + d);
            let event = event_for(retrying);
            self.publish(&state, event);
            return Some(delay);
        }

        let event = event_for(failed);
        state.advance_lane(&job.correlation_id);
        self.publish(&state, event);
        drop(state);
        self.wake.notify_one();
        None
    }

    /// Hand a lane back to the workers after its backoff elapsed.
    fn requeue(&self, correlation_id: CorrelationId) {
        let mut state = self.lock();
        if state.active.remove(&correlation_id) {
            state.ready.push_back(correlation_id);
        }
        drop(state);
        self.wake.notify_one();
    }
}

fn event_for(job: &Job) -> JobEvent {
    JobEvent {
        job_id: job.id,
        correlation_id: job.correlation_id.clone(),
        status: job.status,
        attempts: job.attempts,
    }
}

async fn worker_loop(inner: Arc<QueueInner>, worker_id: usize) {
    let mut shutdown = inner.shutdown.subscribe();
    debug!(worker_id, "Job worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        match inner.claim() {
            Some(job) => execute(&inner, job, &shutdown).await,
            None => {
                tokio::select! {
                    _ = inner.wake.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    debug!(worker_id, "Job worker stopped");
}

async fn prune_loop(inner: Arc<QueueInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    while !*shutdown.borrow() {
        let period = inner.settings.snapshot().jobs.retention().min(PRUNE_INTERVAL);
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
        let retention = inner.settings.snapshot().jobs.retention();
        let pruned = inner.prune(retention);
        if pruned > 0 {
            debug!(pruned, retention_secs = retention.as_secs(), "Pruned finished jobs");
        }
    }
}

async fn execute(inner: &Arc<QueueInner>, job: Job, shutdown: &watch::Receiver<bool>) {
    info!(
        job_id = %job.id,
        correlation_id = %job.correlation_id,
        operation = %job.operation.kind(),
        attempt = job.attempts,
        "Executing inventory job"
    );

    let outcome = AssertUnwindSafe(apply(inner.client.as_ref(), &job))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(InventoryError::Transient("inventory call panicked".into())));

    match outcome {
        Ok(()) => {
            inner.complete(&job);
            metrics::counter!("jobs_succeeded_total").increment(1);
            info!(job_id = %job.id, attempts = job.attempts, "Inventory job succeeded");
        }
        Err(e) => {
            let settings = inner.settings.snapshot();
            match inner.fail(&job, &e, &settings.jobs) {
                Some(delay) => {
                    metrics::counter!("jobs_retried_total").increment(1);
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Inventory job failed, retrying after backoff"
                    );
                    let inner = inner.clone();
                    let correlation_id = job.correlation_id.clone();
                    let mut shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => inner.requeue(correlation_id),
                            _ = shutdown.changed() => {}
                        }
                    });
                }
                None => {
                    metrics::counter!("jobs_failed_total").increment(1);
                    error!(
                        job_id = %job.id,
                        correlation_id = %job.correlation_id,
                        attempts = job.attempts,
                        error = %e,
                        "Inventory job failed permanently"
                    );
                }
            }
        }
    }
}

/// Dispatch a job to the inventory client under its idempotency key.
async fn apply(client: &dyn InventoryClient, job: &Job) -> Result<(), InventoryError> {
    let key = job.idempotency_key();
    match &job.operation {
        InventoryOperation::CreateProduct { product } => client.create_product(product, &key).await,
        InventoryOperation::UpdateProduct { product } => client.update_product(product, &key).await,
        InventoryOperation::AddStock { barcode, amount } => {
            client.add_stock(barcode, *amount, &key).await
        }
        InventoryOperation::ConsumeStock { barcode, amount } => {
            client.consume_stock(barcode, *amount, &key).await
        }
        InventoryOperation::TransferStock {
            barcode,
            amount,
            to_location,
        } => {
            client
                .transfer_stock(barcode, *amount, to_location, &key)
                .await
        }
        InventoryOperation::Undo { target, job: undone } => {
            let target_key = idempotency_key(&job.correlation_id, *target, *undone);
            client.undo(&target_key, &key).await
        }
    }
}
