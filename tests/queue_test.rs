//! Job queue retries, ordering and cancellation against a fake inventory system.

mod fixtures;
mod helpers;

use std::sync::Arc;
use std::time::Duration;

use barcode_intake::config::SettingsHandle;
use barcode_intake::models::job::{
    CorrelationId, InventoryOperation, Job, JobId, JobStatus, OperationKind,
};
use barcode_intake::services::queue::{JobQueue, QueueError};

use fixtures::*;
use helpers::*;

const WAIT: Duration = Duration::from_secs(5);

fn add_stock() -> InventoryOperation {
    InventoryOperation::AddStock {
        barcode: EAN13.to_string(),
        amount: 1.0,
    }
}

fn consume_stock() -> InventoryOperation {
    InventoryOperation::ConsumeStock {
        barcode: EAN13.to_string(),
        amount: 1.0,
    }
}

async fn finished(queue: &JobQueue, id: JobId) -> Job {
    tokio::time::timeout(WAIT, queue.wait_for_terminal(id))
        .await
        .expect("job did not finish in time")
        .unwrap()
}

/// Idempotency key the queue sends for job `id`.
fn key(queue: &JobQueue, id: JobId) -> String {
    queue.status(id).unwrap().idempotency_key()
}

fn position(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{} missing from {:?}", entry, log))
}

#[tokio::test]
async fn test_job_succeeds_on_third_attempt() {
    let inventory = Arc::new(FakeInventory::failing_first(2));
    let queue = JobQueue::start(settings_handle(5), inventory.clone(), 2);

    let id = queue.enqueue(CorrelationId::new("scan-1"), add_stock());
    let job = finished(&queue, id).await;

    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.last_error, None);
    assert_eq!(inventory.attempts(&key(&queue, id)), 3);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_job_fails_after_exhausting_attempts() {
    let inventory = Arc::new(FakeInventory::failing_first(10));
    let queue = JobQueue::start(settings_handle(3), inventory.clone(), 2);

    let id = queue.enqueue(CorrelationId::new("scan-2"), add_stock());
    let job = finished(&queue, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert!(job.last_error.unwrap().contains("503"));
    assert_eq!(inventory.attempts(&key(&queue, id)), 3);
    assert_eq!(queue.stats().failed, 1);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_rejected_job_is_not_retried() {
    let inventory = Arc::new(FakeInventory::rejecting());
    let queue = JobQueue::start(settings_handle(5), inventory.clone(), 1);

    let id = queue.enqueue(CorrelationId::new("scan-3"), add_stock());
    let job = finished(&queue, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_correlated_jobs_run_in_submission_order() {
    let inventory = Arc::new(
        FakeInventory::new().slow_for("order-1:add_stock", Duration::from_millis(100)),
    );
    let queue = JobQueue::start(settings_handle(3), inventory.clone(), 4);

    let first = queue.enqueue(CorrelationId::new("order-1"), add_stock());
    let unrelated = queue.enqueue(CorrelationId::new("other"), add_stock());
    let second = queue.enqueue(CorrelationId::new("order-1"), consume_stock());

    for id in [first, unrelated, second] {
        assert_eq!(finished(&queue, id).await.status, JobStatus::Succeeded);
    }

    let log = inventory.log();
    let (first, unrelated, second) = (key(&queue, first), key(&queue, unrelated), key(&queue, second));
    assert!(position(&log, &format!("end:{}", first)) < position(&log, &format!("start:{}", second)));
    // The unrelated lane is not held up by the slow one.
    assert!(position(&log, &format!("start:{}", unrelated)) < position(&log, &format!("end:{}", first)));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_retrying_head_blocks_its_lane() {
    let inventory = Arc::new(FakeInventory::failing_first(1));
    let queue = JobQueue::start(settings_handle(3), inventory.clone(), 4);

    let first = queue.enqueue(CorrelationId::new("order-2"), add_stock());
    let second = queue.enqueue(CorrelationId::new("order-2"), consume_stock());

    assert_eq!(finished(&queue, first).await.attempts, 2);
    assert_eq!(finished(&queue, second).await.status, JobStatus::Succeeded);

    let log = inventory.log();
    let first_end = format!("end:{}", key(&queue, first));
    let last_first_end = log.iter().rposition(|e| *e == first_end).unwrap();
    assert!(last_first_end < position(&log, &format!("start:{}", key(&queue, second))));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_failed_head_does_not_block_lane() {
    let inventory = Arc::new(FakeInventory::rejecting());
    let queue = JobQueue::start(settings_handle(3), inventory.clone(), 1);

    let first = queue.enqueue(CorrelationId::new("order-3"), add_stock());
    let second = queue.enqueue(CorrelationId::new("order-3"), consume_stock());

    assert_eq!(finished(&queue, first).await.status, JobStatus::Failed);
    assert_eq!(finished(&queue, second).await.status, JobStatus::Failed);
    assert_eq!(inventory.attempts(&key(&queue, second)), 1);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_cancel_only_while_pending() {
    let inventory = Arc::new(
        FakeInventory::new().slow_for("order-4:add_stock", Duration::from_millis(200)),
    );
    let queue = JobQueue::start(settings_handle(3), inventory.clone(), 2);
    let mut events = queue.subscribe();

    let running = queue.enqueue(CorrelationId::new("order-4"), add_stock());
    let waiting = queue.enqueue(CorrelationId::new("order-4"), consume_stock());

    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if event.job_id == running && event.status == JobStatus::Running {
                break;
            }
        }
    })
    .await
    .unwrap();

    let cancelled = queue.cancel(waiting).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(matches!(
        queue.cancel(running),
        Err(QueueError::NotCancellable {
            status: JobStatus::Running,
            ..
        })
    ));

    assert_eq!(finished(&queue, running).await.status, JobStatus::Succeeded);
    assert_eq!(finished(&queue, waiting).await.status, JobStatus::Cancelled);
    assert_eq!(inventory.attempts(&key(&queue, waiting)), 0);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_undo_targets_original_operation_key() {
    let inventory = Arc::new(FakeInventory::new());
    let queue = JobQueue::start(settings_handle(3), inventory.clone(), 2);
    let correlation = CorrelationId::new("scan-5");

    let booked = queue.enqueue(correlation.clone(), add_stock());
    let undo = queue
        .enqueue_undo(correlation, OperationKind::AddStock, None)
        .unwrap();

    finished(&queue, booked).await;
    assert_eq!(finished(&queue, undo).await.status, JobStatus::Succeeded);

    let log = inventory.log();
    assert!(log.contains(&format!("undo:{}", key(&queue, booked))));
    assert!(log.contains(&format!("start:{}", key(&queue, undo))));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_reused_correlation_gets_distinct_keys() {
    let inventory = Arc::new(FakeInventory::new());
    let queue = JobQueue::start(settings_handle(3), inventory.clone(), 2);
    let correlation = CorrelationId::new("scan-7");

    let first = queue.enqueue(correlation.clone(), add_stock());
    let second = queue.enqueue(correlation, add_stock());
    finished(&queue, first).await;
    finished(&queue, second).await;

    let (first, second) = (key(&queue, first), key(&queue, second));
    assert_ne!(first, second);
    assert!(first.starts_with("scan-7:add_stock:"));
    assert_eq!(inventory.attempts(&first), 1);
    assert_eq!(inventory.attempts(&second), 1);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_each_undo_reverses_a_different_job() {
    let inventory = Arc::new(FakeInventory::new());
    let queue = JobQueue::start(settings_handle(3), inventory.clone(), 2);
    let correlation = CorrelationId::new("scan-8");

    let older = queue.enqueue(correlation.clone(), add_stock());
    let newer = queue.enqueue(correlation.clone(), add_stock());
    let first_undo = queue
        .enqueue_undo(correlation.clone(), OperationKind::AddStock, None)
        .unwrap();
    let second_undo = queue
        .enqueue_undo(correlation.clone(), OperationKind::AddStock, None)
        .unwrap();

    for id in [older, newer, first_undo, second_undo] {
        assert_eq!(finished(&queue, id).await.status, JobStatus::Succeeded);
    }
    let log = inventory.log();
    let undone: Vec<&String> = log.iter().filter(|e| e.starts_with("undo:")).collect();
    assert_eq!(
        undone,
        vec![
            &format!("undo:{}", key(&queue, newer)),
            &format!("undo:{}", key(&queue, older)),
        ]
    );

    assert!(matches!(
        queue.enqueue_undo(correlation.clone(), OperationKind::AddStock, None),
        Err(QueueError::NothingToUndo { .. })
    ));
    assert!(matches!(
        queue.enqueue_undo(correlation, OperationKind::AddStock, Some(older)),
        Err(QueueError::AlreadyUndone(id)) if id == older
    ));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_undo_rejects_job_from_another_correlation() {
    let queue = JobQueue::start(settings_handle(3), Arc::new(FakeInventory::new()), 1);

    let booked = queue.enqueue(CorrelationId::new("scan-9"), add_stock());
    finished(&queue, booked).await;

    assert!(matches!(
        queue.enqueue_undo(CorrelationId::new("scan-10"), OperationKind::AddStock, Some(booked)),
        Err(QueueError::NothingToUndo { .. })
    ));
    assert!(matches!(
        queue.enqueue_undo(CorrelationId::new("scan-9"), OperationKind::AddStock, Some(JobId::new())),
        Err(QueueError::NotFound(_))
    ));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_status_listing_and_pruning() {
    let inventory = Arc::new(FakeInventory::new());
    let queue = JobQueue::start(settings_handle(3), inventory, 2);

    let id = queue.enqueue(CorrelationId::new("scan-6"), add_stock());
    finished(&queue, id).await;

    assert_eq!(queue.jobs().len(), 1);
    assert_eq!(queue.stats().succeeded, 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(queue.prune_finished(Duration::ZERO), 1);
    assert!(queue.status(id).is_none());
    assert!(matches!(
        queue.wait_for_terminal(id).await,
        Err(QueueError::NotFound(_))
    ));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_finished_jobs_pruned_after_retention() {
    let mut settings = (*settings_handle(3).snapshot()).clone();
    settings.jobs.retention_secs = 1;
    let queue = JobQueue::start(
        SettingsHandle::new(settings).unwrap(),
        Arc::new(FakeInventory::new()),
        1,
    );

    let id = queue.enqueue(CorrelationId::new("scan-11"), add_stock());
    finished(&queue, id).await;
    assert!(queue.status(id).is_some());

    // Retention is measured on the wall clock, so this waits in real time.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(queue.status(id).is_none());
    assert_eq!(queue.stats(), Default::default());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_enqueues_all_complete() {
    let inventory = Arc::new(FakeInventory::failing_first(1));
    let queue = JobQueue::start(settings_handle(3), inventory, 4);

    let ids: Vec<JobId> = (0..20)
        .map(|i| queue.enqueue(CorrelationId::new(format!("bulk-{}", i % 5)), add_stock()))
        .collect();

    for id in ids {
        assert_eq!(finished(&queue, id).await.status, JobStatus::Succeeded);
    }
    let stats = queue.stats();
    assert_eq!(stats.succeeded, 20);
    assert_eq!(stats.pending + stats.running + stats.retrying, 0);
    queue.shutdown().await;
}
