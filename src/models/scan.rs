use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::barcode::LocationCode;
use crate::models::job::{Job, JobId, JobStatus, OperationKind};
use crate::models::product::{ProductDraft, ScanCandidate};

/// Request to look up a scanned code.
#[derive(Debug, Deserialize, Validate)]
pub struct ScanRequest {
    #[garde(length(min = 1, max = 64))]
    pub barcode: String,

    /// Overrides the configured skip-cache flag for this request.
    #[garde(skip)]
    #[serde(default)]
    pub skip_cache: Option<bool>,
}

/// Response for a scan: either a product candidate or a storage location.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanResponse {
    Product {
        candidate: ScanCandidate,
        product: ProductDraft,
    },
    Location {
        location: LocationCode,
    },
}

/// Request to book a confirmed scan into the inventory.
#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmRequest {
    #[garde(length(min = 1, max = 64))]
    pub barcode: String,

    #[garde(range(min = 0.001, max = 100000.0))]
    #[serde(default = "default_amount")]
    pub amount: f64,

    /// Reuse to group with earlier operations; generated when absent.
    #[garde(length(min = 1, max = 128))]
    pub correlation_id: Option<String>,

    /// Product fields to create the inventory record with, usually a scan's `product`.
    #[garde(dive)]
    pub product: Option<ProductDraft>,
}

fn default_amount() -> f64 {
    1.0
}

/// Request to compensate a previous confirmation.
#[derive(Debug, Deserialize, Validate)]
pub struct UndoRequest {
    #[garde(length(min = 1, max = 128))]
    pub correlation_id: String,

    #[garde(skip)]
    #[serde(default = "default_undo_target")]
    pub target: OperationKind,

    /// The job to compensate; the newest matching job not yet undone when absent.
    #[garde(skip)]
    #[serde(default)]
    pub job_id: Option<JobId>,
}

fn default_undo_target() -> OperationKind {
    OperationKind::AddStock
}

/// Response after enqueueing inventory jobs.
#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub correlation_id: String,
    pub job_ids: Vec<JobId>,
    pub status: JobStatus,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub correlation_id: String,
    pub operation: OperationKind,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            correlation_id: job.correlation_id.to_string(),
            operation: job.operation.kind(),
            status: job.status,
            attempts: job.attempts,
            error: job.last_error.clone(),
            next_attempt_at: job.next_attempt_at,
            updated_at: job.updated_at,
        }
    }
}
