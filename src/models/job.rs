use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::product::ProductDraft;

/// Lifecycle state of an inventory write job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Cancelled,
}

impl JobStatus {
    /// Allowed edges of the job state machine.
    ///
    /// `Failed -> Retrying` is the only edge leaving a failure; whether it is taken
    /// depends on the attempt budget, which the queue checks.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Failed, Retrying)
                | (Retrying, Running)
        )
    }

    /// The queue moves `Failed -> Retrying` under the same lock that recorded the
    /// failure, so a `Failed` job observed from outside is exhausted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied key grouping a job with its related and compensating jobs.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation kinds understood by the inventory system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    CreateProduct,
    UpdateProduct,
    AddStock,
    ConsumeStock,
    TransferStock,
    Undo,
}

/// A write against the inventory system, with its payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryOperation {
    CreateProduct {
        product: ProductDraft,
    },
    UpdateProduct {
        product: ProductDraft,
    },
    AddStock {
        barcode: String,
        amount: f64,
    },
    ConsumeStock {
        barcode: String,
        amount: f64,
    },
    TransferStock {
        barcode: String,
        amount: f64,
        to_location: String,
    },
    /// Compensate job `job`, a `target` operation under the same correlation id.
    Undo {
        target: OperationKind,
        job: JobId,
    },
}

impl InventoryOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            InventoryOperation::CreateProduct { .. } => OperationKind::CreateProduct,
            InventoryOperation::UpdateProduct { .. } => OperationKind::UpdateProduct,
            InventoryOperation::AddStock { .. } => OperationKind::AddStock,
            InventoryOperation::ConsumeStock { .. } => OperationKind::ConsumeStock,
            InventoryOperation::TransferStock { .. } => OperationKind::TransferStock,
            InventoryOperation::Undo { .. } => OperationKind::Undo,
        }
    }
}

/// Key under which the inventory system deduplicates an operation.
///
/// Scoped to one job, so repeating an operation under a reused correlation id
/// is a new write rather than a replay.
pub fn idempotency_key(
    correlation_id: &CorrelationId,
    kind: OperationKind,
    job: JobId,
) -> String {
    format!("{}:{}:{}", correlation_id, kind, job)
}

/// An inventory write job as tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub correlation_id: CorrelationId,
    pub operation: InventoryOperation,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(correlation_id: CorrelationId, operation: InventoryOperation) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            correlation_id,
            operation,
            status: JobStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            next_attempt_at: None,
            last_error: None,
        }
    }

    pub fn idempotency_key(&self) -> String {
        idempotency_key(&self.correlation_id, self.operation.kind(), self.id)
    }
}
