use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::job::{CorrelationId, JobStatus};
use crate::models::scan::{ConfirmRequest, EnqueueResponse, ScanRequest, ScanResponse, UndoRequest};
use crate::routes::ApiError;
use crate::services::scan::{confirmation_operations, ScanError, ScanOutcome};
use crate::services::validation::validate_barcode;

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::InvalidBarcode(_) => ApiError::unprocessable(err.to_string()),
            ScanError::NotFound(_) => ApiError::not_found(err.to_string()),
        }
    }
}

/// POST /api/v1/scan: look up a scanned code.
pub async fn scan_barcode(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, ApiError> {
    req.validate()?;

    let response = match state.scan.scan(&req.barcode, req.skip_cache).await? {
        ScanOutcome::Product(candidate) => ScanResponse::Product {
            product: candidate.best(),
            candidate: *candidate,
        },
        ScanOutcome::Location(location) => ScanResponse::Location { location },
    };
    Ok(Json(response))
}

/// POST /api/v1/scan/confirm: book a confirmed scan into the inventory.
///
/// Without product fields in the request, the scan is resolved again (usually
/// from cache) and its best record is used.
pub async fn confirm_scan(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    req.validate()?;

    let barcode = validate_barcode(&req.barcode).map_err(ScanError::from)?;
    if !barcode.is_product() {
        return Err(ApiError::unprocessable(format!(
            "{} is a location code, not a product",
            barcode
        )));
    }

    let mut product = match req.product {
        Some(product) => product,
        None => match state.scan.scan(&req.barcode, None).await? {
            ScanOutcome::Product(candidate) => candidate.best(),
            ScanOutcome::Location(_) => {
                return Err(ApiError::unprocessable("location codes cannot be booked"))
            }
        },
    };
    product.barcode = barcode.normalized().to_string();

    let correlation_id = req
        .correlation_id
        .map(CorrelationId::new)
        .unwrap_or_else(CorrelationId::generate);

    let job_ids = confirmation_operations(&barcode, req.amount, product)
        .into_iter()
        .map(|op| state.queue.enqueue(correlation_id.clone(), op))
        .collect();

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            correlation_id: correlation_id.to_string(),
            job_ids,
            status: JobStatus::Pending,
            message: "Scan confirmed, inventory update queued".to_string(),
        }),
    ))
}

/// POST /api/v1/scan/undo: compensate an earlier confirmation.
pub async fn undo_scan(
    State(state): State<AppState>,
    Json(req): Json<UndoRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    req.validate()?;

    let correlation_id = CorrelationId::new(req.correlation_id);
    let job_id = state
        .queue
        .enqueue_undo(correlation_id.clone(), req.target, req.job_id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            correlation_id: correlation_id.to_string(),
            job_ids: vec![job_id],
            status: JobStatus::Pending,
            message: format!("Undo of {} queued", req.target),
        }),
    ))
}
