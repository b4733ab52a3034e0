use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::config::{Settings, SettingsError};
use crate::routes::ApiError;

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        ApiError::unprocessable(err.to_string())
    }
}

/// GET /api/v1/settings: current snapshot with provider API keys withheld.
pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    let mut settings = (*state.settings.snapshot()).clone();
    for provider in &mut settings.lookup.providers {
        provider.api_key = None;
    }
    Json(settings)
}

/// PUT /api/v1/settings: replace the snapshot.
///
/// A provider sent without `api_key` keeps its current key.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(mut settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    let current = state.settings.snapshot();
    for provider in &mut settings.lookup.providers {
        if provider.api_key.is_none() {
            provider.api_key = current
                .lookup
                .providers
                .iter()
                .find(|p| p.kind == provider.kind)
                .and_then(|p| p.api_key.clone());
        }
    }

    state.settings.update(settings.clone())?;
    for provider in &mut settings.lookup.providers {
        provider.api_key = None;
    }
    Ok(Json(settings))
}
