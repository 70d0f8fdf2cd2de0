use axum::Json;
use axum::extract::{Query, State};

use crate::AppState;
use crate::client::ListModelsFilter;
use crate::error::AppError;
use crate::registry::ModelSummary;

/// GET /api/v1/models
///
/// Public catalog entries, optionally filtered by `?type=`.
pub async fn list_models(
    State(state): State<AppState>,
    Query(filter): Query<ListModelsFilter>,
) -> Result<Json<Vec<ModelSummary>>, AppError> {
    let models = state.client.list_models(filter).await?;
    Ok(Json(models))
}
