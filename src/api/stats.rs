//! Dashboard statistics endpoint.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::db::DashboardStats;
use crate::AppState;

use super::error::ApiError;

/// Aggregated counts for the staff dashboard
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<DashboardStats>, ApiError> {
    let stats = DashboardStats::get(&state.db).await?;
    Ok(Json(stats))
}
