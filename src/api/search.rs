//! Search endpoint, served at `/search` and `/api/v1/tasks/search`.

use axum::{
    Json,
    extract::{Query, State},
};

use super::dto::{SearchParams, SearchResponse};
use super::error::ApiErrorResponse;
use super::handlers::AppState;
use crate::domain::Requester;

/// Searches the requester's tasks (all tasks for admins) by free text.
///
/// # Query Parameters
///
/// - `query`: free text, required
/// - `limit`: 1 to 100, default 20
/// - `offset`: default 0
///
/// # Errors
///
/// Returns 400 `INVALID_QUERY` for empty or oversized queries and 503
/// `SEARCH_UNAVAILABLE` if the index cannot answer. Zero matches is a 200
/// with an empty list.
pub async fn search_tasks(
    State(state): State<AppState>,
    requester: Requester,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiErrorResponse> {
    let tasks = state
        .search_service
        .search_page(&params.query, &requester, params.limit, params.offset)
        .await?;
    Ok(Json(SearchResponse {
        success: true,
        tasks,
    }))
}
