use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    middleware::request_id::RequestId,
    models::{RecommendationEnvelope, Season, TitleId},
    services::recommendations::RecommendationRequest,
};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub year: Option<i32>,
    pub season: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "provider": state.provider.name(),
            "cache": {
                "backend": state.cache.backend(),
                "available": state.cache.is_available(),
            },
        })),
    )
}

/// Ranked seasonal recommendations for one user
pub async fn recommend(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(user): Path<String>,
    Query(query): Query<RecommendationQuery>,
) -> AppResult<Json<RecommendationEnvelope>> {
    let user = user.trim().to_string();
    if user.is_empty() {
        return Err(AppError::InvalidInput("user must not be empty".to_string()));
    }

    let season = query
        .season
        .as_deref()
        .map(str::parse::<Season>)
        .transpose()
        .map_err(AppError::InvalidInput)?;
    let year = query
        .year
        .unwrap_or_else(|| state.recommender.clock().current_season().year);

    tracing::info!(
        request_id = %request_id,
        user = %user,
        year,
        season = ?season,
        debug = query.debug,
        "Processing recommendation request"
    );

    let envelope = state
        .recommender
        .recommend(RecommendationRequest {
            user,
            year,
            season,
            debug: query.debug,
        })
        .await?;

    tracing::info!(
        request_id = %request_id,
        shows = envelope.data.shows.len(),
        categories = envelope.data.categories.len(),
        "Recommendations completed"
    );

    Ok(Json(envelope))
}

/// Sorted genre vocabulary
pub async fn genres(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    let genres = state.provider.get_genres().await?;
    Ok(Json(genres.into_iter().collect()))
}

/// Ids of anime related to `id`
pub async fn related_anime(
    State(state): State<AppState>,
    Path(id): Path<TitleId>,
) -> AppResult<Json<Vec<TitleId>>> {
    state
        .provider
        .get_related_anime(Some(id))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No relations for anime {}", id)))
}
