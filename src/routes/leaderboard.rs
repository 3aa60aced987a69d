use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json, Router,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::auth_middleware;
use crate::models::leaderboard::{LeaderboardRow, LeaderboardStats, RecalculateResponse};
use crate::models::point_event::PointSource;
use crate::services::{leaderboard_service::LeaderboardService, user_service::UserService};
use crate::utils::Claims;

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    limit: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct RecordEventRequest {
    pub user_id: String,
    pub points_delta: i64,
    pub source: PointSource,
    /// Idempotency key supplied by the producing service; generated when
    /// absent. A repeated key is rejected with 409 instead of double-counted.
    pub event_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct RecordEventResponse {
    pub event_id: String,
    pub user_id: String,
    pub applied_delta: i64,
    pub total_points: i64,
}

#[utoipa::path(
    get,
    path = "/leaderboard",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of rows to return")
    ),
    responses(
        (status = 200, description = "Leaderboard retrieved successfully", body = [LeaderboardRow]),
        (status = 400, description = "Invalid limit"),
    )
)]
pub async fn get_leaderboard(
    State((leaderboard_service, _user_service)): State<(Arc<LeaderboardService>, Arc<UserService>)>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardRow>>, AppError> {
    let rows = leaderboard_service.get_leaderboard(query.limit).await?;
    Ok(Json(rows))
}

#[utoipa::path(
    get,
    path = "/leaderboard/user/{id}",
    params(
        ("id" = String, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "User standing retrieved successfully", body = LeaderboardRow),
        (status = 400, description = "Invalid user ID"),
        (status = 404, description = "User has no leaderboard entry"),
    )
)]
pub async fn get_user_standing(
    State((leaderboard_service, user_service)): State<(Arc<LeaderboardService>, Arc<UserService>)>,
    Path(id): Path<String>,
) -> Result<Json<LeaderboardRow>, AppError> {
    let user_id = ObjectId::parse_str(&id)
        .map_err(|_| AppError::validation("id", "not a valid user ID"))?;

    let row = leaderboard_service
        .get_user_standing(user_id, &user_service)
        .await?;
    Ok(Json(row))
}

#[utoipa::path(
    get,
    path = "/leaderboard/stats",
    responses(
        (status = 200, description = "Aggregate statistics", body = LeaderboardStats),
    )
)]
pub async fn get_stats(
    State((leaderboard_service, _user_service)): State<(Arc<LeaderboardService>, Arc<UserService>)>,
) -> Result<Json<LeaderboardStats>, AppError> {
    let stats = leaderboard_service.get_stats().await?;
    Ok(Json(stats))
}

#[utoipa::path(
    post,
    path = "/leaderboard/recalculate",
    responses(
        (status = 200, description = "Ranks recalculated", body = RecalculateResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin role required"),
        (status = 409, description = "A recalculation is already in progress"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn recalculate_ranks(
    State((leaderboard_service, _user_service)): State<(Arc<LeaderboardService>, Arc<UserService>)>,
    Extension(claims): Extension<Arc<Claims>>,
) -> Result<Json<RecalculateResponse>, AppError> {
    if claims.role != "Admin" {
        return Err(AppError::Forbidden("only admins may trigger a recalculation"));
    }

    let entries_ranked = leaderboard_service.recalculate_ranks().await?;
    Ok(Json(RecalculateResponse { entries_ranked }))
}

#[utoipa::path(
    post,
    path = "/leaderboard/events",
    request_body = RecordEventRequest,
    responses(
        (status = 201, description = "Point event recorded", body = RecordEventResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Event already recorded"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn record_event(
    State((leaderboard_service, _user_service)): State<(Arc<LeaderboardService>, Arc<UserService>)>,
    Extension(_claims): Extension<Arc<Claims>>,
    Json(req): Json<RecordEventRequest>,
) -> Result<(StatusCode, Json<RecordEventResponse>), AppError> {
    let user_id = ObjectId::parse_str(&req.user_id)
        .map_err(|_| AppError::validation("user_id", "not a valid user ID"))?;

    let outcome = leaderboard_service
        .record_event(user_id, req.points_delta, req.source, req.event_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RecordEventResponse {
            event_id: outcome.event_id.to_string(),
            user_id: outcome.user_id.to_hex(),
            applied_delta: outcome.applied_delta,
            total_points: outcome.total_points,
        }),
    ))
}

pub fn leaderboard_routes(
    leaderboard_service: Arc<LeaderboardService>,
    user_service: Arc<UserService>,
) -> Router {
    let mutations = Router::new()
        .route("/leaderboard/recalculate", axum::routing::post(recalculate_ranks))
        .route("/leaderboard/events", axum::routing::post(record_event))
        .layer(axum::middleware::from_fn(auth_middleware));

    Router::new()
        .route("/leaderboard", axum::routing::get(get_leaderboard))
        .route("/leaderboard/user/{id}", axum::routing::get(get_user_standing))
        .route("/leaderboard/stats", axum::routing::get(get_stats))
        .merge(mutations)
        .with_state((leaderboard_service, user_service))
}
