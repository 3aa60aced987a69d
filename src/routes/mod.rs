use axum::{routing::get, Extension, Router};
use mongodb::Database;
use std::sync::Arc;

use crate::{config, services::leaderboard_service::LeaderboardService};

pub mod leaderboard;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
pub async fn health_check() -> &'static str {
    "OK"
}

pub fn init_routes(db: Arc<Database>, config: Arc<config::Config>) -> Router {
    use crate::services::user_service::UserService;
    let leaderboard_service = Arc::new(LeaderboardService::new(db.clone()));
    let user_service = Arc::new(UserService::new(db.clone()));

    Router::new()
        .route("/health", get(health_check))
        .merge(leaderboard::leaderboard_routes(
            leaderboard_service,
            user_service,
        ))
        .layer(Extension(config))
}
