use axum::Router;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::{security::{HttpAuthScheme, HttpBuilder, SecurityScheme}, SecurityRequirement}, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::{config::Config, routes::init_routes};

mod config;
mod db;
mod error;
mod routes;
mod services;
mod models;
mod utils;
mod middleware;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health_check,
        routes::leaderboard::get_leaderboard,
        routes::leaderboard::get_user_standing,
        routes::leaderboard::get_stats,
        routes::leaderboard::recalculate_ranks,
        routes::leaderboard::record_event,
    ),
    components(
        schemas(
            models::leaderboard::LeaderboardRow,
            models::leaderboard::LeaderboardStats,
            models::leaderboard::RecalculateResponse,
            models::point_event::PointSource,
            models::user::Role,
            routes::leaderboard::RecordEventRequest,
            routes::leaderboard::RecordEventResponse,
            utils::Claims,
        ),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

/// Injects a `bearer_auth` SecurityScheme and a global SecurityRequirement so
/// the mutation endpoints show up as guarded in Swagger UI.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let comps = openapi.components.get_or_insert_with(Default::default);

        comps.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );

        let sr = SecurityRequirement::new::<String, Vec<String>, String>(
            "bearer_auth".to_string(),
            Vec::<String>::new(),
        );
        openapi.security = Some(vec![sr]);
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lms_leaderboard=debug,tower_http=debug,info".into()),
        )
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Arc::new(Config::from_env());
    let db = Arc::new(db::init_db(&config.mongodb_uri).await);
    db::ensure_indexes(&db)
        .await
        .expect("Failed to create indexes");

    let app = Router::new()
        .merge(init_routes(db, config.clone()))
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");
    tracing::info!(%addr, "leaderboard service listening");

    axum::serve(listener, app).await.expect("Server error");
}

#[cfg(test)]
mod tests;
