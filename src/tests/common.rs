use axum::{body::Body, Router};
use bson::oid::ObjectId;
use mongodb::Database;
use serde_json::Value;
use std::sync::Arc;

use crate::{
    config::Config,
    db::{ensure_indexes, init_db},
    models::user::{Role, User},
    routes,
    services::{leaderboard_service::LeaderboardService, user_service::UserService},
    utils::generate_jwt,
};

pub struct TestServices {
    pub leaderboard_service: Arc<LeaderboardService>,
    pub user_service: Arc<UserService>,
}

pub struct TestContext {
    pub app: Router,
    pub db: Arc<Database>,
    pub services: TestServices,
}

pub struct TestUser {
    pub id: ObjectId,
    pub token: String,
    pub role: Role,
}

pub async fn setup() -> TestContext {
    dotenv::dotenv().ok();
    if std::env::var("JWT_SECRET").is_err() {
        std::env::set_var("JWT_SECRET", "test_secret");
    }

    let config = Config {
        mongodb_uri: std::env::var("MONGODB_TEST_URI")
            .expect("MONGODB_TEST_URI must be set for tests"),
        jwt_secret: std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
        port: 8001,
    };

    let db = Arc::new(init_db(&config.mongodb_uri).await);

    for collection in ["users", "leaderboard_entries", "point_events"] {
        db.collection::<bson::Document>(collection)
            .drop()
            .await
            .unwrap_or_else(|e| panic!("Failed to drop collection {}: {}", collection, e));
    }
    ensure_indexes(&db).await.expect("Failed to create indexes");

    let leaderboard_service = Arc::new(LeaderboardService::new(db.clone()));
    let user_service = Arc::new(UserService::new(db.clone()));

    let app = routes::init_routes(db.clone(), Arc::new(config));

    TestContext {
        app,
        db,
        services: TestServices {
            leaderboard_service,
            user_service,
        },
    }
}

/// Inserts a directory user and returns their ID plus a valid JWT.
pub async fn create_test_user(db: &Arc<Database>, role: Role, username: &str) -> TestUser {
    let user = User {
        id: Some(ObjectId::new()),
        username: username.to_string(),
        email: format!("{}@example.com", username),
        role: role.clone(),
        avatar: None,
    };

    db.collection("users")
        .insert_one(user.clone())
        .await
        .expect("Failed to insert test user");

    let user_id = user.id.expect("Test user should have an ID after insertion");

    let jwt_secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");
    let token = generate_jwt(&user_id.to_hex(), &role.to_string(), &jwt_secret);

    TestUser {
        id: user_id,
        token,
        role,
    }
}

pub fn json_body(json: &Value) -> Body {
    Body::from(json.to_string())
}
