use bson::doc;
use mongodb::{options::IndexOptions, Client, Database, IndexModel};

pub const LEADERBOARD_COLLECTION: &str = "leaderboard_entries";
pub const POINT_EVENTS_COLLECTION: &str = "point_events";
pub const USERS_COLLECTION: &str = "users";

pub async fn init_db(uri: &str) -> Database {
    let client = Client::with_uri_str(uri).await.expect("Failed to connect to MongoDB");
    client.database("lms_db")
}

/// One leaderboard entry per user; ledger events are deduplicated by their
/// external `event_id` so a retrying producer never double-counts.
pub async fn ensure_indexes(db: &Database) -> mongodb::error::Result<()> {
    let unique = IndexOptions::builder().unique(true).build();

    db.collection::<bson::Document>(LEADERBOARD_COLLECTION)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "user_id": 1 })
                .options(unique.clone())
                .build(),
        )
        .await?;

    db.collection::<bson::Document>(POINT_EVENTS_COLLECTION)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "event_id": 1 })
                .options(unique)
                .build(),
        )
        .await?;

    db.collection::<bson::Document>(POINT_EVENTS_COLLECTION)
        .create_index(IndexModel::builder().keys(doc! { "user_id": 1 }).build())
        .await?;

    Ok(())
}
