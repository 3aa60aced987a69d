use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Materialized per-user aggregate, derived from the point-event ledger.
///
/// `rank` is assigned only by a full recalculation pass and stays stale
/// between passes; `total_points` is kept current by atomic increments on
/// every ingested event.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LeaderboardEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub total_points: i64,
    pub courses_completed: i64,
    pub badges_earned: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// One leaderboard row as served to the presentation layer: the aggregate
/// joined with the user directory's display fields, pre-ordered, so the UI
/// does no ranking of its own.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct LeaderboardRow {
    pub user_id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub total_points: i64,
    pub courses_completed: i64,
    pub badges_earned: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct LeaderboardStats {
    pub total_users: i64,
    /// Arithmetic mean of `total_points`, rounded to two decimal places.
    pub average_points: f64,
    pub max_points: i64,
    pub total_courses_completed: i64,
    pub total_badges_earned: i64,
}

impl Default for LeaderboardStats {
    fn default() -> Self {
        LeaderboardStats {
            total_users: 0,
            average_points: 0.0,
            max_points: 0,
            total_courses_completed: 0,
            total_badges_earned: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct RecalculateResponse {
    pub entries_ranked: u64,
}
