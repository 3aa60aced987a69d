use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Where a point event came from. The engine never decides *when* a course is
/// completed or a badge is earned; it only ingests the resulting events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PointSource {
    CourseCompletion,
    BadgeAward,
    ManualAdjustment,
}

/// Append-only ledger record. The ledger is the source of truth: summing a
/// user's `points_delta` values (floored at zero) must always reproduce the
/// materialized `total_points`.
///
/// When a negative delta would drive the total below zero, `points_delta` is
/// patched to the delta actually applied and `requested_delta` keeps the
/// original.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PointEvent {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub event_id: Uuid,
    pub user_id: ObjectId,
    pub points_delta: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_delta: Option<i64>,
    pub source: PointSource,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub occurred_at: DateTime<Utc>,
}
