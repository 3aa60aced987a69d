use std::collections::HashMap;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Document};
use chrono::Utc;
use futures::stream::TryStreamExt;
use mongodb::options::ReturnDocument;
use mongodb::{ClientSession, Collection, Database};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{LEADERBOARD_COLLECTION, POINT_EVENTS_COLLECTION, USERS_COLLECTION};
use crate::error::{is_duplicate_key, AppError};
use crate::models::leaderboard::{LeaderboardEntry, LeaderboardRow, LeaderboardStats};
use crate::models::point_event::{PointEvent, PointSource};
use crate::models::user::User;
use crate::services::user_service::UserService;

/// Outcome of ingesting a single point event: the delta actually applied
/// (after clamping at zero) and the resulting total.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub event_id: Uuid,
    pub user_id: ObjectId,
    pub applied_delta: i64,
    pub total_points: i64,
}

pub struct LeaderboardService {
    db: Arc<Database>,
    entries: Collection<LeaderboardEntry>,
    events: Collection<PointEvent>,
    // At most one recalculation pass in flight; a second caller gets a
    // conflict instead of reading a half-sorted dataset.
    recalc_lock: Mutex<()>,
}

impl LeaderboardService {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            entries: db.collection(LEADERBOARD_COLLECTION),
            events: db.collection(POINT_EVENTS_COLLECTION),
            db,
            recalc_lock: Mutex::new(()),
        }
    }

    /// Appends a point event to the ledger, then bumps the user's
    /// materialized aggregate with a single server-side pipeline update.
    ///
    /// The two writes are deliberately ledger-first: if the aggregate update
    /// fails the next recalculation repairs it from the ledger. The aggregate
    /// update itself never does a read-modify-write in application code, so
    /// concurrent events for the same user cannot lose updates.
    pub async fn record_event(
        &self,
        user_id: ObjectId,
        points_delta: i64,
        source: PointSource,
        event_id: Option<Uuid>,
    ) -> Result<RecordOutcome, AppError> {
        let event = PointEvent {
            id: None,
            event_id: event_id.unwrap_or_else(Uuid::new_v4),
            user_id,
            points_delta,
            requested_delta: None,
            source,
            occurred_at: Utc::now(),
        };

        let inserted = self.events.insert_one(&event).await.map_err(|e| {
            if is_duplicate_key(&e) {
                AppError::DuplicateEvent(event.event_id.to_string())
            } else {
                AppError::Storage(e)
            }
        })?;

        let course_inc = i64::from(source == PointSource::CourseCompletion);
        let badge_inc = i64::from(source == PointSource::BadgeAward);
        let update = vec![doc! {
            "$set": {
                "total_points": { "$max": [0i64, { "$add": [{ "$ifNull": ["$total_points", 0i64] }, points_delta] }] },
                "courses_completed": { "$add": [{ "$ifNull": ["$courses_completed", 0i64] }, course_inc] },
                "badges_earned": { "$add": [{ "$ifNull": ["$badges_earned", 0i64] }, badge_inc] },
                "updated_at": bson::DateTime::now(),
            }
        }];

        let before = self
            .entries
            .find_one_and_update(doc! { "user_id": user_id }, update)
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .await?;

        let previous_points = before.map(|e| e.total_points).unwrap_or(0);
        let (total_points, applied_delta) = clamped_apply(previous_points, points_delta);

        if applied_delta != points_delta {
            // Keep the ledger replayable: store the delta that actually
            // landed and remember what was asked for.
            warn!(
                user_id = %user_id,
                requested = points_delta,
                applied = applied_delta,
                "negative delta clamped at zero"
            );
            self.events
                .update_one(
                    doc! { "_id": inserted.inserted_id },
                    doc! { "$set": { "points_delta": applied_delta, "requested_delta": points_delta } },
                )
                .await?;
        }

        Ok(RecordOutcome {
            event_id: event.event_id,
            user_id,
            applied_delta,
            total_points,
        })
    }

    /// Full recomputation pass: replay the ledger into fresh aggregates,
    /// sort, assign dense ranks, and commit every entry in one transaction.
    ///
    /// Returns the number of entries ranked. A concurrent pass is rejected
    /// with [`AppError::RecalcInProgress`].
    pub async fn recalculate_ranks(&self) -> Result<u64, AppError> {
        let _guard = self
            .recalc_lock
            .try_lock()
            .map_err(|_| AppError::RecalcInProgress)?;
        let started = std::time::Instant::now();

        let pipeline = vec![doc! {
            "$group": {
                "_id": "$user_id",
                "ledger_points": { "$sum": "$points_delta" },
                "courses_completed": { "$sum": { "$cond": [{ "$eq": ["$source", "course_completion"] }, 1i64, 0i64] } },
                "badges_earned": { "$sum": { "$cond": [{ "$eq": ["$source", "badge_award"] }, 1i64, 0i64] } },
            }
        }];

        #[derive(Deserialize)]
        struct LedgerAggregate {
            #[serde(rename = "_id")]
            user_id: ObjectId,
            ledger_points: i64,
            courses_completed: i64,
            badges_earned: i64,
        }

        let mut cached: HashMap<ObjectId, i64> = HashMap::new();
        let mut cursor = self.entries.find(doc! {}).await?;
        while let Some(entry) = cursor.try_next().await? {
            cached.insert(entry.user_id, entry.total_points);
        }

        let mut aggregates = Vec::new();
        let mut cursor = self.events.aggregate(pipeline).await?;
        while let Some(doc) = cursor.try_next().await? {
            let agg: LedgerAggregate =
                bson::from_document(doc).map_err(|e| AppError::Storage(e.into()))?;
            let total_points = agg.ledger_points.max(0);

            if let Some(&points) = cached.get(&agg.user_id) {
                if points != total_points {
                    warn!(
                        user_id = %agg.user_id,
                        cached = points,
                        ledger = total_points,
                        "reconciliation mismatch, correcting from ledger"
                    );
                }
            }

            aggregates.push(UserAggregate {
                user_id: agg.user_id,
                total_points,
                courses_completed: agg.courses_completed,
                badges_earned: agg.badges_earned,
                rank: 0,
            });
        }

        assign_dense_ranks(&mut aggregates);

        let mut session = self.db.client().start_session().await?;
        session.start_transaction().await?;
        match self.write_ranks(&aggregates, &mut session).await {
            Ok(()) => session.commit_transaction().await?,
            Err(e) => {
                session.abort_transaction().await.ok();
                return Err(e);
            }
        }

        let entries_ranked = aggregates.len() as u64;
        info!(
            entries_ranked,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "leaderboard ranks recalculated"
        );
        Ok(entries_ranked)
    }

    async fn write_ranks(
        &self,
        aggregates: &[UserAggregate],
        session: &mut ClientSession,
    ) -> Result<(), AppError> {
        let now = bson::DateTime::now();
        for agg in aggregates {
            self.entries
                .update_one(
                    doc! { "user_id": agg.user_id },
                    doc! { "$set": {
                        "total_points": agg.total_points,
                        "courses_completed": agg.courses_completed,
                        "badges_earned": agg.badges_earned,
                        "rank": agg.rank,
                        "updated_at": now,
                    } },
                )
                .upsert(true)
                .session(&mut *session)
                .await?;
        }
        Ok(())
    }

    /// Entries ordered by rank ascending (entries awaiting their first
    /// recalculation sort last), decorated with the user directory's display
    /// fields. Ranks may lag points between recalculations; that skew is part
    /// of the read contract.
    pub async fn get_leaderboard(
        &self,
        limit: Option<i64>,
    ) -> Result<Vec<LeaderboardRow>, AppError> {
        if let Some(l) = limit {
            if l <= 0 {
                return Err(AppError::validation("limit", "must be a positive integer"));
            }
        }

        let mut pipeline = vec![
            doc! { "$addFields": { "rank_order": { "$ifNull": ["$rank", i64::MAX] } } },
            doc! { "$sort": { "rank_order": 1, "total_points": -1, "user_id": 1 } },
        ];
        if let Some(l) = limit {
            pipeline.push(doc! { "$limit": l });
        }
        pipeline.push(doc! { "$lookup": {
            "from": USERS_COLLECTION,
            "localField": "user_id",
            "foreignField": "_id",
            "as": "user_info",
        } });
        pipeline.push(doc! { "$unwind": { "path": "$user_info", "preserveNullAndEmptyArrays": true } });

        let mut cursor = self.entries.aggregate(pipeline).await?;
        let mut rows = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            rows.push(row_from_document(doc)?);
        }
        Ok(rows)
    }

    pub async fn get_user_standing(
        &self,
        user_id: ObjectId,
        user_service: &UserService,
    ) -> Result<LeaderboardRow, AppError> {
        let entry = self
            .entries
            .find_one(doc! { "user_id": user_id })
            .await?
            .ok_or(AppError::NotFound("leaderboard entry"))?;

        let user = user_service.find_user(user_id).await?;
        Ok(decorate(entry, user))
    }

    /// Descriptive statistics over the current aggregates, computed fresh on
    /// every call and independent of rank staleness.
    pub async fn get_stats(&self) -> Result<LeaderboardStats, AppError> {
        let pipeline = vec![doc! {
            "$group": {
                "_id": null,
                "total_users": { "$sum": 1i64 },
                "average_points": { "$avg": "$total_points" },
                "max_points": { "$max": "$total_points" },
                "total_courses_completed": { "$sum": "$courses_completed" },
                "total_badges_earned": { "$sum": "$badges_earned" },
            }
        }];

        #[derive(Deserialize)]
        struct StatsAggregate {
            total_users: i64,
            average_points: f64,
            max_points: i64,
            total_courses_completed: i64,
            total_badges_earned: i64,
        }

        let mut cursor = self.entries.aggregate(pipeline).await?;
        match cursor.try_next().await? {
            Some(doc) => {
                let agg: StatsAggregate =
                    bson::from_document(doc).map_err(|e| AppError::Storage(e.into()))?;
                Ok(LeaderboardStats {
                    total_users: agg.total_users,
                    average_points: round_mean(agg.average_points),
                    max_points: agg.max_points,
                    total_courses_completed: agg.total_courses_completed,
                    total_badges_earned: agg.total_badges_earned,
                })
            }
            None => Ok(LeaderboardStats::default()),
        }
    }
}

fn decorate(entry: LeaderboardEntry, user: Option<User>) -> LeaderboardRow {
    LeaderboardRow {
        user_id: entry.user_id.to_hex(),
        username: user
            .as_ref()
            .map(|u| u.username.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        avatar: user.and_then(|u| u.avatar),
        total_points: entry.total_points,
        courses_completed: entry.courses_completed,
        badges_earned: entry.badges_earned,
        rank: entry.rank,
    }
}

fn row_from_document(doc: Document) -> Result<LeaderboardRow, AppError> {
    let user: Option<User> = doc
        .get_document("user_info")
        .ok()
        .and_then(|d| bson::from_document(d.clone()).ok());
    let entry: LeaderboardEntry =
        bson::from_document(doc).map_err(|e| AppError::Storage(e.into()))?;
    Ok(decorate(entry, user))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UserAggregate {
    pub user_id: ObjectId,
    pub total_points: i64,
    pub courses_completed: i64,
    pub badges_earned: i64,
    pub rank: i64,
}

/// Dense ranking (1,2,2,3): tied totals share a rank and the next distinct
/// total continues immediately after. Ties are ordered by `user_id` ascending
/// so repeated passes over identical data produce identical output.
pub(crate) fn assign_dense_ranks(aggregates: &mut [UserAggregate]) {
    aggregates.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then(a.user_id.cmp(&b.user_id))
    });

    let mut rank = 0i64;
    let mut previous = None;
    for agg in aggregates.iter_mut() {
        if previous != Some(agg.total_points) {
            rank += 1;
            previous = Some(agg.total_points);
        }
        agg.rank = rank;
    }
}

/// Applies a delta to a running total, flooring at zero. Returns the new
/// total and the delta that actually landed.
pub(crate) fn clamped_apply(total: i64, delta: i64) -> (i64, i64) {
    let new_total = (total + delta).max(0);
    (new_total, new_total - total)
}

fn round_mean(mean: f64) -> f64 {
    (mean * 100.0).round() / 100.0
}
