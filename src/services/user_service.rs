use std::sync::Arc;

use bson::{doc, oid::ObjectId};
use mongodb::{Collection, Database};

use crate::db::USERS_COLLECTION;
use crate::error::AppError;
use crate::models::user::User;

/// Read-only view of the identity service's user directory. Used to decorate
/// leaderboard rows with display fields; never consulted for ranking.
pub struct UserService {
    collection: Collection<User>,
}

impl UserService {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            collection: db.collection(USERS_COLLECTION),
        }
    }

    pub async fn find_user(&self, user_id: ObjectId) -> Result<Option<User>, AppError> {
        let user = self.collection.find_one(doc! { "_id": user_id }).await?;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: ObjectId) -> Result<User, AppError> {
        self.find_user(user_id)
            .await?
            .ok_or(AppError::NotFound("user"))
    }
}
