//! Entity store gateway.
//!
//! The command handlers never issue queries themselves; they go through
//! [`EntityStore`], which exposes the lookups and inserts they need. Lookups
//! signal "not found" with an empty `Vec`, never with an error.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("already exists: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Backend(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Feed {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub url: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
}

impl NewUser {
    /// Fresh id, both timestamps set to now.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub name: String,
    pub url: String,
}

impl NewFeed {
    pub fn new(user_id: Uuid, name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            user_id,
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Operations the command handlers depend on.
///
/// Every `create_*` call must report a uniqueness violation as
/// [`StoreError::Conflict`]; handlers rely on it when two processes race past
/// the same existence check.
#[allow(async_fn_in_trait)]
pub trait EntityStore {
    async fn find_users_by_name(&self, name: &str) -> Result<Vec<User>, StoreError>;

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// All users ordered by name.
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Returns the number of users removed. Owned feeds go with them.
    async fn delete_all_users(&self) -> Result<u64, StoreError>;

    async fn find_feeds_by_name(&self, name: &str) -> Result<Vec<Feed>, StoreError>;

    async fn find_feeds_by_url(&self, url: &str) -> Result<Vec<Feed>, StoreError>;

    async fn create_feed(&self, feed: NewFeed) -> Result<Feed, StoreError>;
}
