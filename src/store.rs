//! Durable schedule store
//!
//! Persistence for scheduled posts on top of the embedded database.
//! `insert` commits before returning, so a caller may crash immediately
//! after a successful schedule call and the post still survives.
//! `transition` is the single conditional-update primitive both the
//! dispatcher and cancellation go through: a status change commits only
//! while the record is still pending, so of two racing transitions
//! exactly one wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable};

use crate::database::{TABLE_META, TABLE_POSTS, TABLE_USER_INDEX};
use crate::error::StoreError;
use crate::model::{PostStatus, ScheduledPost};

const NEXT_POST_ID: &str = "next_post_id";

#[derive(Clone)]
pub struct ScheduleStore {
    db: Arc<Database>,
}

impl ScheduleStore {
    pub fn new(db: Arc<Database>) -> Self {
        ScheduleStore { db }
    }

    fn index_key(post: &ScheduledPost) -> String {
        format!(
            "{}:{:020}:{:020}",
            post.user_id,
            post.target_time.timestamp_micros(),
            post.id
        )
    }

    /// Persists a new pending post, assigning the next monotonic id.
    /// Durable once this returns.
    pub fn insert(
        &self,
        user_id: &str,
        original_links: Vec<String>,
        affiliate_links: Vec<String>,
        target_time: DateTime<Utc>,
        body: String,
    ) -> Result<ScheduledPost, StoreError> {
        let write_txn = self.db.begin_write()?;
        let post = {
            let mut meta = write_txn.open_table(TABLE_META)?;
            let id = meta.get(NEXT_POST_ID)?.map(|g| g.value()).unwrap_or(1);
            meta.insert(NEXT_POST_ID, id + 1)?;

            let post = ScheduledPost {
                id,
                user_id: user_id.to_string(),
                original_links,
                affiliate_links,
                target_time,
                body,
                status: PostStatus::Pending,
                created_at: Utc::now(),
            };
            let record_json = serde_json::to_string(&post)?;

            let mut posts = write_txn.open_table(TABLE_POSTS)?;
            posts.insert(post.id, record_json.as_str())?;

            let mut index = write_txn.open_table(TABLE_USER_INDEX)?;
            index.insert(Self::index_key(&post).as_str(), post.id)?;

            post
        };
        write_txn.commit()?;

        Ok(post)
    }

    pub fn get(&self, id: u64) -> Result<Option<ScheduledPost>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let posts = read_txn.open_table(TABLE_POSTS)?;
        match posts.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All of one user's posts, ascending by target time.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<ScheduledPost>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(TABLE_USER_INDEX)?;
        let posts = read_txn.open_table(TABLE_POSTS)?;

        // '{' is the character after ':', which makes an exclusive upper
        // bound covering every key with this user prefix.
        let start_key = format!("{}:", user_id);
        let end_key = format!("{}:{{", user_id);

        let mut records = Vec::new();
        for entry in index.range(start_key.as_str()..end_key.as_str())? {
            let (_, id_guard) = entry?;
            if let Some(guard) = posts.get(id_guard.value())? {
                records.push(serde_json::from_str(guard.value())?);
            }
        }
        Ok(records)
    }

    /// One user's still-pending posts, ascending by target time.
    pub fn list_pending(&self, user_id: &str) -> Result<Vec<ScheduledPost>, StoreError> {
        Ok(self
            .list_for_user(user_id)?
            .into_iter()
            .filter(|post| post.status == PostStatus::Pending)
            .collect())
    }

    /// Every pending post regardless of owner. Recovery-sweep query; runs
    /// once at startup.
    pub fn all_pending(&self) -> Result<Vec<ScheduledPost>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let posts = read_txn.open_table(TABLE_POSTS)?;

        let mut records = Vec::new();
        for entry in posts.iter()? {
            let (_, guard) = entry?;
            let post: ScheduledPost = serde_json::from_str(guard.value())?;
            if post.status == PostStatus::Pending {
                records.push(post);
            }
        }
        Ok(records)
    }

    pub fn pending_count(&self) -> Result<u64, StoreError> {
        Ok(self.all_pending()?.len() as u64)
    }

    /// Atomic conditional status update: commits `to` only while the
    /// record's current status is `Pending`. Returns whether the
    /// transition committed. A missing record returns `false`.
    pub fn transition(&self, id: u64, to: PostStatus) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let committed = {
            let mut posts = write_txn.open_table(TABLE_POSTS)?;
            let current = posts.get(id)?.map(|guard| guard.value().to_string());
            match current {
                Some(record_json) => {
                    let mut post: ScheduledPost = serde_json::from_str(&record_json)?;
                    if post.status == PostStatus::Pending {
                        post.status = to;
                        let updated = serde_json::to_string(&post)?;
                        posts.insert(id, updated.as_str())?;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if committed {
            write_txn.commit()?;
        }
        Ok(committed)
    }
}
