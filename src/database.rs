//! Database initialization, table definitions, and shared state
//!
//! Sets up the embedded redb database holding scheduled posts and defines
//! the application state handed to every request handler.

use std::sync::Arc;

use redb::{Database, TableDefinition};

use crate::config::Config;
use crate::delivery::DeliverySink;
use crate::metrics::Metrics;
use crate::rewriter::RedirectResolver;
use crate::scheduler::Scheduler;

/// Main table for scheduled posts
///
/// Key: post id
/// Value: JSON-serialized ScheduledPost
pub const TABLE_POSTS: TableDefinition<u64, &str> = TableDefinition::new("posts_v1");

/// Index for querying a user's posts in target-time order
///
/// Key: composite key "{user_id}:{target_micros:020}:{post_id:020}"
/// Value: post id
///
/// Both numbers are zero-padded so a lexicographic range scan over one
/// user's prefix returns posts ascending by target time.
pub const TABLE_USER_INDEX: TableDefinition<&str, u64> =
    TableDefinition::new("user_index_v1");

/// Single-row bookkeeping table
///
/// Currently holds only "next_post_id", the monotonic id counter. It is
/// bumped in the same write transaction as the insert it numbers.
pub const TABLE_META: TableDefinition<&str, u64> = TableDefinition::new("meta_v1");

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub scheduler: Scheduler,
    pub resolver: Arc<dyn RedirectResolver>,
    pub sink: Arc<dyn DeliverySink>,
}

/// Creates or opens the database file and ensures all tables exist.
pub fn init_db(db_path: &str) -> Result<Database, redb::Error> {
    let db = Database::create(db_path)?;

    let write_txn = db.begin_write()?;
    {
        write_txn.open_table(TABLE_POSTS)?;
        write_txn.open_table(TABLE_USER_INDEX)?;
        write_txn.open_table(TABLE_META)?;
    }
    write_txn.commit()?;

    Ok(db)
}
