//! Data models for the affiliate link service
//!
//! Defines the transient link-recognition structures, the durable
//! scheduled-post record, and the HTTP request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a recognized product URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClass {
    /// Full marketplace domain URL pointing at a product page.
    Canonical,

    /// Short-link redirector (amzn.to, a.co) that must be expanded
    /// before an item identifier can be extracted.
    Shortened,

    /// Search or category page on a marketplace domain.
    Search,
}

/// A product URL located in free-form text.
///
/// Created transiently during a single rewrite call; never persisted.
#[derive(Debug, Clone)]
pub struct RecognizedLink {
    /// Exact substring matched in the source text, trailing punctuation
    /// already trimmed.
    pub raw: String,

    /// Byte offset of the first occurrence in the source text.
    pub offset: usize,

    /// Normalized absolute URL (scheme always present).
    pub url: String,

    /// Extracted catalog item identifier, when one of the known path
    /// shapes matched. Always exactly 10 alphanumeric characters.
    pub asin: Option<String>,

    pub class: LinkClass,
}

/// Status of a scheduled post.
///
/// Transitions are one-directional: `Pending` may move to any of the
/// other three; `Sent`, `Failed` and `Cancelled` are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

/// A durable record of deferred publication.
///
/// Records are never physically deleted; resolved posts are retained as
/// history.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScheduledPost {
    /// Monotonic unique identifier.
    pub id: u64,

    /// Opaque identity of the submitting user. Scopes list and cancel.
    pub user_id: String,

    /// Links as they appeared in the submitted text.
    pub original_links: Vec<String>,

    /// Corresponding affiliate-tagged links.
    pub affiliate_links: Vec<String>,

    /// Absolute publication time (UTC).
    pub target_time: DateTime<Utc>,

    /// Fully rendered message body, fixed at scheduling time.
    pub body: String,

    pub status: PostStatus,

    pub created_at: DateTime<Utc>,
}

/// One original/affiliate link pair in a rewrite response.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RewrittenLink {
    pub original: String,
    pub affiliate: String,
}

/// Request payload for the immediate rewrite path.
#[derive(Deserialize)]
pub struct RewriteRequest {
    /// Free-form message text to scan for product links.
    pub text: String,

    /// Opaque sender identity.
    pub user_id: String,
}

/// Response for the immediate rewrite path.
#[derive(Serialize)]
pub struct RewriteResponse {
    /// Input text with every recognized link replaced.
    pub text: String,

    /// Number of unique links whose value actually changed.
    pub conversions: usize,

    pub links: Vec<RewrittenLink>,

    /// Whether the rendered message was published to the configured
    /// channel.
    pub published: bool,

    /// Explanation when publication was attempted but failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,
}

/// Request payload for scheduling a post.
///
/// # Example
/// ```json
/// {
///   "text": "Deal! https://amazon.in/dp/B08N5WRWNW",
///   "user_id": "42",
///   "target_time": "2030-01-01T09:00:00Z"
/// }
/// ```
#[derive(Deserialize)]
pub struct ScheduleRequest {
    pub text: String,
    pub user_id: String,
    pub target_time: DateTime<Utc>,
}

/// Query parameters for listing a user's pending posts.
#[derive(Deserialize)]
pub struct ListParams {
    pub user_id: String,
}

/// Query parameters for cancelling a post.
#[derive(Deserialize)]
pub struct CancelParams {
    pub user_id: String,
}
