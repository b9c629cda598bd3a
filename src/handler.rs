//! HTTP request handlers for the affiliate link API
//!
//! Implements the core surface:
//! - Immediate rewrite (and optional channel publication)
//! - Scheduling a deferred post
//! - Listing a user's pending posts
//! - Cancelling a pending post
//! - The status snapshot for health checks

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::error;

use crate::database::AppState;
use crate::delivery::{send_with_retry, RetryPolicy};
use crate::error::ApiError;
use crate::model::{
    CancelParams, ListParams, RewriteRequest, RewriteResponse, ScheduleRequest,
};
use crate::rewriter;
use crate::scheduler::render_body;

/// Immediate path: rewrites every recognized link in the submitted text.
///
/// When a target channel is configured and at least one link actually
/// converted, the rendered message is also published through the shared
/// retry primitive. Publication failure is reported in the response
/// rather than failing the request; the rewrite result is still useful.
///
/// # Response
///
/// - **200 OK** - rewritten text, conversion count, link pairs
/// - **422 Unprocessable Entity** - no recognizable product links
pub async fn rewrite_message(
    State(state): State<AppState>,
    Json(payload): Json<RewriteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.metrics.record_message();

    let outcome = rewriter::rewrite_all(
        &payload.text,
        &state.config.affiliate_tag,
        &state.config.search_domain,
        &*state.resolver,
    )
    .await;

    if outcome.links.is_empty() {
        return Err(crate::error::ScheduleError::NoLinksFound.into());
    }
    state.metrics.record_conversions(outcome.conversions as u64);

    let mut published = false;
    let mut delivery_error = None;
    if outcome.conversions > 0 {
        if let Some(channel) = state.config.target_channel.as_deref() {
            let body = render_body(&outcome.links, &state.config.affiliate_tag);
            match send_with_retry(&*state.sink, channel, &body, &RetryPolicy::default()).await
            {
                Ok(()) => {
                    published = true;
                    state.metrics.record_delivered();
                }
                Err(err) => {
                    error!(
                        channel,
                        user_id = %payload.user_id,
                        error = %err,
                        "immediate publication failed"
                    );
                    state.metrics.record_delivery_failure();
                    delivery_error = Some(err.to_string());
                }
            }
        }
    }

    Ok(Json(RewriteResponse {
        text: outcome.text,
        conversions: outcome.conversions,
        links: outcome.links,
        published,
        delivery_error,
    }))
}

/// Schedules a post for future publication.
///
/// # Response
///
/// - **201 Created** - the persisted pending record
/// - **422 Unprocessable Entity** - past target time, or no links
pub async fn schedule_post(
    State(state): State<AppState>,
    Json(payload): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.metrics.record_message();

    let post = state
        .scheduler
        .schedule(&payload.user_id, payload.target_time, &payload.text)
        .await?;

    Ok((StatusCode::CREATED, Json(post)))
}

/// Lists the requesting user's pending posts, ascending by target time.
pub async fn list_posts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let posts = state.scheduler.list_pending(&params.user_id)?;

    Ok(Json(json!({
        "count": posts.len(),
        "data": posts
    })))
}

/// Cancels a pending post owned by the requesting user.
///
/// # Response
///
/// - **200 OK** - post cancelled
/// - **404 Not Found** - missing, not owned by the requester, or already
///   resolved (deliberately indistinguishable)
pub async fn cancel_post(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Query(params): Query<CancelParams>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.cancel(&params.user_id, id)?;

    Ok(Json(json!({
        "message": "Scheduled post cancelled",
        "cancelled_id": id
    })))
}

/// Read-only status snapshot for external health checks.
pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let pending = state.scheduler.pending_count()?;

    Ok(Json(json!({
        "service": "afflink",
        "affiliate_tag": state.config.affiliate_tag,
        "metrics": state.metrics.snapshot(),
        "pending_posts": pending
    })))
}
