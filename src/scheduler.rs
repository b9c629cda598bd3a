//! Scheduling operations and the dispatcher
//!
//! `schedule` validates, rewrites, persists, and arms a timer task for a
//! post. Timers are in-memory only, so `recover` re-arms one for every
//! pending record at startup; posts whose target time already passed fire
//! immediately. Delivery happens with no store lock held; the record's
//! state transition is the only thing that goes through the store's
//! conditional update.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::delivery::{send_with_retry, DeliverySink, RetryPolicy};
use crate::error::ScheduleError;
use crate::metrics::Metrics;
use crate::model::{PostStatus, RewrittenLink, ScheduledPost};
use crate::rewriter::{self, RedirectResolver};
use crate::store::ScheduleStore;

/// Everything a fired timer needs, shared by all dispatch tasks.
struct DispatchCtx {
    store: ScheduleStore,
    sink: Arc<dyn DeliverySink>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    retry: RetryPolicy,
}

#[derive(Clone)]
pub struct Scheduler {
    ctx: Arc<DispatchCtx>,
    resolver: Arc<dyn RedirectResolver>,
}

impl Scheduler {
    pub fn new(
        store: ScheduleStore,
        sink: Arc<dyn DeliverySink>,
        resolver: Arc<dyn RedirectResolver>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Scheduler {
            ctx: Arc::new(DispatchCtx {
                store,
                sink,
                config,
                metrics,
                retry: RetryPolicy::default(),
            }),
            resolver,
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.ctx.store
    }

    pub fn pending_count(&self) -> Result<u64, ScheduleError> {
        Ok(self.ctx.store.pending_count()?)
    }

    /// Validates and persists a deferred publication, then arms its
    /// timer. The record is durable before this returns.
    pub async fn schedule(
        &self,
        user_id: &str,
        target_time: DateTime<Utc>,
        raw_text: &str,
    ) -> Result<ScheduledPost, ScheduleError> {
        if target_time <= Utc::now() {
            return Err(ScheduleError::InvalidTime);
        }

        let outcome = rewriter::rewrite_all(
            raw_text,
            &self.ctx.config.affiliate_tag,
            &self.ctx.config.search_domain,
            &*self.resolver,
        )
        .await;
        if outcome.links.is_empty() {
            return Err(ScheduleError::NoLinksFound);
        }

        let body = render_body(&outcome.links, &self.ctx.config.affiliate_tag);
        let (original_links, affiliate_links): (Vec<_>, Vec<_>) = outcome
            .links
            .iter()
            .map(|link| (link.original.clone(), link.affiliate.clone()))
            .unzip();

        let post = self.ctx.store.insert(
            user_id,
            original_links,
            affiliate_links,
            target_time,
            body,
        )?;
        self.ctx.metrics.record_conversions(outcome.conversions as u64);
        info!(
            post_id = post.id,
            user_id,
            target_time = %post.target_time,
            "scheduled post"
        );

        self.arm(&post);
        Ok(post)
    }

    /// A user's still-pending posts, ascending by target time.
    pub fn list_pending(&self, user_id: &str) -> Result<Vec<ScheduledPost>, ScheduleError> {
        Ok(self.ctx.store.list_pending(user_id)?)
    }

    /// Cancels a pending post. `NotFound` covers a missing record, a
    /// record owned by someone else, and a record already resolved; the
    /// caller cannot tell these apart.
    pub fn cancel(&self, user_id: &str, post_id: u64) -> Result<(), ScheduleError> {
        match self.ctx.store.get(post_id)? {
            Some(post) if post.user_id == user_id && post.status == PostStatus::Pending => {
                if self.ctx.store.transition(post_id, PostStatus::Cancelled)? {
                    info!(post_id, user_id, "cancelled scheduled post");
                    Ok(())
                } else {
                    // Dispatch committed its transition first.
                    Err(ScheduleError::NotFound)
                }
            }
            _ => Err(ScheduleError::NotFound),
        }
    }

    /// Startup recovery sweep: re-arms a timer for every pending record,
    /// firing immediately when the target time already passed. Without
    /// this, posts scheduled before a restart would silently vanish.
    pub fn recover(&self) -> Result<usize, ScheduleError> {
        let pending = self.ctx.store.all_pending()?;
        let count = pending.len();
        for post in pending {
            self.arm(&post);
        }
        if count > 0 {
            info!(count, "re-armed timers for pending posts");
        }
        Ok(count)
    }

    fn arm(&self, post: &ScheduledPost) {
        let ctx = Arc::clone(&self.ctx);
        let id = post.id;
        let target_time = post.target_time;
        tokio::spawn(async move {
            let delay = (target_time - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
            dispatch(&ctx, id).await;
        });
    }
}

/// Renders the message body for a set of rewritten links: one line per
/// affiliate link plus an attribution footer. Deterministic, fixed at
/// scheduling time.
pub fn render_body(links: &[RewrittenLink], affiliate_tag: &str) -> String {
    let mut body = String::from("Deal alert!\n");
    for link in links {
        body.push('\n');
        body.push_str(&link.affiliate);
    }
    body.push_str(&format!("\n\nshared via {affiliate_tag}"));
    body
}

/// Fired at or after a post's target time. Attempts delivery once per
/// wake-up; success moves the record to `sent`, a delivery error after
/// the retry policy is exhausted moves it to `failed`. No lock is held
/// across the network call.
async fn dispatch(ctx: &DispatchCtx, id: u64) {
    let post = match ctx.store.get(id) {
        Ok(Some(post)) => post,
        Ok(None) => {
            warn!(post_id = id, "timer fired for unknown post");
            return;
        }
        Err(err) => {
            error!(post_id = id, error = %err, "could not load post for dispatch");
            return;
        }
    };

    // Honors a cancel that landed while we slept.
    if post.status != PostStatus::Pending {
        debug!(post_id = id, status = ?post.status, "skipping resolved post");
        return;
    }

    let Some(destination) = ctx.config.target_channel.as_deref() else {
        warn!(post_id = id, "no target channel configured, marking post failed");
        finish(ctx, id, PostStatus::Failed).await;
        return;
    };

    match send_with_retry(&*ctx.sink, destination, &post.body, &ctx.retry).await {
        Ok(()) => {
            if finish(ctx, id, PostStatus::Sent).await {
                ctx.metrics.record_delivered();
                info!(post_id = id, destination, "delivered scheduled post");
            }
        }
        Err(err) => {
            error!(
                post_id = id,
                destination,
                target_time = %post.target_time,
                error = %err,
                "delivery failed, marking post failed"
            );
            ctx.metrics.record_delivery_failure();
            finish(ctx, id, PostStatus::Failed).await;
        }
    }
}

/// Commits a terminal status through the conditional update. Returns
/// whether this side won the transition.
async fn finish(ctx: &DispatchCtx, id: u64, to: PostStatus) -> bool {
    match ctx.store.transition(id, to) {
        Ok(true) => true,
        Ok(false) => {
            // A racing cancel committed first.
            warn!(post_id = id, "post was resolved concurrently, leaving status as-is");
            false
        }
        Err(err) => {
            error!(post_id = id, error = %err, "could not record dispatch outcome");
            false
        }
    }
}
