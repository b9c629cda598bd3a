//! Tests for the schedule store and dispatcher
//!
//! The key case here is restart recovery: a pending post persisted before
//! a process restart must still be delivered exactly once after the
//! recovery sweep re-arms its timer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tempfile::NamedTempFile;

use afflink::config::Config;
use afflink::database::init_db;
use afflink::delivery::DeliverySink;
use afflink::error::{DeliveryError, ScheduleError};
use afflink::metrics::Metrics;
use afflink::model::PostStatus;
use afflink::rewriter::RedirectResolver;
use afflink::scheduler::Scheduler;
use afflink::store::ScheduleStore;

/// Sink that records every delivery in memory.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn send(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

/// Sink that always rejects, like an unreachable destination.
struct FailingSink;

#[async_trait]
impl DeliverySink for FailingSink {
    async fn send(&self, _destination: &str, _text: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Rejected(503))
    }
}

struct PassthroughResolver;

#[async_trait]
impl RedirectResolver for PassthroughResolver {
    async fn resolve(&self, url: &str) -> String {
        url.to_string()
    }
}

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        affiliate_tag: "mytag-21".to_string(),
        search_domain: "amazon.in".to_string(),
        target_channel: Some("channel-1".to_string()),
        bot_credential: None,
        port: 0,
        database_path: String::new(),
    })
}

fn build_scheduler(db_path: &str, sink: Arc<dyn DeliverySink>) -> Scheduler {
    let db = init_db(db_path).expect("Failed to initialize test database");
    Scheduler::new(
        ScheduleStore::new(Arc::new(db)),
        sink,
        Arc::new(PassthroughResolver),
        test_config(),
        Arc::new(Metrics::default()),
    )
}

const TWO_LINKS: &str =
    "https://amazon.in/dp/B08N5WRWNW and https://amazon.in/dp/B07XJ8C8F5 today";

#[tokio::test]
async fn schedule_rejects_past_time() {
    let temp_db = NamedTempFile::new().unwrap();
    let scheduler = build_scheduler(
        temp_db.path().to_str().unwrap(),
        Arc::new(RecordingSink::default()),
    );

    let result = scheduler
        .schedule("42", Utc::now() - ChronoDuration::hours(1), TWO_LINKS)
        .await;

    assert!(matches!(result, Err(ScheduleError::InvalidTime)));
}

#[tokio::test]
async fn schedule_rejects_link_free_text() {
    let temp_db = NamedTempFile::new().unwrap();
    let scheduler = build_scheduler(
        temp_db.path().to_str().unwrap(),
        Arc::new(RecordingSink::default()),
    );

    let result = scheduler
        .schedule("42", Utc::now() + ChronoDuration::hours(1), "no links here")
        .await;

    assert!(matches!(result, Err(ScheduleError::NoLinksFound)));
}

#[tokio::test]
async fn schedule_list_cancel_flow() {
    let temp_db = NamedTempFile::new().unwrap();
    let scheduler = build_scheduler(
        temp_db.path().to_str().unwrap(),
        Arc::new(RecordingSink::default()),
    );

    let post = scheduler
        .schedule("42", Utc::now() + ChronoDuration::hours(1), TWO_LINKS)
        .await
        .unwrap();

    assert_eq!(post.status, PostStatus::Pending);
    assert_eq!(post.affiliate_links.len(), 2);
    assert!(post
        .affiliate_links
        .iter()
        .all(|link| link.contains("tag=mytag-21")));
    assert!(post.body.contains(&post.affiliate_links[0]));

    let pending = scheduler.list_pending("42").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, post.id);

    // A different user cannot cancel it, and the status is untouched.
    let denied = scheduler.cancel("7", post.id);
    assert!(matches!(denied, Err(ScheduleError::NotFound)));
    let unchanged = scheduler.store().get(post.id).unwrap().unwrap();
    assert_eq!(unchanged.status, PostStatus::Pending);

    scheduler.cancel("42", post.id).unwrap();
    assert!(scheduler.list_pending("42").unwrap().is_empty());
    let cancelled = scheduler.store().get(post.id).unwrap().unwrap();
    assert_eq!(cancelled.status, PostStatus::Cancelled);

    // Cancelling twice reports not-found: the record is no longer pending.
    assert!(matches!(
        scheduler.cancel("42", post.id),
        Err(ScheduleError::NotFound)
    ));
}

#[tokio::test]
async fn list_is_owner_scoped_and_time_ordered() {
    let temp_db = NamedTempFile::new().unwrap();
    let scheduler = build_scheduler(
        temp_db.path().to_str().unwrap(),
        Arc::new(RecordingSink::default()),
    );

    let later = scheduler
        .schedule("42", Utc::now() + ChronoDuration::hours(2), TWO_LINKS)
        .await
        .unwrap();
    let sooner = scheduler
        .schedule("42", Utc::now() + ChronoDuration::hours(1), TWO_LINKS)
        .await
        .unwrap();
    scheduler
        .schedule("7", Utc::now() + ChronoDuration::hours(1), TWO_LINKS)
        .await
        .unwrap();

    let pending = scheduler.list_pending("42").unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, sooner.id);
    assert_eq!(pending[1].id, later.id);
}

#[tokio::test]
async fn due_post_is_delivered_and_marked_sent() {
    let temp_db = NamedTempFile::new().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let scheduler = build_scheduler(temp_db.path().to_str().unwrap(), sink.clone());

    let post = scheduler
        .schedule("42", Utc::now() + ChronoDuration::milliseconds(100), TWO_LINKS)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "channel-1");
    assert!(sent[0].1.contains("tag=mytag-21"));
    drop(sent);

    let record = scheduler.store().get(post.id).unwrap().unwrap();
    assert_eq!(record.status, PostStatus::Sent);
}

#[tokio::test]
async fn cancelled_post_is_never_delivered() {
    let temp_db = NamedTempFile::new().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let scheduler = build_scheduler(temp_db.path().to_str().unwrap(), sink.clone());

    let post = scheduler
        .schedule("42", Utc::now() + ChronoDuration::milliseconds(200), TWO_LINKS)
        .await
        .unwrap();
    scheduler.cancel("42", post.id).unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(sink.sent.lock().unwrap().is_empty());
    let record = scheduler.store().get(post.id).unwrap().unwrap();
    assert_eq!(record.status, PostStatus::Cancelled);
}

#[tokio::test]
async fn delivery_failure_marks_post_failed() {
    let temp_db = NamedTempFile::new().unwrap();
    let scheduler =
        build_scheduler(temp_db.path().to_str().unwrap(), Arc::new(FailingSink));

    let post = scheduler
        .schedule("42", Utc::now() + ChronoDuration::milliseconds(100), TWO_LINKS)
        .await
        .unwrap();

    // The retry policy backs off twice (500ms, 1s) before giving up.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let record = scheduler.store().get(post.id).unwrap().unwrap();
    assert_eq!(record.status, PostStatus::Failed);
}

#[tokio::test]
async fn pending_post_survives_restart_and_delivers_exactly_once() {
    let temp_db = NamedTempFile::new().unwrap();
    let db_path = temp_db.path().to_str().unwrap().to_string();

    // First process: the post is persisted but its in-memory timer dies
    // with the process (no scheduler running at all here).
    {
        let db = init_db(&db_path).unwrap();
        let store = ScheduleStore::new(Arc::new(db));
        store
            .insert(
                "42",
                vec!["https://amazon.in/dp/B08N5WRWNW".to_string()],
                vec!["https://amazon.in/dp/B08N5WRWNW?tag=mytag-21".to_string()],
                Utc::now() + ChronoDuration::milliseconds(150),
                "Deal alert!\n\nhttps://amazon.in/dp/B08N5WRWNW?tag=mytag-21\n\nshared via mytag-21"
                    .to_string(),
            )
            .unwrap();
    }

    // Second process: recovery sweep re-arms the timer.
    let sink = Arc::new(RecordingSink::default());
    let scheduler = build_scheduler(&db_path, sink.clone());
    assert_eq!(scheduler.recover().unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(sink.sent.lock().unwrap().len(), 1);
    let record = scheduler.store().get(1).unwrap().unwrap();
    assert_eq!(record.status, PostStatus::Sent);

    // A further sweep finds nothing pending and nothing is re-delivered.
    assert_eq!(scheduler.recover().unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn overdue_post_is_delivered_immediately_on_recovery() {
    let temp_db = NamedTempFile::new().unwrap();
    let db_path = temp_db.path().to_str().unwrap().to_string();

    {
        let db = init_db(&db_path).unwrap();
        let store = ScheduleStore::new(Arc::new(db));
        // Target time already two hours in the past, as after a long outage.
        store
            .insert(
                "42",
                vec!["https://amazon.in/dp/B08N5WRWNW".to_string()],
                vec!["https://amazon.in/dp/B08N5WRWNW?tag=mytag-21".to_string()],
                Utc::now() - ChronoDuration::hours(2),
                "overdue body".to_string(),
            )
            .unwrap();
    }

    let sink = Arc::new(RecordingSink::default());
    let scheduler = build_scheduler(&db_path, sink.clone());
    assert_eq!(scheduler.recover().unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(sink.sent.lock().unwrap().len(), 1);
    assert_eq!(
        scheduler.store().get(1).unwrap().unwrap().status,
        PostStatus::Sent
    );
}

#[test]
fn transition_commits_only_from_pending() {
    let temp_db = NamedTempFile::new().unwrap();
    let db = init_db(temp_db.path().to_str().unwrap()).unwrap();
    let store = ScheduleStore::new(Arc::new(db));

    let post = store
        .insert(
            "42",
            vec!["orig".to_string()],
            vec!["aff".to_string()],
            Utc::now() + ChronoDuration::hours(1),
            "body".to_string(),
        )
        .unwrap();

    // Exactly one of two racing transitions can commit.
    assert!(store.transition(post.id, PostStatus::Cancelled).unwrap());
    assert!(!store.transition(post.id, PostStatus::Sent).unwrap());
    assert_eq!(
        store.get(post.id).unwrap().unwrap().status,
        PostStatus::Cancelled
    );

    // Unknown records never transition.
    assert!(!store.transition(9999, PostStatus::Sent).unwrap());
}
