//! End-to-end pipeline tests: queue -> dedup -> rate limit -> dispatch
//! -> record, driven with a manual clock and a scripted channel.

use std::sync::Arc;
use std::time::Duration;

use libchanpost::channel::mock::MockChannel;
use libchanpost::clock::{Clock, ManualClock};
use libchanpost::dispatcher::Dispatcher;
use libchanpost::error::DeliveryError;
use libchanpost::rate_limiter::{Decision, RateLimiter};
use libchanpost::retry::RetryPolicy;
use libchanpost::scheduler::ChannelWorker;
use libchanpost::source::QueueSource;
use libchanpost::store::Database;
use libchanpost::types::{CandidatePost, DeliveryStatus};
use libchanpost::Shutdown;
use tempfile::TempDir;

const T0: i64 = 1_700_000_000;

struct Pipeline {
    _temp: TempDir,
    db: Database,
    channel: Arc<MockChannel>,
    clock: Arc<ManualClock>,
    shutdown: Shutdown,
}

impl Pipeline {
    async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("pipeline.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        Self {
            _temp: temp,
            db,
            channel: Arc::new(MockChannel::new("mock")),
            clock: Arc::new(ManualClock::new(T0)),
            shutdown: Shutdown::new(),
        }
    }

    fn worker(&self, channel_id: &str, limiter: RateLimiter) -> ChannelWorker {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            jitter: Duration::ZERO,
        };
        ChannelWorker::new(
            channel_id.to_string(),
            300,
            self.db.clone(),
            Arc::new(limiter),
            Arc::new(Dispatcher::new(self.channel.clone(), policy)),
            Arc::new(QueueSource::new(self.db.clone(), 10)),
            self.clock.clone(),
            self.shutdown.clone(),
        )
    }
}

fn candidate(text: &str) -> CandidatePost {
    CandidatePost::new(text.to_string(), None)
}

#[tokio::test]
async fn queued_content_is_delivered_and_recorded() {
    let p = Pipeline::new().await;
    p.db.enqueue(&candidate("release notes"), "@news").await.unwrap();

    let mut worker = p.worker("@news", RateLimiter::new(10, 3600, None));
    worker.run_cycle_now().await.unwrap();

    assert_eq!(p.channel.call_count(), 1);

    let records = p.db.recent_records(Some("@news"), 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeliveryStatus::Sent);

    // Delivered candidate is drained from the queue
    assert!(p.db.list_queue(Some("@news")).await.unwrap().is_empty());
}

#[tokio::test]
async fn resubmitted_content_is_suppressed_without_a_send() {
    let p = Pipeline::new().await;
    let post = candidate("breaking story");
    p.db.enqueue(&post, "@news").await.unwrap();

    let mut worker = p.worker("@news", RateLimiter::new(10, 3600, None));
    worker.run_cycle_now().await.unwrap();
    assert_eq!(p.channel.call_count(), 1);

    // Same content comes back from the source later
    p.db.enqueue(&post, "@news").await.unwrap();
    p.clock.advance(300);
    worker.run_cycle_now().await.unwrap();

    // No second send, no second record, queue drained
    assert_eq!(p.channel.call_count(), 1);
    assert_eq!(p.db.recent_records(Some("@news"), 10).await.unwrap().len(), 1);
    assert!(p.db.list_queue(Some("@news")).await.unwrap().is_empty());
}

#[tokio::test]
async fn burst_respects_window_quota() {
    let p = Pipeline::new().await;
    for i in 0..4 {
        p.db.enqueue(&candidate(&format!("burst {i}")), "@news")
            .await
            .unwrap();
    }

    let mut worker = p.worker("@news", RateLimiter::new(3, 60, None));
    worker.run_cycle_now().await.unwrap();

    // Only three sends went through; the fourth candidate is still queued
    assert_eq!(p.channel.call_count(), 3);
    assert_eq!(p.db.list_queue(Some("@news")).await.unwrap().len(), 1);

    // The worker will not wake again before the window turns over
    let resume = worker.schedule().next_due_at;
    assert!(resume > p.clock.now());
    assert!(resume <= p.clock.now() + 60);

    // After the window boundary the leftover candidate drains
    p.clock.set(resume);
    worker.run_cycle_now().await.unwrap();
    assert_eq!(p.channel.call_count(), 4);
    assert!(p.db.list_queue(Some("@news")).await.unwrap().is_empty());
}

#[tokio::test]
async fn rate_limit_denial_reports_time_to_window_end() {
    let p = Pipeline::new().await;
    let limiter = RateLimiter::new(3, 60, None);
    let now = T0 - (T0 % 60) + 1;

    for _ in 0..3 {
        assert_eq!(
            limiter.try_acquire(&p.db, "@news", now).await.unwrap(),
            Decision::Allowed
        );
    }
    match limiter.try_acquire(&p.db, "@news", now).await.unwrap() {
        Decision::Denied { retry_after } => {
            assert_eq!(retry_after, Duration::from_secs(59));
        }
        Decision::Allowed => panic!("quota should be exhausted"),
    }
}

#[tokio::test]
async fn transient_failure_retries_to_a_single_success() {
    let p = Pipeline::new().await;
    p.channel
        .push_outcome(Err(DeliveryError::Network("connection reset".to_string())));
    p.channel.push_outcome(Ok("314".to_string()));
    p.db.enqueue(&candidate("flaky upstream"), "@news").await.unwrap();

    let mut worker = p.worker("@news", RateLimiter::new(10, 3600, None));
    worker.run_cycle_now().await.unwrap();

    assert_eq!(p.channel.call_count(), 2);
    let records = p.db.recent_records(Some("@news"), 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeliveryStatus::Sent);
    assert_eq!(records[0].message_id, Some("314".to_string()));
}

#[tokio::test]
async fn permanent_failure_is_terminal_and_not_retried() {
    let p = Pipeline::new().await;
    p.channel.push_outcome(Err(DeliveryError::ChannelNotFound(
        "chat not found".to_string(),
    )));
    p.db.enqueue(&candidate("doomed"), "@news").await.unwrap();

    let mut worker = p.worker("@news", RateLimiter::new(10, 3600, None));
    worker.run_cycle_now().await.unwrap();

    assert_eq!(p.channel.call_count(), 1);
    let records = p.db.recent_records(Some("@news"), 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeliveryStatus::Failed);
    assert!(records[0].error.as_deref().unwrap().contains("chat not found"));

    // Terminal failure also drains the candidate
    assert!(p.db.list_queue(Some("@news")).await.unwrap().is_empty());
}

#[tokio::test]
async fn channels_post_independently() {
    let p = Pipeline::new().await;
    let post = candidate("shared announcement");
    p.db.enqueue(&post, "@news").await.unwrap();
    p.db.enqueue(&post, "@digest").await.unwrap();

    let limiter = Arc::new(RateLimiter::new(10, 3600, None));
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        multiplier: 1.0,
        jitter: Duration::ZERO,
    };
    let dispatcher = Arc::new(Dispatcher::new(p.channel.clone(), policy));

    for channel_id in ["@news", "@digest"] {
        let mut worker = ChannelWorker::new(
            channel_id.to_string(),
            300,
            p.db.clone(),
            limiter.clone(),
            dispatcher.clone(),
            Arc::new(QueueSource::new(p.db.clone(), 10)),
            p.clock.clone(),
            p.shutdown.clone(),
        );
        worker.run_cycle_now().await.unwrap();
    }

    // Same fingerprint delivered once per channel
    assert_eq!(p.channel.call_count(), 2);
    let news = p.db.recent_records(Some("@news"), 10).await.unwrap();
    let digest = p.db.recent_records(Some("@digest"), 10).await.unwrap();
    assert_eq!(news.len(), 1);
    assert_eq!(digest.len(), 1);
    assert_eq!(news[0].fingerprint, digest[0].fingerprint);
}
