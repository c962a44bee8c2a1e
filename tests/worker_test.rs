//! Integration tests for the consumer loop against the in-memory queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use imagegram::envelope::{Envelope, encode};
use imagegram::error::ProcessingError;
use imagegram::model::{COMMENT_TABLE, CreateCommentPayload};
use imagegram::processor::{CreateCommentEffect, Disposition, DomainEffect, MessageProcessor};
use imagegram::queue::{CREATE_COMMENT_QUEUE, InMemoryQueue, QueueTransport};
use imagegram::retry::{EXPIRATION_PROPERTY, RetryConfig, RetryCoordinator, to_ticks};
use imagegram::storage::InMemoryTableStore;
use imagegram::worker::{Processed, Worker, WorkerConfig};
use tokio::sync::Notify;

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        visibility_timeout: 30,
        poll_interval: Duration::from_millis(10),
    }
}

fn comment_worker(
    table: &Arc<InMemoryTableStore>,
    queue: &Arc<InMemoryQueue>,
) -> Worker<CreateCommentEffect<Arc<InMemoryTableStore>>, Arc<InMemoryQueue>> {
    Worker::new(
        MessageProcessor::new(
            CreateCommentEffect::new(Arc::clone(table)),
            Arc::clone(queue),
            RetryCoordinator::new(RetryConfig::default()),
            Duration::from_secs(5),
        ),
        worker_config(),
    )
}

async fn enqueue_comment(queue: &InMemoryQueue, post_id: &str, text: &str) {
    let envelope = encode(&CreateCommentPayload {
        post_id: post_id.to_string(),
        comments: text.to_string(),
    })
    .unwrap();
    queue.enqueue(envelope).await.unwrap();
}

/// Effect that signals when it starts, then never finishes.
struct BlockingEffect {
    started: Arc<Notify>,
}

#[async_trait]
impl DomainEffect for BlockingEffect {
    type Payload = CreateCommentPayload;

    fn name(&self) -> &'static str {
        "blocking"
    }

    async fn apply(&self, _payload: CreateCommentPayload) -> Result<(), ProcessingError> {
        self.started.notify_one();
        std::future::pending::<()>().await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// process_next
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_queue_reports_empty() {
    let table = Arc::new(InMemoryTableStore::new());
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    let worker = comment_worker(&table, &queue);

    assert!(matches!(worker.process_next().await.unwrap(), Processed::Empty));
}

#[tokio::test]
async fn success_is_acknowledged() {
    let table = Arc::new(InMemoryTableStore::new());
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    let worker = comment_worker(&table, &queue);
    enqueue_comment(&queue, "p1", "great").await;

    let processed = worker.process_next().await.unwrap();

    assert!(matches!(processed, Processed::Handled(Disposition::Succeeded)));
    assert_eq!(queue.acked_count(), 1);
    assert_eq!(queue.in_flight_count(), 0);
    assert_eq!(table.rows(COMMENT_TABLE).len(), 1);
}

#[tokio::test]
async fn retry_acknowledges_original_and_queues_renewed_copy() {
    let table = Arc::new(InMemoryTableStore::new());
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    let worker = comment_worker(&table, &queue);
    enqueue_comment(&queue, "", "no post").await;

    let processed = worker.process_next().await.unwrap();

    assert!(matches!(
        processed,
        Processed::Handled(Disposition::Retrying { .. })
    ));
    assert_eq!(queue.acked_count(), 1);
    assert_eq!(queue.in_flight_count(), 0);

    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].property(EXPIRATION_PROPERTY).is_some());

    // Scheduled 30s out, so not yet visible.
    assert!(matches!(worker.process_next().await.unwrap(), Processed::Empty));
}

#[tokio::test]
async fn failed_dead_letter_acknowledges_expired_message_as_lost() {
    let table = Arc::new(InMemoryTableStore::new());
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    queue.set_fail_dead_letter(true);
    let worker = Worker::new(
        MessageProcessor::new(
            CreateCommentEffect::new(Arc::clone(&table)),
            Arc::clone(&queue),
            RetryCoordinator::new(RetryConfig::default()),
            Duration::from_secs(5),
        ),
        WorkerConfig {
            visibility_timeout: 0,
            poll_interval: Duration::from_millis(10),
        },
    );

    // Decodes, then fails the effect: no post id.
    let mut envelope = Envelope::with_body(br#"{"postId":"","comments":"x"}"#.to_vec());
    envelope.set_property(
        EXPIRATION_PROPERTY,
        to_ticks(Utc::now() - TimeDelta::seconds(5)),
    );
    queue.enqueue(envelope).await.unwrap();

    let processed = worker.process_next().await.unwrap();
    assert!(matches!(
        processed,
        Processed::Handled(Disposition::DeadLetterFailed { .. })
    ));
    assert_eq!(queue.acked_count(), 1);
    assert_eq!(queue.in_flight_count(), 0);

    // With a zero visibility timeout an unacknowledged delivery would be
    // visible again immediately.
    for _ in 0..4 {
        assert!(matches!(worker.process_next().await.unwrap(), Processed::Empty));
    }
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test]
async fn failed_retry_enqueue_leaves_delivery_in_flight() {
    let table = Arc::new(InMemoryTableStore::new());
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    enqueue_comment(&queue, "", "no post").await;
    queue.set_fail_enqueue(true);
    let worker = comment_worker(&table, &queue);

    let processed = worker.process_next().await.unwrap();

    assert!(matches!(
        processed,
        Processed::Handled(Disposition::RetryEnqueueFailed { .. })
    ));
    assert_eq!(queue.acked_count(), 0);
    assert_eq!(queue.in_flight_count(), 1);
}

#[tokio::test]
async fn unacknowledged_delivery_returns_after_visibility_timeout() {
    let table = Arc::new(InMemoryTableStore::new());
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    enqueue_comment(&queue, "p1", "hello").await;

    let now = Utc::now();
    let first = queue.receive_at(30, now).unwrap().expect("first delivery");
    assert!(queue.receive_at(30, now).unwrap().is_none());

    let again = queue
        .receive_at(30, now + TimeDelta::seconds(31))
        .unwrap()
        .expect("redelivery");
    assert_eq!(again.id, first.id);
    assert_eq!(again.read_count, 2);

    queue.ack(&again).await.unwrap();
    assert!(queue.ack(&first).await.is_err());
    assert!(table.rows(COMMENT_TABLE).is_empty());
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_before_receive_takes_nothing() {
    let table = Arc::new(InMemoryTableStore::new());
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    let worker = comment_worker(&table, &queue);
    enqueue_comment(&queue, "p1", "hello").await;

    worker.shutdown();

    assert!(matches!(
        worker.process_next().await.unwrap(),
        Processed::Interrupted
    ));
    assert_eq!(queue.pending().len(), 1);
    assert_eq!(queue.in_flight_count(), 0);
}

#[tokio::test]
async fn shutdown_mid_delivery_leaves_it_unacknowledged() {
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    let started = Arc::new(Notify::new());
    let worker = Worker::new(
        MessageProcessor::new(
            BlockingEffect {
                started: Arc::clone(&started),
            },
            Arc::clone(&queue),
            RetryCoordinator::new(RetryConfig::default()),
            Duration::from_secs(600),
        ),
        worker_config(),
    );
    enqueue_comment(&queue, "p1", "hello").await;

    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.process_next().await })
    };
    started.notified().await;
    worker.shutdown();

    let processed = handle.await.unwrap().unwrap();

    assert!(matches!(processed, Processed::Interrupted));
    assert_eq!(queue.acked_count(), 0);
    assert_eq!(queue.in_flight_count(), 1);
    assert!(queue.pending().is_empty());
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_drains_queue_until_shutdown() {
    let table = Arc::new(InMemoryTableStore::new());
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    let worker = comment_worker(&table, &queue);
    for i in 0..3 {
        enqueue_comment(&queue, "p1", &format!("comment {i}")).await;
    }

    let running = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.acked_count() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker should drain the queue");

    worker.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("worker should stop")
        .unwrap();

    assert!(worker.is_shutdown());
    assert_eq!(table.rows(COMMENT_TABLE).len(), 3);
}

#[tokio::test]
async fn clones_share_the_shutdown_signal() {
    let table = Arc::new(InMemoryTableStore::new());
    let queue = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    let worker = comment_worker(&table, &queue);

    let clones: Vec<_> = (0..3)
        .map(|_| {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run().await })
        })
        .collect();

    worker.shutdown();
    for handle in clones {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("clone should stop")
            .unwrap();
    }
}
