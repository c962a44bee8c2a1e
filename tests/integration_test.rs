//! End-to-end flow over in-memory collaborators: ingest → queue → worker → stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use imagegram::error::{Error, Result};
use imagegram::ingest::{CreateCommentRequest, CreatePostRequest, Ingest, IngestResponse};
use imagegram::model::{COMMENT_TABLE, ImageFile, POST_TABLE};
use imagegram::processor::{CreateCommentEffect, CreatePostEffect, Disposition, MessageProcessor};
use imagegram::queue::{CREATE_COMMENT_QUEUE, CREATE_POST_QUEUE, InMemoryQueue};
use imagegram::retry::{RetryConfig, RetryCoordinator};
use imagegram::storage::{BlobStore, InMemoryBlobStore, InMemoryTableStore};
use imagegram::worker::{Processed, Worker, WorkerConfig};

const CONTAINER: &str = "posted-images";

/// Blob store that fails the first `failures` uploads.
struct FlakyBlobs {
    inner: InMemoryBlobStore,
    failures: AtomicUsize,
}

#[async_trait]
impl BlobStore for FlakyBlobs {
    async fn upload(&self, container: &str, content: &[u8], name: &str) -> Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(Error::Storage("blob service unavailable".to_string()));
        }
        self.inner.upload(container, content, name).await
    }
}

struct Pipeline {
    ingest: Ingest<Arc<InMemoryQueue>, Arc<InMemoryQueue>>,
    posts: Arc<InMemoryQueue>,
    blobs: Arc<FlakyBlobs>,
    table: Arc<InMemoryTableStore>,
    post_worker: Worker<CreatePostEffect<Arc<FlakyBlobs>, Arc<InMemoryTableStore>>, Arc<InMemoryQueue>>,
    comment_worker: Worker<CreateCommentEffect<Arc<InMemoryTableStore>>, Arc<InMemoryQueue>>,
}

fn pipeline(retry: RetryConfig, blob_failures: usize) -> Pipeline {
    let posts = Arc::new(InMemoryQueue::new(CREATE_POST_QUEUE));
    let comments = Arc::new(InMemoryQueue::new(CREATE_COMMENT_QUEUE));
    let blobs = Arc::new(FlakyBlobs {
        inner: InMemoryBlobStore::new(),
        failures: AtomicUsize::new(blob_failures),
    });
    let table = Arc::new(InMemoryTableStore::new());
    let coordinator = RetryCoordinator::new(retry);
    let config = WorkerConfig {
        visibility_timeout: 30,
        poll_interval: Duration::from_millis(10),
    };

    let post_worker = Worker::new(
        MessageProcessor::new(
            CreatePostEffect::new(Arc::clone(&blobs), Arc::clone(&table), CONTAINER),
            Arc::clone(&posts),
            coordinator,
            Duration::from_secs(5),
        ),
        config.clone(),
    );
    let comment_worker = Worker::new(
        MessageProcessor::new(
            CreateCommentEffect::new(Arc::clone(&table)),
            Arc::clone(&comments),
            coordinator,
            Duration::from_secs(5),
        ),
        config,
    );

    Pipeline {
        ingest: Ingest::new(Arc::clone(&posts), comments),
        posts,
        blobs,
        table,
        post_worker,
        comment_worker,
    }
}

fn photo() -> CreatePostRequest {
    CreatePostRequest {
        image_caption: "first light".to_string(),
        image_file: Some(ImageFile {
            file_name: "dawn.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            content: vec![0xFF, 0xD8, 0xFF],
        }),
    }
}

fn created_id(response: IngestResponse) -> String {
    match response {
        IngestResponse::Created { id } => id,
        IngestResponse::BadRequest(msg) => panic!("expected Created, got BadRequest({msg})"),
    }
}

async fn next_disposition<E, Q>(worker: &Worker<E, Q>) -> Disposition
where
    E: imagegram::processor::DomainEffect,
    Q: imagegram::queue::QueueTransport,
{
    match worker.process_next().await.unwrap() {
        Processed::Handled(disposition) => disposition,
        other => panic!("expected a handled delivery, got {other:?}"),
    }
}

#[tokio::test]
async fn post_and_comment_are_persisted() {
    let p = pipeline(RetryConfig::default(), 0);

    let post_id = created_id(p.ingest.submit_post(photo()).await);
    let comment = p
        .ingest
        .submit_comment(CreateCommentRequest {
            post_id: post_id.clone(),
            comments: "lovely".to_string(),
        })
        .await;
    assert!(comment.is_created());

    assert!(matches!(
        next_disposition(&p.post_worker).await,
        Disposition::Succeeded
    ));
    assert!(matches!(
        next_disposition(&p.comment_worker).await,
        Disposition::Succeeded
    ));

    let blob_name = format!("{post_id}.jpg");
    assert_eq!(
        p.blobs.inner.get(CONTAINER, &blob_name),
        Some(vec![0xFF, 0xD8, 0xFF])
    );
    assert!(p.table.get(POST_TABLE, &blob_name, &post_id).is_some());
    let comments = p.table.rows(COMMENT_TABLE);
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].partition_key, post_id);
}

#[tokio::test]
async fn transient_failure_recovers_on_redelivery() {
    // No delay between attempts so the retry is visible at once.
    let p = pipeline(RetryConfig::from_secs(0, 300), 1);
    let post_id = created_id(p.ingest.submit_post(photo()).await);

    assert!(matches!(
        next_disposition(&p.post_worker).await,
        Disposition::Retrying { .. }
    ));
    assert!(matches!(
        next_disposition(&p.post_worker).await,
        Disposition::Succeeded
    ));

    assert_eq!(
        p.blobs.inner.names(CONTAINER),
        vec![format!("{post_id}.jpg")]
    );
    assert!(p.posts.dead_letters().is_empty());
    assert_eq!(p.posts.acked_count(), 2);
}

#[tokio::test]
async fn persistent_failure_ends_in_dead_letter_queue() {
    // Deadline equals the first failure time, so the second failure is past it.
    let p = pipeline(RetryConfig::from_secs(0, 0), usize::MAX);
    p.ingest.submit_post(photo()).await;
    let original = p.posts.pending().remove(0);

    assert!(matches!(
        next_disposition(&p.post_worker).await,
        Disposition::Retrying { .. }
    ));
    assert!(matches!(
        next_disposition(&p.post_worker).await,
        Disposition::DeadLettered { .. }
    ));

    let dead = p.posts.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].body, original.body);
    assert!(p.posts.pending().is_empty());
    assert!(matches!(
        p.post_worker.process_next().await.unwrap(),
        Processed::Empty
    ));
    assert!(p.table.rows(POST_TABLE).is_empty());
}
