//! Producer boundary: typed create requests in, queued envelopes out.
//!
//! Requests are parsed into these structs once, at the edge. The response
//! carries only the status the caller maps onto its transport: 201 when the
//! message is queued, 400 with the error text otherwise.

use opentelemetry::KeyValue;
use tracing::{info, warn};
use uuid::Uuid;

use crate::envelope::encode;
use crate::model::{CreateCommentPayload, CreatePostPayload, ImageFile};
use crate::queue::QueueTransport;
use crate::storage::is_image;
use crate::telemetry::metrics;

#[derive(Debug, Clone, Default)]
pub struct CreatePostRequest {
    pub image_caption: String,
    pub image_file: Option<ImageFile>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateCommentRequest {
    pub post_id: String,
    pub comments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestResponse {
    /// Queued. `id` is the post id, or the post the comment belongs to.
    Created { id: String },
    BadRequest(String),
}

impl IngestResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            IngestResponse::Created { .. } => 201,
            IngestResponse::BadRequest(_) => 400,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, IngestResponse::Created { .. })
    }
}

impl std::fmt::Display for IngestResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestResponse::Created { id } => write!(f, "201 Created: {id}"),
            IngestResponse::BadRequest(msg) => write!(f, "400 Bad Request: {msg}"),
        }
    }
}

/// Enqueues create-post and create-comment work.
pub struct Ingest<P, C> {
    posts: P,
    comments: C,
}

impl<P, C> Ingest<P, C>
where
    P: QueueTransport,
    C: QueueTransport,
{
    pub fn new(posts: P, comments: C) -> Self {
        Self { posts, comments }
    }

    pub async fn submit_post(&self, request: CreatePostRequest) -> IngestResponse {
        let Some(image_file) = request.image_file else {
            return rejected("create_post", "an image file is required".to_string());
        };
        if !is_image(&image_file.file_name, &image_file.content_type) {
            return rejected(
                "create_post",
                format!("{} is not an image", image_file.file_name),
            );
        }

        let payload = CreatePostPayload {
            id: Uuid::new_v4().simple().to_string(),
            image_caption: request.image_caption,
            image_file,
        };
        submit(&self.posts, "create_post", &payload, payload.id.clone()).await
    }

    pub async fn submit_comment(&self, request: CreateCommentRequest) -> IngestResponse {
        if request.post_id.trim().is_empty() {
            return rejected("create_comment", "post id is required".to_string());
        }

        let payload = CreateCommentPayload {
            post_id: request.post_id,
            comments: request.comments,
        };
        submit(&self.comments, "create_comment", &payload, payload.post_id.clone()).await
    }
}

async fn submit<Q, T>(queue: &Q, operation: &'static str, payload: &T, id: String) -> IngestResponse
where
    Q: QueueTransport,
    T: serde::Serialize,
{
    let envelope = match encode(payload) {
        Ok(envelope) => envelope,
        Err(e) => return rejected(operation, e.to_string()),
    };

    match queue.enqueue(envelope).await {
        Ok(msg_id) => {
            info!(operation, queue = queue.name(), msg_id, %id, "message queued");
            metrics::messages_submitted().add(
                1,
                &[
                    KeyValue::new("operation", operation),
                    KeyValue::new("result", "created"),
                ],
            );
            IngestResponse::Created { id }
        }
        Err(e) => rejected(operation, e.to_string()),
    }
}

fn rejected(operation: &'static str, message: String) -> IngestResponse {
    warn!(operation, "request rejected: {message}");
    metrics::messages_submitted().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", "bad_request"),
        ],
    );
    IngestResponse::BadRequest(message)
}
