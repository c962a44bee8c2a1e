//! Create-comment effect: upsert one comment row under its post.

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::DomainEffect;
use crate::error::ProcessingError;
use crate::model::{CommentRecord, CreateCommentPayload};
use crate::storage::TableStore;

pub struct CreateCommentEffect<T> {
    table: T,
}

impl<T: TableStore> CreateCommentEffect<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }
}

#[async_trait]
impl<T: TableStore> DomainEffect for CreateCommentEffect<T> {
    type Payload = CreateCommentPayload;

    fn name(&self) -> &'static str {
        "create_comment"
    }

    // The row key is fresh per attempt, so a retry after a successful upsert
    // whose acknowledgement was lost writes a second row.
    async fn apply(&self, payload: CreateCommentPayload) -> Result<(), ProcessingError> {
        if payload.post_id.is_empty() {
            return Err(ProcessingError::decode("create-comment message has no post id"));
        }

        let record = CommentRecord {
            partition_key: payload.post_id,
            row_key: Uuid::new_v4().simple().to_string(),
            comments: payload.comments,
        };
        self.table
            .upsert(&record.to_row())
            .await
            .map_err(ProcessingError::domain_effect)?;
        info!(
            post_id = %record.partition_key,
            comment_id = %record.row_key,
            "comment saved"
        );

        Ok(())
    }
}
