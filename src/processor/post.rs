//! Create-post effect: upload the image, then upsert the post row.

use async_trait::async_trait;
use tracing::info;

use super::DomainEffect;
use crate::error::ProcessingError;
use crate::model::{CreatePostPayload, PostRecord};
use crate::storage::{BlobStore, TableStore};

pub struct CreatePostEffect<B, T> {
    blobs: B,
    table: T,
    container: String,
}

impl<B, T> CreatePostEffect<B, T>
where
    B: BlobStore,
    T: TableStore,
{
    pub fn new(blobs: B, table: T, container: impl Into<String>) -> Self {
        Self {
            blobs,
            table,
            container: container.into(),
        }
    }

    /// Blob name for a post: its id plus the uploaded file's extension.
    ///
    /// Derived from the payload so every attempt of the same message writes
    /// the same blob; a retry after a partial success overwrites instead of
    /// leaving an unreferenced blob behind.
    pub fn blob_name(payload: &CreatePostPayload) -> String {
        format!("{}{}", payload.id, payload.image_file.extension())
    }
}

#[async_trait]
impl<B, T> DomainEffect for CreatePostEffect<B, T>
where
    B: BlobStore,
    T: TableStore,
{
    type Payload = CreatePostPayload;

    fn name(&self) -> &'static str {
        "create_post"
    }

    async fn apply(&self, payload: CreatePostPayload) -> Result<(), ProcessingError> {
        if payload.id.is_empty() {
            return Err(ProcessingError::decode("create-post message has no id"));
        }

        let file_name = Self::blob_name(&payload);
        self.blobs
            .upload(&self.container, &payload.image_file.content, &file_name)
            .await
            .map_err(ProcessingError::domain_effect)?;
        info!(post_id = %payload.id, file_name = %file_name, "image uploaded");

        let record = PostRecord {
            partition_key: file_name,
            row_key: payload.id,
            image_caption: payload.image_caption,
        };
        self.table
            .upsert(&record.to_row())
            .await
            .map_err(ProcessingError::domain_effect)?;
        info!(post_id = %record.row_key, "post saved");

        Ok(())
    }
}
